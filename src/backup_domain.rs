//! Backup domain and RTC clock configuration.
//!
//! The backup domain (LSE and RTC control bits) stays powered from V_BAT
//! and is write-protected; changing the RTC clock source takes a small
//! unlock dance: clock the power interface over APB1, lift the write
//! protection (PWR_CR1 DBP), reconfigure, then put everything back the way
//! it was found. Every early return restores the conditionally-enabled
//! APB1 gate and the protection bit to their exact pre-call state.

use crate::reg::{bits, Reg, Registers};
use crate::status::{Error, Result};

/// Extra reads of the enable register after setting PWREN, giving the
/// bridge clock time to start before the first PWR access.
const APB1_SETTLE_READS: u32 = 2;

/// RTC clock source selector (RCC_BDCR RTCSEL encoding).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum RtcSource {
    Lse = 0b01,
    Lsi = 0b10,
    /// HSE divided by 32.
    Hse = 0b11,
}

impl RtcSource {
    pub(crate) const fn ready_flag(self) -> (Reg, u32) {
        match self {
            RtcSource::Lse => (Reg::Bdcr, bits::BDCR_LSERDY),
            RtcSource::Lsi => (Reg::Csr, bits::CSR_LSIRDY),
            RtcSource::Hse => (Reg::Cr, bits::CR_HSERDY),
        }
    }
}

/// Currently selected RTC clock source, `None` when no source is selected.
pub fn rtc_source<R: Registers>(regs: &R) -> Option<RtcSource> {
    match (regs.read(Reg::Bdcr) & bits::BDCR_RTCSEL_MASK) >> bits::BDCR_RTCSEL_POS {
        0b01 => Some(RtcSource::Lse),
        0b10 => Some(RtcSource::Lsi),
        0b11 => Some(RtcSource::Hse),
        _ => None,
    }
}

/// Whether the RTC is clocked.
pub fn rtc_enabled<R: Registers>(regs: &R) -> bool {
    regs.any_set(Reg::Bdcr, bits::BDCR_RTCEN)
}

/// Saved pre-call state of the gates the unlock sequence touches.
struct Unlock {
    pwr_gate_was_on: bool,
    dbp_was_set: bool,
}

fn unlock<R: Registers>(regs: &R) -> Unlock {
    let pwr_gate_was_on = regs.any_set(Reg::Apb1Enr1, bits::APB1ENR1_PWREN);
    if !pwr_gate_was_on {
        regs.set_bits(Reg::Apb1Enr1, bits::APB1ENR1_PWREN);
        for _ in 0..APB1_SETTLE_READS {
            let _ = regs.read(Reg::Apb1Enr1);
        }
    }
    let dbp_was_set = regs.any_set(Reg::PwrCr1, bits::PWR_CR1_DBP);
    if !dbp_was_set {
        regs.set_bits(Reg::PwrCr1, bits::PWR_CR1_DBP);
    }
    Unlock {
        pwr_gate_was_on,
        dbp_was_set,
    }
}

fn relock<R: Registers>(regs: &R, saved: Unlock) {
    if !saved.dbp_was_set {
        regs.clear_bits(Reg::PwrCr1, bits::PWR_CR1_DBP);
    }
    if !saved.pwr_gate_was_on {
        regs.clear_bits(Reg::Apb1Enr1, bits::APB1ENR1_PWREN);
    }
}

/// Selects `source` as the RTC clock and enables the RTC.
///
/// The source oscillator must already be ready. An unready source rolls
/// the unlock sequence back cleanly and returns `NotReady`; the RTC stays
/// disabled and both the APB1 gate and the protection bit read exactly as
/// they did before the call.
pub fn enable_rtc<R: Registers>(regs: &R, source: RtcSource) -> Result {
    let saved = unlock(regs);

    regs.clear_bits(Reg::Bdcr, bits::BDCR_RTCEN);

    let (reg, rdy) = source.ready_flag();
    if !regs.any_set(reg, rdy) {
        relock(regs, saved);
        return Err(Error::NotReady);
    }

    regs.modify(Reg::Bdcr, |w| {
        (w & !bits::BDCR_RTCSEL_MASK)
            | ((source as u32) << bits::BDCR_RTCSEL_POS)
            | bits::BDCR_RTCEN
    });

    relock(regs, saved);
    Ok(())
}

/// Stops the RTC clock.
///
/// The source selection is left in place; RTCSEL only resets with the
/// backup domain itself.
pub fn disable_rtc<R: Registers>(regs: &R) -> Result {
    let saved = unlock(regs);
    regs.clear_bits(Reg::Bdcr, bits::BDCR_RTCEN);
    relock(regs, saved);
    Ok(())
}
