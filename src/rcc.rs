//! # Reset & Control Clock
//!
//! Start/stop sequencing for the five oscillators (MSI, HSE, LSI, LSE, PLL)
//! and the system clock switch. Every operation here drives hardware through
//! the [`Registers`](crate::reg::Registers) trait and reports back through
//! [`Result`]; nothing in this module keeps state between calls, the
//! oscillator state is whatever the enable/ready bits say it is.
//!
//! Timeouts are decrementing loop-iteration budgets supplied by the caller,
//! not wall-clock durations. A caller picks the budget from the known
//! start-up latency of the oscillator: LSE needs orders of magnitude more
//! iterations than MSI.
//!
//! Reference: RM0351, section 6 "Reset and clock control (RCC)".

use crate::reg::{bits, wait_mask, Reg, Registers};
use crate::status::{Error, Result};
use crate::time::Hertz;

pub mod pll;

pub use pll::{PllConfig, PllSource};

/// Highest permitted SYSCLK frequency, in Hz.
pub const MAX_SYSCLK_HZ: u32 = 80_000_000;

/// Lowest and highest permitted HSE crystal frequencies, in Hz.
pub const HSE_MIN_HZ: u32 = 4_000_000;
pub const HSE_MAX_HZ: u32 = 48_000_000;

/// Observable state of an oscillator, derived from its (enable, ready) bit
/// pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OscState {
    /// Enable clear, ready clear.
    Off,
    /// Enable set, ready not yet asserted.
    Starting,
    /// Enable set, ready asserted.
    Ready,
    /// Enable clear, ready still asserted.
    Stopping,
}

impl OscState {
    const fn from_bits(val: u32, on: u32, rdy: u32) -> Self {
        match (val & on != 0, val & rdy != 0) {
            (false, false) => OscState::Off,
            (true, false) => OscState::Starting,
            (true, true) => OscState::Ready,
            (false, true) => OscState::Stopping,
        }
    }
}

/// MSI frequency range codes (RCC_CR MSIRANGE).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum MsiRange {
    Range100k = 0x0,
    Range200k = 0x1,
    Range400k = 0x2,
    Range800k = 0x3,
    Range1M = 0x4,
    Range2M = 0x5,
    Range4M = 0x6,
    Range8M = 0x7,
    Range16M = 0x8,
    Range24M = 0x9,
    Range32M = 0xA,
    Range48M = 0xB,
}

impl Default for MsiRange {
    /// Reset value of the range field (4 MHz).
    fn default() -> Self {
        MsiRange::Range4M
    }
}

impl MsiRange {
    /// Validated conversion from a raw range code.
    pub const fn from_code(code: u32) -> Result<Self> {
        Ok(match code {
            0x0 => MsiRange::Range100k,
            0x1 => MsiRange::Range200k,
            0x2 => MsiRange::Range400k,
            0x3 => MsiRange::Range800k,
            0x4 => MsiRange::Range1M,
            0x5 => MsiRange::Range2M,
            0x6 => MsiRange::Range4M,
            0x7 => MsiRange::Range8M,
            0x8 => MsiRange::Range16M,
            0x9 => MsiRange::Range24M,
            0xA => MsiRange::Range32M,
            0xB => MsiRange::Range48M,
            _ => return Err(Error::InvalidParam),
        })
    }

    /// Frequency of this range.
    pub const fn freq(self) -> Hertz {
        Hertz::from_raw(msi_range_hz(self as u32))
    }
}

/// Frequency in Hz for a raw MSI range code; 0 for codes outside 0x0..=0xB.
pub const fn msi_range_hz(code: u32) -> u32 {
    match code {
        0x0 => 100_000,
        0x1 => 200_000,
        0x2 => 400_000,
        0x3 => 800_000,
        0x4 => 1_000_000,
        0x5 => 2_000_000,
        0x6 => 4_000_000,
        0x7 => 8_000_000,
        0x8 => 16_000_000,
        0x9 => 24_000_000,
        0xA => 32_000_000,
        0xB => 48_000_000,
        _ => 0,
    }
}

/// HSE oscillator configuration.
///
/// The crystal frequency is a board property; it cannot be read back from
/// the hardware, so it travels with the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HseConfig {
    /// Frequency of the external crystal or oscillator.
    pub freq: Hertz,
    /// Bypass the crystal driving circuitry (external oscillator input).
    pub bypass: bool,
}

/// LSE oscillator drive strength (RCC_BDCR LSEDRV).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum LseDrive {
    Low = 0b00,
    MediumLow = 0b01,
    MediumHigh = 0b10,
    High = 0b11,
}

/// LSE oscillator configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LseConfig {
    /// Bypass the crystal driving circuitry.
    pub bypass: bool,
    /// Drive strength; higher drives start faster but draw more current.
    pub drive: LseDrive,
}

impl Default for LseConfig {
    fn default() -> Self {
        LseConfig {
            bypass: false,
            drive: LseDrive::Low,
        }
    }
}

/// System clock source selector (RCC_CFGR SW/SWS encoding).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum SysclkSource {
    Msi = 0b00,
    Hse = 0b10,
    Pll = 0b11,
}

impl SysclkSource {
    const fn ready_flag(self) -> (Reg, u32) {
        match self {
            SysclkSource::Msi => (Reg::Cr, bits::CR_MSIRDY),
            SysclkSource::Hse => (Reg::Cr, bits::CR_HSERDY),
            SysclkSource::Pll => (Reg::Cr, bits::CR_PLLRDY),
        }
    }
}

//
// Oscillator state queries
//

pub fn msi_state<R: Registers>(regs: &R) -> OscState {
    OscState::from_bits(regs.read(Reg::Cr), bits::CR_MSION, bits::CR_MSIRDY)
}

pub fn hse_state<R: Registers>(regs: &R) -> OscState {
    OscState::from_bits(regs.read(Reg::Cr), bits::CR_HSEON, bits::CR_HSERDY)
}

pub fn pll_state<R: Registers>(regs: &R) -> OscState {
    OscState::from_bits(regs.read(Reg::Cr), bits::CR_PLLON, bits::CR_PLLRDY)
}

pub fn lsi_state<R: Registers>(regs: &R) -> OscState {
    OscState::from_bits(regs.read(Reg::Csr), bits::CSR_LSION, bits::CSR_LSIRDY)
}

pub fn lse_state<R: Registers>(regs: &R) -> OscState {
    OscState::from_bits(regs.read(Reg::Bdcr), bits::BDCR_LSEON, bits::BDCR_LSERDY)
}

/// Restart sequence shared by all oscillators: refuse a half-started
/// oscillator, disable and wait for ready to clear, apply the new
/// configuration, re-enable and wait for ready to assert.
fn restart<R, F>(regs: &R, reg: Reg, on: u32, rdy: u32, timeout: u32, configure: F) -> Result
where
    R: Registers,
    F: FnOnce(&R),
{
    let val = regs.read(reg);
    match OscState::from_bits(val, on, rdy) {
        OscState::Starting => return Err(Error::NotReady),
        OscState::Ready => {
            regs.clear_bits(reg, on);
            wait_mask(regs, reg, rdy, false, timeout)?;
        }
        OscState::Off | OscState::Stopping => {}
    }

    configure(regs);

    regs.set_bits(reg, on);
    wait_mask(regs, reg, rdy, true, timeout)
}

/// Stop sequence shared by all oscillators.
fn stop<R: Registers>(regs: &R, reg: Reg, on: u32, rdy: u32, timeout: u32) -> Result {
    regs.clear_bits(reg, on);
    wait_mask(regs, reg, rdy, false, timeout)
}

/// Configures and starts the MSI oscillator at the given range.
pub fn msi_init<R: Registers>(regs: &R, range: MsiRange, timeout: u32) -> Result {
    restart(regs, Reg::Cr, bits::CR_MSION, bits::CR_MSIRDY, timeout, |r| {
        r.modify(Reg::Cr, |w| {
            (w & !bits::CR_MSIRANGE_MASK)
                | ((range as u32) << bits::CR_MSIRANGE_POS)
                | bits::CR_MSIRGSEL
        });
    })
}

/// Stops the MSI oscillator.
pub fn msi_deinit<R: Registers>(regs: &R, timeout: u32) -> Result {
    stop(regs, Reg::Cr, bits::CR_MSION, bits::CR_MSIRDY, timeout)
}

/// Configures and starts the HSE oscillator.
///
/// The bypass bit may only change while HSE is off, which the restart
/// sequence guarantees.
pub fn hse_init<R: Registers>(regs: &R, cfg: HseConfig, timeout: u32) -> Result {
    let hz = cfg.freq.to_Hz();
    if !(HSE_MIN_HZ..=HSE_MAX_HZ).contains(&hz) {
        return Err(Error::InvalidParam);
    }
    restart(regs, Reg::Cr, bits::CR_HSEON, bits::CR_HSERDY, timeout, |r| {
        if cfg.bypass {
            r.set_bits(Reg::Cr, bits::CR_HSEBYP);
        } else {
            r.clear_bits(Reg::Cr, bits::CR_HSEBYP);
        }
    })
}

/// Stops the HSE oscillator.
pub fn hse_deinit<R: Registers>(regs: &R, timeout: u32) -> Result {
    stop(regs, Reg::Cr, bits::CR_HSEON, bits::CR_HSERDY, timeout)
}

/// Starts the LSI oscillator. No configuration beyond the enable bit.
pub fn lsi_init<R: Registers>(regs: &R, timeout: u32) -> Result {
    restart(regs, Reg::Csr, bits::CSR_LSION, bits::CSR_LSIRDY, timeout, |_| {})
}

/// Stops the LSI oscillator.
pub fn lsi_deinit<R: Registers>(regs: &R, timeout: u32) -> Result {
    stop(regs, Reg::Csr, bits::CSR_LSION, bits::CSR_LSIRDY, timeout)
}

/// Configures and starts the LSE oscillator.
///
/// The LSE lives in the backup domain; write protection (PWR_CR1 DBP) must
/// already be lifted, see [`backup_domain`](crate::backup_domain).
pub fn lse_init<R: Registers>(regs: &R, cfg: LseConfig, timeout: u32) -> Result {
    restart(regs, Reg::Bdcr, bits::BDCR_LSEON, bits::BDCR_LSERDY, timeout, |r| {
        r.modify(Reg::Bdcr, |w| {
            let w = (w & !bits::BDCR_LSEDRV_MASK) | ((cfg.drive as u32) << bits::BDCR_LSEDRV_POS);
            if cfg.bypass {
                w | bits::BDCR_LSEBYP
            } else {
                w & !bits::BDCR_LSEBYP
            }
        });
    })
}

/// Stops the LSE oscillator.
pub fn lse_deinit<R: Registers>(regs: &R, timeout: u32) -> Result {
    stop(regs, Reg::Bdcr, bits::BDCR_LSEON, bits::BDCR_LSERDY, timeout)
}

/// Validates `cfg` against `input` and starts the PLL.
///
/// All bounds are checked before the first register write; an invalid
/// configuration leaves the hardware untouched.
pub fn pll_init<R: Registers>(regs: &R, cfg: &PllConfig, input: Hertz, timeout: u32) -> Result {
    cfg.checked_output(input)?;
    restart(regs, Reg::Cr, bits::CR_PLLON, bits::CR_PLLRDY, timeout, |r| {
        r.write(Reg::Pllcfgr, cfg.to_bits());
    })
}

/// Stops the PLL.
pub fn pll_deinit<R: Registers>(regs: &R, timeout: u32) -> Result {
    stop(regs, Reg::Cr, bits::CR_PLLON, bits::CR_PLLRDY, timeout)
}

//
// System clock switch
//

/// Commits `source` as the system clock and waits for the hardware to
/// confirm the switch.
///
/// The target oscillator must already be ready, otherwise `NotReady` is
/// returned and the selector is left unchanged.
pub fn select_sysclk<R: Registers>(regs: &R, source: SysclkSource, timeout: u32) -> Result {
    let (reg, rdy) = source.ready_flag();
    if !regs.any_set(reg, rdy) {
        return Err(Error::NotReady);
    }

    regs.modify(Reg::Cfgr, |w| {
        (w & !bits::CFGR_SW_MASK) | ((source as u32) << bits::CFGR_SW_POS)
    });

    let mut budget = timeout;
    while budget > 0 {
        let sws = (regs.read(Reg::Cfgr) & bits::CFGR_SWS_MASK) >> bits::CFGR_SWS_POS;
        if sws == source as u32 {
            return Ok(());
        }
        budget -= 1;
    }
    Err(Error::Timeout)
}

/// Currently confirmed system clock source, `None` while an unmodeled
/// source (HSI16) is selected.
pub fn sysclk_source<R: Registers>(regs: &R) -> Option<SysclkSource> {
    match (regs.read(Reg::Cfgr) & bits::CFGR_SWS_MASK) >> bits::CFGR_SWS_POS {
        0b00 => Some(SysclkSource::Msi),
        0b10 => Some(SysclkSource::Hse),
        0b11 => Some(SysclkSource::Pll),
        _ => None,
    }
}

//
// Diagnostic queries (side-effect free, not gated by the tracker)
//

/// Currently configured MSI frequency.
pub fn msi_hz<R: Registers>(regs: &R) -> Hertz {
    let code = (regs.read(Reg::Cr) & bits::CR_MSIRANGE_MASK) >> bits::CR_MSIRANGE_POS;
    Hertz::from_raw(msi_range_hz(code))
}

/// Currently configured MSI range.
///
/// `InvalidParam` for range codes above 0xB, which the hardware reserves.
pub fn msi_range<R: Registers>(regs: &R) -> Result<MsiRange> {
    MsiRange::from_code((regs.read(Reg::Cr) & bits::CR_MSIRANGE_MASK) >> bits::CR_MSIRANGE_POS)
}

/// Currently configured PLL input source, `None` if no source is selected.
pub fn pll_source<R: Registers>(regs: &R) -> Option<PllSource> {
    PllSource::from_bits(regs.read(Reg::Pllcfgr) & bits::PLLCFGR_PLLSRC_MASK)
}

/// PLL output frequency computed from the live divider fields.
///
/// `hse` is the board's crystal frequency, needed when the PLL is fed from
/// HSE. Returns 0 Hz when no PLL source is configured.
pub fn pll_output_hz<R: Registers>(regs: &R, hse: Hertz) -> Hertz {
    let input = match pll_source(regs) {
        Some(PllSource::Msi) => msi_hz(regs),
        Some(PllSource::Hse) => hse,
        None => return Hertz::from_raw(0),
    };
    let cfgr = regs.read(Reg::Pllcfgr);
    let m = ((cfgr & bits::PLLCFGR_PLLM_MASK) >> bits::PLLCFGR_PLLM_POS) + 1;
    let n = (cfgr & bits::PLLCFGR_PLLN_MASK) >> bits::PLLCFGR_PLLN_POS;
    let r = (((cfgr & bits::PLLCFGR_PLLR_MASK) >> bits::PLLCFGR_PLLR_POS) + 1) * 2;
    Hertz::from_raw(pll::calculate_frequency(input.to_Hz(), m, n, r))
}

/// Current system clock frequency.
///
/// `hse` is the board's crystal frequency. Returns 0 Hz while an unmodeled
/// source is selected.
pub fn sysclk_hz<R: Registers>(regs: &R, hse: Hertz) -> Hertz {
    match sysclk_source(regs) {
        Some(SysclkSource::Msi) => msi_hz(regs),
        Some(SysclkSource::Hse) => hse,
        Some(SysclkSource::Pll) => pll_output_hz(regs, hse),
        None => Hertz::from_raw(0),
    }
}

/// Currently configured LSE drive strength.
pub fn lse_drive<R: Registers>(regs: &R) -> LseDrive {
    match (regs.read(Reg::Bdcr) & bits::BDCR_LSEDRV_MASK) >> bits::BDCR_LSEDRV_POS {
        0b00 => LseDrive::Low,
        0b01 => LseDrive::MediumLow,
        0b10 => LseDrive::MediumHigh,
        _ => LseDrive::High,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::{sim, sim::SimRegs};
    use crate::time::U32Ext;

    #[test]
    fn msi_init_applies_range_and_reports_ready() {
        let regs = SimRegs::new();
        assert_eq!(msi_init(&regs, MsiRange::Range16M, 10), Ok(()));
        assert_eq!(msi_state(&regs), OscState::Ready);
        assert_eq!(msi_hz(&regs), 16.mhz());
        assert_eq!(msi_range(&regs), Ok(MsiRange::Range16M));
    }

    #[test]
    fn msi_init_zero_budget_times_out_immediately() {
        let regs = SimRegs::new();
        regs.stick(sim::MSI);
        assert_eq!(msi_init(&regs, MsiRange::Range4M, 0), Err(Error::Timeout));
        // The enable was issued before the exhausted poll.
        assert_eq!(msi_state(&regs), OscState::Starting);
    }

    #[test]
    fn msi_init_poll_count_tracks_budget_exactly() {
        // With a stuck ready flag the enable poll runs for exactly the
        // supplied budget. The three extra CR reads are the state check and
        // the two read-modify-writes (range configuration, enable).
        for budget in 1..6 {
            let regs = SimRegs::new();
            regs.stick(sim::MSI);
            regs.reset_read_counts();
            assert_eq!(
                msi_init(&regs, MsiRange::Range4M, budget),
                Err(Error::Timeout)
            );
            assert_eq!(regs.read_count(Reg::Cr), budget + 3);
        }
    }

    #[test]
    fn msi_init_refuses_half_started_oscillator() {
        let regs = SimRegs::new();
        regs.stick(sim::MSI);
        let _ = msi_init(&regs, MsiRange::Range4M, 1);
        // Second init sees on-but-not-ready and must not reconfigure.
        assert_eq!(msi_init(&regs, MsiRange::Range48M, 10), Err(Error::NotReady));
    }

    #[test]
    fn msi_range_code_table() {
        let expected = [
            100_000, 200_000, 400_000, 800_000, 1_000_000, 2_000_000, 4_000_000, 8_000_000,
            16_000_000, 24_000_000, 32_000_000, 48_000_000,
        ];
        for (code, hz) in expected.iter().enumerate() {
            assert_eq!(msi_range_hz(code as u32), *hz);
        }
        assert_eq!(msi_range_hz(0xC), 0);
        assert_eq!(msi_range_hz(0xF), 0);
        assert_eq!(msi_range_hz(42), 0);
    }

    #[test]
    fn hse_init_rejects_out_of_range_crystal() {
        let regs = SimRegs::new();
        let cfg = HseConfig {
            freq: 50.mhz(),
            bypass: false,
        };
        assert_eq!(hse_init(&regs, cfg, 10), Err(Error::InvalidParam));
        assert_eq!(hse_state(&regs), OscState::Off);
    }

    #[test]
    fn hse_init_sets_bypass() {
        let regs = SimRegs::new();
        let cfg = HseConfig {
            freq: 8.mhz(),
            bypass: true,
        };
        assert_eq!(hse_init(&regs, cfg, 10), Ok(()));
        assert!(regs.any_set(Reg::Cr, bits::CR_HSEBYP));
        assert_eq!(hse_state(&regs), OscState::Ready);
    }

    #[test]
    fn lse_init_applies_drive_strength() {
        let regs = SimRegs::new();
        let cfg = LseConfig {
            bypass: false,
            drive: LseDrive::MediumHigh,
        };
        assert_eq!(lse_init(&regs, cfg, 10), Ok(()));
        assert_eq!(lse_drive(&regs), LseDrive::MediumHigh);
        assert_eq!(lse_state(&regs), OscState::Ready);
    }

    #[test]
    fn deinit_clears_enable_and_ready() {
        let regs = SimRegs::new();
        assert_eq!(lsi_init(&regs, 10), Ok(()));
        assert_eq!(lsi_state(&regs), OscState::Ready);
        assert_eq!(lsi_deinit(&regs, 10), Ok(()));
        assert_eq!(lsi_state(&regs), OscState::Off);
    }

    #[test]
    fn select_sysclk_requires_ready_source() {
        let regs = SimRegs::new();
        assert_eq!(
            select_sysclk(&regs, SysclkSource::Hse, 10),
            Err(Error::NotReady)
        );
        // Selector untouched.
        assert_eq!(sysclk_source(&regs), Some(SysclkSource::Msi));
    }

    #[test]
    fn select_sysclk_commits_and_confirms() {
        let regs = SimRegs::new();
        let cfg = HseConfig {
            freq: 8.mhz(),
            bypass: false,
        };
        assert_eq!(hse_init(&regs, cfg, 10), Ok(()));
        assert_eq!(select_sysclk(&regs, SysclkSource::Hse, 10), Ok(()));
        assert_eq!(sysclk_source(&regs), Some(SysclkSource::Hse));
        assert_eq!(sysclk_hz(&regs, 8.mhz()), 8.mhz());
    }

    #[test]
    fn select_sysclk_times_out_without_confirmation() {
        let regs = SimRegs::new();
        let cfg = HseConfig {
            freq: 8.mhz(),
            bypass: false,
        };
        assert_eq!(hse_init(&regs, cfg, 10), Ok(()));
        regs.stick(sim::SWS);
        assert_eq!(
            select_sysclk(&regs, SysclkSource::Hse, 5),
            Err(Error::Timeout)
        );
    }
}
