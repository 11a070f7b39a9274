//! Reference-counted clock/bus/peripheral usage tracking.
//!
//! [`ClockTree`] is the only way application code turns gated clock
//! resources on and off. Each resource carries a usage count; the first
//! [`acquire`](ClockTree::acquire) runs the hardware enable sequence, the
//! last [`release`](ClockTree::release) runs the teardown, and a resource
//! with outstanding dependents refuses to release at all. The dependency
//! topology is fixed:
//!
//! ```text
//! MSI/HSE ──► PLL ──┐
//! MSI/HSE ──────────┼──► SYS ──► AHB ──► APB1 ──► PWR
//! LSE/LSI/HSE ──┐   │                └──► APB2
//!               └───┴──► RTC ◄── APB1
//! ```
//!
//! The tree owns its register backend and is held by exactly one context;
//! exclusive access to the count table is enforced by `&mut self`. When the
//! tree must be shared with interrupt handlers, wrap every entry point in
//! `critical_section::with`.
//!
//! Pending oscillator configuration (MSI range, HSE/LSE setup, PLL
//! dividers, system clock source) is staged on the tree builder-style and
//! applied on the 0→1 acquire transition, so a configuration can only
//! change while nothing uses the resource.

use crate::backup_domain;
use crate::rcc::{
    self, HseConfig, LseConfig, MsiRange, PllConfig, PllSource, SysclkSource,
};
use crate::reg::{bits, Reg, Registers};
use crate::status::{Error, Result};
use crate::time::Hertz;

/// Gated oscillators and the system clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockId {
    Msi,
    Hse,
    Lsi,
    Lse,
    Pll,
    Sys,
}

const CLOCK_COUNT: usize = 6;

/// Peripheral interconnect domains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusId {
    Ahb,
    Apb1,
    Apb2,
}

const BUS_COUNT: usize = 3;

/// Tracked peripherals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeripheralId {
    Pwr,
    Rtc,
}

const PERIPH_COUNT: usize = 2;

/// A resource the tracker can acquire or release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resource {
    Clock(ClockId),
    Bus(BusId),
    Peripheral(PeripheralId),
}

/// The process-wide clock resource tracker.
///
/// Constructing the tree zeroes every count; construction consumes the
/// register backend, so there is exactly one tree per device and it lives
/// for the life of the firmware.
pub struct ClockTree<R: Registers> {
    regs: R,
    clocks: [u32; CLOCK_COUNT],
    buses: [u32; BUS_COUNT],
    periphs: [u32; PERIPH_COUNT],
    msi: MsiRange,
    hse: HseConfig,
    lse: LseConfig,
    pll: Option<PllConfig>,
    sys: SysclkSource,
    /// RTC source edge recorded at acquire time. Release debits this clock
    /// even if the hardware selector is rewritten while the RTC is held.
    rtc_clock: Option<ClockId>,
}

impl<R: Registers> ClockTree<R> {
    /// Creates the tracker with all counts at zero and reset-default
    /// pending configuration (MSI at 4 MHz feeding the system clock).
    ///
    /// Must run during bring-up before any acquire, with no oscillator
    /// assumed active.
    pub fn new(regs: R) -> Self {
        ClockTree {
            regs,
            clocks: [0; CLOCK_COUNT],
            buses: [0; BUS_COUNT],
            periphs: [0; PERIPH_COUNT],
            msi: MsiRange::default(),
            hse: HseConfig {
                freq: Hertz::from_raw(8_000_000),
                bypass: false,
            },
            lse: LseConfig::default(),
            pll: None,
            sys: SysclkSource::Msi,
            rtc_clock: None,
        }
    }

    /// Direct access to the register backend for ungated diagnostic reads.
    pub fn regs(&self) -> &R {
        &self.regs
    }

    //
    // Pending configuration. Each setter refuses to touch a live resource.
    //

    /// Stages the MSI range applied on the next MSI acquire.
    pub fn set_msi_range(&mut self, range: MsiRange) -> Result {
        if self.clock_count(ClockId::Msi) != 0 {
            return Err(Error::Busy);
        }
        self.msi = range;
        Ok(())
    }

    /// Stages the HSE crystal frequency and bypass mode.
    pub fn set_hse(&mut self, cfg: HseConfig) -> Result {
        if self.clock_count(ClockId::Hse) != 0 {
            return Err(Error::Busy);
        }
        self.hse = cfg;
        Ok(())
    }

    /// Stages the LSE bypass and drive strength.
    pub fn set_lse(&mut self, cfg: LseConfig) -> Result {
        if self.clock_count(ClockId::Lse) != 0 {
            return Err(Error::Busy);
        }
        self.lse = cfg;
        Ok(())
    }

    /// Stages the PLL divider set applied on the next PLL acquire.
    ///
    /// Bounds are checked here as well as on acquire, so a bad set is
    /// reported at the call site that made it.
    pub fn set_pll(&mut self, cfg: PllConfig) -> Result {
        if self.clock_count(ClockId::Pll) != 0 {
            return Err(Error::Busy);
        }
        cfg.validate()?;
        self.pll = Some(cfg);
        Ok(())
    }

    /// Stages the system clock source committed on the next SYS acquire.
    ///
    /// Live reselection is unsupported: switching sources is always a
    /// release/acquire cycle of SYS.
    pub fn set_sysclk_source(&mut self, source: SysclkSource) -> Result {
        if self.clock_count(ClockId::Sys) != 0 {
            return Err(Error::Busy);
        }
        self.sys = source;
        Ok(())
    }

    //
    // Count queries. Never fail; diagnostics only.
    //

    /// Usage count of a clock.
    pub fn clock_count(&self, id: ClockId) -> u32 {
        self.clocks[id as usize]
    }

    /// Usage count of a bus.
    pub fn bus_count(&self, id: BusId) -> u32 {
        self.buses[id as usize]
    }

    /// Usage count of a peripheral.
    pub fn periph_count(&self, id: PeripheralId) -> u32 {
        self.periphs[id as usize]
    }

    //
    // Diagnostic frequency/source queries (read hardware, not counts).
    //

    /// Current system clock frequency.
    pub fn sysclk_hz(&self) -> Hertz {
        rcc::sysclk_hz(&self.regs, self.hse.freq)
    }

    /// Hardware-confirmed system clock source.
    pub fn sysclk_source(&self) -> Option<SysclkSource> {
        rcc::sysclk_source(&self.regs)
    }

    /// Configured PLL input source.
    pub fn pll_source(&self) -> Option<PllSource> {
        rcc::pll_source(&self.regs)
    }

    /// PLL output frequency from the live divider fields.
    pub fn pll_output_hz(&self) -> Hertz {
        rcc::pll_output_hz(&self.regs, self.hse.freq)
    }

    /// Currently selected RTC clock source.
    pub fn rtc_source(&self) -> Option<backup_domain::RtcSource> {
        backup_domain::rtc_source(&self.regs)
    }

    //
    // Acquire / release
    //

    /// Declares a dependency on `target`, enabling the hardware on the
    /// first acquisition.
    ///
    /// Each logical consumer holds at most one acquisition per resource;
    /// a second top-level acquire fails with `AlreadyAcquired`. The
    /// upstream resources `target` depends on must already be acquired
    /// (`DependentClockNotConfigured` otherwise — nothing is changed on
    /// that path). If the enable sequence times out, the count increments
    /// are rolled back before the error is returned.
    pub fn acquire(&mut self, target: Resource, timeout: u32) -> Result {
        if self.count(target) != 0 {
            return Err(Error::AlreadyAcquired);
        }

        let ups = self.upstreams(target)?;
        for up in ups.iter().flatten() {
            if self.count(*up) == 0 {
                return Err(Error::DependentClockNotConfigured);
            }
        }

        for up in ups.iter().flatten() {
            *self.count_mut(*up) += 1;
        }
        *self.count_mut(target) += 1;

        if let Err(e) = self.enable(target, timeout) {
            // Hardware may be mid-transition; the bookkeeping is undone so
            // the caller can retry with a fresh budget.
            *self.count_mut(target) -= 1;
            for up in ups.iter().flatten() {
                *self.count_mut(*up) -= 1;
            }
            return Err(e);
        }

        if let (Resource::Peripheral(PeripheralId::Rtc), Some(Resource::Clock(src))) =
            (target, ups[0])
        {
            self.rtc_clock = Some(src);
        }
        Ok(())
    }

    /// Drops a dependency on `target`, disabling the hardware on the last
    /// release.
    ///
    /// Fails with `DependenciesNotReleased` while other resources still
    /// hold `target`. On the 1→0 transition the upstream counts are
    /// decremented first; an upstream already at its floor indicates a
    /// tracking inconsistency and fails with `DependentClockNotConfigured`
    /// rather than underflowing. A teardown `Timeout` propagates with the
    /// counts already cleared — teardown is considered requested and is
    /// not retried automatically.
    pub fn release(&mut self, target: Resource, timeout: u32) -> Result {
        match self.count(target) {
            0 => Err(Error::AlreadyReleased),
            1 => {
                let ups = self.upstreams(target)?;
                for up in ups.iter().flatten() {
                    // The upstream owes one count to its own acquirer and
                    // one to us.
                    if self.count(*up) < 2 {
                        return Err(Error::DependentClockNotConfigured);
                    }
                }
                for up in ups.iter().flatten() {
                    *self.count_mut(*up) -= 1;
                }
                *self.count_mut(target) = 0;
                if matches!(target, Resource::Peripheral(PeripheralId::Rtc)) {
                    self.rtc_clock = None;
                }
                self.disable(target, timeout)
            }
            _ => Err(Error::DependenciesNotReleased),
        }
    }

    fn count(&self, target: Resource) -> u32 {
        match target {
            Resource::Clock(id) => self.clocks[id as usize],
            Resource::Bus(id) => self.buses[id as usize],
            Resource::Peripheral(id) => self.periphs[id as usize],
        }
    }

    fn count_mut(&mut self, target: Resource) -> &mut u32 {
        match target {
            Resource::Clock(id) => &mut self.clocks[id as usize],
            Resource::Bus(id) => &mut self.buses[id as usize],
            Resource::Peripheral(id) => &mut self.periphs[id as usize],
        }
    }

    /// Resolves the static dependency edges for `target`.
    ///
    /// PLL and SYS resolve against the staged configuration (that is what
    /// the enable sequence will commit); RTC resolves its source from the
    /// hardware selector written by
    /// [`backup_domain::enable_rtc`](crate::backup_domain::enable_rtc).
    fn upstreams(&self, target: Resource) -> Result<[Option<Resource>; 2]> {
        Ok(match target {
            Resource::Clock(ClockId::Msi)
            | Resource::Clock(ClockId::Hse)
            | Resource::Clock(ClockId::Lsi)
            | Resource::Clock(ClockId::Lse) => [None, None],
            Resource::Clock(ClockId::Pll) => {
                let cfg = self.pll.ok_or(Error::ClockConfig)?;
                let src = match cfg.source {
                    PllSource::Msi => ClockId::Msi,
                    PllSource::Hse => ClockId::Hse,
                };
                [Some(Resource::Clock(src)), None]
            }
            Resource::Clock(ClockId::Sys) => {
                let src = match self.sys {
                    SysclkSource::Msi => ClockId::Msi,
                    SysclkSource::Hse => ClockId::Hse,
                    SysclkSource::Pll => ClockId::Pll,
                };
                [Some(Resource::Clock(src)), None]
            }
            Resource::Bus(BusId::Ahb) => [Some(Resource::Clock(ClockId::Sys)), None],
            Resource::Bus(BusId::Apb1) | Resource::Bus(BusId::Apb2) => {
                [Some(Resource::Bus(BusId::Ahb)), None]
            }
            Resource::Peripheral(PeripheralId::Pwr) => [Some(Resource::Bus(BusId::Apb1)), None],
            Resource::Peripheral(PeripheralId::Rtc) => {
                // While the RTC is held the edge recorded at acquire time
                // wins; the hardware selector is only consulted for a fresh
                // acquire.
                let src = match self.rtc_clock {
                    Some(src) => src,
                    None => match backup_domain::rtc_source(&self.regs) {
                        Some(backup_domain::RtcSource::Lse) => ClockId::Lse,
                        Some(backup_domain::RtcSource::Lsi) => ClockId::Lsi,
                        Some(backup_domain::RtcSource::Hse) => ClockId::Hse,
                        None => return Err(Error::DependentClockNotConfigured),
                    },
                };
                [Some(Resource::Clock(src)), Some(Resource::Bus(BusId::Apb1))]
            }
        })
    }

    fn enable(&mut self, target: Resource, timeout: u32) -> Result {
        match target {
            Resource::Clock(ClockId::Msi) => rcc::msi_init(&self.regs, self.msi, timeout),
            Resource::Clock(ClockId::Hse) => rcc::hse_init(&self.regs, self.hse, timeout),
            Resource::Clock(ClockId::Lsi) => rcc::lsi_init(&self.regs, timeout),
            Resource::Clock(ClockId::Lse) => rcc::lse_init(&self.regs, self.lse, timeout),
            Resource::Clock(ClockId::Pll) => {
                let cfg = self.pll.ok_or(Error::ClockConfig)?;
                let input = match cfg.source {
                    PllSource::Msi => rcc::msi_hz(&self.regs),
                    PllSource::Hse => self.hse.freq,
                };
                rcc::pll_init(&self.regs, &cfg, input, timeout)
            }
            Resource::Clock(ClockId::Sys) => rcc::select_sysclk(&self.regs, self.sys, timeout),
            // AHB runs off SYSCLK directly, no gate bit.
            Resource::Bus(BusId::Ahb) => Ok(()),
            Resource::Bus(BusId::Apb1) => {
                self.regs.set_bits(Reg::Apb1Enr1, bits::APB1ENR1_PWREN);
                Ok(())
            }
            Resource::Bus(BusId::Apb2) => {
                self.regs.set_bits(Reg::Apb2Enr, bits::APB2ENR_SYSCFGEN);
                Ok(())
            }
            // The APB1 upstream already set PWREN; nothing further to gate.
            Resource::Peripheral(PeripheralId::Pwr) => Ok(()),
            Resource::Peripheral(PeripheralId::Rtc) => {
                self.regs.set_bits(Reg::Apb1Enr1, bits::APB1ENR1_RTCAPBEN);
                Ok(())
            }
        }
    }

    fn disable(&mut self, target: Resource, timeout: u32) -> Result {
        match target {
            Resource::Clock(ClockId::Msi) => rcc::msi_deinit(&self.regs, timeout),
            Resource::Clock(ClockId::Hse) => rcc::hse_deinit(&self.regs, timeout),
            Resource::Clock(ClockId::Lsi) => rcc::lsi_deinit(&self.regs, timeout),
            Resource::Clock(ClockId::Lse) => rcc::lse_deinit(&self.regs, timeout),
            Resource::Clock(ClockId::Pll) => rcc::pll_deinit(&self.regs, timeout),
            // The system clock has no off switch; releasing SYS only drops
            // the reference on its source so the source can change hands.
            Resource::Clock(ClockId::Sys) => Ok(()),
            Resource::Bus(BusId::Ahb) => Ok(()),
            Resource::Bus(BusId::Apb1) => {
                self.regs.clear_bits(Reg::Apb1Enr1, bits::APB1ENR1_PWREN);
                Ok(())
            }
            Resource::Bus(BusId::Apb2) => {
                self.regs.clear_bits(Reg::Apb2Enr, bits::APB2ENR_SYSCFGEN);
                Ok(())
            }
            // PWREN is APB1's gate bit; the bus clears it on its own last
            // release. Clearing it here would cut the bridge clock while
            // the bus count is still non-zero.
            Resource::Peripheral(PeripheralId::Pwr) => Ok(()),
            Resource::Peripheral(PeripheralId::Rtc) => {
                self.regs.clear_bits(Reg::Apb1Enr1, bits::APB1ENR1_RTCAPBEN);
                Ok(())
            }
        }
    }
}
