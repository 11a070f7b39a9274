//! Register access layer.
//!
//! Everything above this module manipulates the clock hardware through the
//! [`Registers`] trait, never through raw pointers. The trait has two
//! backends: [`Mmio`], which maps each [`Reg`] to a device address taken
//! from a [`RegisterMap`] table, and an array-backed simulator used by the
//! unit tests. Register *layout* (addresses and gate masks) is data, so
//! porting to another L4 variant means supplying a different map, not
//! editing code.

use vcell::VolatileCell;

use crate::status::{Error, Result};

/// The 32-bit control/status words this crate touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    /// RCC clock control register (oscillator enable/ready bits, MSI range).
    Cr,
    /// RCC clock configuration register (system clock select/status).
    Cfgr,
    /// RCC PLL configuration register.
    Pllcfgr,
    /// RCC control/status register (LSI enable/ready).
    Csr,
    /// RCC backup domain control register (LSE, RTC source and enable).
    Bdcr,
    /// RCC APB1 peripheral clock enable register 1.
    Apb1Enr1,
    /// RCC APB2 peripheral clock enable register.
    Apb2Enr,
    /// PWR control register 1 (backup domain write protection).
    PwrCr1,
}

#[cfg(test)]
pub(crate) const REG_COUNT: usize = 8;

impl Reg {
    #[cfg(test)]
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// Read-modify-write access to the clock control hardware.
///
/// Implementations only move bits; all sequencing policy lives in the
/// callers.
pub trait Registers {
    /// Reads the current value of `reg`.
    fn read(&self, reg: Reg) -> u32;

    /// Writes `value` to `reg`.
    fn write(&self, reg: Reg, value: u32);

    /// Read-modify-write of `reg`.
    fn modify(&self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        self.write(reg, f(self.read(reg)));
    }

    /// Sets every bit of `mask` in `reg`.
    fn set_bits(&self, reg: Reg, mask: u32) {
        self.modify(reg, |w| w | mask);
    }

    /// Clears every bit of `mask` in `reg`.
    fn clear_bits(&self, reg: Reg, mask: u32) {
        self.modify(reg, |w| w & !mask);
    }

    /// Returns `true` if any bit of `mask` is set in `reg`.
    fn any_set(&self, reg: Reg, mask: u32) -> bool {
        self.read(reg) & mask != 0
    }
}

/// Polls `reg` until every bit of `mask` matches `set`, giving up after
/// `timeout` read iterations.
///
/// The budget counts loop iterations, not wall-clock time; a budget of zero
/// fails without touching the hardware.
pub(crate) fn wait_mask<R: Registers>(
    regs: &R,
    reg: Reg,
    mask: u32,
    set: bool,
    timeout: u32,
) -> Result {
    let mut budget = timeout;
    while budget > 0 {
        if regs.any_set(reg, mask) == set {
            return Ok(());
        }
        budget -= 1;
    }
    Err(Error::Timeout)
}

/// Device-specific register addresses and gate masks.
///
/// One `const` table per supported MCU variant; see [`STM32L4X6`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterMap {
    /// Address of RCC_CR.
    pub cr: usize,
    /// Address of RCC_CFGR.
    pub cfgr: usize,
    /// Address of RCC_PLLCFGR.
    pub pllcfgr: usize,
    /// Address of RCC_CSR.
    pub csr: usize,
    /// Address of RCC_BDCR.
    pub bdcr: usize,
    /// Address of RCC_APB1ENR1.
    pub apb1enr1: usize,
    /// Address of RCC_APB2ENR.
    pub apb2enr: usize,
    /// Address of PWR_CR1.
    pub pwr_cr1: usize,
}

impl RegisterMap {
    pub(crate) const fn addr(&self, reg: Reg) -> usize {
        match reg {
            Reg::Cr => self.cr,
            Reg::Cfgr => self.cfgr,
            Reg::Pllcfgr => self.pllcfgr,
            Reg::Csr => self.csr,
            Reg::Bdcr => self.bdcr,
            Reg::Apb1Enr1 => self.apb1enr1,
            Reg::Apb2Enr => self.apb2enr,
            Reg::PwrCr1 => self.pwr_cr1,
        }
    }
}

/// Register map for the STM32L4x6 line (RCC at `0x4002_1000`, PWR at
/// `0x4000_7000`).
pub const STM32L4X6: RegisterMap = RegisterMap {
    cr: 0x4002_1000,
    cfgr: 0x4002_1008,
    pllcfgr: 0x4002_100C,
    csr: 0x4002_1094,
    bdcr: 0x4002_1090,
    apb1enr1: 0x4002_1058,
    apb2enr: 0x4002_1060,
    pwr_cr1: 0x4000_7000,
};

/// Memory-mapped backend over [`VolatileCell`].
pub struct Mmio {
    map: RegisterMap,
}

impl Mmio {
    /// Creates a backend over the given register map.
    ///
    /// # Safety
    ///
    /// The caller must guarantee the addresses in `map` are valid clock
    /// control registers for the running device and that no other code
    /// performs conflicting read-modify-write accesses to them.
    pub const unsafe fn new(map: RegisterMap) -> Self {
        Mmio { map }
    }

    fn cell(&self, reg: Reg) -> &VolatileCell<u32> {
        // NOTE(unsafe) the map is vouched for by the `Mmio::new` caller
        unsafe { &*(self.map.addr(reg) as *const VolatileCell<u32>) }
    }
}

impl Registers for Mmio {
    fn read(&self, reg: Reg) -> u32 {
        self.cell(reg).get()
    }

    fn write(&self, reg: Reg, value: u32) {
        self.cell(reg).set(value);
        if matches!(reg, Reg::Apb1Enr1 | Reg::Apb2Enr) {
            // Stall the pipeline so a peripheral access issued right after
            // the gate write sees the clock running (erratum 2.2.1).
            cortex_m::asm::dsb();
        }
    }
}

/// Bit-field masks and shifts for the STM32L4x6 clock registers.
pub mod bits {
    /// RCC_CR: MSI oscillator enable.
    pub const CR_MSION: u32 = 1 << 0;
    /// RCC_CR: MSI oscillator ready.
    pub const CR_MSIRDY: u32 = 1 << 1;
    /// RCC_CR: MSI range selected from `CR_MSIRANGE` (rather than CSR).
    pub const CR_MSIRGSEL: u32 = 1 << 3;
    /// RCC_CR: MSI frequency range field.
    pub const CR_MSIRANGE_MASK: u32 = 0xF << 4;
    pub const CR_MSIRANGE_POS: u32 = 4;
    /// RCC_CR: HSE oscillator enable.
    pub const CR_HSEON: u32 = 1 << 16;
    /// RCC_CR: HSE oscillator ready.
    pub const CR_HSERDY: u32 = 1 << 17;
    /// RCC_CR: HSE crystal bypass.
    pub const CR_HSEBYP: u32 = 1 << 18;
    /// RCC_CR: main PLL enable.
    pub const CR_PLLON: u32 = 1 << 24;
    /// RCC_CR: main PLL ready.
    pub const CR_PLLRDY: u32 = 1 << 25;

    /// RCC_CFGR: system clock source select.
    pub const CFGR_SW_MASK: u32 = 0b11;
    pub const CFGR_SW_POS: u32 = 0;
    /// RCC_CFGR: system clock source status (hardware confirmation).
    pub const CFGR_SWS_MASK: u32 = 0b11 << 2;
    pub const CFGR_SWS_POS: u32 = 2;

    /// RCC_PLLCFGR: PLL input source.
    pub const PLLCFGR_PLLSRC_MASK: u32 = 0b11;
    pub const PLLCFGR_PLLSRC_POS: u32 = 0;
    /// RCC_PLLCFGR: input divider M (field value is `m - 1`).
    pub const PLLCFGR_PLLM_MASK: u32 = 0b111 << 4;
    pub const PLLCFGR_PLLM_POS: u32 = 4;
    /// RCC_PLLCFGR: feedback multiplier N.
    pub const PLLCFGR_PLLN_MASK: u32 = 0x7F << 8;
    pub const PLLCFGR_PLLN_POS: u32 = 8;
    /// RCC_PLLCFGR: PLLCLK (R) output enable.
    pub const PLLCFGR_PLLREN: u32 = 1 << 24;
    /// RCC_PLLCFGR: output divider R (field value is `r / 2 - 1`).
    pub const PLLCFGR_PLLR_MASK: u32 = 0b11 << 25;
    pub const PLLCFGR_PLLR_POS: u32 = 25;

    /// RCC_CSR: LSI oscillator enable.
    pub const CSR_LSION: u32 = 1 << 0;
    /// RCC_CSR: LSI oscillator ready.
    pub const CSR_LSIRDY: u32 = 1 << 1;

    /// RCC_BDCR: LSE oscillator enable.
    pub const BDCR_LSEON: u32 = 1 << 0;
    /// RCC_BDCR: LSE oscillator ready.
    pub const BDCR_LSERDY: u32 = 1 << 1;
    /// RCC_BDCR: LSE crystal bypass.
    pub const BDCR_LSEBYP: u32 = 1 << 2;
    /// RCC_BDCR: LSE drive strength field.
    pub const BDCR_LSEDRV_MASK: u32 = 0b11 << 3;
    pub const BDCR_LSEDRV_POS: u32 = 3;
    /// RCC_BDCR: RTC clock source select.
    pub const BDCR_RTCSEL_MASK: u32 = 0b11 << 8;
    pub const BDCR_RTCSEL_POS: u32 = 8;
    /// RCC_BDCR: RTC clock enable.
    pub const BDCR_RTCEN: u32 = 1 << 15;

    /// RCC_APB1ENR1: power interface clock enable. Doubles as the APB1
    /// bridge gate for backup-domain access.
    pub const APB1ENR1_PWREN: u32 = 1 << 28;
    /// RCC_APB1ENR1: RTC APB clock enable.
    pub const APB1ENR1_RTCAPBEN: u32 = 1 << 10;

    /// RCC_APB2ENR: system configuration controller clock enable. Doubles
    /// as the APB2 bridge gate.
    pub const APB2ENR_SYSCFGEN: u32 = 1 << 0;

    /// PWR_CR1: disable backup domain write protection.
    pub const PWR_CR1_DBP: u32 = 1 << 8;
}

#[cfg(test)]
pub(crate) mod sim {
    //! Array-backed register simulator.
    //!
    //! Mirrors the hardware behaviour the polling code relies on: a ready
    //! flag follows its enable bit (unless the oscillator is marked stuck)
    //! and the SWS status field follows the SW selector. Per-register read
    //! counters make the iteration-budget contract observable.

    use core::cell::Cell;

    use super::{bits, Reg, Registers, REG_COUNT};

    /// Per-oscillator fault-injection bits, see [`SimRegs::stick`] and
    /// [`SimRegs::hold`].
    pub const MSI: u32 = 1 << 0;
    pub const HSE: u32 = 1 << 1;
    pub const LSI: u32 = 1 << 2;
    pub const LSE: u32 = 1 << 3;
    pub const PLL: u32 = 1 << 4;
    /// The SWS status field, for a switch that never confirms.
    pub const SWS: u32 = 1 << 5;

    pub struct SimRegs {
        words: [Cell<u32>; REG_COUNT],
        stuck: Cell<u32>,
        held: Cell<u32>,
        reads: [Cell<u32>; REG_COUNT],
    }

    impl SimRegs {
        pub fn new() -> Self {
            const ZERO: Cell<u32> = Cell::new(0);
            SimRegs {
                words: [ZERO; REG_COUNT],
                stuck: Cell::new(0),
                held: Cell::new(0),
                reads: [ZERO; REG_COUNT],
            }
        }

        /// Marks oscillators whose ready flag must never assert.
        pub fn stick(&self, mask: u32) {
            self.stuck.set(self.stuck.get() | mask);
        }

        /// Marks oscillators whose ready flag never clears once set, for
        /// teardown-timeout scenarios.
        pub fn hold(&self, mask: u32) {
            self.held.set(self.held.get() | mask);
        }

        pub fn read_count(&self, reg: Reg) -> u32 {
            self.reads[reg.index()].get()
        }

        pub fn reset_read_counts(&self) {
            for counter in &self.reads {
                counter.set(0);
            }
        }

        fn mirror_ready(&self, reg: Reg, on: u32, rdy: u32, osc: u32) {
            let cell = &self.words[reg.index()];
            let val = cell.get();
            if val & on != 0 {
                if self.stuck.get() & osc == 0 {
                    cell.set(val | rdy);
                }
            } else if self.held.get() & osc == 0 {
                cell.set(val & !rdy);
            }
        }
    }

    impl Registers for SimRegs {
        fn read(&self, reg: Reg) -> u32 {
            let i = reg.index();
            self.reads[i].set(self.reads[i].get() + 1);
            self.words[i].get()
        }

        fn write(&self, reg: Reg, value: u32) {
            self.words[reg.index()].set(value);
            match reg {
                Reg::Cr => {
                    self.mirror_ready(reg, bits::CR_MSION, bits::CR_MSIRDY, MSI);
                    self.mirror_ready(reg, bits::CR_HSEON, bits::CR_HSERDY, HSE);
                    self.mirror_ready(reg, bits::CR_PLLON, bits::CR_PLLRDY, PLL);
                }
                Reg::Csr => {
                    self.mirror_ready(reg, bits::CSR_LSION, bits::CSR_LSIRDY, LSI);
                }
                Reg::Bdcr => {
                    self.mirror_ready(reg, bits::BDCR_LSEON, bits::BDCR_LSERDY, LSE);
                }
                Reg::Cfgr => {
                    if self.stuck.get() & SWS == 0 {
                        let cell = &self.words[reg.index()];
                        let val = cell.get();
                        let sw = (val & bits::CFGR_SW_MASK) >> bits::CFGR_SW_POS;
                        let val = (val & !bits::CFGR_SWS_MASK) | (sw << bits::CFGR_SWS_POS);
                        cell.set(val);
                    }
                }
                _ => {}
            }
        }
    }

    #[test]
    fn ready_follows_enable() {
        let regs = SimRegs::new();
        regs.set_bits(Reg::Cr, bits::CR_MSION);
        assert!(regs.any_set(Reg::Cr, bits::CR_MSIRDY));
        regs.clear_bits(Reg::Cr, bits::CR_MSION);
        assert!(!regs.any_set(Reg::Cr, bits::CR_MSIRDY));
    }

    #[test]
    fn stuck_oscillator_never_ready() {
        let regs = SimRegs::new();
        regs.stick(HSE);
        regs.set_bits(Reg::Cr, bits::CR_HSEON);
        assert!(!regs.any_set(Reg::Cr, bits::CR_HSERDY));
    }
}

#[cfg(test)]
mod tests {
    use super::sim::SimRegs;
    use super::{wait_mask, Reg, Registers};
    use crate::status::Error;

    #[test]
    fn wait_mask_spends_exactly_the_budget() {
        let regs = SimRegs::new();
        // Bit 9 of CFGR is never set by the simulator.
        for budget in 1..5 {
            regs.reset_read_counts();
            assert_eq!(
                wait_mask(&regs, Reg::Cfgr, 1 << 9, true, budget),
                Err(Error::Timeout)
            );
            assert_eq!(regs.read_count(Reg::Cfgr), budget);
        }
    }

    #[test]
    fn wait_mask_zero_budget_fails_without_reading() {
        let regs = SimRegs::new();
        assert_eq!(
            wait_mask(&regs, Reg::Cfgr, 1 << 9, true, 0),
            Err(Error::Timeout)
        );
        assert_eq!(regs.read_count(Reg::Cfgr), 0);
    }

    #[test]
    fn wait_mask_returns_early_when_satisfied() {
        let regs = SimRegs::new();
        regs.write(Reg::Csr, 1 << 5);
        assert_eq!(wait_mask(&regs, Reg::Csr, 1 << 5, true, 10), Ok(()));
        assert_eq!(regs.read_count(Reg::Csr), 1);
    }
}
