//! # Clock and power-domain resource management for the STM32L4 family
//!
//! This crate owns the clock tree of a battery-powered STM32L4 node: it
//! starts, stops and re-sources the oscillators (MSI, HSE, LSI, LSE, PLL),
//! switches the system clock between them, gates the peripheral buses and
//! keeps a usage count per clock, bus and peripheral so an oscillator is
//! only powered down once nothing depends on it anymore. The typical duty
//! cycle on such a node is MSI for sensing and HSE+PLL while the radio is
//! up, so sources change hands constantly and use-after-release bugs are
//! easy to write without the bookkeeping.
//!
//! # Usage
//!
//! All gated resources go through [`tracker::ClockTree`]; application code
//! never touches the enable registers directly. The first acquire of a
//! resource turns the hardware on, the last release turns it off, and a
//! release out of dependency order is refused:
//!
//! ```rust
//! use stm32l4xx_clk::prelude::*;
//! use stm32l4xx_clk::rcc::{PllConfig, PllSource, SysclkSource};
//! use stm32l4xx_clk::reg::{Mmio, STM32L4X6};
//! use stm32l4xx_clk::tracker::{ClockId, ClockTree, Resource};
//!
//! # fn run() -> stm32l4xx_clk::status::Result {
//! // SAFETY: this is the only owner of the clock control registers.
//! let regs = unsafe { Mmio::new(STM32L4X6) };
//! let mut tree = ClockTree::new(regs);
//!
//! // 4 MHz MSI × 40 / 2 = 80 MHz system clock for the radio window.
//! tree.set_pll(PllConfig { source: PllSource::Msi, m: 1, n: 40, r: 2 })?;
//! tree.set_sysclk_source(SysclkSource::Pll)?;
//!
//! tree.acquire(Resource::Clock(ClockId::Msi), 1_000)?;
//! tree.acquire(Resource::Clock(ClockId::Pll), 10_000)?;
//! tree.acquire(Resource::Clock(ClockId::Sys), 1_000)?;
//! assert_eq!(tree.sysclk_hz().to_Hz(), 80_000_000);
//!
//! // Radio window over: walk back down to MSI.
//! tree.release(Resource::Clock(ClockId::Sys), 1_000)?;
//! tree.set_sysclk_source(SysclkSource::Msi)?;
//! tree.acquire(Resource::Clock(ClockId::Sys), 1_000)?;
//! tree.release(Resource::Clock(ClockId::Pll), 1_000)?;
//! # Ok(())
//! # }
//! ```
//!
//! Timeouts everywhere are loop-iteration budgets, not durations; pick them
//! from the oscillator start-up times in the datasheet.
//!
//! Diagnostic queries (current source, frequency, drive strength) are
//! side-effect-free reads and are not gated; see the free functions in
//! [`rcc`] and [`backup_domain`].
//!
//! The register layout is a data table ([`reg::RegisterMap`]), so other L4
//! variants port by supplying addresses, and the unit tests run against a
//! simulated backend on the host.

#![no_std]

pub mod backup_domain;
pub mod prelude;
pub mod rcc;
pub mod reg;
pub mod status;
pub mod time;
pub mod tracker;
