//! Time units
//!
//! Frequencies are expressed with the [`fugit`] `Hertz` type. The [`U32Ext`]
//! trait adds `.hz()`, `.khz()` and `.mhz()` to the `u32` primitive so call
//! sites read naturally:
//!
//! ```rust
//! use stm32l4xx_clk::time::U32Ext;
//!
//! let hse = 8.mhz();
//! assert_eq!(hse.to_Hz(), 8_000_000);
//! ```

pub use fugit::HertzU32 as Hertz;

/// Extension trait that adds convenience methods to the `u32` type
pub trait U32Ext {
    /// Wrap in `Hertz`
    fn hz(self) -> Hertz;

    /// Wrap in `Hertz`, interpreting the value as kilohertz
    fn khz(self) -> Hertz;

    /// Wrap in `Hertz`, interpreting the value as megahertz
    fn mhz(self) -> Hertz;
}

impl U32Ext for u32 {
    fn hz(self) -> Hertz {
        Hertz::from_raw(self)
    }

    fn khz(self) -> Hertz {
        Hertz::from_raw(self * 1_000)
    }

    fn mhz(self) -> Hertz {
        Hertz::from_raw(self * 1_000_000)
    }
}
