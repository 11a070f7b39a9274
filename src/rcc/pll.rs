//! Phase Locked Loop configuration
//!
//! The main PLL multiplies MSI or HSE up to the 80 MHz system clock used
//! while the radio is active. Every bound is checked before a single
//! register bit moves; see [`PllConfig::checked_output`].
//!
//! `f_out = f_in × N / M / R` with M ∈ [1,8], N ∈ [8,86] and
//! R ∈ {2,4,6,8} (RM0351, RCC_PLLCFGR).

use crate::reg::bits;
use crate::status::{Error, Result};
use crate::time::Hertz;

use super::MAX_SYSCLK_HZ;

/// PLL input source (RCC_PLLCFGR PLLSRC encoding).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum PllSource {
    Msi = 0b01,
    Hse = 0b11,
}

impl PllSource {
    pub(crate) const fn from_bits(val: u32) -> Option<Self> {
        match val {
            0b01 => Some(PllSource::Msi),
            0b11 => Some(PllSource::Hse),
            _ => None,
        }
    }
}

/// Main PLL divider/multiplier set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllConfig {
    /// Input oscillator.
    pub source: PllSource,
    /// Input divider M, 1..=8.
    pub m: u32,
    /// Feedback multiplier N, 8..=86.
    pub n: u32,
    /// Output divider R, one of 2, 4, 6 or 8.
    pub r: u32,
}

impl PllConfig {
    /// Checks the divider/multiplier bounds.
    pub const fn validate(&self) -> Result {
        if self.m < 1 || self.m > 8 {
            return Err(Error::InvalidParam);
        }
        if self.n < 8 || self.n > 86 {
            return Err(Error::InvalidParam);
        }
        if self.r != 2 && self.r != 4 && self.r != 6 && self.r != 8 {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }

    /// Validates the configuration against `input` and returns the output
    /// frequency, rejecting anything above the 80 MHz device limit.
    pub fn checked_output(&self, input: Hertz) -> Result<Hertz> {
        self.validate()?;
        let out = calculate_frequency(input.to_Hz(), self.m, self.n, self.r);
        if out > MAX_SYSCLK_HZ {
            return Err(Error::ClockConfig);
        }
        Ok(Hertz::from_raw(out))
    }

    /// RCC_PLLCFGR image for this configuration, R output enabled.
    ///
    /// Only meaningful for a validated configuration; the field encodings
    /// are `m - 1` and `r / 2 - 1`.
    pub(crate) fn to_bits(&self) -> u32 {
        ((self.source as u32) << bits::PLLCFGR_PLLSRC_POS)
            | ((self.m - 1) << bits::PLLCFGR_PLLM_POS)
            | (self.n << bits::PLLCFGR_PLLN_POS)
            | ((self.r / 2 - 1) << bits::PLLCFGR_PLLR_POS)
            | bits::PLLCFGR_PLLREN
    }
}

/// PLL output frequency in Hz for the given input and divider set.
///
/// Widens internally; 48 MHz × 86 overflows `u32`.
pub const fn calculate_frequency(input_hz: u32, m: u32, n: u32, r: u32) -> u32 {
    (input_hz as u64 * n as u64 / m as u64 / r as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::U32Ext;

    #[test]
    fn frequency_computation() {
        assert_eq!(calculate_frequency(4_000_000, 1, 40, 2), 80_000_000);
        assert_eq!(calculate_frequency(16_000_000, 2, 20, 4), 40_000_000);
    }

    #[test]
    fn frequency_computation_does_not_overflow() {
        assert_eq!(calculate_frequency(48_000_000, 8, 86, 2), 258_000_000);
    }

    #[test]
    fn validate_bounds() {
        let good = PllConfig {
            source: PllSource::Msi,
            m: 1,
            n: 40,
            r: 2,
        };
        assert_eq!(good.validate(), Ok(()));

        assert_eq!(PllConfig { m: 0, ..good }.validate(), Err(Error::InvalidParam));
        assert_eq!(PllConfig { m: 9, ..good }.validate(), Err(Error::InvalidParam));
        assert_eq!(PllConfig { n: 7, ..good }.validate(), Err(Error::InvalidParam));
        assert_eq!(PllConfig { n: 87, ..good }.validate(), Err(Error::InvalidParam));
        assert_eq!(PllConfig { r: 3, ..good }.validate(), Err(Error::InvalidParam));
        assert_eq!(PllConfig { r: 0, ..good }.validate(), Err(Error::InvalidParam));
    }

    #[test]
    fn checked_output_enforces_device_maximum() {
        let cfg = PllConfig {
            source: PllSource::Msi,
            m: 1,
            n: 40,
            r: 2,
        };
        assert_eq!(cfg.checked_output(4.mhz()), Ok(80.mhz()));
        assert_eq!(cfg.checked_output(8.mhz()), Err(Error::ClockConfig));
    }

    #[test]
    fn register_image_encodes_fields() {
        let cfg = PllConfig {
            source: PllSource::Hse,
            m: 2,
            n: 20,
            r: 4,
        };
        let image = cfg.to_bits();
        assert_eq!(image & bits::PLLCFGR_PLLSRC_MASK, 0b11);
        assert_eq!((image & bits::PLLCFGR_PLLM_MASK) >> bits::PLLCFGR_PLLM_POS, 1);
        assert_eq!((image & bits::PLLCFGR_PLLN_MASK) >> bits::PLLCFGR_PLLN_POS, 20);
        assert_eq!((image & bits::PLLCFGR_PLLR_MASK) >> bits::PLLCFGR_PLLR_POS, 1);
        assert_ne!(image & bits::PLLCFGR_PLLREN, 0);
    }
}
