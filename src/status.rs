//! Status codes shared by every mutating operation in this crate.
//!
//! No operation panics; all failures are values. The ordering/lifecycle
//! variants ([`Error::AlreadyAcquired`], [`Error::AlreadyReleased`],
//! [`Error::DependenciesNotReleased`], [`Error::DependentClockNotConfigured`])
//! indicate a protocol violation in the calling code rather than a transient
//! hardware fault: a production build should treat them as fatal instead of
//! retrying.

/// Error codes returned by the clock, tracker and backup-domain operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Unspecified failure.
    Generic,
    /// Hardware did not reach the expected state within the caller's
    /// iteration budget.
    Timeout,
    /// The resource is in use and cannot be reconfigured right now.
    Busy,
    /// Out-of-range id, divider, multiplier or source selector. Detected
    /// before any register write.
    InvalidParam,
    /// The requested oscillator is off, or on but not yet stable.
    NotReady,
    /// A computed clock frequency violates a device limit.
    ClockConfig,
    /// The resource count was already non-zero on acquire.
    AlreadyAcquired,
    /// The resource count was already zero on release.
    AlreadyReleased,
    /// Outstanding dependents still hold the resource; release refused.
    DependenciesNotReleased,
    /// An upstream clock this resource depends on is not active, or the
    /// count table is inconsistent.
    DependentClockNotConfigured,
}

/// Result alias used throughout the crate.
pub type Result<T = ()> = core::result::Result<T, Error>;
