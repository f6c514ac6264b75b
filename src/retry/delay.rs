//! Delay strategies mapping a retry attempt number to a wait duration.
//!
//! Durations are expressed in milliseconds. Attempt numbers start at zero, so
//! `delay(0)` is the pause taken after the first failed attempt.

use std::time::Duration;

/// Base delay of [`ExponentialBackoff`] in milliseconds (4 × 1000).
pub const EXPONENTIAL_BASE_MS: u64 = 4 * 1000;

/// Computes how long to wait before the next attempt.
pub trait DelayStrategy: Send + Sync {
    /// Returns the pause that follows failed attempt number `attempt`.
    ///
    /// A zero duration means the next attempt starts immediately.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Waits the same duration after every failed attempt.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FixedDelay(Duration);

impl FixedDelay {
    /// Creates a fixed delay of `delay`.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self(delay)
    }

    /// Creates a fixed delay of `millis` milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Creates a strategy that never waits.
    #[must_use]
    pub const fn none() -> Self {
        Self(Duration::ZERO)
    }
}

impl DelayStrategy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Doubles the wait after every failed attempt: `(4 << attempt) * 1000` ms.
///
/// Attempt 0 waits four seconds, attempt 1 eight seconds, and so on. Values
/// that would overflow saturate at [`Duration::MAX`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExponentialBackoff;

impl DelayStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        1_u64
            .checked_shl(attempt)
            .and_then(|factor| factor.checked_mul(EXPONENTIAL_BASE_MS))
            .map_or(Duration::MAX, Duration::from_millis)
    }
}
