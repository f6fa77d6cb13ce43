//! repgate common - shared primitives for the gateway control plane
//!
//! This crate provides:
//! - A [`Clock`] abstraction so time-windowed logic can be driven by tests
//! - Lock-free counters for component statistics
//! - Configuration error types shared by every crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::*;

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing counter for lock-free statistics
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create new counter
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return previous value
    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Add value and return previous
    #[inline(always)]
    pub fn add(&self, val: u64) -> u64 {
        self.0.fetch_add(val, Ordering::Relaxed)
    }

    /// Get current value
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Percentage of `part` in `total`, rounded to two decimals.
///
/// Returns `0.0` when `total` is zero.
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = part as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_counter() {
        let counter = AtomicCounter::new(0);
        assert_eq!(counter.inc(), 0);
        assert_eq!(counter.inc(), 1);
        assert_eq!(counter.add(5), 2);
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(5, 5), 100.0);
    }
}
