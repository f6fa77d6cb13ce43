//! Wall-clock abstraction
//!
//! Admission windows and cache expiry are expressed in seconds since the Unix
//! epoch. Components take a [`SharedClock`] so tests can pin and advance time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Seconds since the Unix epoch
    fn now(&self) -> f64;
}

/// Clock handle shared between components
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Shared handle to the system clock
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Manually driven clock with nanosecond resolution
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Create a clock pinned at `secs` seconds since the epoch
    pub fn at(secs: f64) -> Arc<Self> {
        Arc::new(Self {
            nanos: AtomicU64::new(secs_to_nanos(secs)),
        })
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Move the clock forward by fractional seconds
    pub fn advance_secs(&self, secs: f64) {
        self.nanos.fetch_add(secs_to_nanos(secs), Ordering::SeqCst);
    }

    /// Pin the clock to an absolute time
    pub fn set(&self, secs: f64) {
        self.nanos.store(secs_to_nanos(secs), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> f64 {
        self.nanos.load(Ordering::SeqCst) as f64 / 1e9
    }
}

fn secs_to_nanos(secs: f64) -> u64 {
    (secs.max(0.0) * 1e9).round() as u64
}
