//! Time abstraction for the game core
//!
//! Every subsystem that needs the current time takes a [`Clock`] so that
//! tests can drive battles and persistence deterministically. All persisted
//! timestamps are epoch seconds, except space object position timestamps
//! which are epoch milliseconds.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time as epoch milliseconds.
    fn now_ms(&self) -> i64;

    /// Current time as epoch seconds.
    fn now_secs(&self) -> i64 {
        self.now_ms() / 1000
    }
}

/// Shared clock handle injected into caches and the scheduler.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time via chrono.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    ms: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at the given epoch seconds.
    pub fn at_secs(secs: i64) -> Self {
        Self {
            ms: AtomicI64::new(secs * 1000),
        }
    }

    /// Create a clock frozen at the given epoch milliseconds.
    pub fn at_ms(ms: i64) -> Self {
        Self {
            ms: AtomicI64::new(ms),
        }
    }

    /// Advance the clock by whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.ms.fetch_add(secs * 1000, Ordering::SeqCst);
    }

    /// Advance the clock by milliseconds.
    pub fn advance_ms(&self, ms: i64) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute epoch-second value.
    pub fn set_secs(&self, secs: i64) {
        self.ms.store(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.ms.load(Ordering::SeqCst)
    }
}
