//! Logical clock shared by the pool and the policy manager
//!
//! Lead-time, landing-date and unstake-lock comparisons all read the same
//! clock so the two components never disagree about "now".

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::types::Timestamp;

/// Source of the current time in Unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and replays
///
/// Clones share the same underlying instant. The clock never moves
/// backwards: `set` to an earlier time is ignored.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Move the clock forward by `secs`
    pub fn advance(&self, secs: i64) -> Timestamp {
        self.now.fetch_add(secs.max(0), Ordering::SeqCst) + secs.max(0)
    }

    /// Jump to `at` if it is not in the past
    pub fn set(&self, at: Timestamp) {
        self.now.fetch_max(at, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
