//! [`TickGuard`] – skip-if-busy reentrancy guard for periodic work.
//!
//! The operator scheduler fires every `tick_interval`, but a tick that hits
//! a full receive timeout can outlast the interval.  Rather than start a
//! second tick over the same map state, the scheduler asks the guard for a
//! [`TickPermit`] and skips the tick when the previous permit is still alive.
//!
//! # Example
//!
//! ```rust
//! use abyss_runtime::tick_guard::TickGuard;
//!
//! let guard = TickGuard::new();
//! let permit = guard.try_enter().unwrap();
//! assert!(guard.try_enter().is_none()); // busy → skipped
//! drop(permit);
//! assert!(guard.try_enter().is_some());
//! assert_eq!(guard.skipped(), 1);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared busy flag plus a count of skipped entries.  Clones share state.
#[derive(Debug, Clone, Default)]
pub struct TickGuard {
    busy: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
}

impl TickGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard.  Returns `None`, and counts a skip, when a permit is
    /// already outstanding.
    pub fn try_enter(&self) -> Option<TickPermit> {
        match self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(TickPermit {
                busy: Arc::clone(&self.busy),
            }),
            Err(_) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Number of entries refused so far.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// Proof of exclusive entry.  Releases the guard on drop, including when the
/// holding task panics.
#[derive(Debug)]
pub struct TickPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
