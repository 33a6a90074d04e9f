//! Per-process thread bookkeeping shared by every engine
//!
//! A brand-new thread's very first instruction can sit exactly on an alarm
//! address before any count hook ran on that thread. The registry records
//! each thread's first instruction pointer at thread start so the
//! `check_first_ip*` probes can count that instruction once.

use std::sync::atomic::{AtomicU64, Ordering};

use tripwire_common::MAX_THREADS;

use crate::domain::{Address, ThreadId};

/// Optional alias remapping consulted at thread start.
pub type ThreadTranslation = fn(ThreadId) -> ThreadId;

/// Thread-id indexed side tables, created with the controller and living as
/// long as it does.
pub struct ThreadRegistry {
    /// First instruction pointer per thread, zeroed once consumed
    first_ip: Box<[AtomicU64]>,
}

impl ThreadRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            first_ip: (0..MAX_THREADS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Record the first instruction pointer of a thread that just started.
    pub fn record_thread_start(&self, tid: ThreadId, first_ip: Address) {
        self.first_ip[tid.slot()].store(first_ip, Ordering::Release);
    }

    /// Peek at the recorded first instruction pointer (0 once consumed).
    #[must_use]
    pub fn first_ip(&self, tid: ThreadId) -> Address {
        self.first_ip[tid.slot()].load(Ordering::Acquire)
    }

    /// Consume the entry for `tid`, returning what was recorded.
    ///
    /// After this call the thread's entry reads 0 so the same instruction can
    /// never be counted twice.
    #[inline]
    pub fn take_first_ip(&self, tid: ThreadId) -> Address {
        self.first_ip[tid.slot()].swap(0, Ordering::AcqRel)
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}
