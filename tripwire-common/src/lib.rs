//! # Shared Types (Instrumentation ↔ Controller)
//!
//! Plain types and constants shared between the instrumentation layer that
//! calls the probes and the controller that owns the alarms. Kept `no_std`
//! and dependency-free so an instrumentation runtime can link it without
//! pulling in the controller.
//!
//! ## Key Types
//!
//! - [`ThreadId`] - Dense logical thread id assigned at thread start
//! - [`Address`] - Instruction pointer / branch target
//! - [`MAX_THREADS`] - Upper bound of the thread id space

#![no_std]

use core::fmt;

// ============================================================================
// Thread Id Space
// ============================================================================

/// Number of thread slots every engine reserves.
///
/// Thread ids are dense (0, 1, 2, ...) and assigned by the instrumentation
/// runtime at thread start. Per-thread counters and armed flags are fixed
/// arrays of this length, so a thread id at or above this bound is a fatal
/// error in the hot path.
pub const MAX_THREADS: usize = 2048;

/// Sentinel stored in an engine's affinity slot meaning "every thread".
pub const ALL_THREADS: u32 = u32::MAX;

/// Value of `eax` that identifies a Simics-style magic instruction
/// (`xchg bx, bx`) as a controller command.
pub const SIM_CMD_MARKER: u64 = 0x4711;

/// Instruction pointer or branch target
pub type Address = u64;

/// Logical thread id
///
/// Dense index into the per-thread tables, NOT the kernel TID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// Index into per-thread tables.
    ///
    /// # Panics
    /// Panics if the id is outside the supported thread id space. Counting
    /// with a corrupted slot would produce wrong or duplicate triggers.
    #[inline]
    #[must_use]
    pub fn slot(self) -> usize {
        let idx = self.0 as usize;
        assert!(idx < MAX_THREADS, "thread id {} exceeds MAX_THREADS ({MAX_THREADS})", self.0);
        idx
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

impl From<u32> for ThreadId {
    fn from(tid: u32) -> Self {
        ThreadId(tid)
    }
}

/// Which threads a trigger counts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Affinity {
    /// Count on every thread
    #[default]
    AllThreads,
    /// Count on a single logical thread
    Specific(ThreadId),
}

impl Affinity {
    /// Raw encoding stored in an engine's atomic affinity slot.
    #[must_use]
    pub fn to_raw(self) -> u32 {
        match self {
            Affinity::AllThreads => ALL_THREADS,
            Affinity::Specific(tid) => tid.0,
        }
    }

    /// Decode an affinity slot.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        if raw == ALL_THREADS {
            Affinity::AllThreads
        } else {
            Affinity::Specific(ThreadId(raw))
        }
    }

    /// True if a probe on `tid` should be counted under this affinity.
    #[inline]
    #[must_use]
    pub fn covers(self, tid: ThreadId) -> bool {
        match self {
            Affinity::AllThreads => true,
            Affinity::Specific(t) => t == tid,
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Affinity::AllThreads => write!(f, "all"),
            Affinity::Specific(tid) => write!(f, "{}", tid.0),
        }
    }
}
