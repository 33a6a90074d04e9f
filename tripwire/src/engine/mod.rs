//! # Threshold Engine
//!
//! The counting/arming state machine behind every alarm. Probes call into an
//! engine from instrumented code on every covered instruction, block or
//! branch, so everything on that path is O(1), lock-free and allocation-free.
//!
//! ## States
//!
//! ```text
//!              arm_all()                    arm_thread(tid)
//!   ┌──────────────────────────┐   ┌────────────────────────────┐
//!   ▼                          │   ▼                            │
//! ArmedGlobal ──disarm_*()──▶ Disarmed ◀──disarm_thread(tid)── ArmedPerThread(tid)
//! ```
//!
//! ## Shared State Discipline
//!
//! - Per-thread counters: single writer (the owning thread), relaxed
//!   load + store, never a read-modify-write
//! - Global counter: `fetch_add`, no lost updates under concurrent writers
//! - Armed flags: racy booleans; `disarm_all` / `disarm_global_armed` tell
//!   each caller whether *it* performed the disarm
//! - Late-handler flag: the only state behind a real lock, because
//!   `take_late` is a test-and-clear

pub mod registry;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use tripwire_common::MAX_THREADS;

use crate::domain::{Address, Affinity, AlarmRef, ThreadId};

pub use registry::{ThreadRegistry, ThreadTranslation};

/// Observable arming state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disarmed,
    /// Armed for at least one specific thread (the lowest armed id)
    ArmedPerThread(ThreadId),
    ArmedGlobal,
}

/// Static settings an engine is created or re-targeted with.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Configuration that currently owns the engine
    pub owner: AlarmRef,
    pub affinity: Affinity,
    /// Threshold; "reached" means counter >= target
    pub target: u64,
    /// Count on the shared atomic counter instead of per-thread counters
    pub global: bool,
    /// Counter is reused along a vector chain and must not be reset
    pub vector: bool,
}

/// Counting/arming state machine for one condition.
pub struct ThresholdEngine {
    owner: AtomicU64,
    affinity: AtomicU32,
    target: AtomicU64,
    global: AtomicBool,
    vector: bool,
    /// Target address for address/branch-target conditions (0 = unresolved)
    address: AtomicU64,

    thread_count: Box<[AtomicU64]>,
    armed: Box<[AtomicBool]>,
    global_count: AtomicU64,
    global_armed: AtomicBool,

    late_pending: Mutex<bool>,
    /// Unlocked mirror of `late_pending` for the fast `activate_late` test
    late_hint: AtomicBool,

    /// Serialises bulk arm/disarm
    arm_lock: Mutex<()>,

    registry: Arc<ThreadRegistry>,
}

impl ThresholdEngine {
    /// Create a disarmed engine.
    #[must_use]
    pub fn new(settings: EngineSettings, registry: Arc<ThreadRegistry>) -> Self {
        Self {
            owner: AtomicU64::new(settings.owner.to_bits()),
            affinity: AtomicU32::new(settings.affinity.to_raw()),
            target: AtomicU64::new(settings.target),
            global: AtomicBool::new(settings.global),
            vector: settings.vector,
            address: AtomicU64::new(0),
            thread_count: (0..MAX_THREADS).map(|_| AtomicU64::new(0)).collect(),
            armed: (0..MAX_THREADS).map(|_| AtomicBool::new(false)).collect(),
            global_count: AtomicU64::new(0),
            global_armed: AtomicBool::new(false),
            late_pending: Mutex::new(false),
            late_hint: AtomicBool::new(false),
            arm_lock: Mutex::new(()),
            registry,
        }
    }

    // ========================================================================
    // Hot path
    // ========================================================================

    #[inline]
    fn covers(&self, tid: ThreadId) -> bool {
        Affinity::from_raw(self.affinity.load(Ordering::Relaxed)).covers(tid)
    }

    /// Add `n` to the private counter of an armed thread. Single writer.
    #[inline]
    fn bump_thread(&self, slot: usize, n: u64) -> bool {
        let count = self.thread_count[slot].load(Ordering::Relaxed) + n;
        self.thread_count[slot].store(count, Ordering::Relaxed);
        count >= self.target.load(Ordering::Relaxed)
    }

    #[inline]
    fn bump_global(&self, n: u64) -> bool {
        let count = self.global_count.fetch_add(n, Ordering::AcqRel) + n;
        count >= self.target.load(Ordering::Relaxed)
    }

    /// Per-thread count: returns true once the thread's counter reached the
    /// target while armed.
    #[inline]
    pub fn count(&self, tid: ThreadId, n: u64) -> bool {
        let slot = tid.slot();
        if !(self.armed[slot].load(Ordering::Relaxed) && self.covers(tid)) {
            return false;
        }
        self.bump_thread(slot, n)
    }

    /// Global count: one atomic sum across all threads.
    #[inline]
    pub fn global_count(&self, tid: ThreadId, n: u64) -> bool {
        let _ = tid.slot();
        if !self.global_armed.load(Ordering::Acquire) {
            return false;
        }
        self.bump_global(n)
    }

    /// Per-thread count of taken branches whose target is the alarm address.
    #[inline]
    pub fn check_target(&self, tid: ThreadId, branch_target: Address) -> bool {
        let slot = tid.slot();
        if !(self.armed[slot].load(Ordering::Relaxed)
            && self.covers(tid)
            && self.address.load(Ordering::Relaxed) == branch_target)
        {
            return false;
        }
        self.bump_thread(slot, 1)
    }

    /// Global variant of [`ThresholdEngine::check_target`].
    #[inline]
    pub fn check_target_global(&self, branch_target: Address) -> bool {
        if !(self.global_armed.load(Ordering::Acquire)
            && self.address.load(Ordering::Relaxed) == branch_target)
        {
            return false;
        }
        self.bump_global(1)
    }

    /// Count a thread's very first instruction if it sits on `addr`.
    ///
    /// The thread's first-ip entry is consumed whether or not it matched, so
    /// a later pass over the same instruction is not counted again.
    #[inline]
    pub fn check_first_ip(&self, tid: ThreadId, addr: Address) -> bool {
        let slot = tid.slot();
        let first = self.registry.take_first_ip(tid);
        if !(self.armed[slot].load(Ordering::Relaxed) && self.covers(tid) && first == addr) {
            return false;
        }
        self.bump_thread(slot, 1)
    }

    /// Global variant of [`ThresholdEngine::check_first_ip`].
    #[inline]
    pub fn check_first_ip_global(&self, tid: ThreadId, addr: Address) -> bool {
        let first = self.registry.take_first_ip(tid);
        if !(self.global_armed.load(Ordering::Acquire) && first == addr) {
            return false;
        }
        self.bump_global(1)
    }

    /// Armed-and-matching test without counting, for conditions that fire
    /// on a single occurrence (signals, timeouts, interactive breaks).
    #[inline]
    #[must_use]
    pub fn is_live(&self, tid: ThreadId) -> bool {
        if self.is_global() {
            return self.global_armed.load(Ordering::Acquire);
        }
        self.armed[tid.slot()].load(Ordering::Relaxed) && self.covers(tid)
    }

    // ========================================================================
    // Arming
    // ========================================================================

    fn lock_arming(&self) -> MutexGuard<'_, ()> {
        self.arm_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_counters(&self) {
        for count in &*self.thread_count {
            count.store(0, Ordering::Relaxed);
        }
        self.global_count.store(0, Ordering::Release);
    }

    /// Arm every thread and the global flag.
    pub fn arm_all(&self) {
        let _guard = self.lock_arming();
        if !self.vector {
            self.reset_counters();
        }
        for armed in &*self.armed {
            armed.store(true, Ordering::Relaxed);
        }
        self.global_armed.store(true, Ordering::Release);
        debug!("engine {} armed for all threads", self.owner());
    }

    /// Arm a single thread.
    pub fn arm_thread(&self, tid: ThreadId) {
        let slot = tid.slot();
        if !self.vector {
            self.thread_count[slot].store(0, Ordering::Relaxed);
        }
        self.armed[slot].store(true, Ordering::Release);
        debug!("engine {} armed for {tid}", self.owner());
    }

    /// Disarm a single thread. Always succeeds.
    pub fn disarm_thread(&self, tid: ThreadId) {
        let slot = tid.slot();
        self.armed[slot].store(false, Ordering::Release);
        if !self.vector {
            self.thread_count[slot].store(0, Ordering::Relaxed);
        }
    }

    /// Disarm every thread and the global flag.
    ///
    /// Returns true only for the caller that found something armed, so two
    /// racing firers of a broadcast alarm deliver the event once.
    pub fn disarm_all(&self) -> bool {
        let _guard = self.lock_arming();
        let mut was_armed = self.global_armed.swap(false, Ordering::AcqRel);
        for armed in &*self.armed {
            was_armed |= armed.swap(false, Ordering::Relaxed);
        }
        if !self.vector {
            self.reset_counters();
        }
        was_armed
    }

    /// Clear the global armed flag; true only for the caller that cleared it.
    pub fn disarm_global_armed(&self) -> bool {
        if self
            .global_armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let _guard = self.lock_arming();
        for armed in &*self.armed {
            armed.store(false, Ordering::Relaxed);
        }
        if !self.vector {
            self.reset_counters();
        }
        true
    }

    /// Re-arm after thread-id aliasing.
    ///
    /// Called when a thread starts (after every other thread-start hook). If
    /// the translation maps the new thread onto the alias this engine is
    /// pinned to, the engine moves to the real id.
    pub fn on_thread_start(&self, tid: ThreadId, translation: Option<ThreadTranslation>) {
        if self.is_global() {
            return;
        }
        let Some(translate) = translation else {
            return;
        };
        let alias = translate(tid);
        if alias != tid && self.affinity() == Affinity::Specific(alias) {
            self.armed[tid.slot()].store(true, Ordering::Release);
            self.armed[alias.slot()].store(false, Ordering::Release);
            self.affinity.store(tid.0, Ordering::Release);
            debug!("engine {} moved from alias {alias} to {tid}", self.owner());
        }
    }

    // ========================================================================
    // Late-fire protocol
    // ========================================================================

    fn lock_late(&self) -> MutexGuard<'_, bool> {
        self.late_pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a deferred notification as pending.
    pub fn request_late(&self) {
        let mut pending = self.lock_late();
        *pending = true;
        self.late_hint.store(true, Ordering::Release);
    }

    /// Cheap unlocked test run after every instruction on a late hook.
    #[inline]
    #[must_use]
    pub fn activate_late(&self, tid: ThreadId) -> bool {
        self.late_hint.load(Ordering::Acquire) && self.covers(tid)
    }

    /// Test-and-clear the pending flag; true for exactly one caller per
    /// request.
    pub fn take_late(&self) -> bool {
        let mut pending = self.lock_late();
        if *pending {
            *pending = false;
            self.late_hint.store(false, Ordering::Release);
            true
        } else {
            false
        }
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Hand the engine to another configuration (vector chains).
    pub fn retarget(&self, settings: EngineSettings) {
        let _guard = self.lock_arming();
        self.owner.store(settings.owner.to_bits(), Ordering::Release);
        self.affinity.store(settings.affinity.to_raw(), Ordering::Release);
        self.target.store(settings.target, Ordering::Release);
        self.global.store(settings.global, Ordering::Release);
    }

    /// Change the threshold (uniform windows).
    pub fn set_target(&self, target: u64) {
        self.target.store(target, Ordering::Release);
    }

    /// Resolve the alarm address (raw, symbol or image+offset).
    pub fn set_address(&self, address: Address) {
        self.address.store(address, Ordering::Release);
    }

    #[must_use]
    pub fn owner(&self) -> AlarmRef {
        AlarmRef::from_bits(self.owner.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn affinity(&self) -> Affinity {
        Affinity::from_raw(self.affinity.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn target(&self) -> u64 {
        self.target.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.global.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_vector(&self) -> bool {
        self.vector
    }

    #[must_use]
    pub fn global_count_value(&self) -> u64 {
        self.global_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn thread_count_value(&self, tid: ThreadId) -> u64 {
        self.thread_count[tid.slot()].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_armed(&self, tid: ThreadId) -> bool {
        self.armed[tid.slot()].load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_global_armed(&self) -> bool {
        self.global_armed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        if self.is_global_armed() {
            return EngineState::ArmedGlobal;
        }
        self.armed
            .iter()
            .position(|armed| armed.load(Ordering::Acquire))
            .map_or(EngineState::Disarmed, |slot| {
                #[allow(clippy::cast_possible_truncation)]
                EngineState::ArmedPerThread(ThreadId(slot as u32))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChainId;

    fn engine(affinity: Affinity, target: u64, global: bool, vector: bool) -> ThresholdEngine {
        ThresholdEngine::new(
            EngineSettings {
                owner: AlarmRef::new(ChainId(0), 0),
                affinity,
                target,
                global,
                vector,
            },
            Arc::new(ThreadRegistry::new()),
        )
    }

    #[test]
    fn test_count_batches_cross_threshold() {
        let e = engine(Affinity::AllThreads, 100, false, false);
        e.arm_all();
        assert!(!e.count(ThreadId(0), 50));
        assert!(!e.count(ThreadId(0), 40));
        assert!(e.count(ThreadId(0), 20));
        assert_eq!(e.thread_count_value(ThreadId(0)), 110);
    }

    #[test]
    fn test_global_count_sums_threads() {
        let e = engine(Affinity::AllThreads, 100, true, false);
        e.arm_all();
        assert!(!e.global_count(ThreadId(0), 60));
        assert!(e.global_count(ThreadId(1), 60));
        assert_eq!(e.global_count_value(), 120);
    }

    #[test]
    fn test_disarmed_engine_does_not_count() {
        let e = engine(Affinity::AllThreads, 1, false, false);
        assert!(!e.count(ThreadId(0), 5));
        assert_eq!(e.thread_count_value(ThreadId(0)), 0);
        assert_eq!(e.state(), EngineState::Disarmed);
    }

    #[test]
    fn test_affinity_filters_other_threads() {
        let e = engine(Affinity::Specific(ThreadId(2)), 1, false, false);
        e.arm_all();
        assert!(!e.count(ThreadId(1), 10));
        assert!(e.count(ThreadId(2), 1));
    }

    #[test]
    fn test_disarm_thread_resets_unless_vector() {
        let e = engine(Affinity::AllThreads, 100, false, false);
        e.arm_thread(ThreadId(4));
        e.count(ThreadId(4), 30);
        e.disarm_thread(ThreadId(4));
        assert_eq!(e.thread_count_value(ThreadId(4)), 0);
        assert_eq!(e.state(), EngineState::Disarmed);

        let v = engine(Affinity::AllThreads, 100, false, true);
        v.arm_thread(ThreadId(4));
        v.count(ThreadId(4), 30);
        v.disarm_thread(ThreadId(4));
        v.arm_thread(ThreadId(4));
        assert_eq!(v.thread_count_value(ThreadId(4)), 30);
    }

    #[test]
    fn test_disarm_all_reports_once() {
        let e = engine(Affinity::AllThreads, 1, false, false);
        e.arm_thread(ThreadId(7));
        assert_eq!(e.state(), EngineState::ArmedPerThread(ThreadId(7)));
        assert!(e.disarm_all());
        assert!(!e.disarm_all());
    }

    #[test]
    fn test_disarm_global_armed_reports_once() {
        let e = engine(Affinity::AllThreads, 1, true, false);
        e.arm_all();
        assert_eq!(e.state(), EngineState::ArmedGlobal);
        assert!(e.disarm_global_armed());
        assert!(!e.disarm_global_armed());
        assert!(!e.global_count(ThreadId(0), 1));
    }

    #[test]
    fn test_check_target_counts_only_matching_branches() {
        let e = engine(Affinity::AllThreads, 2, false, false);
        e.set_address(0x1000);
        e.arm_all();
        assert!(!e.check_target(ThreadId(0), 0x2000));
        assert!(!e.check_target(ThreadId(0), 0x1000));
        assert!(e.check_target(ThreadId(0), 0x1000));
    }

    #[test]
    fn test_first_ip_counts_once() {
        let registry = Arc::new(ThreadRegistry::new());
        let e = ThresholdEngine::new(
            EngineSettings {
                owner: AlarmRef::new(ChainId(0), 0),
                affinity: Affinity::AllThreads,
                target: 1,
                global: false,
                vector: false,
            },
            Arc::clone(&registry),
        );
        e.set_address(0x4000);
        e.arm_all();
        registry.record_thread_start(ThreadId(1), 0x4000);
        assert!(e.check_first_ip(ThreadId(1), 0x4000));
        e.disarm_thread(ThreadId(1));
        e.arm_thread(ThreadId(1));
        assert!(!e.check_first_ip(ThreadId(1), 0x4000));
    }

    #[test]
    fn test_late_flag_taken_once() {
        let e = engine(Affinity::AllThreads, 1, false, false);
        assert!(!e.activate_late(ThreadId(0)));
        e.request_late();
        assert!(e.activate_late(ThreadId(0)));
        assert!(e.take_late());
        assert!(!e.take_late());
        assert!(!e.activate_late(ThreadId(0)));
    }

    #[test]
    fn test_thread_translation_moves_affinity() {
        fn alias(tid: ThreadId) -> ThreadId {
            ThreadId(tid.0 + 100)
        }
        let e = engine(Affinity::Specific(ThreadId(105)), 1, false, false);
        e.arm_thread(ThreadId(105));
        e.on_thread_start(ThreadId(5), Some(alias));
        assert_eq!(e.affinity(), Affinity::Specific(ThreadId(5)));
        assert!(e.is_armed(ThreadId(5)));
        assert!(!e.is_armed(ThreadId(105)));
        assert!(e.count(ThreadId(5), 1));
    }

    #[test]
    #[should_panic(expected = "exceeds MAX_THREADS")]
    fn test_thread_id_out_of_range_is_fatal() {
        let e = engine(Affinity::AllThreads, 1, false, false);
        #[allow(clippy::cast_possible_truncation)]
        e.count(ThreadId(MAX_THREADS as u32), 1);
    }
}
