//! Alarm configuration: one parsed alarm and the engine behind it
//!
//! An `AlarmManager` mediates between its [`ThresholdEngine`] and the
//! [`Orchestrator`] that owns it. It decides whether a reached threshold
//! really fires (the disarm gate), runs the periodic sampling sub-machine
//! and moves the engine along a vector chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::control::{EventType, FireEvent, Orchestrator};
use crate::domain::{Address, Affinity, AlarmRef, ConfigError, RegisterContext, ThreadId};
use crate::engine::{EngineSettings, ThreadRegistry, ThresholdEngine};

use super::condition::{AlarmKind, Condition};
use super::parse::{parse_alarm, AlarmSpec, UniformSpec};

/// Construction flags that come from the chain rather than the control
/// string.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmOptions {
    /// A late handler is registered; fires also request a deferred event
    pub late_handler: bool,
    /// Member of a vector chain
    pub vector: bool,
    /// Position of the owning chain in its vector
    pub vector_index: u32,
    /// Thread of the owning region; used when the alarm names none
    pub region_tid: Option<ThreadId>,
}

#[derive(Debug, Clone, Copy)]
struct UniformState {
    /// Event the next fire delivers
    next: EventType,
    /// Event the last fire delivered (reported by the late fire)
    fired: EventType,
    /// Windows still to run
    remaining: u64,
}

/// One alarm of a control chain.
pub struct AlarmManager {
    id: AlarmRef,
    raw: String,
    event_name: String,
    event: EventType,
    condition: Condition,
    tid: Option<ThreadId>,
    bcast: bool,
    count: u64,
    global: bool,
    need_context: bool,
    late_handler: AtomicBool,

    uniform: Option<(UniformSpec, Mutex<UniformState>)>,
    /// False while a uniform sub-machine still has windows to run
    arm_next: AtomicBool,

    vector: bool,
    vector_index: u32,

    /// Owned slot; moved along a vector chain, never shared between two
    /// configurations
    engine: Mutex<Option<Arc<ThresholdEngine>>>,
}

impl AlarmManager {
    /// Parse `control` and build the configuration.
    ///
    /// Vector-chain members other than the first chain of the vector are
    /// created without an engine; they receive one by hand-off.
    pub fn new(
        control: &str,
        id: AlarmRef,
        options: AlarmOptions,
        orchestrator: &dyn Orchestrator,
        registry: &Arc<ThreadRegistry>,
    ) -> Result<Self, ConfigError> {
        let spec: AlarmSpec =
            parse_alarm(control, options.vector, |name| orchestrator.event_string_to_type(name))?;

        let uniform = spec.uniform.map(|u| {
            let state = UniformState { next: EventType::Start, fired: EventType::Start, remaining: u.count };
            (u, Mutex::new(state))
        });
        if uniform.is_some() {
            orchestrator.set_uniform_alarm(id)?;
        }

        let mut manager = Self {
            id,
            raw: control.to_string(),
            event_name: spec.event_name,
            event: spec.event,
            condition: spec.condition,
            tid: spec.tid.or(options.region_tid.filter(|_| !spec.global)),
            bcast: spec.bcast,
            count: spec.count,
            global: spec.global,
            need_context: orchestrator.need_context(),
            late_handler: AtomicBool::new(options.late_handler),
            arm_next: AtomicBool::new(uniform.is_none()),
            uniform,
            vector: options.vector,
            vector_index: options.vector_index,
            engine: Mutex::new(None),
        };

        if !manager.vector || manager.vector_index == 0 {
            let engine = ThresholdEngine::new(manager.engine_settings(), Arc::clone(registry));
            if let Some(addr) = manager.condition.static_address() {
                engine.set_address(addr);
            }
            manager.engine = Mutex::new(Some(Arc::new(engine)));
        }
        Ok(manager)
    }

    fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            owner: self.id,
            affinity: self.affinity(),
            target: self.target(),
            global: self.global,
            vector: self.vector,
        }
    }

    fn lock_engine(&self) -> MutexGuard<'_, Option<Arc<ThresholdEngine>>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Engine currently held by this configuration.
    #[must_use]
    pub fn engine(&self) -> Option<Arc<ThresholdEngine>> {
        self.lock_engine().clone()
    }

    fn take_engine(&self) -> Option<Arc<ThresholdEngine>> {
        self.lock_engine().take()
    }

    fn install_engine(&self, engine: Arc<ThresholdEngine>) {
        *self.lock_engine() = Some(engine);
    }

    // ========================================================================
    // Arming
    // ========================================================================

    /// Arm for all threads or for the configured thread.
    pub fn activate(&self) {
        match self.affinity() {
            Affinity::Specific(tid) if !self.global => self.arm_thread(tid),
            _ => self.arm_all(),
        }
    }

    pub fn arm_all(&self) {
        match self.engine() {
            Some(engine) => engine.arm_all(),
            None => debug!("{}: no engine to arm", self.id),
        }
    }

    pub fn arm_thread(&self, tid: ThreadId) {
        match self.engine() {
            Some(engine) => engine.arm_thread(tid),
            None => debug!("{}: no engine to arm for {tid}", self.id),
        }
    }

    pub fn disarm_all(&self) {
        if let Some(engine) = self.engine() {
            engine.disarm_all();
        }
    }

    /// Fire gate: true if this caller performed the disarm.
    ///
    /// Broadcast and global alarms may be reached by several threads at
    /// once; only the thread that actually disarmed may deliver the event.
    pub fn disarm(&self, tid: ThreadId) -> bool {
        let Some(engine) = self.engine() else {
            return false;
        };
        self.disarm_engine(&engine, tid)
    }

    fn disarm_engine(&self, engine: &ThresholdEngine, tid: ThreadId) -> bool {
        if self.global {
            // A racing thread can still see the previous link's threshold as
            // reached after the engine moved on to this configuration
            if self.vector && self.icount_value() > engine.global_count_value() {
                return false;
            }
            return engine.disarm_global_armed();
        }
        if self.bcast {
            return engine.disarm_all();
        }
        engine.disarm_thread(tid);
        true
    }

    // ========================================================================
    // Firing
    // ========================================================================

    /// Engine-level fire: request the deferred notification when a late
    /// handler exists, then fire.
    pub fn trigger(
        &self,
        orchestrator: &dyn Orchestrator,
        context: Option<&RegisterContext>,
        ip: Address,
        tid: ThreadId,
    ) {
        if self.has_late_handler() && self.event() != EventType::Precond {
            if let Some(engine) = self.engine() {
                engine.request_late();
            }
        }
        self.fire(orchestrator, context, ip, tid);
    }

    /// Disarm, and if this caller won the disarm, notify the orchestrator.
    pub fn fire(
        &self,
        orchestrator: &dyn Orchestrator,
        context: Option<&RegisterContext>,
        ip: Address,
        tid: ThreadId,
    ) {
        let Some(engine) = self.engine() else {
            return;
        };
        if !self.disarm_engine(&engine, tid) {
            return;
        }

        let mut bcast = self.bcast;
        let event = match &self.uniform {
            Some((spec, state)) => {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                let event = state.next;
                state.fired = event;
                if state.remaining != 0 {
                    engine.disarm_all();
                    bcast = true;
                    self.advance_uniform(spec, &mut state, &engine);
                }
                event
            }
            None => self.event,
        };

        orchestrator.fire(&FireEvent {
            event,
            context: context.filter(|_| self.need_context),
            ip,
            tid,
            bcast,
            alarm: self.id,
        });

        if self.vector {
            self.hand_off(orchestrator, tid);
        }
    }

    /// Deliver the deferred notification. Gating already happened in the
    /// engine's test-and-clear.
    pub fn late_fire(
        &self,
        orchestrator: &dyn Orchestrator,
        context: Option<&RegisterContext>,
        ip: Address,
        tid: ThreadId,
    ) {
        let event = match &self.uniform {
            Some((_, state)) => state.lock().unwrap_or_else(PoisonError::into_inner).fired,
            None => self.event,
        };
        orchestrator.late_fire(&FireEvent { event, context, ip, tid, bcast: self.bcast, alarm: self.id });
    }

    /// Sampling window transition, run with the uniform state locked.
    fn advance_uniform(&self, spec: &UniformSpec, state: &mut UniformState, engine: &ThresholdEngine) {
        match state.next {
            EventType::Start => {
                state.next = EventType::Stop;
                engine.set_target(spec.length);
                self.arm_uniform(engine);
            }
            EventType::Stop => {
                state.remaining -= 1;
                if state.remaining == 0 {
                    self.arm_next.store(true, Ordering::Release);
                    debug!("{}: uniform sampling complete", self.id);
                } else {
                    state.next = EventType::Start;
                    engine.set_target(spec.period - spec.length);
                    self.arm_uniform(engine);
                }
            }
            _ => {}
        }
    }

    fn arm_uniform(&self, engine: &ThresholdEngine) {
        match self.affinity() {
            Affinity::Specific(tid) if !self.global => engine.arm_thread(tid),
            _ => engine.arm_all(),
        }
    }

    /// Move the engine to the first configuration of the next vector chain.
    fn hand_off(&self, orchestrator: &dyn Orchestrator, tid: ThreadId) {
        let lookup_tid = if self.global { ThreadId(0) } else { self.tid.unwrap_or(tid) };
        let Some(next) = orchestrator.next_alarm_config(self.vector_index, lookup_tid) else {
            return;
        };
        let Some(engine) = self.take_engine() else {
            return;
        };

        engine.retarget(next.engine_settings());
        next.install_engine(engine);
        debug!("{}: engine handed off to {}", self.id, next.id);

        if next.global {
            next.arm_all();
        } else {
            next.arm_thread(next.tid.unwrap_or(tid));
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn id(&self) -> AlarmRef {
        self.id
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    #[must_use]
    pub fn kind(&self) -> AlarmKind {
        self.condition.kind()
    }

    /// Event the next fire delivers.
    #[must_use]
    pub fn event(&self) -> EventType {
        match &self.uniform {
            Some((_, state)) => state.lock().unwrap_or_else(PoisonError::into_inner).next,
            None => self.event,
        }
    }

    #[must_use]
    pub fn has_start_event(&self) -> bool {
        self.event() == EventType::Start
    }

    #[must_use]
    pub fn affinity(&self) -> Affinity {
        self.tid.map_or(Affinity::AllThreads, Affinity::Specific)
    }

    #[must_use]
    pub fn tid(&self) -> Option<ThreadId> {
        self.tid
    }

    #[must_use]
    pub fn target(&self) -> u64 {
        self.condition.target(self.count)
    }

    /// Threshold of an icount alarm (0 for other kinds).
    #[must_use]
    pub fn icount_value(&self) -> u64 {
        match self.condition {
            Condition::Icount(n) => n,
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.global
    }

    #[must_use]
    pub fn is_bcast(&self) -> bool {
        self.bcast
    }

    #[must_use]
    pub fn is_vector(&self) -> bool {
        self.vector
    }

    #[must_use]
    pub fn vector_index(&self) -> u32 {
        self.vector_index
    }

    #[must_use]
    pub fn is_uniform(&self) -> bool {
        self.uniform.is_some()
    }

    #[must_use]
    pub fn is_uniform_done(&self) -> bool {
        self.uniform
            .as_ref()
            .is_some_and(|(_, state)| state.lock().unwrap_or_else(PoisonError::into_inner).remaining == 0)
    }

    /// Whether firing this alarm should arm the next one in its chain.
    #[must_use]
    pub fn arm_next(&self) -> bool {
        self.arm_next.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_late_handler(&self) -> bool {
        self.late_handler.load(Ordering::Acquire)
    }

    /// A late handler was registered after this alarm was built.
    pub fn set_late_handler(&self) {
        self.late_handler.store(true, Ordering::Release);
    }

    /// Diagnostic dump to stderr.
    pub fn print(&self) {
        eprintln!("EVENT: {}", self.event_name);
        eprintln!("ALARM: {}", self.kind());
        eprintln!("VALUE: {}", self.condition);
        eprintln!("TID: {}", self.affinity());
        eprintln!("BCAST: {}", self.bcast);
        eprintln!("COUNT: {}", self.count);
        eprintln!("GLOBAL COUNT: {}", self.global);
        if let Some((spec, _)) = &self.uniform {
            eprintln!("UNIFORM: period={} length={} count={}", spec.period, spec.length, spec.count);
        }
        if self.vector {
            eprintln!("VECTOR INDEX: {}", self.vector_index);
        }
    }
}
