//! # Control Manager
//!
//! Owns every control chain, the thread registry and the registered event
//! handlers, and implements [`Orchestrator`] for the alarms it builds.
//!
//! ## Entry Points From Instrumentation
//!
//! - [`ControlManager::thread_start`] - a new thread is about to run
//! - [`ControlManager::on_probe`] - something happened on a thread (block,
//!   branch, instruction, call, signal, image load)
//! - [`ControlManager::after_instruction`] - the instruction retired; runs
//!   deferred (late) notifications
//!
//! Each entry point walks a flat table of engine hooks and asks every
//! hook's [`Condition`] whether the probe concerns it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use tripwire_common::MAX_THREADS;

use crate::alarm::{AlarmKind, AlarmManager, Condition, Probe, Trigger};
use crate::domain::{Address, AlarmRef, ChainId, ConfigError, RegisterContext, ThreadId, UnknownEventError};
use crate::engine::{ThreadRegistry, ThreadTranslation, ThresholdEngine};

use super::chain::{ChainOptions, ControlChain};
use super::events::{EventCatalog, EventType};
use super::{ControlEvent, FireEvent, Orchestrator};

/// Poll interval of a timeout watcher waiting for its alarm to be armed.
const TIMEOUT_POLL: Duration = Duration::from_millis(100);

/// Hook run at thread start before the controller's own logic.
pub type ThreadStartHook = Box<dyn Fn(ThreadId, &RegisterContext) + Send + Sync>;

/// A region (vector) chain and the thread it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionChain {
    pub chain: String,
    pub tid: ThreadId,
}

impl RegionChain {
    /// Thread taken from the first `tid<N>` token, thread 0 otherwise.
    #[must_use]
    pub fn new(chain: &str) -> Self {
        let tid = chain
            .split([',', ':'])
            .find_map(|token| token.strip_prefix("tid").and_then(|n| n.parse::<u32>().ok()))
            .map_or(ThreadId(0), ThreadId);
        Self { chain: chain.to_string(), tid }
    }
}

#[derive(Clone)]
struct Handler {
    sender: Sender<ControlEvent>,
    pass_context: bool,
}

/// Hot-path view of one engine.
struct Hook {
    engine: Arc<ThresholdEngine>,
    condition: Condition,
    /// Set by the watcher thread of a timeout alarm
    timeout_passed: Option<Arc<AtomicBool>>,
}

/// Counters for the end-of-run summary.
#[derive(Debug, Default)]
struct Stats {
    delivered: AtomicU64,
    late_delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of the controller counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlStats {
    pub delivered: u64,
    pub late_delivered: u64,
    /// Sends that failed because the receiver was gone
    pub dropped: u64,
}

// ============================================================================
// Builder
// ============================================================================

/// Collects chains, handlers and options, then builds a [`ControlManager`].
#[derive(Default)]
pub struct ControlManagerBuilder {
    controls: Vec<String>,
    regions: Vec<RegionChain>,
    handlers: Vec<Handler>,
    late_handlers: Vec<Handler>,
    events: Vec<String>,
    translation: Option<ThreadTranslation>,
    thread_start_hooks: Vec<ThreadStartHook>,
    event_log: bool,
    default_start: bool,
    debug: bool,
}

impl ControlManagerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a control chain (`-control`).
    #[must_use]
    pub fn control(mut self, chain: impl Into<String>) -> Self {
        self.controls.push(chain.into());
        self
    }

    /// Add a region chain; region chains form per-thread vector chains.
    #[must_use]
    pub fn region(mut self, region: RegionChain) -> Self {
        self.regions.push(region);
        self
    }

    #[must_use]
    pub fn handler(mut self, sender: Sender<ControlEvent>, pass_context: bool) -> Self {
        self.handlers.push(Handler { sender, pass_context });
        self
    }

    /// Handler for deferred notifications, delivered once the triggering
    /// instruction retired.
    #[must_use]
    pub fn late_handler(mut self, sender: Sender<ControlEvent>) -> Self {
        self.late_handlers.push(Handler { sender, pass_context: true });
        self
    }

    /// Register a tool-specific event name usable in control strings.
    #[must_use]
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.events.push(name.into());
        self
    }

    #[must_use]
    pub fn thread_translation(mut self, translation: ThreadTranslation) -> Self {
        self.translation = Some(translation);
        self
    }

    #[must_use]
    pub fn on_thread_start(mut self, hook: ThreadStartHook) -> Self {
        self.thread_start_hooks.push(hook);
        self
    }

    /// Count instructions per thread and log every delivered event.
    #[must_use]
    pub fn event_log(mut self, enabled: bool) -> Self {
        self.event_log = enabled;
        self
    }

    /// Deliver a broadcast `start` at the first probe when no chain has one.
    #[must_use]
    pub fn default_start(mut self, enabled: bool) -> Self {
        self.default_start = enabled;
        self
    }

    /// Dump every parsed chain to stderr.
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Parse every chain. The returned manager is not armed yet; call
    /// [`ControlManager::activate`].
    pub fn build(self) -> Result<ControlManager, ConfigError> {
        if !self.regions.is_empty() && !self.controls.is_empty() {
            return Err(ConfigError::RegionWithControl);
        }

        let mut catalog = EventCatalog::new();
        for name in &self.events {
            catalog.add_event(name);
        }
        let late = !self.late_handlers.is_empty();
        let pass_context = late || self.handlers.iter().any(|h| h.pass_context);

        let mut manager = ControlManager {
            chains: Vec::new(),
            vectors: HashMap::new(),
            catalog,
            handlers: self.handlers,
            late_handlers: self.late_handlers,
            uniform: OnceLock::new(),
            registry: Arc::new(ThreadRegistry::new()),
            translation: self.translation,
            thread_start_hooks: self.thread_start_hooks,
            hooks: Vec::new(),
            interactive: AtomicBool::new(false),
            icount: self
                .event_log
                .then(|| (0..MAX_THREADS).map(|_| AtomicU64::new(0)).collect()),
            last_region: (0..MAX_THREADS).map(|_| AtomicU32::new(0)).collect(),
            pass_context,
            default_start_pending: AtomicBool::new(false),
            default_start: self.default_start,
            stats: Stats::default(),
        };

        let mut chains: Vec<ControlChain> = Vec::new();
        let mut vectors: HashMap<ThreadId, Vec<ChainId>> = HashMap::new();

        for control in &self.controls {
            let id = next_chain_id(&chains);
            let options = ChainOptions { late_handler: late, ..ChainOptions::default() };
            let chain = ControlChain::parse(control, id, options, &manager, &manager.registry)?;
            push_chain(&mut chains, chain)?;
        }

        for (region, spec) in self.regions.iter().enumerate() {
            let id = next_chain_id(&chains);
            let global = spec.chain.contains(":global");
            let vector_tid = if global { ThreadId(0) } else { spec.tid };
            let members = vectors.entry(vector_tid).or_default();
            #[allow(clippy::cast_possible_truncation)]
            let options = ChainOptions {
                late_handler: late,
                vector: true,
                vector_index: members.len() as u32,
                region: Some(region as u32),
                region_tid: (!global).then_some(vector_tid),
            };
            members.push(id);
            let chain = ControlChain::parse(&spec.chain, id, options, &manager, &manager.registry)?;
            // The engine moves from region to region; a second alarm would
            // have nothing to hand off to
            if chain.alarms().len() != 1 {
                return Err(ConfigError::MultiAlarmRegion(spec.chain.clone()));
            }
            push_chain(&mut chains, chain)?;
        }

        if self.debug {
            for chain in &chains {
                eprintln!("CHAIN: {}", chain.raw());
                chain.print();
            }
        }

        manager.hooks = chains
            .iter()
            .flat_map(|chain| chain.alarms())
            .filter_map(|alarm| {
                let engine = alarm.engine()?;
                let timeout_passed =
                    (alarm.kind() == AlarmKind::Timeout).then(|| Arc::new(AtomicBool::new(false)));
                Some(Hook { engine, condition: alarm.condition().clone(), timeout_passed })
            })
            .collect();
        manager.chains = chains;
        manager.vectors = vectors;
        Ok(manager)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn next_chain_id(chains: &[ControlChain]) -> ChainId {
    ChainId(chains.len() as u32)
}

/// Resolve `waitfor:<name>` against the chains built so far, then append.
fn push_chain(chains: &mut Vec<ControlChain>, mut chain: ControlChain) -> Result<(), ConfigError> {
    if let Some(name) = chain.wait_for_name().map(str::to_string) {
        let Some(target) = chains.iter_mut().find(|c| c.name() == Some(name.as_str())) else {
            return Err(ConfigError::UnknownChainName(name));
        };
        target.waiting.push(chain.id());
        chain.wait_for = Some(target.id());
    }
    chains.push(chain);
    Ok(())
}

// ============================================================================
// Control Manager
// ============================================================================

pub struct ControlManager {
    chains: Vec<ControlChain>,
    /// Vector chains per thread, in vector-index order
    vectors: HashMap<ThreadId, Vec<ChainId>>,
    catalog: EventCatalog,
    handlers: Vec<Handler>,
    late_handlers: Vec<Handler>,
    uniform: OnceLock<AlarmRef>,
    registry: Arc<ThreadRegistry>,
    translation: Option<ThreadTranslation>,
    thread_start_hooks: Vec<ThreadStartHook>,
    hooks: Vec<Hook>,
    /// Pending interactive break
    interactive: AtomicBool,
    /// Per-thread instruction count, present when the event log is on
    icount: Option<Box<[AtomicU64]>>,
    /// Last region that delivered an event, per thread (region + 1, 0 = none)
    last_region: Box<[AtomicU32]>,
    pass_context: bool,
    default_start_pending: AtomicBool,
    default_start: bool,
    stats: Stats,
}

impl ControlManager {
    #[must_use]
    pub fn builder() -> ControlManagerBuilder {
        ControlManagerBuilder::new()
    }

    /// Arm every chain that does not wait for another, start timeout
    /// watchers and schedule the default start event.
    pub fn activate(&self) {
        for chain in &self.chains {
            chain.activate();
        }
        for hook in &self.hooks {
            if let (Condition::Timeout(timeout), Some(flag)) = (&hook.condition, &hook.timeout_passed) {
                spawn_timeout_watcher(Arc::downgrade(&hook.engine), *timeout, Arc::clone(flag));
            }
        }
        if self.default_start && !self.has_start_event() {
            debug!("no chain has a start event, scheduling default start");
            self.default_start_pending.store(true, Ordering::Release);
        }
    }

    // ========================================================================
    // Instrumentation entry points
    // ========================================================================

    /// A thread is about to run its first instruction.
    ///
    /// Host hooks run first so engine re-arming observes their state.
    pub fn thread_start(&self, tid: ThreadId, context: &RegisterContext) {
        for hook in &self.thread_start_hooks {
            hook(tid, context);
        }
        self.registry.record_thread_start(tid, context.ip);
        for hook in &self.hooks {
            hook.engine.on_thread_start(tid, self.translation);
        }
    }

    /// Dispatch one probe to every engine it concerns.
    ///
    /// Hooks are visited in chain order. An alarm armed by a fire earlier in
    /// the same dispatch sees this probe too when its hook comes later in
    /// the table, so a `Block` probe can count toward the alarm it armed.
    /// An alarm whose hook comes earlier starts counting at the next probe.
    pub fn on_probe(&self, tid: ThreadId, ip: Address, probe: &Probe<'_>, context: Option<&RegisterContext>) {
        if self.default_start_pending.load(Ordering::Relaxed) {
            self.deliver_default_start(tid, ip);
        }

        match probe {
            Probe::Block { ninst } => {
                if let Some(icount) = &self.icount {
                    icount[tid.slot()].fetch_add(*ninst, Ordering::Relaxed);
                }
            }
            Probe::ImageLoad(image) => {
                for hook in &self.hooks {
                    if let Some(addr) = hook.condition.resolve_address(image) {
                        debug!("{} resolved to {addr:#x} in {}", hook.condition, image.name);
                        hook.engine.set_address(addr);
                    }
                }
            }
            _ => {}
        }

        for hook in &self.hooks {
            let Some(trigger) = hook.condition.evaluate(probe, hook.engine.address()) else {
                continue;
            };
            if self.reached(hook, tid, trigger) {
                self.fire_hook(hook, tid, ip, context);
            }
        }
    }

    fn reached(&self, hook: &Hook, tid: ThreadId, trigger: Trigger) -> bool {
        let engine = &hook.engine;
        let global = engine.is_global();
        match trigger {
            Trigger::Count(n) if global => engine.global_count(tid, n),
            Trigger::Count(n) => engine.count(tid, n),
            Trigger::Target(target) if global => engine.check_target_global(target),
            Trigger::Target(target) => engine.check_target(tid, target),
            Trigger::FirstIp(ip) if global => engine.check_first_ip_global(tid, ip),
            Trigger::FirstIp(ip) => engine.check_first_ip(tid, ip),
            Trigger::Immediate => {
                let gate = match &hook.timeout_passed {
                    Some(passed) => passed.load(Ordering::Acquire),
                    None if hook.condition.kind() == AlarmKind::Interactive => {
                        self.interactive.load(Ordering::Acquire)
                    }
                    None => true,
                };
                gate && engine.is_live(tid)
            }
        }
    }

    fn fire_hook(&self, hook: &Hook, tid: ThreadId, ip: Address, context: Option<&RegisterContext>) {
        let Some(alarm) = self.alarm(hook.engine.owner()) else {
            return;
        };
        // Another thread may have consumed the break between test and fire
        if alarm.kind() == AlarmKind::Interactive && !self.interactive.swap(false, Ordering::AcqRel) {
            return;
        }
        alarm.trigger(self, context.filter(|_| self.pass_context), ip, tid);
    }

    /// The instruction at `ip` retired; deliver pending late notifications.
    pub fn after_instruction(&self, tid: ThreadId, ip: Address, context: Option<&RegisterContext>) {
        for hook in &self.hooks {
            if hook.engine.activate_late(tid) && hook.engine.take_late() {
                if let Some(alarm) = self.alarm(hook.engine.owner()) {
                    alarm.late_fire(self, context, ip, tid);
                }
            }
        }
    }

    /// Ask every interactive alarm to fire at the next block.
    pub fn request_interactive_break(&self) {
        self.interactive.store(true, Ordering::Release);
    }

    fn deliver_default_start(&self, tid: ThreadId, ip: Address) {
        if !self.default_start_pending.swap(false, Ordering::AcqRel) {
            return;
        }
        let event = ControlEvent {
            event: EventType::Start,
            ip,
            tid,
            bcast: true,
            alarm: None,
            late: false,
            context: None,
            icount: self.thread_icount(tid),
        };
        self.send(&self.handlers, event);
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Hand a fired event to every registered handler.
    pub(crate) fn deliver(&self, event: &FireEvent<'_>, region: Option<u32>, late: bool) {
        let icount = self.thread_icount(event.tid);
        if self.icount.is_some() {
            info!(
                "TID{}: {}event: {} at icount: {icount} ip: {:#x} alarm: {}",
                event.tid.0,
                if late { "late " } else { "" },
                self.catalog.name(event.event),
                event.ip,
                event.alarm,
            );
        }
        if let Some(region) = region {
            self.last_region[event.tid.slot()].store(region + 1, Ordering::Release);
        }

        let control = ControlEvent {
            event: event.event,
            ip: event.ip,
            tid: event.tid,
            bcast: event.bcast,
            alarm: Some(event.alarm),
            late,
            context: event.context.copied(),
            icount,
        };
        if late {
            self.send(&self.late_handlers, control);
            self.stats.late_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.send(&self.handlers, control);
            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn send(&self, handlers: &[Handler], event: ControlEvent) {
        for handler in handlers {
            let event = ControlEvent {
                context: event.context.filter(|_| handler.pass_context),
                ..event
            };
            if handler.sender.send(event).is_err()
                && self.stats.dropped.fetch_add(1, Ordering::Relaxed) == 0
            {
                warn!("event handler disconnected, dropping events");
            }
        }
    }

    /// Register a late handler after the chains were built.
    pub fn register_late_handler(&mut self, sender: Sender<ControlEvent>) {
        self.late_handlers.push(Handler { sender, pass_context: true });
        self.pass_context = true;
        for chain in &self.chains {
            chain.set_late_handler();
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn chains(&self) -> &[ControlChain] {
        &self.chains
    }

    #[must_use]
    pub fn chain(&self, id: ChainId) -> Option<&ControlChain> {
        self.chains.get(id.0 as usize)
    }

    #[must_use]
    pub fn chain_by_name(&self, name: &str) -> Option<&ControlChain> {
        self.chains.iter().find(|c| c.name() == Some(name))
    }

    #[must_use]
    pub fn alarm(&self, id: AlarmRef) -> Option<&AlarmManager> {
        self.chain(id.chain)?.alarm(id.index)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn has_start_event(&self) -> bool {
        !self.vectors.is_empty() || self.chains.iter().any(ControlChain::has_start_event)
    }

    #[must_use]
    pub fn uniform_alarm(&self) -> Option<&AlarmManager> {
        self.uniform.get().and_then(|id| self.alarm(*id))
    }

    #[must_use]
    pub fn uniform_is_done(&self) -> bool {
        self.uniform_alarm().is_some_and(AlarmManager::is_uniform_done)
    }

    /// Region of the last event delivered on `tid`.
    #[must_use]
    pub fn current_region(&self, tid: ThreadId) -> Option<u32> {
        self.last_region[tid.slot()].load(Ordering::Acquire).checked_sub(1)
    }

    /// Instructions executed by `tid` (0 unless the event log is on).
    #[must_use]
    pub fn thread_icount(&self, tid: ThreadId) -> u64 {
        self.icount.as_ref().map_or(0, |icount| icount[tid.slot()].load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn stats(&self) -> ControlStats {
        ControlStats {
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            late_delivered: self.stats.late_delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Wait until the engine is armed, then let the timeout elapse and raise
/// the flag. Exits early if the controller goes away.
fn spawn_timeout_watcher(engine: Weak<ThresholdEngine>, timeout: Duration, passed: Arc<AtomicBool>) {
    thread::spawn(move || {
        loop {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            // Timeouts are not tied to a thread; thread 0's flag stands in
            if engine.is_armed(ThreadId(0)) || engine.is_global_armed() {
                break;
            }
            drop(engine);
            thread::sleep(TIMEOUT_POLL);
        }
        thread::sleep(timeout);
        passed.store(true, Ordering::Release);
    });
}

impl Orchestrator for ControlManager {
    fn need_context(&self) -> bool {
        self.pass_context
    }

    fn event_string_to_type(&self, name: &str) -> Result<EventType, UnknownEventError> {
        self.catalog.lookup(name)
    }

    fn fire(&self, event: &FireEvent<'_>) {
        if let Some(chain) = self.chain(event.alarm.chain) {
            chain.fire(self, event);
        }
    }

    fn late_fire(&self, event: &FireEvent<'_>) {
        if let Some(chain) = self.chain(event.alarm.chain) {
            chain.late_fire(self, event);
        }
    }

    fn next_alarm_config(&self, vector_index: u32, tid: ThreadId) -> Option<&AlarmManager> {
        let members = self.vectors.get(&tid)?;
        let next = members.get(vector_index as usize + 1)?;
        self.chain(*next)?.alarm(0)
    }

    fn set_uniform_alarm(&self, alarm: AlarmRef) -> Result<(), ConfigError> {
        self.uniform.set(alarm).map_err(|_| ConfigError::DuplicateUniform)
    }

    fn thread_translation(&self) -> Option<ThreadTranslation> {
        self.translation
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use super::*;

    #[test]
    fn test_region_tid_from_token() {
        assert_eq!(RegionChain::new("start:icount:10:tid3").tid, ThreadId(3));
        assert_eq!(RegionChain::new("start:icount:10:global").tid, ThreadId(0));
    }

    #[test]
    fn test_regions_and_controls_are_exclusive() {
        let err = ControlManager::builder()
            .control("start:icount:10")
            .region(RegionChain::new("start:icount:10"))
            .build()
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::RegionWithControl);
    }

    #[test]
    fn test_waitfor_unknown_chain() {
        let err = ControlManager::builder().control("start:icount:10,waitfor:roi").build().err().unwrap();
        assert_eq!(err, ConfigError::UnknownChainName("roi".to_string()));
    }

    #[test]
    fn test_custom_event_usable_in_chain() {
        let (tx, rx) = unbounded();
        let manager = ControlManager::builder()
            .event("warmup")
            .control("warmup:icount:10")
            .handler(tx, false)
            .build()
            .unwrap();
        manager.activate();
        manager.on_probe(ThreadId(0), 0, &Probe::Block { ninst: 10 }, None);
        let event = rx.try_recv().unwrap();
        assert_eq!(manager.catalog().name(event.event), "warmup");
    }

    #[test]
    fn test_default_start_delivered_once() {
        let (tx, rx) = unbounded();
        let manager = ControlManager::builder()
            .control("stop:icount:1000")
            .handler(tx, false)
            .default_start(true)
            .build()
            .unwrap();
        manager.activate();
        manager.on_probe(ThreadId(1), 0x10, &Probe::Block { ninst: 1 }, None);
        manager.on_probe(ThreadId(2), 0x20, &Probe::Block { ninst: 1 }, None);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, EventType::Start);
        assert!(events[0].bcast);
        assert_eq!(events[0].alarm, None);
    }

    #[test]
    fn test_interactive_break_fires_once() {
        let (tx, rx) = unbounded();
        let manager = ControlManager::builder()
            .control("stop:interactive:bcast")
            .handler(tx, false)
            .build()
            .unwrap();
        manager.activate();
        manager.on_probe(ThreadId(0), 0, &Probe::Block { ninst: 4 }, None);
        assert!(rx.try_recv().is_err());

        manager.request_interactive_break();
        manager.on_probe(ThreadId(0), 0, &Probe::Block { ninst: 4 }, None);
        manager.on_probe(ThreadId(1), 0, &Probe::Block { ninst: 4 }, None);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_address_at_thread_entry_counts_once() {
        use crate::alarm::InstructionInfo;

        let (tx, rx) = unbounded();
        let manager =
            ControlManager::builder().control("start:address:0x5000:count2").handler(tx, false).build().unwrap();
        manager.activate();
        let context = RegisterContext { ip: 0x5000, sp: 0x7fff_0000 };
        manager.thread_start(ThreadId(1), &context);

        let entry = InstructionInfo { ip: 0x5000, bytes: &[0x90], extension: "BASE", category: "NOP" };
        manager.on_probe(ThreadId(1), 0x5000, &Probe::Instruction(entry), None);
        // Later executions of the entry instruction only count via fall-through
        manager.on_probe(ThreadId(1), 0x5000, &Probe::Instruction(entry), None);
        assert!(rx.try_recv().is_err());

        manager.on_probe(ThreadId(1), 0x4ffc, &Probe::FallThrough { next_ip: 0x5000 }, None);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.tid, ThreadId(1));
        assert_eq!(event.event, EventType::Start);
    }

    #[test]
    fn test_dropped_receiver_is_counted() {
        let (tx, rx) = unbounded();
        drop(rx);
        let manager =
            ControlManager::builder().control("start:icount:1").handler(tx, false).build().unwrap();
        manager.activate();
        manager.on_probe(ThreadId(0), 0, &Probe::Block { ninst: 1 }, None);
        assert_eq!(manager.stats().dropped, 1);
        assert_eq!(manager.stats().delivered, 1);
    }
}
