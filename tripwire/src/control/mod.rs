//! # Control Layer
//!
//! Composes alarms into chains and turns fired alarms into tool-level
//! events.
//!
//! - [`Orchestrator`] - What an alarm configuration needs from its owner
//! - [`ControlChain`] - Ordered alarms with repeat / wait-for semantics
//! - [`ControlManager`] - Owns chains, handlers and the probe dispatch
//!
//! Tool-level events leave the controller as [`ControlEvent`] values on
//! crossbeam channels registered with
//! [`ControlManagerBuilder::handler`](manager::ControlManagerBuilder::handler).

pub mod chain;
pub mod events;
pub mod manager;

use crate::alarm::AlarmManager;
use crate::domain::{Address, AlarmRef, ConfigError, RegisterContext, ThreadId, UnknownEventError};
use crate::engine::ThreadTranslation;

pub use chain::ControlChain;
pub use events::{EventCatalog, EventType};
pub use manager::{ControlManager, ControlManagerBuilder, RegionChain};

/// Upward notification from an alarm configuration.
#[derive(Debug, Clone, Copy)]
pub struct FireEvent<'a> {
    pub event: EventType,
    /// Present only when some handler asked for context
    pub context: Option<&'a RegisterContext>,
    pub ip: Address,
    pub tid: ThreadId,
    pub bcast: bool,
    /// Configuration that fired
    pub alarm: AlarmRef,
}

/// Boundary between an alarm configuration and the component that owns it.
///
/// `fire` and `late_fire` are called synchronously from application threads
/// and must tolerate concurrent calls.
pub trait Orchestrator: Sync {
    /// Whether firing requires a register context snapshot.
    fn need_context(&self) -> bool;

    fn event_string_to_type(&self, name: &str) -> Result<EventType, UnknownEventError>;

    fn fire(&self, event: &FireEvent<'_>);

    fn late_fire(&self, event: &FireEvent<'_>);

    /// First configuration of the vector chain after `vector_index` for
    /// `tid`, if any.
    fn next_alarm_config(&self, vector_index: u32, tid: ThreadId) -> Option<&AlarmManager>;

    /// Register the single configuration driving periodic sampling.
    fn set_uniform_alarm(&self, alarm: AlarmRef) -> Result<(), ConfigError>;

    fn thread_translation(&self) -> Option<ThreadTranslation>;
}

/// Event as delivered to a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlEvent {
    pub event: EventType,
    pub ip: Address,
    pub tid: ThreadId,
    pub bcast: bool,
    /// None for the default start event
    pub alarm: Option<AlarmRef>,
    /// Deferred notification, delivered after the triggering instruction
    pub late: bool,
    pub context: Option<RegisterContext>,
    /// Instructions the thread executed so far (0 unless the event log is on)
    pub icount: u64,
}
