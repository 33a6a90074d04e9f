//! Control chains
//!
//! A chain is a comma separated list of alarms plus config tokens:
//!
//! ```text
//! precond:address:main,start:icount:1000,stop:icount:5000,repeat:3,name:roi
//! ```
//!
//! Only the first alarm is armed when the chain activates. Each fire arms
//! the next alarm; the last one either restarts the chain (per thread, up to
//! the repeat count) or arms the chains waiting on this one.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tripwire_common::MAX_THREADS;

use crate::alarm::parse::split_args;
use crate::alarm::{AlarmManager, AlarmOptions};
use crate::domain::{AlarmRef, ChainId, ConfigError, ThreadId};
use crate::engine::ThreadRegistry;

use super::manager::ControlManager;
use super::{EventType, FireEvent, Orchestrator};

/// How many times a chain runs per thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Times(u32),
    Indefinitely,
}

impl Default for Repeat {
    fn default() -> Self {
        Repeat::Times(1)
    }
}

/// Chain-level construction flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainOptions {
    pub late_handler: bool,
    pub vector: bool,
    pub vector_index: u32,
    /// Region tag reported with every event of a region chain
    pub region: Option<u32>,
    /// Thread the region chain belongs to
    pub region_tid: Option<ThreadId>,
}

pub struct ControlChain {
    id: ChainId,
    raw: String,
    name: Option<String>,
    wait_for_name: Option<String>,
    pub(crate) wait_for: Option<ChainId>,
    pub(crate) waiting: Vec<ChainId>,
    repeat_token: Repeat,
    /// Completed passes per thread
    repeat: Box<[AtomicU32]>,
    alarms: Vec<AlarmManager>,
    options: ChainOptions,
}

fn is_config_token(token: &str) -> bool {
    matches!(split_args(':', token).first(), Some(&("repeat" | "name" | "waitfor")))
}

impl ControlChain {
    /// Parse a chain string, building every alarm in it.
    pub fn parse(
        chain: &str,
        id: ChainId,
        options: ChainOptions,
        orchestrator: &dyn Orchestrator,
        registry: &Arc<ThreadRegistry>,
    ) -> Result<Self, ConfigError> {
        let mut parsed = Self {
            id,
            raw: chain.to_string(),
            name: None,
            wait_for_name: None,
            wait_for: None,
            waiting: Vec::new(),
            repeat_token: Repeat::default(),
            repeat: (0..MAX_THREADS).map(|_| AtomicU32::new(0)).collect(),
            alarms: Vec::new(),
            options,
        };

        for token in split_args(',', chain) {
            if is_config_token(token) {
                parsed.parse_config_token(token)?;
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let alarm_id = AlarmRef::new(id, parsed.alarms.len() as u32);
            let alarm_options = AlarmOptions {
                late_handler: options.late_handler,
                vector: options.vector,
                vector_index: options.vector_index,
                region_tid: options.region_tid,
            };
            parsed.alarms.push(AlarmManager::new(token, alarm_id, alarm_options, orchestrator, registry)?);
        }

        if parsed.alarms.is_empty() {
            return Err(ConfigError::EmptyChain(chain.to_string()));
        }
        Ok(parsed)
    }

    fn parse_config_token(&mut self, token: &str) -> Result<(), ConfigError> {
        let parts = split_args(':', token);
        match parts.as_slice() {
            ["repeat"] => self.repeat_token = Repeat::Indefinitely,
            ["repeat", n, ..] => {
                self.repeat_token = Repeat::Times(crate::alarm::parse::parse_u32(n)?);
            }
            ["name", name, ..] => self.name = Some((*name).to_string()),
            ["waitfor", name, ..] => self.wait_for_name = Some((*name).to_string()),
            [key] => return Err(ConfigError::MissingValue((*key).to_string())),
            _ => return Err(ConfigError::UnknownConfigToken(token.to_string())),
        }
        Ok(())
    }

    // ========================================================================
    // Firing
    // ========================================================================

    /// An alarm of this chain fired.
    pub(crate) fn fire(&self, manager: &ControlManager, event: &FireEvent<'_>) {
        if event.event != EventType::Precond {
            manager.deliver(event, self.options.region, false);
        }

        let Some(alarm) = self.alarm(event.alarm.index) else {
            return;
        };
        if alarm.arm_next() {
            self.arm_next_alarm(manager, event.alarm.index, event.tid, event.bcast);
        }
    }

    pub(crate) fn late_fire(&self, manager: &ControlManager, event: &FireEvent<'_>) {
        manager.deliver(event, self.options.region, true);
    }

    fn arm(&self, tid: ThreadId, bcast: bool, index: usize) {
        let alarm = &self.alarms[index];
        if bcast || alarm.is_global() {
            alarm.arm_all();
        } else {
            alarm.arm_thread(tid);
        }
    }

    fn arm_next_alarm(&self, manager: &ControlManager, index: u32, tid: ThreadId, bcast: bool) {
        let next = index as usize + 1;
        if next < self.alarms.len() {
            self.arm(tid, bcast, next);
            return;
        }

        self.repeat[tid.slot()].fetch_add(1, Ordering::AcqRel);
        if self.need_to_repeat(tid) {
            self.arm(tid, bcast, 0);
        } else {
            for waiting in &self.waiting {
                if let Some(chain) = manager.chain(*waiting) {
                    chain.arm_chain(tid);
                }
            }
        }
    }

    fn need_to_repeat(&self, tid: ThreadId) -> bool {
        match self.repeat_token {
            Repeat::Indefinitely => true,
            Repeat::Times(n) => self.repeat[tid.slot()].load(Ordering::Acquire) < n,
        }
    }

    /// Arm the first alarm for one thread (a chain this one waited for
    /// completed on that thread).
    pub fn arm_chain(&self, tid: ThreadId) {
        self.alarms[0].arm_thread(tid);
    }

    /// Arm the first alarm unless the chain waits for another.
    pub fn activate(&self) {
        if self.wait_for.is_none() {
            self.alarms[0].activate();
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn id(&self) -> ChainId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn wait_for_name(&self) -> Option<&str> {
        self.wait_for_name.as_deref()
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn repeat(&self) -> Repeat {
        self.repeat_token
    }

    #[must_use]
    pub fn alarms(&self) -> &[AlarmManager] {
        &self.alarms
    }

    #[must_use]
    pub fn alarm(&self, index: u32) -> Option<&AlarmManager> {
        self.alarms.get(index as usize)
    }

    #[must_use]
    pub fn is_vector(&self) -> bool {
        self.options.vector
    }

    #[must_use]
    pub fn region(&self) -> Option<u32> {
        self.options.region
    }

    #[must_use]
    pub fn has_start_event(&self) -> bool {
        self.alarms.iter().any(AlarmManager::has_start_event)
    }

    pub fn set_late_handler(&self) {
        for alarm in &self.alarms {
            alarm.set_late_handler();
        }
    }

    /// Diagnostic dump to stderr.
    pub fn print(&self) {
        for alarm in &self.alarms {
            alarm.print();
        }
        match self.repeat_token {
            Repeat::Indefinitely => eprintln!("REPEAT: indefinitely"),
            Repeat::Times(n) => eprintln!("REPEAT: {n}"),
        }
        eprintln!("NAME: {}", self.name.as_deref().unwrap_or(""));
        match self.wait_for {
            Some(chain) => eprintln!("WAIT FOR: {chain}"),
            None => eprintln!("WAIT FOR: none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_tokens_are_recognised() {
        assert!(is_config_token("repeat"));
        assert!(is_config_token("repeat:4"));
        assert!(is_config_token("name:roi"));
        assert!(is_config_token("waitfor:roi"));
        assert!(!is_config_token("start:icount:10"));
        assert!(!is_config_token("repeater:icount:10"));
    }
}
