//! Event log models for live runs and replay
//!
//! [`LiveLog`] grows while a run delivers events; [`EventLog`] is loaded
//! back from an exported file.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

use crate::control::{ControlEvent, EventCatalog};
use crate::export::json_log::EventLogFile;
use crate::export::EventRecord;

/// Per-thread tally of delivered events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadSummary {
    pub events: usize,
    pub late: usize,
    /// Instruction count at the thread's last event
    pub last_icount: u64,
}

/// Immutable log loaded from an export
#[derive(Debug)]
pub struct EventLog {
    pub chains: Vec<String>,
    pub events: Vec<EventRecord>,
}

impl EventLog {
    /// Parse an exported event log.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event log {}", path.display()))?;
        let file: EventLogFile =
            serde_json::from_str(&content).context("Event log is not valid JSON")?;
        Ok(Self { chains: file.chains, events: file.events })
    }

    /// Events of one kind, in delivery order.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a EventRecord> + 'a {
        self.events.iter().filter(move |e| e.event == name)
    }
}

/// Live log that grows as events arrive
#[derive(Debug, Default)]
pub struct LiveLog {
    threads: BTreeMap<u32, ThreadSummary>,
    by_event: BTreeMap<String, usize>,
    total: usize,
}

impl LiveLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event(&mut self, event: &ControlEvent, catalog: &EventCatalog) {
        let summary = self.threads.entry(event.tid.0).or_default();
        summary.events += 1;
        if event.late {
            summary.late += 1;
        }
        summary.last_icount = summary.last_icount.max(event.icount);

        *self.by_event.entry(catalog.name(event.event).to_string()).or_default() += 1;
        self.total += 1;
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.total
    }

    /// Threads that saw at least one event, sorted by id.
    pub fn threads(&self) -> impl Iterator<Item = (u32, &ThreadSummary)> {
        self.threads.iter().map(|(tid, summary)| (*tid, summary))
    }

    /// Delivered count per event name, sorted by name.
    pub fn by_event(&self) -> impl Iterator<Item = (&str, usize)> {
        self.by_event.iter().map(|(name, count)| (name.as_str(), *count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::EventType;
    use crate::domain::ThreadId;

    fn event(tid: u32, event: EventType, late: bool, icount: u64) -> ControlEvent {
        ControlEvent {
            event,
            ip: 0,
            tid: ThreadId(tid),
            bcast: false,
            alarm: None,
            late,
            context: None,
            icount,
        }
    }

    #[test]
    fn test_live_log_tallies_per_thread() {
        let catalog = EventCatalog::new();
        let mut log = LiveLog::new();
        log.add_event(&event(2, EventType::Start, false, 10), &catalog);
        log.add_event(&event(2, EventType::Start, true, 10), &catalog);
        log.add_event(&event(0, EventType::Stop, false, 50), &catalog);

        assert_eq!(log.event_count(), 3);
        let threads: Vec<_> = log.threads().collect();
        assert_eq!(threads[0].0, 0);
        assert_eq!(threads[1].1, &ThreadSummary { events: 2, late: 1, last_icount: 10 });
        let by_event: Vec<_> = log.by_event().collect();
        assert_eq!(by_event, vec![("start", 2), ("stop", 1)]);
    }
}
