use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::control::{ControlEvent, EventCatalog};
use crate::domain::ExportError;

/// One delivered event, as written to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event name from the catalog (`start`, `stop`, custom names)
    pub event: String,
    pub tid: u32,
    /// Instruction pointer, hex formatted
    pub ip: String,
    /// Instructions the thread executed when the event fired
    pub icount: u64,
    /// Alarm that fired, `null` for the default start event
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alarm: Option<String>,
    pub bcast: bool,
    pub late: bool,
}

/// Log container
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EventLogFile {
    /// Control chains the run was configured with
    pub(crate) chains: Vec<String>,
    pub(crate) events: Vec<EventRecord>,
}

/// Collects delivered events and writes them as a JSON document.
pub struct EventLogExporter {
    chains: Vec<String>,
    events: Vec<EventRecord>,
}

impl EventLogExporter {
    #[must_use]
    pub fn new(chains: Vec<String>) -> Self {
        Self { chains, events: Vec::new() }
    }

    /// Record an event. Names are resolved now; the catalog may not outlive
    /// the controller.
    pub fn add_event(&mut self, event: &ControlEvent, catalog: &EventCatalog) {
        self.events.push(EventRecord {
            event: catalog.name(event.event).to_string(),
            tid: event.tid.0,
            ip: format!("{:#x}", event.ip),
            icount: event.icount,
            alarm: event.alarm.map(|a| a.to_string()),
            bcast: event.bcast,
            late: event.late,
        });
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Write the log to `writer`.
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
        let file = EventLogFile { chains: self.chains.clone(), events: self.events.clone() };
        serde_json::to_writer_pretty(&mut writer, &file)?;
        writer.write_all(b"\n")?;
        writer.flush().map_err(|e| ExportError::WriteFailed(e.to_string()))
    }
}
