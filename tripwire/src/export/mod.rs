//! Event log export
//!
//! Writes the events a controller delivered as JSON so runs can be compared
//! or replayed with [`crate::event_log::EventLog::from_file`].

pub mod json_log;

pub use json_log::{EventLogExporter, EventRecord};
