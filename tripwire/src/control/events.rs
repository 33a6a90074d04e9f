//! Tool-visible event types and the name catalog

use std::collections::HashMap;
use std::fmt;

use crate::domain::UnknownEventError;

/// Event delivered to the tool when an alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Start,
    Stop,
    /// Arms the rest of a chain without notifying the tool
    Precond,
    StatsReset,
    StatsEmit,
    Breakpoint,
    /// Registered by a tool through [`EventCatalog::add_event`]
    Custom(u32),
}

impl EventType {
    const BUILTIN: [(&'static str, EventType); 6] = [
        ("start", EventType::Start),
        ("stop", EventType::Stop),
        ("precond", EventType::Precond),
        ("stats-reset", EventType::StatsReset),
        ("stats-emit", EventType::StatsEmit),
        ("breakpoint", EventType::Breakpoint),
    ];
}

/// Bidirectional event name table.
#[derive(Debug, Clone)]
pub struct EventCatalog {
    by_name: HashMap<String, EventType>,
    custom_names: Vec<String>,
}

impl EventCatalog {
    #[must_use]
    pub fn new() -> Self {
        let by_name =
            EventType::BUILTIN.iter().map(|(name, ev)| ((*name).to_string(), *ev)).collect();
        Self { by_name, custom_names: Vec::new() }
    }

    /// Register a tool-specific event name; re-registering returns the
    /// existing type.
    pub fn add_event(&mut self, name: &str) -> EventType {
        if let Some(ev) = self.by_name.get(name) {
            return *ev;
        }
        #[allow(clippy::cast_possible_truncation)]
        let ev = EventType::Custom(self.custom_names.len() as u32);
        self.custom_names.push(name.to_string());
        self.by_name.insert(name.to_string(), ev);
        ev
    }

    pub fn lookup(&self, name: &str) -> Result<EventType, UnknownEventError> {
        self.by_name.get(name).copied().ok_or_else(|| UnknownEventError(name.to_string()))
    }

    #[must_use]
    pub fn name(&self, ev: EventType) -> &str {
        match ev {
            EventType::Custom(id) => {
                self.custom_names.get(id as usize).map_or("invalid", String::as_str)
            }
            builtin => EventType::BUILTIN
                .iter()
                .find(|(_, candidate)| *candidate == builtin)
                .map_or("invalid", |(name, _)| *name),
        }
    }
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Custom(id) => write!(f, "custom#{id}"),
            builtin => {
                let name = EventType::BUILTIN
                    .iter()
                    .find(|(_, candidate)| candidate == builtin)
                    .map_or("invalid", |(name, _)| *name);
                f.write_str(name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_round_trip() {
        let catalog = EventCatalog::new();
        let ev = catalog.lookup("stats-emit").unwrap();
        assert_eq!(ev, EventType::StatsEmit);
        assert_eq!(catalog.name(ev), "stats-emit");
        assert_eq!(EventType::Precond.to_string(), "precond");
    }

    #[test]
    fn test_unknown_name_fails() {
        let catalog = EventCatalog::new();
        assert_eq!(catalog.lookup("launch").unwrap_err(), UnknownEventError("launch".to_string()));
    }

    #[test]
    fn test_custom_events_are_stable() {
        let mut catalog = EventCatalog::new();
        let warmup = catalog.add_event("warmup");
        assert_eq!(catalog.add_event("warmup"), warmup);
        assert_eq!(catalog.add_event("start"), EventType::Start);
        assert_eq!(catalog.lookup("warmup").unwrap(), warmup);
        assert_eq!(catalog.name(warmup), "warmup");
    }
}
