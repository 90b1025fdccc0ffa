//! Diagnostics recording for detection and deobfuscation runs.
//!
//! The core carries no logging framework. Everything worth telling the host
//! about - which aspects were found, which payloads failed to decode, which
//! infrastructure was left in place - is appended to an [`EventLog`] owned by
//! the orchestrator and queried after the run.

use std::fmt;

/// Category of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Informational progress message.
    Info,
    /// Something unexpected that did not stop the run.
    Warning,
    /// A step failed and was skipped.
    Error,
}

impl EventKind {
    /// Returns a short label for this kind.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

/// A single recorded event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Category of the event.
    pub kind: EventKind,
    /// Human-readable description.
    pub message: String,
}

impl Event {
    /// Creates a new event.
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.label(), self.message)
    }
}

/// Append-only collection of events from one module session.
///
/// Backed by an append-only vector so components holding shared borrows can
/// still record through `&self`.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }
}
