use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Assign,
    Remove,
    Clear,
    StopAll,
    Snapshot,
    Restore,
    Undo,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Remove => "remove",
            Self::Clear => "clear",
            Self::StopAll => "stop_all",
            Self::Snapshot => "snapshot",
            Self::Restore => "restore",
            Self::Undo => "undo",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "assign" => Some(Self::Assign),
            "remove" => Some(Self::Remove),
            "clear" => Some(Self::Clear),
            "stop_all" => Some(Self::StopAll),
            "snapshot" => Some(Self::Snapshot),
            "restore" => Some(Self::Restore),
            "undo" => Some(Self::Undo),
            _ => None,
        }
    }
}

/// - `Ok`: The operation completed as requested
/// - `Partial`: Some items failed (bulk operations only)
/// - `Degraded`: Completed, but a graceful stop timed out
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Ok,
    Partial,
    Degraded,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Degraded => "degraded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "partial" => Some(Self::Partial),
            "degraded" => Some(Self::Degraded),
            _ => None,
        }
    }
}

/// An append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic; later events always have larger ids.
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: EventAction,
    pub project: Option<String>,
    pub filename: Option<String>,
    pub outcome: EventOutcome,
    pub details: serde_json::Value,
}

/// Input for appending an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub action: EventAction,
    pub project: Option<String>,
    pub filename: Option<String>,
    pub outcome: EventOutcome,
    pub details: serde_json::Value,
}

impl NewEvent {
    pub fn new(action: EventAction) -> Self {
        Self {
            action,
            project: None,
            filename: None,
            outcome: EventOutcome::Ok,
            details: serde_json::Value::Null,
        }
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn outcome(mut self, outcome: EventOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
