use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    Manual,
    Assign,
    Remove,
    Clear,
    StopAll,
    Restore,
}

impl SnapshotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Assign => "assign",
            Self::Remove => "remove",
            Self::Clear => "clear",
            Self::StopAll => "stop_all",
            Self::Restore => "restore",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "assign" => Some(Self::Assign),
            "remove" => Some(Self::Remove),
            "clear" => Some(Self::Clear),
            "stop_all" => Some(Self::StopAll),
            "restore" => Some(Self::Restore),
            _ => None,
        }
    }
}

/// A durable backup of project files. Immutable once created.
///
/// `projects` is the scope the snapshot describes: restoring it brings every
/// listed project back to exactly the files in `entries`, so a project in
/// scope with no entries is restored to empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub name: String,
    pub reason: SnapshotReason,
    pub projects: Vec<String>,
    pub entries: Vec<SnapshotEntry>,
    pub created_at: DateTime<Utc>,
}

/// One backed-up file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub project: String,
    pub filename: String,
    /// Where the content was copied to.
    pub backup_path: PathBuf,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: Uuid,
    pub name: String,
    pub reason: SnapshotReason,
    pub entry_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name.clone(),
            reason: snapshot.reason,
            entry_count: snapshot.entries.len(),
            created_at: snapshot.created_at,
        }
    }
}

/// Input for creating a named snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSnapshotInput {
    /// Generated from the current time if not specified.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoResult {
    pub message: String,
    pub restored: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub restored: usize,
    /// Backup of the state that was replaced; undo returns to it.
    pub snapshot: String,
}
