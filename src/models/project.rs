use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::health::HealthRecord;

/// How a library file is materialized inside a project.
///
/// - `Copy`: Independent duplicate; its checksum is frozen at assignment time
/// - `Link`: Symlink to the library file; content tracks the library live
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignMode {
    #[default]
    Copy,
    #[serde(alias = "symlink")]
    Link,
}

impl AssignMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Link => "link",
        }
    }
}

/// A script assigned into a project directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectFile {
    pub name: String,
    pub size: u64,
    /// Read through the link for `Link` mode, so it follows the library file.
    pub checksum: String,
    pub mode: AssignMode,
    pub is_link: bool,
    pub assigned_at: DateTime<Utc>,
}

/// A project as listed at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub file_count: usize,
    pub health: HealthRecord,
}

/// Input for assigning a library file to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignInput {
    pub project: String,
    pub filename: String,
    /// Defaults to `Copy` if not specified.
    #[serde(default)]
    pub mode: AssignMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignResult {
    pub message: String,
    pub file: ProjectFile,
    /// Files that were gracefully removed to make room for the assignment.
    pub replaced: Vec<String>,
    /// Backup of the project's previous files; undo restores them.
    pub snapshot: String,
}

/// How a graceful stop ended.
///
/// - `NotRunning`: No live process was associated with the script
/// - `Stopped`: The process confirmed exit within the grace period
/// - `TimedOut`: The grace period elapsed; the file was removed regardless
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    NotRunning,
    Stopped,
    TimedOut,
}

impl StopOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRunning => "not_running",
            Self::Stopped => "stopped",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveResult {
    pub message: String,
    pub stop: StopOutcome,
    pub snapshot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearResult {
    pub removed_count: usize,
    /// `None` when the project was already empty and nothing was backed up.
    pub snapshot: Option<String>,
}

/// A single file that `stop_all` could not remove.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopFailure {
    pub project: String,
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopAllResult {
    pub removed_count: usize,
    pub snapshot: Option<String>,
    /// Per-file failures; the batch is not rolled back.
    pub failures: Vec<StopFailure>,
}
