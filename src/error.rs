//! Error taxonomy for engine operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// What kind of thing a [`EngineError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Project,
    LibraryFile,
    ProjectFile,
    Snapshot,
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Project => "project",
            Self::LibraryFile => "library file",
            Self::ProjectFile => "project file",
            Self::Snapshot => "snapshot",
        })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: Missing, name: String },

    #[error("Invalid filename {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Name collision in project {project}: {path} exists and is not managed")]
    NameCollision { project: String, path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup failed for {project}/{filename}, nothing was removed: {source}")]
    Backup {
        project: String,
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// Never returned to callers; formatted into the warning the lifecycle
    /// controller logs before proceeding with removal.
    #[error("{project}/{filename} did not confirm exit within {grace:?}")]
    GracefulStopTimeout {
        project: String,
        filename: String,
        grace: Duration,
    },

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

impl EngineError {
    pub fn not_found(kind: Missing, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attach human-readable context to `std::io::Result`.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| EngineError::io(f(), source))
    }
}
