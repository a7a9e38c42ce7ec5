use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A script available for assignment.
///
/// This is a snapshot of on-disk content at read time; size and checksum are
/// recomputed on every listing, never cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryFile {
    /// File name, unique within the library.
    pub name: String,
    pub size: u64,
    pub checksum: String,
    pub modified: DateTime<Utc>,
}
