//! Domain models for the script manager.
//!
//! # Core Concepts
//!
//! ## Persistent State
//!
//! - [`LibraryFile`]: A script in the shared library, recomputed on every listing.
//! - [`ProjectFile`]: A script assigned into a project directory, as a copy or a link.
//! - [`Snapshot`]: Durable backup of a set of project files, the unit of undo.
//! - [`Event`]: Append-only audit record of every mutation.
//!
//! ## Derived State
//!
//! - [`HealthRecord`]: Liveness classification recomputed from the raw heartbeat
//!   file each time it is read.

mod event;
mod health;
mod library;
mod project;
mod snapshot;

pub use event::*;
pub use health::*;
pub use library::*;
pub use project::*;
pub use snapshot::*;
