//! Orchestration of project assignments.
//!
//! [`Engine`] composes the components below into the operations exposed at
//! the API boundary. Every mutation follows the same order: take the
//! project lock(s), back up whatever is about to be destroyed, run the
//! graceful-stop sequence and/or materialize the new file, then append an
//! event. A failed backup aborts the operation before any original is touched.
//! A single-file operation that fails after its backup puts the project back
//! and returns the undo slot to whatever it held before.
//!
//! Filesystem and database calls run inline on the runtime, like the database
//! layer; only snapshot copies, which fsync every file, move to the blocking pool.

pub mod assignment;
pub mod backup;
pub mod checksum;
pub mod health;
pub mod library;
pub mod lifecycle;
pub mod locks;
pub mod registry;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::models::*;

use assignment::AssignmentEngine;
use backup::BackupManager;
use health::HealthMonitor;
use library::LibraryIndex;
use lifecycle::LifecycleController;
use locks::ProjectLocks;
use registry::ProjectRegistry;

/// Default number of events returned when the caller gives no limit.
pub const DEFAULT_EVENT_LIMIT: u32 = 50;

#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    db: Database,
    library: LibraryIndex,
    registry: ProjectRegistry,
    health: HealthMonitor,
    backup: BackupManager,
    assignment: AssignmentEngine,
    lifecycle: LifecycleController,
    locks: ProjectLocks,
}

impl Engine {
    /// Build an engine over an already migrated database.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let config = Arc::new(config);
        let registry = ProjectRegistry::discover(config.clone())?;
        let library = LibraryIndex::new(config.clone());
        let health = HealthMonitor::new(config.clone(), registry.clone());
        let backup = BackupManager::new(config.clone(), registry.clone(), db.clone());
        let assignment = AssignmentEngine::new(config.clone(), library.clone(), registry.clone());
        let lifecycle = LifecycleController::new(config.clone(), registry.clone(), health.clone());

        Ok(Self {
            config,
            db,
            library,
            registry,
            health,
            backup,
            assignment,
            lifecycle,
            locks: ProjectLocks::new(),
        })
    }

    /// Open the database under the state directory and build an engine.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let db = Database::open(config.database_path())?;
        db.migrate()?;
        Ok(Self::new(config, db)?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ============================================================
    // Queries
    // ============================================================

    pub fn list_library(&self) -> Result<Vec<LibraryFile>> {
        self.library.list()
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        self.registry
            .names()
            .iter()
            .map(|name| {
                Ok(ProjectSummary {
                    name: name.clone(),
                    file_count: self.registry.files(name)?.len(),
                    health: self.health.check(name)?,
                })
            })
            .collect()
    }

    pub fn project_files(&self, project: &str) -> Result<Vec<ProjectFile>> {
        self.registry.files(project)
    }

    pub fn health_summary(&self) -> Result<HealthSummary> {
        self.health.summary()
    }

    pub fn health_report(&self) -> Result<Vec<HealthRecord>> {
        self.health.report()
    }

    pub fn record_heartbeat(&self, project: &str, input: HeartbeatInput) -> Result<()> {
        self.health.record(project, input)
    }

    pub fn recent_events(&self, limit: u32) -> Result<Vec<Event>> {
        Ok(self.db.recent_events(limit)?)
    }

    pub fn list_snapshots(&self) -> Result<Vec<SnapshotSummary>> {
        self.backup.list()
    }

    // ============================================================
    // Single-project mutations
    // ============================================================

    /// Assign a library file to a project, replacing any current assignment.
    pub async fn assign(&self, input: AssignInput) -> Result<AssignResult> {
        let AssignInput {
            project,
            filename,
            mode,
        } = input;

        self.registry.validate_filename(&filename)?;
        self.registry.dir_of(&project)?;
        self.library.get(&filename)?;

        let _guard = self.locks.lock(&project).await;
        self.assignment.check_target(&project, &filename)?;

        let current = self.registry.files(&project)?;
        self.log_health(&project);

        let scope = [project.clone()];
        let files = file_keys(&project, &current);
        let backup = self
            .backup
            .snapshot(&scope, &files, None, SnapshotReason::Assign)
            .await?;
        let snapshot = &backup.snapshot;

        let (file, replaced, degraded) =
            match self.replace_files(&project, &current, &filename, mode).await {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!("Assigning {} to {} failed: {}", filename, project, e);
                    match self.apply_snapshot(snapshot).await {
                        Ok(_) => self.backup.release(&backup),
                        // The backup stays the undo target so the operator can retry.
                        Err(restore) => tracing::error!(
                            "Failed to put back previous files of {}: {}",
                            project,
                            restore
                        ),
                    }
                    return Err(e);
                }
            };

        self.record(
            NewEvent::new(EventAction::Assign)
                .project(&project)
                .filename(&filename)
                .outcome(if degraded {
                    EventOutcome::Degraded
                } else {
                    EventOutcome::Ok
                })
                .details(json!({
                    "mode": mode.as_str(),
                    "checksum": file.checksum,
                    "replaced": replaced,
                    "snapshot": snapshot.name,
                })),
        );

        Ok(AssignResult {
            message: format!("Assigned {filename} to {project} ({})", mode.as_str()),
            file,
            replaced,
            snapshot: snapshot.name.clone(),
        })
    }

    /// Gracefully remove `current`, then place the new file.
    async fn replace_files(
        &self,
        project: &str,
        current: &[ProjectFile],
        filename: &str,
        mode: AssignMode,
    ) -> Result<(ProjectFile, Vec<String>, bool)> {
        let mut replaced = Vec::with_capacity(current.len());
        let mut degraded = false;
        for old in current {
            let outcome = self.lifecycle.graceful_remove(project, &old.name).await?;
            degraded |= outcome == StopOutcome::TimedOut;
            replaced.push(old.name.clone());
        }

        let file = self.assignment.materialize(project, filename, mode)?;
        Ok((file, replaced, degraded))
    }

    /// Gracefully stop and remove one assigned file.
    pub async fn remove(&self, project: &str, filename: &str) -> Result<RemoveResult> {
        self.registry.validate_filename(filename)?;
        self.registry.dir_of(project)?;

        let _guard = self.locks.lock(project).await;
        self.registry.file(project, filename)?;
        self.log_health(project);

        // Only the one file is captured, so undo restores it without
        // touching the project's other files.
        let files = [(project.to_string(), filename.to_string())];
        let backup = self
            .backup
            .snapshot(&[], &files, None, SnapshotReason::Remove)
            .await?;
        let snapshot = &backup.snapshot;

        let stop = match self.lifecycle.graceful_remove(project, filename).await {
            Ok(stop) => stop,
            Err(e) => {
                // The file is still in place; the previous undo target stays valid.
                self.backup.release(&backup);
                return Err(e);
            }
        };

        self.record(
            NewEvent::new(EventAction::Remove)
                .project(project)
                .filename(filename)
                .outcome(outcome_for(stop))
                .details(json!({ "stop": stop.as_str(), "snapshot": snapshot.name })),
        );

        let message = match stop {
            StopOutcome::TimedOut => format!("Removed {filename} from {project} after stop timeout"),
            _ => format!("Removed {filename} from {project} after graceful stop"),
        };
        Ok(RemoveResult {
            message,
            stop,
            snapshot: snapshot.name.clone(),
        })
    }

    /// Back up and remove every file in a project.
    pub async fn clear(&self, project: &str) -> Result<ClearResult> {
        self.registry.dir_of(project)?;

        let _guard = self.locks.lock(project).await;
        let current = self.registry.files(project)?;
        if current.is_empty() {
            return Ok(ClearResult {
                removed_count: 0,
                snapshot: None,
            });
        }
        self.log_health(project);

        let scope = [project.to_string()];
        let snapshot = self
            .backup
            .snapshot(
                &scope,
                &file_keys(project, &current),
                None,
                SnapshotReason::Clear,
            )
            .await?
            .snapshot;

        let mut removed = Vec::with_capacity(current.len());
        let mut degraded = false;
        for file in &current {
            match self.lifecycle.graceful_remove(project, &file.name).await {
                Ok(outcome) => {
                    degraded |= outcome == StopOutcome::TimedOut;
                    removed.push(file.name.clone());
                }
                Err(e) => {
                    self.record(
                        NewEvent::new(EventAction::Clear)
                            .project(project)
                            .filename(&file.name)
                            .outcome(EventOutcome::Partial)
                            .details(json!({
                                "removed": removed,
                                "error": e.to_string(),
                                "snapshot": snapshot.name,
                            })),
                    );
                    return Err(e);
                }
            }
        }

        self.record(
            NewEvent::new(EventAction::Clear)
                .project(project)
                .outcome(if degraded {
                    EventOutcome::Degraded
                } else {
                    EventOutcome::Ok
                })
                .details(json!({ "removed": removed, "snapshot": snapshot.name })),
        );

        Ok(ClearResult {
            removed_count: removed.len(),
            snapshot: Some(snapshot.name),
        })
    }

    // ============================================================
    // Multi-project mutations
    // ============================================================

    /// Stop and remove every assigned file in every project.
    ///
    /// All kill markers go out first so processes stop in parallel, then one
    /// snapshot covers the whole batch. Removal failures are collected per
    /// file; files already removed stay removed.
    pub async fn stop_all(&self) -> Result<StopAllResult> {
        let names = self.registry.names().to_vec();
        let _guards = self.locks.lock_many(names.iter().map(String::as_str)).await;

        let mut targets = Vec::new();
        for name in &names {
            targets.extend(file_keys(name, &self.registry.files(name)?));
        }
        if targets.is_empty() {
            return Ok(StopAllResult {
                removed_count: 0,
                snapshot: None,
                failures: Vec::new(),
            });
        }

        let mut failures = Vec::new();
        let mut signaled = Vec::with_capacity(targets.len());
        for (project, filename) in &targets {
            match self.lifecycle.signal_stop(project, filename) {
                Ok(_) => signaled.push((project.clone(), filename.clone())),
                Err(e) => failures.push(StopFailure {
                    project: project.clone(),
                    filename: filename.clone(),
                    error: e.to_string(),
                }),
            }
        }

        let scope: Vec<String> = targets
            .iter()
            .map(|(project, _)| project.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let snapshot = match self
            .backup
            .snapshot(&scope, &targets, None, SnapshotReason::StopAll)
            .await
        {
            Ok(backup) => backup.snapshot,
            Err(e) => {
                tracing::error!("Stop-all aborted before removal: {}", e);
                for (project, filename) in &signaled {
                    self.lifecycle.withdraw(project, filename);
                }
                return Err(e);
            }
        };

        let deadline = self.lifecycle.deadline();
        let mut removed_count = 0;
        let mut degraded = false;
        for (project, filename) in &signaled {
            match self.lifecycle.finish_remove(project, filename, deadline).await {
                Ok(outcome) => {
                    degraded |= outcome == StopOutcome::TimedOut;
                    removed_count += 1;
                }
                Err(e) => {
                    tracing::error!("Stop-all failed on {}/{}: {}", project, filename, e);
                    failures.push(StopFailure {
                        project: project.clone(),
                        filename: filename.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let outcome = if !failures.is_empty() {
            EventOutcome::Partial
        } else if degraded {
            EventOutcome::Degraded
        } else {
            EventOutcome::Ok
        };
        self.record(NewEvent::new(EventAction::StopAll).outcome(outcome).details(json!({
            "removed": removed_count,
            "projects": scope,
            "failures": failures.len(),
            "snapshot": snapshot.name,
        })));

        Ok(StopAllResult {
            removed_count,
            snapshot: Some(snapshot.name),
            failures,
        })
    }

    /// Capture every project's files under a name. The snapshot becomes the
    /// undo target, exactly like the automatic backups.
    pub async fn create_snapshot(&self, name: Option<String>) -> Result<SnapshotSummary> {
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let names = self.registry.names().to_vec();
        let _guards = self.locks.lock_many(names.iter().map(String::as_str)).await;

        let mut files = Vec::new();
        for project in &names {
            files.extend(file_keys(project, &self.registry.files(project)?));
        }

        let snapshot = self
            .backup
            .snapshot(&names, &files, name, SnapshotReason::Manual)
            .await?
            .snapshot;

        self.record(NewEvent::new(EventAction::Snapshot).details(json!({
            "name": snapshot.name,
            "files": snapshot.entries.len(),
        })));

        Ok(SnapshotSummary::from(&snapshot))
    }

    /// Revert the most recent backup. Consumes it: a second call fails with
    /// [`EngineError::NothingToUndo`](crate::error::EngineError::NothingToUndo).
    pub async fn undo(&self) -> Result<UndoResult> {
        let snapshot = self.backup.take_undo_target()?;
        let _guards = self
            .locks
            .lock_many(snapshot_projects(&snapshot).iter().map(String::as_str))
            .await;

        let restored = match self.apply_snapshot(&snapshot).await {
            Ok(restored) => restored,
            Err(e) => {
                tracing::error!("Undo of {} failed: {}", snapshot.name, e);
                self.backup.restore_undo_target(snapshot.id);
                return Err(e);
            }
        };

        self.record(NewEvent::new(EventAction::Undo).details(json!({
            "snapshot": snapshot.name,
            "reason": snapshot.reason.as_str(),
            "restored": restored,
        })));

        Ok(UndoResult {
            message: format!(
                "Undone: {} - restored {} file(s) from snapshot {}",
                snapshot.reason.as_str(),
                restored,
                snapshot.name
            ),
            restored,
        })
    }

    /// Return the projects of a named snapshot to their recorded state.
    ///
    /// The state being replaced is backed up first and becomes the undo target.
    pub async fn restore_snapshot(&self, name: &str) -> Result<RestoreResult> {
        let target = self.backup.find(name)?;
        let projects = snapshot_projects(&target);
        let _guards = self.locks.lock_many(projects.iter().map(String::as_str)).await;

        let mut files = Vec::new();
        for project in &projects {
            if self.registry.contains(project) {
                files.extend(file_keys(project, &self.registry.files(project)?));
            }
        }
        let scope: Vec<String> = target
            .projects
            .iter()
            .filter(|p| self.registry.contains(p))
            .cloned()
            .collect();
        let backup = self
            .backup
            .snapshot(&scope, &files, None, SnapshotReason::Restore)
            .await?
            .snapshot;

        let restored = self.apply_snapshot(&target).await?;

        self.record(NewEvent::new(EventAction::Restore).details(json!({
            "name": target.name,
            "restored": restored,
            "snapshot": backup.name,
        })));

        Ok(RestoreResult {
            restored,
            snapshot: backup.name,
        })
    }

    /// Bring the snapshot's projects back to its recorded state. Callers hold
    /// the locks of every project the snapshot mentions.
    async fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<usize> {
        for project in &snapshot.projects {
            if !self.registry.contains(project) {
                tracing::warn!("Snapshot {} covers unknown project {}", snapshot.name, project);
                continue;
            }
            let keep: BTreeSet<&str> = snapshot
                .entries
                .iter()
                .filter(|e| &e.project == project)
                .map(|e| e.filename.as_str())
                .collect();
            for file in self.registry.files(project)? {
                if !keep.contains(file.name.as_str()) {
                    self.lifecycle.graceful_remove(project, &file.name).await?;
                }
            }
        }

        let mut restored = 0;
        for entry in &snapshot.entries {
            if !self.registry.contains(&entry.project) {
                tracing::warn!(
                    "Skipping {}/{}: project no longer exists",
                    entry.project,
                    entry.filename
                );
                continue;
            }
            self.backup.restore_entry(entry)?;
            restored += 1;
        }
        Ok(restored)
    }

    // ============================================================
    // Helpers
    // ============================================================

    fn log_health(&self, project: &str) {
        match self.health.check(project) {
            Ok(record) => tracing::debug!(
                "{} is {} before mutation",
                project,
                record.status.as_str()
            ),
            Err(e) => tracing::debug!("Health check for {} failed: {}", project, e),
        }
    }

    /// Append to the event log. The mutation already happened, so a failed
    /// append is logged rather than reported to the caller.
    fn record(&self, event: NewEvent) {
        let action = event.action;
        if let Err(e) = self.db.append_event(event) {
            tracing::error!("Failed to record {} event: {}", action.as_str(), e);
        }
    }
}

fn file_keys(project: &str, files: &[ProjectFile]) -> Vec<(String, String)> {
    files
        .iter()
        .map(|f| (project.to_string(), f.name.clone()))
        .collect()
}

/// Every project a snapshot touches, whether fully captured or not.
fn snapshot_projects(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .projects
        .iter()
        .cloned()
        .chain(snapshot.entries.iter().map(|e| e.project.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn outcome_for(stop: StopOutcome) -> EventOutcome {
    match stop {
        StopOutcome::TimedOut => EventOutcome::Degraded,
        StopOutcome::Stopped | StopOutcome::NotRunning => EventOutcome::Ok,
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("library_dir", &self.config.library_dir)
            .field("projects", &self.registry.names())
            .finish()
    }
}
