//! Backups taken before destructive operations, and the single undo slot.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::assignment::atomic_copy;
use super::checksum;
use super::registry::ProjectRegistry;
use crate::config::Config;
use crate::db::Database;
use crate::error::{EngineError, IoContext, Missing, Result};
use crate::models::{Snapshot, SnapshotEntry, SnapshotReason, SnapshotSummary};

/// How many snapshots a listing returns.
const LIST_LIMIT: u32 = 20;

/// A saved snapshot together with the undo target it displaced.
#[derive(Debug, Clone)]
pub struct Backup {
    pub snapshot: Snapshot,
    pub displaced: Option<Uuid>,
}

#[derive(Clone)]
pub struct BackupManager {
    config: Arc<Config>,
    registry: ProjectRegistry,
    db: Database,
}

impl BackupManager {
    pub fn new(config: Arc<Config>, registry: ProjectRegistry, db: Database) -> Self {
        Self {
            config,
            registry,
            db,
        }
    }

    /// Durably copy `files` into a new snapshot covering `scope`.
    ///
    /// Either every file is copied and synced and the snapshot becomes the
    /// undo target, or nothing is recorded and [`EngineError::Backup`] is
    /// returned. Callers must not touch the originals on error.
    pub async fn snapshot(
        &self,
        scope: &[String],
        files: &[(String, String)],
        name: Option<String>,
        reason: SnapshotReason,
    ) -> Result<Backup> {
        let manager = self.clone();
        let scope = scope.to_vec();
        let files = files.to_vec();

        // Copies and fsyncs block; keep them off the runtime workers.
        tokio::task::spawn_blocking(move || manager.save(&scope, &files, name, reason))
            .await
            .map_err(|e| EngineError::io("Backup task failed", std::io::Error::other(e)))?
    }

    fn save(
        &self,
        scope: &[String],
        files: &[(String, String)],
        name: Option<String>,
        reason: SnapshotReason,
    ) -> Result<Backup> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let name = name.unwrap_or_else(|| default_name(reason, created_at));
        let root = self.config.backup_dir().join(id.to_string());

        let entries = match self.copy_files(&root, files) {
            Ok(entries) => entries,
            Err(e) => {
                discard(&root);
                return Err(e);
            }
        };

        let mut projects = scope.to_vec();
        projects.sort();
        projects.dedup();

        let snapshot = Snapshot {
            id,
            name,
            reason,
            projects,
            entries,
            created_at,
        };

        let displaced = match self.db.insert_snapshot(&snapshot) {
            Ok(displaced) => displaced,
            Err(e) => {
                discard(&root);
                return Err(EngineError::Database(e));
            }
        };

        tracing::info!(
            "Snapshot {} ({}) saved with {} file(s)",
            snapshot.name,
            reason.as_str(),
            snapshot.entries.len()
        );
        Ok(Backup {
            snapshot,
            displaced,
        })
    }

    fn copy_files(&self, root: &Path, files: &[(String, String)]) -> Result<Vec<SnapshotEntry>> {
        let mut entries = Vec::with_capacity(files.len());
        for (project, filename) in files {
            let backup_err = |source| EngineError::Backup {
                project: project.clone(),
                filename: filename.clone(),
                source,
            };

            let src = self.registry.dir_of(project)?.join(filename);
            let dst_dir = root.join(project);
            std::fs::create_dir_all(&dst_dir).map_err(backup_err)?;
            let dst = dst_dir.join(filename);
            std::fs::copy(&src, &dst).map_err(backup_err)?;
            sync_file(&dst).map_err(backup_err)?;
            sync_dir(&dst_dir).map_err(backup_err)?;
            let checksum = checksum::checksum(&dst).map_err(backup_err)?;

            entries.push(SnapshotEntry {
                project: project.clone(),
                filename: filename.clone(),
                backup_path: dst,
                checksum,
            });
        }

        if !entries.is_empty() {
            sync_dir(root).io_context(|| format!("Failed to sync backup {}", root.display()))?;
        }
        Ok(entries)
    }

    /// Consume the pending undo target.
    pub fn take_undo_target(&self) -> Result<Snapshot> {
        self.db.take_undo_target()?.ok_or(EngineError::NothingToUndo)
    }

    /// Reinstate a target whose undo failed, unless something newer replaced it.
    pub fn restore_undo_target(&self, id: Uuid) {
        match self.db.restore_undo_target(id) {
            Ok(true) => tracing::info!("Undo target {} reinstated", id),
            Ok(false) => tracing::warn!("Undo target {} superseded, not reinstated", id),
            Err(e) => tracing::error!("Failed to reinstate undo target {}: {}", id, e),
        }
    }

    /// Give up the undo slot claimed by `backup` after the operation it
    /// guarded failed without effect. The displaced target gets it back.
    pub fn release(&self, backup: &Backup) {
        let id = backup.snapshot.id;
        match self.db.reset_undo_target(id, backup.displaced) {
            Ok(true) => tracing::info!(
                "Undo slot returned from {} to {:?}",
                backup.snapshot.name,
                backup.displaced
            ),
            Ok(false) => tracing::warn!("Undo slot for {} already superseded", backup.snapshot.name),
            Err(e) => tracing::error!("Failed to release undo slot of {}: {}", id, e),
        }
    }

    pub fn find(&self, name: &str) -> Result<Snapshot> {
        self.db
            .find_snapshot_by_name(name)?
            .ok_or_else(|| EngineError::not_found(Missing::Snapshot, name))
    }

    pub fn list(&self) -> Result<Vec<SnapshotSummary>> {
        Ok(self.db.list_snapshots(LIST_LIMIT)?)
    }

    /// Copy one backed-up file back into its project, replacing whatever is there.
    pub fn restore_entry(&self, entry: &SnapshotEntry) -> Result<PathBuf> {
        let dst = self.registry.dir_of(&entry.project)?.join(&entry.filename);
        atomic_copy(&entry.backup_path, &dst).io_context(|| {
            format!(
                "Failed to restore {}/{} from {}",
                entry.project,
                entry.filename,
                entry.backup_path.display()
            )
        })?;
        Ok(dst)
    }
}

fn default_name(reason: SnapshotReason, at: chrono::DateTime<Utc>) -> String {
    let stamp = at.format("%Y%m%d_%H%M%S");
    match reason {
        SnapshotReason::Manual => stamp.to_string(),
        other => format!("before_{}_{}", other.as_str(), stamp),
    }
}

fn sync_file(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

/// Persist directory entries so a crash cannot lose a copied file's name.
#[cfg(unix)]
fn sync_dir(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn discard(root: &Path) {
    if root.exists() {
        if let Err(e) = std::fs::remove_dir_all(root) {
            tracing::warn!("Failed to discard partial backup {}: {}", root.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manager_in(root: &Path) -> BackupManager {
        let config = Arc::new(
            Config::new(root.join("library"), root.join("projects"), root.join("state"))
                .with_project_names(["alpha"]),
        );
        let registry = ProjectRegistry::discover(config.clone()).unwrap();
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        BackupManager::new(config, registry, db)
    }

    fn files(names: &[&str]) -> Vec<(String, String)> {
        names
            .iter()
            .map(|n| ("alpha".to_string(), n.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn snapshot_copies_content_outside_the_project() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        std::fs::write(dir.path().join("projects/alpha/bot.py"), "original").unwrap();

        let backup = manager
            .snapshot(&["alpha".to_string()], &files(&["bot.py"]), None, SnapshotReason::Clear)
            .await
            .unwrap();

        let entry = &backup.snapshot.entries[0];
        assert!(entry.backup_path.starts_with(dir.path().join("state/backups")));
        assert_eq!(std::fs::read_to_string(&entry.backup_path).unwrap(), "original");
        assert_eq!(entry.checksum, checksum::checksum(&entry.backup_path).unwrap());
        assert!(backup.displaced.is_none());
    }

    #[tokio::test]
    async fn snapshot_reports_the_target_it_displaced() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());

        let first = manager
            .snapshot(&[], &[], None, SnapshotReason::Manual)
            .await
            .unwrap();
        let second = manager
            .snapshot(&[], &[], None, SnapshotReason::Manual)
            .await
            .unwrap();

        assert_eq!(second.displaced, Some(first.snapshot.id));
    }

    #[tokio::test]
    async fn release_hands_the_slot_back() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let first = manager
            .snapshot(&[], &[], None, SnapshotReason::Manual)
            .await
            .unwrap();
        let second = manager
            .snapshot(&[], &[], None, SnapshotReason::Remove)
            .await
            .unwrap();

        manager.release(&second);

        assert_eq!(manager.take_undo_target().unwrap().id, first.snapshot.id);
    }

    #[tokio::test]
    async fn release_of_the_only_target_empties_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let backup = manager
            .snapshot(&[], &[], None, SnapshotReason::Remove)
            .await
            .unwrap();

        manager.release(&backup);

        assert!(matches!(
            manager.take_undo_target(),
            Err(EngineError::NothingToUndo)
        ));
    }

    #[test]
    fn manual_snapshots_are_named_by_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(default_name(SnapshotReason::Manual, at), "20240309_140507");
        assert_eq!(
            default_name(SnapshotReason::StopAll, at),
            "before_stop_all_20240309_140507"
        );
    }
}
