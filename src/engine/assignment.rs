//! Materializes library files inside project directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::library::LibraryIndex;
use super::registry::ProjectRegistry;
use crate::config::Config;
use crate::error::{EngineError, IoContext, Result};
use crate::models::{AssignMode, ProjectFile};

#[derive(Clone)]
pub struct AssignmentEngine {
    config: Arc<Config>,
    library: LibraryIndex,
    registry: ProjectRegistry,
}

impl AssignmentEngine {
    pub fn new(config: Arc<Config>, library: LibraryIndex, registry: ProjectRegistry) -> Self {
        Self {
            config,
            library,
            registry,
        }
    }

    /// Fail with `NameCollision` if `filename` cannot be placed in `project`.
    ///
    /// The bootstrap guard and any non-script entry that happens to carry the
    /// name are not ours to replace.
    pub fn check_target(&self, project: &str, filename: &str) -> Result<PathBuf> {
        let dst = self.registry.dir_of(project)?.join(filename);
        let managed = self.config.is_script_name(filename)
            && std::fs::symlink_metadata(&dst)
                .map(|m| m.file_type().is_file() || m.file_type().is_symlink())
                .unwrap_or(true);
        if !managed {
            return Err(EngineError::NameCollision {
                project: project.to_string(),
                path: dst,
            });
        }
        Ok(dst)
    }

    /// Copy or link a library file into a project whose slot is already free.
    pub fn materialize(&self, project: &str, filename: &str, mode: AssignMode) -> Result<ProjectFile> {
        let dst = self.check_target(project, filename)?;
        if std::fs::symlink_metadata(&dst).is_ok() {
            return Err(EngineError::NameCollision {
                project: project.to_string(),
                path: dst,
            });
        }

        let src = self.library.path_of(filename);
        match mode {
            AssignMode::Copy => atomic_copy(&src, &dst)
                .io_context(|| format!("Failed to copy {filename} into {project}"))?,
            AssignMode::Link => {
                let target = std::fs::canonicalize(&src)
                    .io_context(|| format!("Failed to resolve library file {filename}"))?;
                atomic_symlink(&target, &dst)
                    .io_context(|| format!("Failed to link {filename} into {project}"))?
            }
        }

        tracing::info!("Assigned {} to {} ({})", filename, project, mode.as_str());
        self.registry.file(project, filename)
    }
}

fn temp_sibling(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!(".{name}.tmp"))
}

/// Copy through a hidden temp file so watchers never see partial content.
pub(crate) fn atomic_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    let tmp = temp_sibling(dst);
    let result = std::fs::copy(src, &tmp).and_then(|_| std::fs::rename(&tmp, dst));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

#[cfg(unix)]
pub(crate) fn atomic_symlink(target: &Path, dst: &Path) -> std::io::Result<()> {
    let tmp = temp_sibling(dst);
    let _ = std::fs::remove_file(&tmp);
    let result = std::os::unix::fs::symlink(target, &tmp).and_then(|_| std::fs::rename(&tmp, dst));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

#[cfg(not(unix))]
pub(crate) fn atomic_symlink(_target: &Path, _dst: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "link mode requires symlink support",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_copy_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.py");
        let dst = dir.path().join("dst.py");
        std::fs::write(&src, "payload").unwrap();

        atomic_copy(&src, &dst).unwrap();

        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "payload");
        assert!(!dir.path().join(".dst.py.tmp").exists());
    }

    #[test]
    fn atomic_copy_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.py");
        let dst = dir.path().join("dst.py");
        std::fs::write(&src, "new").unwrap();
        std::fs::write(&dst, "old").unwrap();

        atomic_copy(&src, &dst).unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn atomic_symlink_points_at_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.py");
        let dst = dir.path().join("dst.py");
        std::fs::write(&src, "payload").unwrap();

        atomic_symlink(&src, &dst).unwrap();
        assert_eq!(std::fs::read_link(&dst).unwrap(), src);
    }
}
