//! Project discovery, path validation and per-project file listings.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::checksum;
use crate::config::Config;
use crate::error::{EngineError, IoContext, Missing, Result};
use crate::models::{AssignMode, ProjectFile};

/// The fixed set of projects, resolved once at startup.
#[derive(Clone)]
pub struct ProjectRegistry {
    config: Arc<Config>,
    names: Vec<String>,
}

impl ProjectRegistry {
    /// Resolve the project set.
    ///
    /// A configured name list wins and its directories are created on demand;
    /// otherwise every subdirectory of the projects root is a project.
    pub fn discover(config: Arc<Config>) -> Result<Self> {
        let root = &config.projects_dir;
        let names = match &config.project_names {
            Some(names) => {
                for name in names {
                    validate_project_name(name)?;
                    let dir = root.join(name);
                    std::fs::create_dir_all(&dir)
                        .io_context(|| format!("Failed to create project {}", dir.display()))?;
                }
                let mut names = names.clone();
                names.sort();
                names.dedup();
                names
            }
            None => {
                let entries = std::fs::read_dir(root)
                    .io_context(|| format!("Failed to read projects {}", root.display()))?;
                let mut names = Vec::new();
                for entry in entries {
                    let entry = entry
                        .io_context(|| format!("Failed to read projects {}", root.display()))?;
                    if !entry.path().is_dir() {
                        continue;
                    }
                    if let Ok(name) = entry.file_name().into_string() {
                        if !name.starts_with('.') {
                            names.push(name);
                        }
                    }
                }
                names.sort();
                names
            }
        };

        tracing::info!("Discovered {} project(s): {}", names.len(), names.join(", "));
        Ok(Self { config, names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, project: &str) -> bool {
        self.names.iter().any(|n| n == project)
    }

    pub fn dir_of(&self, project: &str) -> Result<PathBuf> {
        if !self.contains(project) {
            return Err(EngineError::not_found(Missing::Project, project));
        }
        Ok(self.config.projects_dir.join(project))
    }

    /// Reject anything that is not a bare script file name.
    pub fn validate_filename(&self, name: &str) -> Result<()> {
        let invalid = |reason| {
            Err(EngineError::InvalidName {
                name: name.to_string(),
                reason,
            })
        };

        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return invalid("subpaths are not allowed");
        }
        if name.contains("..") {
            return invalid("'..' is not allowed");
        }
        if name.starts_with('.') {
            return invalid("hidden files are not allowed");
        }
        if !name.ends_with(&self.config.script_suffix) {
            return invalid("not a script file");
        }
        Ok(())
    }

    /// Scripts currently present in a project, ordered by name.
    pub fn files(&self, project: &str) -> Result<Vec<ProjectFile>> {
        let dir = self.dir_of(project)?;
        let entries = std::fs::read_dir(&dir)
            .io_context(|| format!("Failed to read project {project}"))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("Failed to read project {project}"))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !self.config.is_script_name(&name) || name.starts_with('.') {
                continue;
            }
            let file_type = entry
                .file_type()
                .io_context(|| format!("Failed to stat {project}/{name}"))?;
            if file_type.is_file() || file_type.is_symlink() {
                names.push(name);
            }
        }
        names.sort();

        names
            .iter()
            .map(|name| self.describe(project, &dir, name))
            .collect()
    }

    pub fn file(&self, project: &str, filename: &str) -> Result<ProjectFile> {
        self.files(project)?
            .into_iter()
            .find(|f| f.name == filename)
            .ok_or_else(|| {
                EngineError::not_found(Missing::ProjectFile, format!("{project}/{filename}"))
            })
    }

    fn describe(&self, project: &str, dir: &std::path::Path, name: &str) -> Result<ProjectFile> {
        let path = dir.join(name);
        let link_meta = std::fs::symlink_metadata(&path)
            .io_context(|| format!("Failed to stat {project}/{name}"))?;
        let is_link = link_meta.file_type().is_symlink();
        let assigned_at = link_meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let (size, checksum) = match checksum::file_info(&path) {
            Ok(info) => info,
            Err(e) if is_link => {
                tracing::warn!("Link {}/{} is dangling: {}", project, name, e);
                (0, String::new())
            }
            Err(e) => return Err(EngineError::io(format!("Failed to read {project}/{name}"), e)),
        };

        Ok(ProjectFile {
            name: name.to_string(),
            size,
            checksum,
            mode: if is_link {
                AssignMode::Link
            } else {
                AssignMode::Copy
            },
            is_link,
            assigned_at,
        })
    }
}

fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(EngineError::InvalidName {
            name: name.to_string(),
            reason: "not a valid project name",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config_for(root: &Path) -> Config {
        Config::new(root.join("library"), root.join("projects"), root.join("state"))
    }

    #[test]
    fn configured_names_create_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path()).with_project_names(["beta", "alpha"]);
        let registry = ProjectRegistry::discover(Arc::new(config)).unwrap();

        assert_eq!(registry.names(), ["alpha", "beta"]);
        assert!(dir.path().join("projects/alpha").is_dir());
    }

    #[test]
    fn discovers_subdirectories_when_no_names_configured() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("projects/one")).unwrap();
        std::fs::create_dir_all(dir.path().join("projects/two")).unwrap();
        std::fs::write(dir.path().join("projects/stray.txt"), "").unwrap();

        let registry = ProjectRegistry::discover(Arc::new(config_for(dir.path()))).unwrap();
        assert_eq!(registry.names(), ["one", "two"]);
    }

    #[test]
    fn listing_skips_main_guard_and_non_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path()).with_project_names(["p"]);
        let registry = ProjectRegistry::discover(Arc::new(config)).unwrap();
        let project = dir.path().join("projects/p");
        std::fs::write(project.join("main.py"), "bootstrap").unwrap();
        std::fs::write(project.join("bot.py"), "bot").unwrap();
        std::fs::write(project.join("heartbeat.json"), "{}").unwrap();

        let files = registry.files("p").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "bot.py");
        assert_eq!(files[0].mode, AssignMode::Copy);
        assert!(!files[0].is_link);
    }

    #[test]
    fn rejects_traversal_and_wrong_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path()).with_project_names(["p"]);
        let registry = ProjectRegistry::discover(Arc::new(config)).unwrap();

        assert!(registry.validate_filename("bot.py").is_ok());
        for bad in ["../bot.py", "sub/bot.py", "bot.sh", "", ".hidden.py", "a..b.py"] {
            assert!(
                matches!(
                    registry.validate_filename(bad),
                    Err(EngineError::InvalidName { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn unknown_project_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path()).with_project_names(["p"]);
        let registry = ProjectRegistry::discover(Arc::new(config)).unwrap();

        assert!(matches!(
            registry.dir_of("q"),
            Err(EngineError::NotFound {
                kind: Missing::Project,
                ..
            })
        ));
    }
}
