//! Read-only index over the shared script library.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::checksum;
use crate::config::Config;
use crate::error::{EngineError, IoContext, Missing, Result};
use crate::models::LibraryFile;

#[derive(Clone)]
pub struct LibraryIndex {
    config: Arc<Config>,
}

impl LibraryIndex {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn dir(&self) -> &Path {
        &self.config.library_dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir().join(name)
    }

    /// Every script in the library, ordered by name.
    pub fn list(&self) -> Result<Vec<LibraryFile>> {
        let dir = self.dir();
        let entries = std::fs::read_dir(dir)
            .io_context(|| format!("Failed to read library {}", dir.display()))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("Failed to read library {}", dir.display()))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(&self.config.script_suffix) && entry.path().is_file() {
                names.push(name);
            }
        }
        names.sort();

        names.iter().map(|name| self.describe(name)).collect()
    }

    /// Look up a single library file.
    pub fn get(&self, name: &str) -> Result<LibraryFile> {
        if !self.path_of(name).is_file() {
            return Err(EngineError::not_found(Missing::LibraryFile, name));
        }
        self.describe(name)
    }

    fn describe(&self, name: &str) -> Result<LibraryFile> {
        let path = self.path_of(name);
        let metadata = std::fs::metadata(&path)
            .io_context(|| format!("Failed to stat library file {name}"))?;
        let checksum = checksum::checksum(&path)
            .io_context(|| format!("Failed to read library file {name}"))?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(LibraryFile {
            name: name.to_string(),
            size: metadata.len(),
            checksum,
            modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_for(dir: &Path) -> LibraryIndex {
        LibraryIndex::new(Arc::new(Config::new(dir, dir.join("p"), dir.join("s"))))
    }

    #[test]
    fn lists_scripts_sorted_and_skips_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zeta.py"), "z").unwrap();
        std::fs::write(dir.path().join("alpha.py"), "a").unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();
        std::fs::create_dir(dir.path().join("pkg.py")).unwrap();

        let files = index_for(dir.path()).list().unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.py", "zeta.py"]);
        assert_eq!(files[0].size, 1);
    }

    #[test]
    fn missing_library_dir_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_for(&dir.path().join("missing"));
        assert!(matches!(index.list(), Err(EngineError::Io { .. })));
    }

    #[test]
    fn get_unknown_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = index_for(dir.path()).get("ghost.py");
        assert!(matches!(
            result,
            Err(EngineError::NotFound {
                kind: Missing::LibraryFile,
                ..
            })
        ));
    }
}
