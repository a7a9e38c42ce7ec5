//! Per-project exclusive locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard for one project; released on drop.
pub type ProjectGuard = OwnedMutexGuard<()>;

/// Lazily created lock per project name.
///
/// Guards are owned so they can be held across the graceful-stop wait.
/// Operations on different projects never contend.
#[derive(Clone, Default)]
pub struct ProjectLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, project: &str) -> ProjectGuard {
        let lock = {
            let mut locks = self.locks.lock().expect("project lock table poisoned");
            locks
                .entry(project.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Lock several projects, always in sorted order so that two multi-project
    /// operations cannot deadlock each other.
    pub async fn lock_many<'a, I>(&self, projects: I) -> Vec<ProjectGuard>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut names: Vec<&str> = projects.into_iter().collect();
        names.sort_unstable();
        names.dedup();

        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            guards.push(self.lock(name).await);
        }
        guards
    }
}
