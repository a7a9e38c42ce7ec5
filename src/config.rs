//! Runtime configuration loaded from environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default heartbeat freshness threshold (T1).
pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(30);
/// Default hard heartbeat threshold (T2).
pub const DEFAULT_HEARTBEAT_HARD_TTL: Duration = Duration::from_secs(120);
/// Default time a running script gets to exit after its kill marker is written.
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);
/// How often the graceful-stop wait re-checks process state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Engine configuration.
///
/// The directory layout mirrors the container deployment: a read-mostly
/// library of scripts, one directory per project (each watched by its own
/// supervisor), and a private state directory for backups and the database.
#[derive(Clone, Debug)]
pub struct Config {
    /// Shared pool of assignable scripts (from LIBRARY_DIR)
    pub library_dir: PathBuf,
    /// Parent of all project directories (from PROJECTS_DIR)
    pub projects_dir: PathBuf,
    /// Backups and database (from STATE_DIR)
    pub state_dir: PathBuf,
    /// Fixed project set (from PROJECT_NAMES, comma-separated). When `None`,
    /// every subdirectory of `projects_dir` is a project.
    pub project_names: Option<Vec<String>>,
    /// Heartbeats younger than this are healthy (HEARTBEAT_TTL, seconds)
    pub heartbeat_ttl: Duration,
    /// Heartbeats older than this are considered lost (HEARTBEAT_HARD_TTL, seconds)
    pub heartbeat_hard_ttl: Duration,
    /// Bounded wait for a process to exit (STOP_GRACE_PERIOD, seconds)
    pub stop_grace_period: Duration,
    pub poll_interval: Duration,
    /// Only files with this suffix are scripts.
    pub script_suffix: String,
    /// Bootstrap file inside each project; never assigned, listed or removed.
    pub main_guard: String,
}

impl Config {
    /// Create a config with default timings for the given directories.
    pub fn new(
        library_dir: impl Into<PathBuf>,
        projects_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            library_dir: library_dir.into(),
            projects_dir: projects_dir.into(),
            state_dir: state_dir.into(),
            project_names: None,
            heartbeat_ttl: DEFAULT_HEARTBEAT_TTL,
            heartbeat_hard_ttl: DEFAULT_HEARTBEAT_HARD_TTL,
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            script_suffix: ".py".to_string(),
            main_guard: "main.py".to_string(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let state_dir = std::env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_state_dir());

        let mut config = Self::new(
            env_path("LIBRARY_DIR", "/library"),
            env_path("PROJECTS_DIR", "/projects"),
            state_dir,
        );

        config.project_names = std::env::var("PROJECT_NAMES")
            .ok()
            .map(|s| parse_project_names(&s))
            .filter(|names| !names.is_empty());

        if let Some(ttl) = env_secs("HEARTBEAT_TTL") {
            config.heartbeat_ttl = ttl;
        }
        if let Some(ttl) = env_secs("HEARTBEAT_HARD_TTL") {
            config.heartbeat_hard_ttl = ttl;
        }
        if let Some(grace) = env_secs("STOP_GRACE_PERIOD") {
            config.stop_grace_period = grace;
        }

        config.normalized()
    }

    /// Restrict the engine to a fixed project set.
    pub fn with_project_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.project_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_heartbeat_ttls(mut self, ttl: Duration, hard_ttl: Duration) -> Self {
        self.heartbeat_ttl = ttl;
        self.heartbeat_hard_ttl = hard_ttl;
        self.normalized()
    }

    pub fn with_grace_period(mut self, grace: Duration, poll_interval: Duration) -> Self {
        self.stop_grace_period = grace;
        self.poll_interval = poll_interval;
        self
    }

    /// Directory holding the copied content of every snapshot.
    pub fn backup_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("manager.db")
    }

    pub fn is_script_name(&self, name: &str) -> bool {
        name.ends_with(&self.script_suffix) && name != self.main_guard
    }

    /// T2 can never be shorter than T1.
    fn normalized(mut self) -> Self {
        if self.heartbeat_hard_ttl < self.heartbeat_ttl {
            self.heartbeat_hard_ttl = self.heartbeat_ttl;
        }
        self
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn parse_project_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_state_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "script-manager")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| Path::new("/state").to_path_buf())
}
