use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness classification of a project.
///
/// - `Healthy`: Latest heartbeat is within the freshness threshold
/// - `NoHeartbeat`: No heartbeat was ever written for the project
/// - `Stale`: Heartbeat is older than the freshness threshold
/// - `Bad`: Explicit failure reported, unreadable heartbeat, or heartbeat lost
///   while a script is assigned
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    NoHeartbeat,
    Stale,
    Bad,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::NoHeartbeat => "no_heartbeat",
            Self::Stale => "stale",
            Self::Bad => "bad",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub project: String,
    pub status: HealthStatus,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub age_seconds: Option<f64>,
    /// Script name to pid, as reported by the supervisor.
    #[serde(default)]
    pub pids: BTreeMap<String, u32>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthSummary {
    pub total_projects: usize,
    pub healthy_projects: usize,
    pub unhealthy_projects: Vec<String>,
}

/// Contents of a project's `heartbeat.json`, written by its supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Unix time in seconds.
    pub ts: f64,
    #[serde(default)]
    pub pids: BTreeMap<String, u32>,
    /// `"error"` or `"failed"` marks an explicit failure.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Heartbeat {
    pub fn reports_failure(&self) -> bool {
        matches!(self.status.as_deref(), Some("error" | "failed"))
    }
}

/// Input for pushing a heartbeat over the API. The timestamp is taken on receipt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatInput {
    #[serde(default)]
    pub pids: BTreeMap<String, u32>,
    pub status: Option<String>,
    pub message: Option<String>,
}
