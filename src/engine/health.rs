//! Heartbeat-based project health.
//!
//! Each project's supervisor periodically rewrites `heartbeat.json` in the
//! project directory. Status is derived on demand from that file; nothing is
//! cached between reads.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::registry::ProjectRegistry;
use crate::config::Config;
use crate::error::{EngineError, IoContext, Result};
use crate::models::{HealthRecord, HealthStatus, HealthSummary, Heartbeat, HeartbeatInput};

pub const HEARTBEAT_FILE: &str = "heartbeat.json";

/// Raw heartbeat signal as found on disk.
#[derive(Debug, Clone)]
pub enum Signal {
    Missing,
    Unreadable(String),
    Present(Heartbeat),
}

#[derive(Clone)]
pub struct HealthMonitor {
    config: Arc<Config>,
    registry: ProjectRegistry,
}

impl HealthMonitor {
    pub fn new(config: Arc<Config>, registry: ProjectRegistry) -> Self {
        Self { config, registry }
    }

    pub fn check(&self, project: &str) -> Result<HealthRecord> {
        let dir = self.registry.dir_of(project)?;
        let has_assignment = !self.registry.files(project)?.is_empty();
        Ok(classify(
            project,
            &read_signal(&dir),
            unix_now(),
            has_assignment,
            self.config.heartbeat_ttl,
            self.config.heartbeat_hard_ttl,
        ))
    }

    pub fn report(&self) -> Result<Vec<HealthRecord>> {
        self.registry
            .names()
            .iter()
            .map(|name| self.check(name))
            .collect()
    }

    /// Totals across all projects plus the names of those not healthy.
    pub fn summary(&self) -> Result<HealthSummary> {
        let report = self.report()?;
        let unhealthy_projects: Vec<String> = report
            .iter()
            .filter(|r| !r.status.is_healthy())
            .map(|r| r.project.clone())
            .collect();

        Ok(HealthSummary {
            total_projects: report.len(),
            healthy_projects: report.len() - unhealthy_projects.len(),
            unhealthy_projects,
        })
    }

    /// Whether the supervisor still reports a live process for `script`.
    ///
    /// A heartbeat older than the hard threshold no longer vouches for anything.
    pub fn is_running(&self, project: &str, script: &str) -> bool {
        let Ok(dir) = self.registry.dir_of(project) else {
            return false;
        };
        match read_signal(&dir) {
            Signal::Present(hb) => {
                age_secs(hb.ts, unix_now()) <= self.config.heartbeat_hard_ttl.as_secs_f64()
                    && hb.pids.contains_key(script)
            }
            _ => false,
        }
    }

    /// Store a heartbeat pushed by a supervisor, stamped with the current time.
    pub fn record(&self, project: &str, input: HeartbeatInput) -> Result<()> {
        let dir = self.registry.dir_of(project)?;
        let heartbeat = Heartbeat {
            ts: unix_now(),
            pids: input.pids,
            status: input.status,
            message: input.message,
        };
        let json = serde_json::to_vec_pretty(&heartbeat)
            .map_err(|e| EngineError::io("Failed to encode heartbeat", e.into()))?;

        let tmp = dir.join(format!(".{HEARTBEAT_FILE}.tmp"));
        std::fs::write(&tmp, json)
            .io_context(|| format!("Failed to write heartbeat for {project}"))?;
        std::fs::rename(&tmp, dir.join(HEARTBEAT_FILE))
            .io_context(|| format!("Failed to write heartbeat for {project}"))?;

        tracing::debug!("Recorded heartbeat for {}", project);
        Ok(())
    }
}

pub fn read_signal(project_dir: &Path) -> Signal {
    let path = project_dir.join(HEARTBEAT_FILE);
    match std::fs::read(&path) {
        Ok(bytes) => match serde_json::from_slice::<Heartbeat>(&bytes) {
            Ok(hb) => Signal::Present(hb),
            Err(e) => Signal::Unreadable(format!("Malformed heartbeat: {e}")),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Signal::Missing,
        Err(e) => Signal::Unreadable(format!("Unreadable heartbeat: {e}")),
    }
}

/// Derive a project's status from its raw signal.
pub fn classify(
    project: &str,
    signal: &Signal,
    now: f64,
    has_assignment: bool,
    ttl: Duration,
    hard_ttl: Duration,
) -> HealthRecord {
    let mut record = HealthRecord {
        project: project.to_string(),
        status: HealthStatus::NoHeartbeat,
        last_heartbeat_at: None,
        age_seconds: None,
        pids: Default::default(),
        message: None,
    };

    let hb = match signal {
        Signal::Missing => {
            record.message = Some("No heartbeat file found".to_string());
            return record;
        }
        Signal::Unreadable(message) => {
            record.status = HealthStatus::Bad;
            record.message = Some(message.clone());
            return record;
        }
        Signal::Present(hb) => hb,
    };

    let age = age_secs(hb.ts, now);
    record.last_heartbeat_at = DateTime::<Utc>::from_timestamp_millis((hb.ts * 1000.0) as i64);
    record.age_seconds = Some(age);
    record.pids = hb.pids.clone();

    if hb.reports_failure() {
        record.status = HealthStatus::Bad;
        record.message = Some(
            hb.message
                .clone()
                .unwrap_or_else(|| "Supervisor reported a failure".to_string()),
        );
        return record;
    }

    let ttl = ttl.as_secs_f64();
    let hard_ttl = hard_ttl.as_secs_f64();
    (record.status, record.message) = if age <= ttl {
        (HealthStatus::Healthy, hb.message.clone())
    } else if age <= hard_ttl || !has_assignment {
        (
            HealthStatus::Stale,
            Some(format!("Heartbeat is {age:.1}s old (TTL: {ttl:.0}s)")),
        )
    } else {
        (
            HealthStatus::Bad,
            Some(format!(
                "Heartbeat lost: {age:.1}s old (limit: {hard_ttl:.0}s) with scripts assigned"
            )),
        )
    };
    record
}

fn age_secs(ts: f64, now: f64) -> f64 {
    (now - ts).max(0.0)
}

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
