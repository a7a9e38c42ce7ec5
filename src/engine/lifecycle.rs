//! Graceful stop: kill marker, bounded wait, forced proceed.
//!
//! The supervisor inside each project watches `stop/<script>.kill`. When it
//! sees a marker it stops the script and deletes the marker. We never wait
//! longer than the grace period; removal always proceeds afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::health::HealthMonitor;
use super::registry::ProjectRegistry;
use crate::config::Config;
use crate::error::{EngineError, IoContext, Result};
use crate::models::StopOutcome;

const STOP_DIR: &str = "stop";

/// Contents of a kill marker file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillMarker {
    pub project: String,
    pub script: String,
    pub created_at: chrono::DateTime<Utc>,
    pub grace_period: f64,
}

#[derive(Clone)]
pub struct LifecycleController {
    config: Arc<Config>,
    registry: ProjectRegistry,
    health: HealthMonitor,
}

impl LifecycleController {
    pub fn new(config: Arc<Config>, registry: ProjectRegistry, health: HealthMonitor) -> Self {
        Self {
            config,
            registry,
            health,
        }
    }

    /// Deadline for a stop sequence starting now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.config.stop_grace_period
    }

    pub fn marker_path(&self, project: &str, script: &str) -> Result<PathBuf> {
        Ok(self
            .registry
            .dir_of(project)?
            .join(STOP_DIR)
            .join(format!("{script}.kill")))
    }

    /// Write the kill marker that asks the supervisor to stop `script`.
    pub fn signal_stop(&self, project: &str, script: &str) -> Result<PathBuf> {
        let path = self.marker_path(project, script)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .io_context(|| format!("Failed to create stop dir for {project}"))?;
        }

        let marker = KillMarker {
            project: project.to_string(),
            script: script.to_string(),
            created_at: Utc::now(),
            grace_period: self.config.stop_grace_period.as_secs_f64(),
        };
        let json = serde_json::to_vec(&marker)
            .map_err(|e| EngineError::io("Failed to encode kill marker", e.into()))?;
        std::fs::write(&path, json)
            .io_context(|| format!("Failed to write kill marker for {project}/{script}"))?;

        tracing::debug!("Kill marker written for {}/{}", project, script);
        Ok(path)
    }

    /// Remove a marker that is no longer wanted. Missing markers are fine.
    pub fn withdraw(&self, project: &str, script: &str) {
        if let Ok(path) = self.marker_path(project, script) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Kill marker withdrawn for {}/{}", project, script),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    "Failed to remove kill marker for {}/{}: {}",
                    project,
                    script,
                    e
                ),
            }
        }
    }

    /// Poll until the process is gone or the deadline passes.
    ///
    /// Exit is confirmed when the supervisor consumed the marker or the health
    /// monitor no longer lists the script. A timeout is logged, not returned
    /// as an error.
    pub async fn wait_for_exit(&self, project: &str, script: &str, deadline: Instant) -> StopOutcome {
        let marker = match self.marker_path(project, script) {
            Ok(path) => path,
            Err(_) => return StopOutcome::NotRunning,
        };

        if !self.health.is_running(project, script) {
            self.withdraw(project, script);
            return StopOutcome::NotRunning;
        }

        loop {
            if !marker.exists() || !self.health.is_running(project, script) {
                self.withdraw(project, script);
                tracing::info!("{}/{} stopped gracefully", project, script);
                return StopOutcome::Stopped;
            }

            let now = Instant::now();
            if now >= deadline {
                let timeout = EngineError::GracefulStopTimeout {
                    project: project.to_string(),
                    filename: script.to_string(),
                    grace: self.config.stop_grace_period,
                };
                tracing::warn!("{}; removing anyway", timeout);
                self.withdraw(project, script);
                return StopOutcome::TimedOut;
            }

            let remaining = deadline - now;
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
        }
    }

    /// Delete a script from its project. Links are removed, not their targets.
    pub fn delete(&self, project: &str, script: &str) -> Result<()> {
        let path = self.registry.dir_of(project)?.join(script);
        std::fs::remove_file(&path)
            .io_context(|| format!("Failed to delete {project}/{script}"))?;
        tracing::info!("Deleted {}/{}", project, script);
        Ok(())
    }

    /// The full graceful-stop sequence for one assigned file.
    pub async fn graceful_remove(&self, project: &str, script: &str) -> Result<StopOutcome> {
        self.registry.file(project, script)?;
        self.signal_stop(project, script)?;
        self.finish_remove(project, script, self.deadline()).await
    }

    /// Wait and delete for a file whose marker has already been written.
    pub async fn finish_remove(
        &self,
        project: &str,
        script: &str,
        deadline: Instant,
    ) -> Result<StopOutcome> {
        let outcome = self.wait_for_exit(project, script, deadline).await;
        self.delete(project, script)?;
        Ok(outcome)
    }
}
