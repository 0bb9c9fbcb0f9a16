//! Per-role status files - the observable-fact side of the bus pair.
//!
//! Writes are atomic (write-then-rename on the same filesystem). Readers
//! tolerate a torn or half-written file with a small bounded retry, then
//! quarantine it so one corrupt file cannot wedge a consumer forever.

use crate::agents::roles::AgentRole;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const READ_RETRIES: u32 = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Starting,
    Idle,
    Working,
    Stopping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub role: AgentRole,
    pub pid: u32,
    pub state: AgentState,
    /// Free-form task descriptor; conventional keys are
    /// `{type, progress, status, started_at, step}` but the set is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<serde_json::Value>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
    /// Set when the most recent tick failed; cleared by the next clean tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentStatus {
    pub fn new(role: AgentRole) -> Self {
        let now = Utc::now();
        Self {
            role,
            pid: std::process::id(),
            state: AgentState::Starting,
            current_task: None,
            last_heartbeat: now,
            metrics: BTreeMap::new(),
            started_at: now,
            error: None,
        }
    }

    /// Age of the last heartbeat relative to now.
    pub fn heartbeat_age(&self) -> Duration {
        (Utc::now() - self.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Clone)]
pub struct StatusBus {
    dir: PathBuf,
}

impl StatusBus {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn status_path(&self, role: AgentRole) -> PathBuf {
        self.dir.join(format!("{role}_status.json"))
    }

    /// Publish `status` atomically: serialize to a temp file in the same
    /// directory, then rename over the role's status file.
    pub fn write(&self, status: &AgentStatus) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self
            .dir
            .join(format!(".{}_status.tmp-{}", status.role, status.pid));
        let body = serde_json::to_vec_pretty(status).context("serialize agent status")?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, self.status_path(status.role))?;
        Ok(())
    }

    /// Read the current status for `role`. Returns `None` when no status has
    /// ever been published. A file that stays unparseable across the retry
    /// window is quarantined and treated as absent.
    pub fn read(&self, role: AgentRole) -> Result<Option<AgentStatus>> {
        let path = self.status_path(role);
        if !path.exists() {
            return Ok(None);
        }
        for attempt in 0..READ_RETRIES {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str(&contents) {
                    Ok(status) => return Ok(Some(status)),
                    Err(e) if attempt + 1 == READ_RETRIES => {
                        warn!(%role, err = %e, "quarantining corrupt status file");
                        self.quarantine(&path);
                        return Ok(None);
                    }
                    Err(_) => std::thread::sleep(READ_RETRY_DELAY),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) if attempt + 1 == READ_RETRIES => return Err(e.into()),
                Err(_) => std::thread::sleep(READ_RETRY_DELAY),
            }
        }
        Ok(None)
    }

    fn quarantine(&self, path: &Path) {
        let dead = self.dir.join("dead_letter");
        if std::fs::create_dir_all(&dead).is_ok() {
            if let Some(name) = path.file_name() {
                let _ = std::fs::rename(path, dead.join(name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let bus = StatusBus::new(dir.path());

        let mut status = AgentStatus::new(AgentRole::Architect);
        status.state = AgentState::Working;
        status
            .metrics
            .insert("specs_created".into(), serde_json::json!(2));
        bus.write(&status).unwrap();

        let read = bus.read(AgentRole::Architect).unwrap().unwrap();
        assert_eq!(read.state, AgentState::Working);
        assert_eq!(read.metrics["specs_created"], serde_json::json!(2));
    }

    #[test]
    fn read_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let bus = StatusBus::new(dir.path());
        assert!(bus.read(AgentRole::Assistant).unwrap().is_none());
    }

    #[test]
    fn corrupt_status_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let bus = StatusBus::new(dir.path());

        std::fs::write(bus.status_path(AgentRole::CodeDeveloper), b"{not json").unwrap();
        assert!(bus.read(AgentRole::CodeDeveloper).unwrap().is_none());
        // The broken file moved to the dead-letter subdirectory.
        assert!(!bus.status_path(AgentRole::CodeDeveloper).exists());
        assert!(dir
            .path()
            .join("dead_letter")
            .join("code_developer_status.json")
            .exists());
    }

    #[test]
    fn heartbeat_advances() {
        let mut status = AgentStatus::new(AgentRole::ProjectManager);
        let first = status.last_heartbeat;
        status.last_heartbeat = Utc::now();
        assert!(status.last_heartbeat >= first);
        assert!(status.heartbeat_age() < Duration::from_secs(5));
    }
}
