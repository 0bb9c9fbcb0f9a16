//! Process-wide singleton registry - at most one live process per agent role.
//!
//! Each registration is a JSON file `{registry_dir}/{role}.json` naming the
//! owning process id. The winner of a concurrent registration race is decided
//! by exclusive file creation; a stale entry (its pid no longer runs) is
//! cleaned up by any `register` call before the conflict decision is made.

use crate::agents::roles::AgentRole;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent already running for role {role}: pid {pid}")]
    AgentAlreadyRunning { role: AgentRole, pid: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub role: AgentRole,
    pub pid: u32,
    pub registered_at: DateTime<Utc>,
}

pub struct Registry {
    dir: PathBuf,
}

impl Registry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, role: AgentRole) -> PathBuf {
        self.dir.join(format!("{role}.json"))
    }

    /// Register the current process for `role`. Returns an RAII guard that
    /// removes the registration when dropped (normal or unwinding exit).
    ///
    /// Fails with [`RegistryError::AgentAlreadyRunning`] when a live twin
    /// holds the role. Exactly one of any set of concurrent callers wins:
    /// the entry file is created with `create_new`, so the filesystem
    /// arbitrates the race.
    pub fn register(&self, role: AgentRole) -> Result<RegistrationGuard, RegistryError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.entry_path(role);

        // Clear a stale entry left by a dead process before deciding conflict.
        if let Some(existing) = read_entry(&path) {
            if process_alive(existing.pid) {
                return Err(RegistryError::AgentAlreadyRunning {
                    role,
                    pid: existing.pid,
                });
            }
            warn!(%role, pid = existing.pid, "removing stale registry entry");
            let _ = std::fs::remove_file(&path);
        }

        let entry = RegistryEntry {
            role,
            pid: std::process::id(),
            registered_at: Utc::now(),
        };

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut f) => {
                let body = serde_json::to_vec_pretty(&entry)
                    .context("serialize registry entry")?;
                f.write_all(&body)?;
                info!(%role, pid = entry.pid, "registered in singleton registry");
                Ok(RegistrationGuard { path, pid: entry.pid })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Lost the race - report whoever won.
                let pid = read_entry(&path).map(|e| e.pid).unwrap_or(0);
                Err(RegistryError::AgentAlreadyRunning { role, pid })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current entry for `role`, if any (live or stale).
    pub fn lookup(&self, role: AgentRole) -> Option<RegistryEntry> {
        read_entry(&self.entry_path(role))
    }

    /// Remove every entry whose pid no longer names a running process.
    /// Returns the roles that were swept.
    pub fn sweep_stale(&self) -> Vec<AgentRole> {
        let mut swept = Vec::new();
        let mut roles: Vec<AgentRole> = AgentRole::workers().to_vec();
        roles.push(AgentRole::Supervisor);
        for role in roles {
            let path = self.entry_path(role);
            if let Some(entry) = read_entry(&path) {
                if !process_alive(entry.pid) {
                    debug!(%role, pid = entry.pid, "sweeping zombie registry entry");
                    let _ = std::fs::remove_file(&path);
                    swept.push(role);
                }
            }
        }
        swept
    }
}

fn read_entry(path: &Path) -> Option<RegistryEntry> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Scoped registration. Removing the file on drop guarantees release on both
/// normal return and unwinding; a crash leaves a stale entry that the next
/// `register` cleans up via the pid liveness probe.
#[derive(Debug)]
pub struct RegistrationGuard {
    path: PathBuf,
    pid: u32,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        // Only remove an entry this process still owns.
        if read_entry(&self.path).map(|e| e.pid) == Some(self.pid) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // POSIX: kill(pid, 0) returns 0 if the process exists and we may signal it
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    // Non-Unix platform - assume alive (conservative)
    true
}
