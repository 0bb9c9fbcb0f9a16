//! Supervisor - the seventh agent. Launches the worker roles as
//! subprocesses, monitors liveness and heartbeats, restarts crashes under
//! exponential backoff, and coordinates graceful shutdown.
//!
//! Freeze detection is advisory: a live process with a stale heartbeat is
//! warned about and reflected in health records, but never killed. Restarts
//! happen only on process death.

pub mod health;

use crate::agents::{kinds, roles::AgentRole, ShutdownSignal};
use crate::backoff::restart_delay;
use crate::registry::process_alive;
use crate::AgentContext;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use health::{classify, new_report_id, HealthState};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

/// Stagger between child launches to avoid startup contention.
const LAUNCH_STAGGER: std::time::Duration = std::time::Duration::from_secs(1);

struct ChildAgent {
    child: Option<Child>,
    pid: u32,
    restart_count: u32,
    last_restart: Instant,
    halted: bool,
}

#[derive(Serialize)]
struct AgentSummary {
    pid: u32,
    alive: bool,
    restarts: u32,
    halted: bool,
    stale_heartbeat: bool,
}

#[derive(Serialize)]
struct SupervisorStatus {
    role: &'static str,
    pid: u32,
    started_at: DateTime<Utc>,
    uptime_seconds: i64,
    last_heartbeat: DateTime<Utc>,
    agents: std::collections::BTreeMap<String, AgentSummary>,
}

pub struct Supervisor {
    ctx: AgentContext,
    shutdown: ShutdownSignal,
    children: HashMap<AgentRole, ChildAgent>,
    started_at: DateTime<Utc>,
    /// When the previous monitoring pass ran; its age is reported in health
    /// records so an external watchdog can spot a frozen supervisor.
    last_tick: Option<Instant>,
}

impl Supervisor {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            shutdown: ShutdownSignal::new(),
            children: HashMap::new(),
            started_at: Utc::now(),
            last_tick: None,
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run the supervisor until a shutdown signal. Registration conflicts,
    /// a wrong working branch, or an unwritable status directory are fatal.
    pub async fn run(mut self) -> Result<()> {
        self.shutdown.install();

        let _registration = self.ctx.registry.register(AgentRole::Supervisor)?;

        // Working-branch precondition gates every launch; refusal is fatal.
        self.ctx
            .vcs
            .ensure_branch(&self.ctx.config.work_branch)
            .context("working-branch precondition")?;

        self.launch_all().await?;

        let interval = self.ctx.config.tick_interval(AgentRole::Supervisor);
        info!(
            agents = self.children.len(),
            interval_s = interval.as_secs(),
            "supervisor monitoring loop starting"
        );

        while !self.shutdown.is_shutdown() {
            let tick_start = Instant::now();
            if let Err(e) = self.monitor_tick().await {
                error!(err = %e, "supervisor tick failed");
            }
            self.drain_inbox();

            let remaining = interval.saturating_sub(tick_start.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = self.shutdown.wait() => {}
            }
        }

        self.shutdown_children().await;
        info!("supervisor stopped");
        Ok(())
    }

    // ─── Launching ──────────────────────────────────────────────────────────

    async fn launch_all(&mut self) -> Result<()> {
        let mut roles = self.ctx.config.enable_roles.clone();
        roles.sort_by_key(|r| r.launch_priority());

        info!(count = roles.len(), "launching agents in priority order");
        for role in roles {
            self.launch(role).await?;
            tokio::time::sleep(LAUNCH_STAGGER).await;
        }
        Ok(())
    }

    async fn launch(&mut self, role: AgentRole) -> Result<()> {
        let exe = std::env::current_exe().context("resolve current executable")?;
        let config = &self.ctx.config;

        let child = Command::new(exe)
            .arg("agent")
            .arg("--role")
            .arg(role.as_str())
            .arg("--data-dir")
            .arg(&config.data_dir)
            .arg("--repo")
            .arg(&config.repo_path)
            .arg("--work-branch")
            .arg(&config.work_branch)
            .arg("--log")
            .arg(&config.log)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn agent subprocess for {role}"))?;

        let pid = child.id().unwrap_or(0);
        info!(%role, pid, priority = role.launch_priority(), "agent launched");

        let restart_count = self
            .children
            .get(&role)
            .map(|c| c.restart_count)
            .unwrap_or(0);
        self.children.insert(
            role,
            ChildAgent {
                child: Some(child),
                pid,
                restart_count,
                last_restart: Instant::now(),
                halted: false,
            },
        );
        Ok(())
    }

    // ─── Monitoring ─────────────────────────────────────────────────────────

    async fn monitor_tick(&mut self) -> Result<()> {
        let last_tick_age = self
            .last_tick
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.last_tick = Some(Instant::now());

        let mut dead_roles = Vec::new();
        let mut stale_count = 0usize;
        let mut actions: Vec<String> = Vec::new();
        let mut reports_filed = 0i64;

        // Check 1 + 2 per role: process liveness and heartbeat freshness,
        // flagged separately.
        for (role, agent) in self.children.iter_mut() {
            if agent.halted {
                continue;
            }
            let alive = match agent.child.as_mut() {
                Some(child) => child.try_wait()?.is_none(),
                None => false,
            };
            if !alive {
                error!(%role, pid = agent.pid, "agent process died");
                dead_roles.push(*role);
                continue;
            }

            match self.ctx.status.read(*role)? {
                Some(status) => {
                    let age = status.heartbeat_age();
                    if age > self.ctx.config.stale_heartbeat {
                        // Advisory: stale-but-live is never killed.
                        warn!(%role, age_s = age.as_secs(), "heartbeat stale");
                        stale_count += 1;
                    }
                }
                None => warn!(%role, "no status file yet"),
            }
        }

        // Crash handling under exponential backoff.
        for role in dead_roles.iter().copied() {
            let filed = self.handle_crash(role, &mut actions).await?;
            reports_filed += filed;
        }

        // Zombie sweep: registry entries naming dead processes.
        let swept = self.ctx.registry.sweep_stale();
        if !swept.is_empty() {
            actions.push(format!(
                "swept zombie registrations: {}",
                swept.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }

        let halted = self.children.values().filter(|c| c.halted).count();
        let active = self
            .children
            .values()
            .filter(|c| !c.halted && c.child.is_some())
            .count();
        let state = classify(halted, dead_roles.len(), stale_count);

        self.write_status()?;
        self.ctx
            .work
            .append_health_record(
                state.as_str(),
                active as i64,
                dead_roles.len() as i64,
                swept.len() as i64,
                last_tick_age,
                &actions,
                reports_filed,
            )
            .await?;

        if state == HealthState::Critical {
            error!(halted, "team health critical");
        }
        Ok(())
    }

    /// Restart policy for one dead role. Returns how many crash reports were
    /// filed with the external tracker.
    async fn handle_crash(&mut self, role: AgentRole, actions: &mut Vec<String>) -> Result<i64> {
        let config = self.ctx.config.clone();
        let agent = self.children.get_mut(&role).expect("known child");

        // Reap the exited process so it cannot linger as a zombie.
        if let Some(mut child) = agent.child.take() {
            let _ = child.wait().await;
        }

        if agent.restart_count >= config.max_restarts_per_agent {
            error!(
                %role,
                restarts = agent.restart_count,
                "max restarts reached - halting role"
            );
            agent.halted = true;
            let pid = agent.pid;
            actions.push(format!("halted {role} after {} restarts", agent.restart_count));

            let crash_id = self
                .ctx
                .work
                .append_crash_report(
                    role.as_str(),
                    pid,
                    None,
                    "max_restarts_exceeded",
                    "process exited repeatedly; role halted",
                    false,
                )
                .await?;
            let report_id = new_report_id();
            self.ctx.work.mark_crash_reported(crash_id, &report_id).await?;
            return Ok(1);
        }

        let delay = restart_delay(config.restart_backoff_base, agent.restart_count);
        if agent.last_restart.elapsed() < delay {
            info!(
                %role,
                waited_s = agent.last_restart.elapsed().as_secs(),
                backoff_s = delay.as_secs(),
                "restart backoff in progress"
            );
            return Ok(0);
        }

        warn!(%role, attempt = agent.restart_count + 1, "restarting crashed agent");
        let pid = agent.pid;
        self.ctx
            .work
            .append_crash_report(
                role.as_str(),
                pid,
                None,
                "process_exit",
                "process exited; restarting under backoff",
                true,
            )
            .await?;

        // Same precondition as the initial launch.
        self.ctx
            .vcs
            .ensure_branch(&config.work_branch)
            .context("working-branch precondition before restart")?;
        self.launch(role).await?;
        if let Some(agent) = self.children.get_mut(&role) {
            agent.restart_count += 1;
            agent.last_restart = Instant::now();
        }
        actions.push(format!("restarted {role}"));
        Ok(0)
    }

    fn drain_inbox(&mut self) {
        match self.ctx.mailbox.drain(AgentRole::Supervisor) {
            Ok(messages) => {
                for msg in messages {
                    match msg.kind.as_str() {
                        kinds::SHUTDOWN_REQUEST => {
                            info!(from = %msg.from, "shutdown requested");
                            self.shutdown.trigger();
                        }
                        kinds::STATUS_QUERY => {
                            info!(from = %msg.from, "status query - summary is in the status file");
                        }
                        other => warn!(kind = other, "unknown message kind - ignoring"),
                    }
                }
            }
            Err(e) => warn!(err = %e, "supervisor inbox drain failed"),
        }
    }

    /// Atomic write of the aggregate supervisor status file.
    fn write_status(&self) -> Result<()> {
        let mut agents = std::collections::BTreeMap::new();
        for (role, agent) in &self.children {
            let stale_heartbeat = self
                .ctx
                .status
                .read(*role)
                .ok()
                .flatten()
                .map(|s| s.heartbeat_age() > self.ctx.config.stale_heartbeat)
                .unwrap_or(false);
            agents.insert(
                role.as_str().to_string(),
                AgentSummary {
                    pid: agent.pid,
                    alive: !agent.halted && agent.child.is_some() && process_alive(agent.pid),
                    restarts: agent.restart_count,
                    halted: agent.halted,
                    stale_heartbeat,
                },
            );
        }

        let status = SupervisorStatus {
            role: "supervisor",
            pid: std::process::id(),
            started_at: self.started_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            last_heartbeat: Utc::now(),
            agents,
        };

        let dir = &self.ctx.config.status_dir;
        std::fs::create_dir_all(dir)?;
        let tmp = dir.join(format!(".supervisor_status.tmp-{}", std::process::id()));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&status)?)?;
        std::fs::rename(&tmp, dir.join("supervisor_status.json"))?;
        Ok(())
    }

    // ─── Shutdown ───────────────────────────────────────────────────────────

    /// Graceful-then-forceful: SIGTERM every child, wait up to the grace
    /// period, SIGKILL survivors, and reap everything.
    async fn shutdown_children(&mut self) {
        info!("shutting down all agents");
        let grace = self.ctx.config.shutdown_grace;

        for (role, agent) in self.children.iter() {
            if agent.child.is_some() {
                info!(%role, pid = agent.pid, "sending SIGTERM");
                terminate(agent.pid);
            }
        }

        let deadline = Instant::now() + grace;
        for (role, agent) in self.children.iter_mut() {
            let Some(child) = agent.child.as_mut() else {
                continue;
            };
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        info!(%role, ?status, "agent exited cleanly");
                        break;
                    }
                    Ok(None) if Instant::now() >= deadline => {
                        warn!(%role, pid = agent.pid, "grace period expired - killing");
                        let _ = child.kill().await;
                        break;
                    }
                    Ok(None) => tokio::time::sleep(std::time::Duration::from_millis(250)).await,
                    Err(e) => {
                        warn!(%role, err = %e, "wait failed during shutdown");
                        break;
                    }
                }
            }
            // Reap - no zombies left behind.
            if let Some(mut child) = agent.child.take() {
                let _ = child.wait().await;
            }
        }
        info!("all agents stopped");
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    if pid != 0 {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}
