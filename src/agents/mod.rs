//! Common agent machinery: the single-threaded cooperative loop every role
//! runs, plus the tick handle roles use to publish heartbeats and metrics.
//!
//! The loop is one logical flow of execution: background work and message
//! handlers never run concurrently. Every tick boundary is an error
//! boundary - a failed tick is logged and surfaced in the status file, and
//! the loop continues. Only process-level exits count toward the
//! supervisor's restart policy.

pub mod architect;
pub mod assistant;
pub mod behavior;
pub mod code_searcher;
pub mod developer;
pub mod project_manager;
pub mod roles;
pub mod ux_design_expert;

use crate::bus::{AgentState, AgentStatus, Message, MessagePriority};
use crate::startup;
use crate::AgentContext;
use anyhow::{Context, Result};
use behavior::RoleBehavior;
use chrono::Utc;
use roles::AgentRole;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Message kind symbols. The set is open: unknown kinds are logged and
/// dropped, never an error.
pub mod kinds {
    pub const SPEC_REQUEST: &str = "spec_request";
    pub const SPEC_READY: &str = "spec_ready";
    pub const DEMO_REQUEST: &str = "demo_request";
    pub const BUG_FIX_REQUEST: &str = "bug_fix_request";
    pub const COMMIT_REVIEW_REQUEST: &str = "commit_review_request";
    pub const DESIGN_REVIEW: &str = "design_review";
    pub const DESIGN_FEEDBACK: &str = "design_feedback";
    pub const VCS_CONFLICT: &str = "vcs_conflict";
    pub const STATUS_QUERY: &str = "status_query";
    pub const SHUTDOWN_REQUEST: &str = "shutdown_request";
}

// ─── Shutdown flag ────────────────────────────────────────────────────────────

/// Cooperative shutdown: set by SIGTERM/SIGINT (or a `shutdown_request`
/// message) and checked at every yield point.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install OS signal listeners that trip this flag.
    pub fn install(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut term =
                    signal(SignalKind::terminate()).expect("install SIGTERM handler");
                let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
                tokio::select! {
                    _ = term.recv() => {}
                    _ = int.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
            info!("shutdown signal received");
            this.trigger();
        });
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.is_shutdown() {
            return;
        }
        self.notify.notified().await;
    }
}

// ─── Ticker ───────────────────────────────────────────────────────────────────

/// Handle a role's background work uses to touch its own status file.
/// Heartbeats must be emitted immediately before any call whose worst-case
/// duration approaches the stale threshold.
pub struct Ticker<'a> {
    pub ctx: &'a AgentContext,
    status: &'a mut AgentStatus,
}

impl<'a> Ticker<'a> {
    pub fn new(ctx: &'a AgentContext, status: &'a mut AgentStatus) -> Self {
        Self { ctx, status }
    }

    pub fn role(&self) -> AgentRole {
        self.status.role
    }

    /// Publish a fresh heartbeat without changing anything else.
    pub fn heartbeat(&mut self) -> Result<()> {
        self.status.last_heartbeat = Utc::now();
        self.ctx.status.write(self.status)
    }

    /// Replace the free-form current-task descriptor and publish.
    pub fn set_task(&mut self, task: Option<serde_json::Value>) -> Result<()> {
        self.status.current_task = task;
        self.heartbeat()
    }

    pub fn incr_metric(&mut self, key: &str) {
        let value = self
            .status
            .metrics
            .get(key)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        self.status
            .metrics
            .insert(key.to_string(), serde_json::json!(value + 1));
    }

    pub fn set_metric(&mut self, key: &str, value: serde_json::Value) {
        self.status.metrics.insert(key.to_string(), value);
    }

    /// Send a message to a peer role.
    pub fn send(
        &self,
        to: AgentRole,
        kind: &str,
        body: serde_json::Value,
        priority: MessagePriority,
    ) -> Result<()> {
        let msg = Message::new(self.role(), to, kind, body, priority);
        self.ctx.mailbox.send(&msg)
    }
}

// ─── AgentRuntime ─────────────────────────────────────────────────────────────

pub struct AgentRuntime {
    ctx: AgentContext,
    role: AgentRole,
    behavior: RoleBehavior,
    shutdown: ShutdownSignal,
}

impl AgentRuntime {
    pub fn new(ctx: AgentContext, role: AgentRole) -> Result<Self> {
        let behavior = RoleBehavior::for_role(role)
            .with_context(|| format!("role {role} has no worker behavior"))?;
        Ok(Self {
            ctx,
            role,
            behavior,
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// The agent main loop. Returns when a shutdown signal arrives; any
    /// registration conflict or failed startup skill is an error (the
    /// process exits and the supervisor decides what happens next).
    pub async fn run(self) -> Result<()> {
        let Self {
            ctx,
            role,
            mut behavior,
            shutdown,
        } = self;

        shutdown.install();

        // Singleton identity first: a live twin means this invocation dies.
        let _registration = ctx.registry.register(role)?;

        let mut status = AgentStatus::new(role);
        ctx.status.write(&status)?;

        let report = startup::run_startup_skill(role, &ctx).await;
        startup::log_report(role, &report);
        if !report.success {
            anyhow::bail!("startup skill failed for {role}");
        }

        info!(%role, pid = status.pid, "agent loop starting");
        let interval = ctx.config.tick_interval(role);
        let budget = ctx.config.tick_budget(role);

        while !shutdown.is_shutdown() {
            let tick_start = Instant::now();

            status.state = AgentState::Working;
            status.last_heartbeat = Utc::now();
            ctx.status.write(&status)?;

            // Background work, bounded by the tick budget. A timeout cancels
            // the work at its next yield point.
            {
                let mut ticker = Ticker::new(&ctx, &mut status);
                match tokio::time::timeout(budget, behavior.tick(&mut ticker)).await {
                    Ok(Ok(())) => status.error = None,
                    Ok(Err(e)) => {
                        error!(%role, err = %e, "tick failed");
                        status.error = Some(e.to_string());
                    }
                    Err(_) => {
                        error!(%role, budget_s = budget.as_secs(), "tick exceeded its budget");
                        status.error = Some(format!(
                            "tick exceeded budget of {}s",
                            budget.as_secs()
                        ));
                    }
                }
            }

            // Drain the inbox. A failing handler dead-letters its message
            // and never blocks the rest.
            match ctx.mailbox.drain(role) {
                Ok(messages) => {
                    for msg in messages {
                        if msg.kind == kinds::SHUTDOWN_REQUEST {
                            info!(%role, from = %msg.from, "shutdown requested by message");
                            shutdown.trigger();
                            continue;
                        }
                        if msg.kind == kinds::STATUS_QUERY {
                            // Status is already public in the status file.
                            info!(%role, from = %msg.from, "status query received");
                            continue;
                        }
                        let mut ticker = Ticker::new(&ctx, &mut status);
                        if let Err(e) = behavior.handle_message(&mut ticker, &msg).await {
                            warn!(%role, kind = %msg.kind, err = %e, "message handler failed - dead-lettering");
                            let _ = ctx.mailbox.dead_letter(&msg, &e.to_string());
                        }
                    }
                }
                Err(e) => warn!(%role, err = %e, "inbox drain failed"),
            }

            status.state = AgentState::Idle;
            status.last_heartbeat = Utc::now();
            ctx.status.write(&status)?;

            let remaining = interval.saturating_sub(tick_start.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = shutdown.wait() => {}
            }
        }

        status.state = AgentState::Stopping;
        status.last_heartbeat = Utc::now();
        ctx.status.write(&status)?;
        info!(%role, "agent loop stopped");
        Ok(())
    }
}
