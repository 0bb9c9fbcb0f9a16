//! project_manager - consultative delivery monitoring.
//!
//! Verifies Definition-of-Done for items the roadmap marks complete, nudges
//! the architect about commits still awaiting review, and keeps a liveness
//! overview of the team. Never mutates code artifacts.

use super::kinds;
use super::roles::AgentRole;
use super::Ticker;
use crate::bus::{Message, MessagePriority};
use crate::roadmap::ItemStatus;
use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

const REVIEW_NUDGE_BATCH: i64 = 10;

pub struct ProjectManager;

impl ProjectManager {
    pub fn new() -> Self {
        Self
    }

    pub async fn tick(&mut self, t: &mut Ticker<'_>) -> Result<()> {
        if let Err(e) = t.ctx.vcs.pull(&t.ctx.config.work_branch) {
            warn!(err = %e, "pull failed - monitoring continues on local state");
        }

        self.verify_definition_of_done(t)?;
        self.nudge_pending_reviews(t).await?;
        self.team_overview(t)?;

        t.set_task(Some(serde_json::json!({
            "type": "delivery_monitoring",
            "status": "idle",
            "last_check": Utc::now().to_rfc3339(),
        })))?;
        Ok(())
    }

    pub async fn handle_message(&mut self, t: &mut Ticker<'_>, msg: &Message) -> Result<()> {
        match msg.kind.as_str() {
            kinds::VCS_CONFLICT => {
                warn!(
                    from = %msg.from,
                    error = %msg.body["error"].as_str().unwrap_or("unknown"),
                    "VCS conflict reported by peer"
                );
                t.incr_metric("vcs_conflicts_reported");
                Ok(())
            }
            kinds::COMMIT_REVIEW_REQUEST => {
                // Architect escalation: a commit review flagged a problem.
                warn!(
                    work_id = %msg.body["work_id"].as_str().unwrap_or("unknown"),
                    status = %msg.body["review_status"].as_str().unwrap_or("unknown"),
                    "commit flagged by review"
                );
                t.incr_metric("flagged_commits");
                Ok(())
            }
            other => {
                warn!(kind = other, "unknown message kind - ignoring");
                Ok(())
            }
        }
    }

    /// An item marked complete must have its declared deliverables on disk.
    fn verify_definition_of_done(&self, t: &mut Ticker<'_>) -> Result<()> {
        let mut warnings = 0;
        for item in t.ctx.roadmap.list_items()? {
            if item.status != ItemStatus::Complete {
                continue;
            }
            for deliverable in item.deliverables() {
                let path = t.ctx.config.repo_path.join(&deliverable);
                if !path.exists() {
                    warn!(
                        item = %item.name,
                        deliverable = %deliverable,
                        "complete item is missing a deliverable"
                    );
                    warnings += 1;
                }
            }
        }
        t.set_metric("dod_warnings", serde_json::json!(warnings));
        Ok(())
    }

    /// Ask the architect to look at commits still lacking a verdict.
    async fn nudge_pending_reviews(&self, t: &mut Ticker<'_>) -> Result<()> {
        let pending = t.ctx.work.unreviewed_commits(REVIEW_NUDGE_BATCH).await?;
        if pending.is_empty() {
            return Ok(());
        }
        info!(count = pending.len(), "nudging architect about unreviewed commits");
        for commit in &pending {
            t.send(
                AgentRole::Architect,
                kinds::COMMIT_REVIEW_REQUEST,
                serde_json::json!({
                    "work_id": commit.work_id,
                    "commit_sha": commit.commit_sha,
                }),
                MessagePriority::Low,
            )?;
        }
        t.set_metric("review_nudges", serde_json::json!(pending.len()));
        Ok(())
    }

    /// Count live vs. stale teammates from their status files.
    fn team_overview(&self, t: &mut Ticker<'_>) -> Result<()> {
        let mut active = 0;
        let mut stale = 0;
        for role in AgentRole::workers() {
            if role == t.role() {
                continue;
            }
            if let Some(status) = t.ctx.status.read(role)? {
                if status.heartbeat_age() > t.ctx.config.stale_heartbeat {
                    stale += 1;
                } else {
                    active += 1;
                }
            }
        }
        t.set_metric("peers_active", serde_json::json!(active));
        t.set_metric("peers_stale", serde_json::json!(stale));
        Ok(())
    }
}

impl Default for ProjectManager {
    fn default() -> Self {
        Self::new()
    }
}
