//! Architect - keeps the spec pipeline ahead of the code_developer.
//!
//! Per tick: refresh the working branch, process queued commit reviews,
//! serve urgent spec requests, then create at most one spec for the first
//! planned roadmap item that has none. The mandatory reuse check runs before
//! any spec prompt so the model sees what already exists.

use super::kinds;
use super::Ticker;
use crate::bus::{Message, MessagePriority};
use crate::roadmap::{ItemStatus, RoadmapItem};
use crate::vcs::VcsError;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

/// A spec request matches a created spec when it arrived within this window.
const REQUEST_MATCH_WINDOW_MINUTES: i64 = 60;

/// Commits reviewed per tick - keeps review work bounded.
const REVIEWS_PER_TICK: i64 = 5;

const SPEC_PROMPT: &str = "You are the architect of this repository. Write a complete technical \
specification in markdown for the roadmap item below. Structure it with \
`## Overview`, `## Design`, `## Implementation`, and `## Testing` sections. \
Reuse existing components wherever the reuse analysis shows overlap.\n\n\
# Reuse analysis\n{REUSE}\n\n# Roadmap item\n{ITEM}\n";

pub struct Architect {
    /// Urgent spec requests queued from the inbox, served before planned work.
    pending_requests: Vec<RoadmapItem>,
    /// When each item's spec was last requested - used to decide whether a
    /// freshly created spec warrants a `spec_ready` notification.
    requested_at: HashMap<String, DateTime<Utc>>,
}

impl Architect {
    pub fn new() -> Self {
        Self {
            pending_requests: Vec::new(),
            requested_at: HashMap::new(),
        }
    }

    pub async fn tick(&mut self, t: &mut Ticker<'_>) -> Result<()> {
        if let Err(e) = t.ctx.vcs.pull(&t.ctx.config.work_branch) {
            return self.report_pull_failure(t, e);
        }

        self.process_commit_reviews(t).await?;

        // Urgent requests preempt planned work.
        if let Some(item) = self.pending_requests.pop() {
            self.create_spec(t, &item).await?;
            return Ok(());
        }

        // Proactive pass: first planned item without a spec.
        let items = t.ctx.roadmap.list_items()?;
        let planned: Vec<_> = items
            .into_iter()
            .filter(|i| i.status == ItemStatus::Planned)
            .collect();
        info!(count = planned.len(), "planned items checked for specs");

        for item in planned {
            if t.ctx.specs.find(&item.number)?.is_some() {
                continue;
            }
            info!(item = %item.name, "spec missing - creating");
            self.create_spec(t, &item).await?;
            // One new spec per tick bounds the work.
            break;
        }

        t.set_task(Some(serde_json::json!({
            "type": "spec_creation",
            "status": "idle",
            "last_check": Utc::now().to_rfc3339(),
        })))?;
        Ok(())
    }

    pub async fn handle_message(&mut self, t: &mut Ticker<'_>, msg: &Message) -> Result<()> {
        match msg.kind.as_str() {
            kinds::SPEC_REQUEST => {
                let item: RoadmapItem = serde_json::from_value(msg.body["item"].clone())
                    .context("spec_request without item payload")?;
                warn!(item = %item.name, priority = ?msg.priority, "spec request received");
                self.requested_at.insert(item.number.clone(), Utc::now());
                if msg.priority == MessagePriority::Urgent
                    && !self.pending_requests.iter().any(|p| p.number == item.number)
                {
                    self.pending_requests.push(item);
                }
                Ok(())
            }
            kinds::COMMIT_REVIEW_REQUEST => {
                // Reviews are worked through at the start of the next tick.
                let sha = msg.body["commit_sha"].as_str().unwrap_or("unknown");
                info!(sha = &sha[..sha.len().min(8)], "commit review queued");
                Ok(())
            }
            other => {
                warn!(kind = other, "unknown message kind - ignoring");
                Ok(())
            }
        }
    }

    /// Review commits awaiting a verdict. The review itself is bounded and
    /// deterministic: commit message hygiene plus presence of a work unit.
    async fn process_commit_reviews(&mut self, t: &mut Ticker<'_>) -> Result<()> {
        let pending = t.ctx.work.unreviewed_commits(REVIEWS_PER_TICK).await?;
        for commit in pending {
            let (verdict, notes) = review_commit_message(&commit.message);
            t.ctx
                .work
                .review_commit(commit.id, t.role().as_str(), verdict, &notes)
                .await?;
            if verdict != "approved" {
                t.send(
                    super::roles::AgentRole::ProjectManager,
                    kinds::COMMIT_REVIEW_REQUEST,
                    serde_json::json!({
                        "work_id": commit.work_id,
                        "commit_sha": commit.commit_sha,
                        "review_status": verdict,
                        "notes": notes,
                    }),
                    MessagePriority::Normal,
                )?;
            }
            t.incr_metric("commits_reviewed");
        }
        Ok(())
    }

    async fn create_spec(&mut self, t: &mut Ticker<'_>, item: &RoadmapItem) -> Result<()> {
        t.set_task(Some(serde_json::json!({
            "type": "spec_creation",
            "item": item.name,
            "status": "working",
            "started_at": Utc::now().to_rfc3339(),
        })))?;

        let reuse = reuse_summary(&t.ctx.specs.list_titles()?, item);
        let prompt = SPEC_PROMPT
            .replace("{REUSE}", &reuse)
            .replace("{ITEM}", &item.content);

        // Heartbeat right before the suspension point: the LLM call can run
        // up to the tick budget.
        t.heartbeat()?;
        let timeout = t
            .ctx
            .config
            .llm_timeout
            .min(t.ctx.config.tick_budget(t.role()));
        let response = t.ctx.llm.invoke(&prompt, timeout).await;
        if !response.success || response.content.trim().is_empty() {
            anyhow::bail!(
                "spec creation failed for {}: {}",
                item.name,
                response.error.unwrap_or_else(|| "empty response".into())
            );
        }

        let path = t
            .ctx
            .specs
            .put(&item.number, &item.title, &response.content)?;
        t.ctx
            .vcs
            .commit(&format!("docs: add SPEC-{} for {}", item.number, item.name), true)
            .context("commit new spec")?;

        t.incr_metric("specs_created");
        info!(item = %item.name, path = %path.display(), "spec created and committed");

        // Notify the developer if it asked for this spec recently.
        let recently_requested = self
            .requested_at
            .get(&item.number)
            .map(|ts| Utc::now() - *ts < ChronoDuration::minutes(REQUEST_MATCH_WINDOW_MINUTES))
            .unwrap_or(false);
        if recently_requested {
            t.send(
                super::roles::AgentRole::CodeDeveloper,
                kinds::SPEC_READY,
                serde_json::json!({
                    "item": item.number,
                    "spec_path": path.to_string_lossy(),
                }),
                MessagePriority::Normal,
            )?;
            self.requested_at.remove(&item.number);
        }
        Ok(())
    }

    fn report_pull_failure(&self, t: &mut Ticker<'_>, e: VcsError) -> Result<()> {
        if matches!(e, VcsError::Conflict { .. }) {
            t.send(
                super::roles::AgentRole::ProjectManager,
                kinds::VCS_CONFLICT,
                serde_json::json!({"role": t.role().as_str(), "error": e.to_string()}),
                MessagePriority::Normal,
            )?;
            warn!(err = %e, "pull conflict - retrying next tick");
            return Ok(());
        }
        Err(e.into())
    }
}

impl Default for Architect {
    fn default() -> Self {
        Self::new()
    }
}

/// The mandatory pre-spec reuse check: which stored specs share vocabulary
/// with the new item. Pure text analysis, no model round trip.
fn reuse_summary(existing_titles: &[String], item: &RoadmapItem) -> String {
    if existing_titles.is_empty() {
        return "No existing specs - greenfield item.".to_string();
    }
    let needle: Vec<String> = item
        .title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() > 3)
        .map(str::to_string)
        .collect();

    let mut overlapping = Vec::new();
    for title in existing_titles {
        let lower = title.to_lowercase();
        if needle.iter().any(|w| lower.contains(w.as_str())) {
            overlapping.push(title.clone());
        }
    }

    if overlapping.is_empty() {
        format!(
            "{} existing specs, none overlapping with '{}'.",
            existing_titles.len(),
            item.title
        )
    } else {
        format!(
            "Possible reuse - related specs: {}. Extend these rather than duplicating.",
            overlapping.join(", ")
        )
    }
}

/// Bounded commit review: conventional-prefix hygiene and message length.
fn review_commit_message(message: &str) -> (&'static str, String) {
    let first_line = message.lines().next().unwrap_or("");
    let conventional = ["feat", "fix", "docs", "refactor", "test", "chore", "perf"]
        .iter()
        .any(|p| first_line.starts_with(&format!("{p}:")) || first_line.starts_with(&format!("{p}(")));

    if !conventional {
        return (
            "needs_attention",
            format!("commit subject '{first_line}' lacks a conventional prefix"),
        );
    }
    if first_line.len() > 100 {
        return ("needs_attention", "commit subject exceeds 100 chars".into());
    }
    ("approved", "message hygiene ok".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roadmap::ItemStatus;

    fn item(title: &str) -> RoadmapItem {
        RoadmapItem {
            number: "7".into(),
            name: "PRIORITY 7".into(),
            title: title.into(),
            status: ItemStatus::Planned,
            status_label: "Planned".into(),
            content: String::new(),
        }
    }

    #[test]
    fn reuse_summary_flags_overlap() {
        let titles = vec![
            "SPEC-3-message-bus-ordering".to_string(),
            "SPEC-4-registry".to_string(),
        ];
        let summary = reuse_summary(&titles, &item("Message bus dead-letter path"));
        assert!(summary.contains("SPEC-3-message-bus-ordering"));
        assert!(!summary.contains("SPEC-4-registry"));
    }

    #[test]
    fn reuse_summary_greenfield() {
        let summary = reuse_summary(&[], &item("Anything"));
        assert!(summary.contains("greenfield"));
    }

    #[test]
    fn commit_review_verdicts() {
        assert_eq!(review_commit_message("feat: add claim CAS").0, "approved");
        assert_eq!(review_commit_message("fix(bus): drain order").0, "approved");
        assert_eq!(review_commit_message("wip stuff").0, "needs_attention");
    }
}
