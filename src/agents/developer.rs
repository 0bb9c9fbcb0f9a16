//! code_developer - implements planned items against the architect's specs.
//!
//! Per tick: refresh the branch, pick the next item (roadmap mode) or the
//! next claimable work unit (work-units mode), resolve the governing spec
//! (blocking on the architect with an urgent request when it is missing),
//! implement through the LLM, verify with the configured test command, and
//! commit. Every successful commit lands a CommitRecord and notifies the
//! assistant and the architect.

use super::kinds;
use super::roles::AgentRole;
use super::Ticker;
use crate::bus::{Message, MessagePriority};
use crate::config::DeveloperMode;
use crate::roadmap::{ItemStatus, RoadmapItem};
use crate::vcs::VcsError;
use crate::work::{NewWorkUnit, WorkStatus, WorkUnit};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use tracing::{debug, info, warn};

const IMPLEMENT_PROMPT: &str = "You are the code developer of this repository. Implement the roadmap \
item below exactly as its technical specification describes. Modify only \
the files the work requires, keep the existing style, and add tests.\n\n\
# Roadmap item\n{ITEM}\n\n# Technical specification\n{SPEC}\n";

#[derive(Debug)]
enum ImplOutcome {
    /// Working tree untouched - the item was already done.
    NoChanges,
    /// Test command failed; diagnostic summary attached. No commit was made.
    TestsFailed(String),
    Committed { sha: String },
}

pub struct CodeDeveloper {
    /// Implementation attempts per item number, capped by
    /// `max_retries_per_item`. Spec requests alone never count.
    attempts: HashMap<String, u32>,
    /// Items referenced by `bug_fix_request` messages, served first.
    bug_queue: VecDeque<String>,
}

impl CodeDeveloper {
    pub fn new() -> Self {
        Self {
            attempts: HashMap::new(),
            bug_queue: VecDeque::new(),
        }
    }

    pub async fn tick(&mut self, t: &mut Ticker<'_>) -> Result<()> {
        if let Err(e) = t.ctx.vcs.pull(&t.ctx.config.work_branch) {
            return report_pull_failure(t, e);
        }

        match t.ctx.config.developer_mode {
            DeveloperMode::Roadmap => self.roadmap_tick(t).await,
            DeveloperMode::WorkUnits => self.work_units_tick(t).await,
        }
    }

    pub async fn handle_message(&mut self, t: &mut Ticker<'_>, msg: &Message) -> Result<()> {
        match msg.kind.as_str() {
            kinds::SPEC_READY => {
                // Nothing to do now; the next tick re-resolves the spec.
                info!(item = ?msg.body["item"], "spec ready - will retry next tick");
                Ok(())
            }
            kinds::BUG_FIX_REQUEST => {
                let number = msg.body["item"]
                    .as_str()
                    .context("bug_fix_request without item number")?
                    .to_string();
                warn!(item = %number, from = %msg.from, "bug fix requested");
                if !self.bug_queue.contains(&number) {
                    self.bug_queue.push_back(number);
                }
                t.incr_metric("bug_fix_requests");
                Ok(())
            }
            other => {
                warn!(kind = other, "unknown message kind - ignoring");
                Ok(())
            }
        }
    }

    // ─── Roadmap mode ───────────────────────────────────────────────────────

    async fn roadmap_tick(&mut self, t: &mut Ticker<'_>) -> Result<()> {
        let Some(item) = self.pick_item(t)? else {
            debug!("no planned items - idle");
            t.set_task(None)?;
            return Ok(());
        };
        info!(item = %item.name, "next item");

        // Spec gate: implementation never starts without a spec.
        let Some(spec) = t.ctx.specs.find(&item.number)? else {
            self.request_spec(t, &item)?;
            return Ok(());
        };

        if !self.under_retry_cap(t, &item.number) {
            return Ok(());
        }
        self.bump_attempts(t, &item.number);

        let outcome = self.implement(t, &item, &spec.content, None).await?;
        self.conclude(t, &item, outcome, None).await
    }

    fn pick_item(&mut self, t: &Ticker<'_>) -> Result<Option<RoadmapItem>> {
        // Bug fixes preempt new work.
        while let Some(number) = self.bug_queue.pop_front() {
            let found = t
                .ctx
                .roadmap
                .list_items()?
                .into_iter()
                .find(|i| i.number == number);
            match found {
                Some(item) => return Ok(Some(item)),
                None => warn!(item = %number, "bug fix target not in roadmap - dropping"),
            }
        }
        Ok(t
            .ctx
            .roadmap
            .list_items()?
            .into_iter()
            .find(|i| i.status == ItemStatus::Planned))
    }

    // ─── Work-units mode ────────────────────────────────────────────────────

    async fn work_units_tick(&mut self, t: &mut Ticker<'_>) -> Result<()> {
        let Some(item) = t.ctx.roadmap.next_planned()? else {
            t.set_task(None)?;
            return Ok(());
        };
        let priority = integer_part(&item.number);

        let Some(unit) = t.ctx.work.next_work_for_priority(priority).await? else {
            debug!(priority, "no claimable unit - waiting on the sequence");
            return Ok(());
        };

        // Resolve the governing spec section before claiming anything.
        let spec_section = match t.ctx.work.read_spec_section(&unit, &t.ctx.specs) {
            Ok(text) => text,
            Err(crate::work::WorkError::SpecMissing(_)) => {
                self.request_spec(t, &item)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !self.under_retry_cap(t, &unit.work_id) {
            return Ok(());
        }

        let me = claimant_id();
        if !t.ctx.work.claim(&unit.work_id, &me).await? {
            // Work contention is expected - another developer won.
            debug!(work_id = %unit.work_id, "claim lost - moving on");
            return Ok(());
        }
        self.bump_attempts(t, &unit.work_id);

        // The claim carries an exclusive file capability: `implement`
        // validates the edit set before any test run or commit; a violation
        // fails the tick and the unit.
        let outcome = match self.implement(t, &item, &spec_section, Some(&unit)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                t.ctx
                    .work
                    .update_status(&unit.work_id, WorkStatus::Failed, Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        self.conclude(t, &item, outcome, Some(&unit)).await
    }

    // ─── Shared implementation path ─────────────────────────────────────────

    async fn implement(
        &mut self,
        t: &mut Ticker<'_>,
        item: &RoadmapItem,
        spec: &str,
        capability: Option<&WorkUnit>,
    ) -> Result<ImplOutcome> {
        t.set_task(Some(serde_json::json!({
            "type": "implementation",
            "priority": item.name,
            "title": item.title,
            "started_at": Utc::now().to_rfc3339(),
            "progress": 0.2,
            "step": "invoking LLM",
        })))?;

        let prompt = IMPLEMENT_PROMPT
            .replace("{ITEM}", &item.content)
            .replace("{SPEC}", spec);
        let timeout = t
            .ctx
            .config
            .llm_timeout
            .min(t.ctx.config.tick_budget(t.role()));

        t.heartbeat()?;
        let response = t.ctx.llm.invoke(&prompt, timeout).await;
        if !response.success {
            anyhow::bail!(
                "LLM implementation call failed: {}",
                response.error.unwrap_or_else(|| "unknown".into())
            );
        }

        if t.ctx.vcs.is_clean()? {
            info!(item = %item.name, "no files changed - treating as already complete");
            return Ok(ImplOutcome::NoChanges);
        }

        // Capability gate before any verification or commit.
        if let Some(unit) = capability {
            for path in t.ctx.vcs.changed_files()? {
                if let Err(violation) = unit.validate_file_access(&path) {
                    t.incr_metric("file_access_violations");
                    return Err(violation.into());
                }
            }
        }

        t.set_task(Some(serde_json::json!({
            "type": "implementation",
            "priority": item.name,
            "progress": 0.7,
            "step": "running tests",
        })))?;
        t.heartbeat()?;
        let (passed, output) = run_test_command(&t.ctx.config.test_command, timeout).await?;
        if !passed {
            let analysis = analyze_test_failure(&output);
            warn!(item = %item.name, "tests failed - no commit\n{analysis}");
            t.set_metric("last_test_failure", serde_json::json!(analysis));
            return Ok(ImplOutcome::TestsFailed(analysis));
        }

        let message = format!("feat: implement {} - {}", item.name, item.title);
        let sha = t.ctx.vcs.commit(&message, true)?;
        info!(item = %item.name, sha = %&sha[..8], "implementation committed");
        Ok(ImplOutcome::Committed { sha })
    }

    async fn conclude(
        &mut self,
        t: &mut Ticker<'_>,
        item: &RoadmapItem,
        outcome: ImplOutcome,
        unit: Option<&WorkUnit>,
    ) -> Result<()> {
        match outcome {
            ImplOutcome::NoChanges => {
                if let Some(unit) = unit {
                    t.ctx
                        .work
                        .update_status(&unit.work_id, WorkStatus::Completed, None)
                        .await?;
                }
                Ok(())
            }
            ImplOutcome::TestsFailed(analysis) => {
                if let Some(unit) = unit {
                    t.ctx
                        .work
                        .update_status(&unit.work_id, WorkStatus::Failed, Some(&analysis))
                        .await?;
                }
                Ok(())
            }
            ImplOutcome::Committed { sha } => {
                let me = claimant_id();
                let message = format!("feat: implement {} - {}", item.name, item.title);
                match unit {
                    Some(unit) => {
                        t.ctx
                            .work
                            .record_commit(&unit.work_id, &me, &sha, &message)
                            .await?;
                        t.ctx
                            .work
                            .update_status(&unit.work_id, WorkStatus::Completed, None)
                            .await?;
                    }
                    None => {
                        // Roadmap mode has no pre-seeded unit; a single-member
                        // group per commit keeps the commit log reviewable.
                        self.record_roadmap_commit(t, item, &sha, &message).await?;
                    }
                }

                t.send(
                    AgentRole::Assistant,
                    kinds::DEMO_REQUEST,
                    serde_json::json!({
                        "item": item.number,
                        "name": item.name,
                        "title": item.title,
                    }),
                    MessagePriority::Normal,
                )?;
                t.send(
                    AgentRole::Architect,
                    kinds::COMMIT_REVIEW_REQUEST,
                    serde_json::json!({"commit_sha": sha, "item": item.number}),
                    MessagePriority::Normal,
                )?;

                t.incr_metric("priorities_completed");
                t.set_metric("last_completed_priority", serde_json::json!(item.name));
                Ok(())
            }
        }
    }

    async fn record_roadmap_commit(
        &self,
        t: &Ticker<'_>,
        item: &RoadmapItem,
        sha: &str,
        message: &str,
    ) -> Result<()> {
        let me = claimant_id();
        let work_id = format!("ITEM-{}-{}", item.number, &sha[..8]);
        t.ctx
            .work
            .insert_work(&NewWorkUnit {
                work_id: work_id.clone(),
                priority_number: integer_part(&item.number),
                group_id: work_id.clone(),
                order: 1,
                spec_id: item.number.clone(),
                scope_description: String::new(),
                assigned_files: Vec::new(),
            })
            .await?;
        t.ctx.work.claim(&work_id, &me).await?;
        t.ctx.work.record_commit(&work_id, &me, sha, message).await?;
        t.ctx
            .work
            .update_status(&work_id, WorkStatus::Completed, None)
            .await?;
        Ok(())
    }

    // ─── Helpers ────────────────────────────────────────────────────────────

    fn request_spec(&mut self, t: &mut Ticker<'_>, item: &RoadmapItem) -> Result<()> {
        warn!(item = %item.name, "spec missing - requesting from architect");
        t.send(
            AgentRole::Architect,
            kinds::SPEC_REQUEST,
            serde_json::json!({
                "item": item,
                "reason": "implementation blocked - spec missing",
                "requester": t.role().as_str(),
            }),
            MessagePriority::Urgent,
        )?;
        t.set_metric(
            "last_spec_request",
            serde_json::json!({"item": item.number, "at": Utc::now().to_rfc3339()}),
        );
        Ok(())
    }

    fn under_retry_cap(&self, t: &mut Ticker<'_>, key: &str) -> bool {
        let attempts = self.attempts.get(key).copied().unwrap_or(0);
        if attempts >= t.ctx.config.max_retries_per_item {
            warn!(item = key, attempts, "retry cap reached - skipping");
            t.incr_metric("items_skipped");
            return false;
        }
        true
    }

    fn bump_attempts(&mut self, t: &Ticker<'_>, key: &str) {
        let attempt = self.attempts.entry(key.to_string()).or_insert(0);
        *attempt += 1;
        info!(
            item = key,
            attempt = *attempt,
            max = t.ctx.config.max_retries_per_item,
            "starting implementation"
        );
    }
}

impl Default for CodeDeveloper {
    fn default() -> Self {
        Self::new()
    }
}

fn claimant_id() -> String {
    format!("code_developer:{}", std::process::id())
}

fn integer_part(number: &str) -> i64 {
    number
        .split('.')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn report_pull_failure(t: &mut Ticker<'_>, e: VcsError) -> Result<()> {
    if matches!(e, VcsError::Conflict { .. }) {
        t.send(
            AgentRole::ProjectManager,
            kinds::VCS_CONFLICT,
            serde_json::json!({"role": t.role().as_str(), "error": e.to_string()}),
            MessagePriority::Normal,
        )?;
        warn!(err = %e, "pull conflict - retrying next tick");
        return Ok(());
    }
    Err(e.into())
}

/// Run the configured verification command through the shell and capture its
/// combined output. The timeout kills the command.
async fn run_test_command(command: &str, timeout: std::time::Duration) -> Result<(bool, String)> {
    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawn test command: {command}"))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Ok((
                false,
                format!("test command timed out after {}s", timeout.as_secs()),
            ))
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status.success(), combined))
}

/// Bounded diagnostic for a failed test run: failing test names when they
/// can be spotted, otherwise the tail of the output.
fn analyze_test_failure(output: &str) -> String {
    let failing: Vec<&str> = output
        .lines()
        .filter(|l| {
            l.contains("FAILED")
                || l.contains("... FAILED")
                || l.trim_start().starts_with("error[")
                || l.contains("panicked at")
        })
        .take(10)
        .collect();

    if !failing.is_empty() {
        return format!("failing indicators:\n{}", failing.join("\n"));
    }

    let tail: Vec<&str> = output.lines().rev().take(15).collect();
    let mut tail: Vec<&str> = tail.into_iter().rev().collect();
    if tail.is_empty() {
        tail.push("(no test output)");
    }
    format!("output tail:\n{}", tail.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_analysis_picks_failed_lines() {
        let output = "running 3 tests\ntest bus::drain ... ok\ntest work::claim ... FAILED\n\nfailures:\n";
        let analysis = analyze_test_failure(output);
        assert!(analysis.contains("work::claim"));
        assert!(analysis.starts_with("failing indicators"));
    }

    #[test]
    fn failure_analysis_falls_back_to_tail() {
        let analysis = analyze_test_failure("line1\nline2\n");
        assert!(analysis.starts_with("output tail"));
        assert!(analysis.contains("line2"));
    }

    #[test]
    fn integer_part_handles_fractional_numbers() {
        assert_eq!(integer_part("31"), 31);
        assert_eq!(integer_part("31.2"), 31);
        assert_eq!(integer_part("x"), 0);
    }

    #[tokio::test]
    async fn test_command_success_and_failure() {
        let (ok, _) = run_test_command("true", std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert!(ok);
        let (ok, _) = run_test_command("false", std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!ok);
    }
}
