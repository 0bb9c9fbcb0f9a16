//! assistant - produces demo artifacts for freshly implemented items and
//! files bug reports when a demo cannot be completed.
//!
//! Read-only with respect to implementation code; its only outputs live
//! under `{data_dir}/demos`.

use super::kinds;
use super::roles::AgentRole;
use super::Ticker;
use crate::bus::{Message, MessagePriority};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::VecDeque;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct DemoRequest {
    number: String,
    name: String,
    title: String,
}

pub struct Assistant {
    queue: VecDeque<DemoRequest>,
}

impl Assistant {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub async fn tick(&mut self, t: &mut Ticker<'_>) -> Result<()> {
        while let Some(request) = self.queue.pop_front() {
            self.produce_demo(t, &request)?;
        }
        t.set_task(Some(serde_json::json!({
            "type": "demo_creation",
            "status": "idle",
            "last_check": Utc::now().to_rfc3339(),
        })))?;
        Ok(())
    }

    pub async fn handle_message(&mut self, t: &mut Ticker<'_>, msg: &Message) -> Result<()> {
        match msg.kind.as_str() {
            kinds::DEMO_REQUEST => {
                let request = DemoRequest {
                    number: msg.body["item"].as_str().unwrap_or_default().to_string(),
                    name: msg.body["name"].as_str().unwrap_or_default().to_string(),
                    title: msg.body["title"].as_str().unwrap_or_default().to_string(),
                };
                info!(item = %request.name, "demo requested");
                self.queue.push_back(request);
                t.incr_metric("demo_requests");
                Ok(())
            }
            other => {
                warn!(kind = other, "unknown message kind - ignoring");
                Ok(())
            }
        }
    }

    /// Write a short demo note for the item. A demo "fails" when the item's
    /// declared deliverables are not all present; that files a bug back to
    /// the developer.
    fn produce_demo(&self, t: &mut Ticker<'_>, request: &DemoRequest) -> Result<()> {
        let item = t
            .ctx
            .roadmap
            .list_items()?
            .into_iter()
            .find(|i| i.number == request.number);

        let missing: Vec<String> = item
            .as_ref()
            .map(|i| {
                i.deliverables()
                    .into_iter()
                    .filter(|d| !t.ctx.config.repo_path.join(d).exists())
                    .collect()
            })
            .unwrap_or_default();

        let demos_dir = t.ctx.config.data_dir.join("demos");
        std::fs::create_dir_all(&demos_dir).context("create demos dir")?;
        let path = demos_dir.join(format!("demo_{}.md", request.number));

        let verdict = if missing.is_empty() { "PASS" } else { "FAIL" };
        let mut body = format!(
            "# Demo - {} ({})\n\n**Title**: {}\n**Result**: {}\n**Created**: {}\n",
            request.name,
            request.number,
            request.title,
            verdict,
            Utc::now().to_rfc3339(),
        );
        if !missing.is_empty() {
            body.push_str("\nMissing deliverables:\n");
            for d in &missing {
                body.push_str(&format!("- {d}\n"));
            }
        }
        std::fs::write(&path, body)?;
        info!(item = %request.name, verdict, path = %path.display(), "demo written");
        t.incr_metric("demos_created");

        if !missing.is_empty() {
            warn!(item = %request.name, "demo failed - filing bug fix request");
            t.send(
                AgentRole::CodeDeveloper,
                kinds::BUG_FIX_REQUEST,
                serde_json::json!({
                    "item": request.number,
                    "reason": format!("demo failed: missing {}", missing.join(", ")),
                }),
                MessagePriority::Normal,
            )?;
            t.incr_metric("bugs_filed");
        }
        Ok(())
    }
}

impl Default for Assistant {
    fn default() -> Self {
        Self::new()
    }
}
