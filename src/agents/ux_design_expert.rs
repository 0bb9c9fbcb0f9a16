//! ux_design_expert - reacts to design-review requests and proactively
//! flags UI-adjacent planned items with design guidance for the architect.

use super::kinds;
use super::roles::AgentRole;
use super::Ticker;
use crate::bus::{Message, MessagePriority};
use crate::roadmap::{ItemStatus, RoadmapItem};
use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use tracing::{info, warn};

const UI_KEYWORDS: &[&str] = &[
    "ui", "ux", "design", "frontend", "page", "screen", "dashboard", "layout", "widget",
];

const REVIEW_CHECKLIST: &str = "- States: loading, empty, error, success all designed?\n\
- Keyboard and screen-reader accessibility considered?\n\
- Consistent with existing spacing and typography scale?\n\
- Responsive behavior specified for narrow viewports?";

pub struct UxDesignExpert {
    /// Items already flagged proactively - one note per item is enough.
    reviewed: HashSet<String>,
}

impl UxDesignExpert {
    pub fn new() -> Self {
        Self {
            reviewed: HashSet::new(),
        }
    }

    pub async fn tick(&mut self, t: &mut Ticker<'_>) -> Result<()> {
        for item in t.ctx.roadmap.list_items()? {
            if item.status != ItemStatus::Planned
                || self.reviewed.contains(&item.number)
                || !is_ui_adjacent(&item)
            {
                continue;
            }
            info!(item = %item.name, "UI-adjacent item - sending design guidance");
            t.send(
                AgentRole::Architect,
                kinds::DESIGN_FEEDBACK,
                serde_json::json!({
                    "item": item.number,
                    "guidance": REVIEW_CHECKLIST,
                }),
                MessagePriority::Low,
            )?;
            self.reviewed.insert(item.number.clone());
            t.incr_metric("proactive_reviews");
        }

        t.set_task(Some(serde_json::json!({
            "type": "design_review",
            "status": "idle",
            "last_check": Utc::now().to_rfc3339(),
        })))?;
        Ok(())
    }

    pub async fn handle_message(&mut self, t: &mut Ticker<'_>, msg: &Message) -> Result<()> {
        match msg.kind.as_str() {
            kinds::DESIGN_REVIEW => {
                let feature = msg.body["feature"].as_str().unwrap_or("unknown");
                info!(feature, from = %msg.from, "design review requested");
                t.send(
                    msg.from,
                    kinds::DESIGN_FEEDBACK,
                    serde_json::json!({
                        "feature": feature,
                        "checklist": REVIEW_CHECKLIST,
                    }),
                    MessagePriority::Normal,
                )?;
                t.incr_metric("reviews_answered");
                Ok(())
            }
            other => {
                warn!(kind = other, "unknown message kind - ignoring");
                Ok(())
            }
        }
    }
}

impl Default for UxDesignExpert {
    fn default() -> Self {
        Self::new()
    }
}

fn is_ui_adjacent(item: &RoadmapItem) -> bool {
    let haystack = format!("{} {}", item.title, item.content).to_lowercase();
    UI_KEYWORDS.iter().any(|kw| {
        haystack
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == *kw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, content: &str) -> RoadmapItem {
        RoadmapItem {
            number: "5".into(),
            name: "PRIORITY 5".into(),
            title: title.into(),
            status: ItemStatus::Planned,
            status_label: "Planned".into(),
            content: content.into(),
        }
    }

    #[test]
    fn detects_ui_items_by_word_boundary() {
        assert!(is_ui_adjacent(&item("Settings page redesign", "")));
        assert!(is_ui_adjacent(&item("Analytics", "add a dashboard view")));
        // "build" contains "ui" as a substring but is not a UI word.
        assert!(!is_ui_adjacent(&item("Build pipeline", "speed up builds")));
    }
}
