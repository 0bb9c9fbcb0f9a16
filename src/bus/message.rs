//! Per-role inbox directories - the intent side of the bus pair.
//!
//! `send` publishes one immutable JSON file per message via tmp-then-rename;
//! `drain` claims everything currently in the inbox by unlinking each file
//! before returning it, which gives exactly-once delivery within a host
//! session. Corrupt files and messages whose handler fails are moved to the
//! dead-letter directory, never retried.

use crate::agents::roles::AgentRole;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// Drain order: urgent before normal before low. FIFO by `created_at` is
/// only guaranteed within one priority level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Urgent,
    Normal,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: AgentRole,
    pub to: AgentRole,
    /// Open set of kind symbols, e.g. `spec_request`, `spec_ready`,
    /// `demo_request`, `bug_fix_request`, `commit_review_request`.
    pub kind: String,
    pub priority: MessagePriority,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        from: AgentRole,
        to: AgentRole,
        kind: impl Into<String>,
        body: serde_json::Value,
        priority: MessagePriority,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from,
            to,
            kind: kind.into(),
            priority,
            body,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct MessageBus {
    dir: PathBuf,
}

impl MessageBus {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn inbox_dir(&self, role: AgentRole) -> PathBuf {
        self.dir.join(format!("{role}_inbox"))
    }

    fn dead_letter_dir(&self) -> PathBuf {
        self.dir.join("dead_letter")
    }

    /// Enqueue one message into the recipient's inbox. The file becomes
    /// visible to `drain` only after the rename, so a reader never observes
    /// a partial write.
    pub fn send(&self, message: &Message) -> Result<()> {
        let inbox = self.inbox_dir(message.to);
        std::fs::create_dir_all(&inbox)?;
        let body = serde_json::to_vec_pretty(message).context("serialize message")?;

        let tmp = self.dir.join(format!(".outgoing-{}.json", message.id));
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, inbox.join(format!("{}.json", message.id)))?;
        Ok(())
    }

    /// Claim and return every message currently in `role`'s inbox, sorted by
    /// `(priority, created_at)`. Each file is unlinked before its message is
    /// returned; a recipient that crashes mid-handling does not see the
    /// message again on restart.
    pub fn drain(&self, role: AgentRole) -> Result<Vec<Message>> {
        let inbox = self.inbox_dir(role);
        if !inbox.exists() {
            return Ok(Vec::new());
        }

        let mut messages = Vec::new();
        for entry in std::fs::read_dir(&inbox)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(%role, path = %path.display(), err = %e, "unreadable inbox file");
                    continue;
                }
            };
            match serde_json::from_str::<Message>(&contents) {
                Ok(msg) => {
                    std::fs::remove_file(&path)?;
                    messages.push(msg);
                }
                Err(e) => {
                    warn!(%role, path = %path.display(), err = %e, "quarantining corrupt message");
                    let dead = self.dead_letter_dir();
                    std::fs::create_dir_all(&dead)?;
                    if let Some(name) = path.file_name() {
                        let _ = std::fs::rename(&path, dead.join(name));
                    }
                }
            }
        }

        messages.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(messages)
    }

    /// Park a message whose handler failed. Dead-lettered messages are kept
    /// for inspection and never re-delivered.
    pub fn dead_letter(&self, message: &Message, reason: &str) -> Result<()> {
        let dead = self.dead_letter_dir();
        std::fs::create_dir_all(&dead)?;
        let record = serde_json::json!({
            "message": message,
            "reason": reason,
            "dead_lettered_at": Utc::now(),
        });
        std::fs::write(
            dead.join(format!("{}.json", message.id)),
            serde_json::to_vec_pretty(&record)?,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> (tempfile::TempDir, MessageBus) {
        let dir = tempfile::tempdir().unwrap();
        let bus = MessageBus::new(dir.path());
        (dir, bus)
    }

    #[test]
    fn send_drain_roundtrip_exactly_once() {
        let (_dir, bus) = bus();
        let msg = Message::new(
            AgentRole::CodeDeveloper,
            AgentRole::Architect,
            "spec_request",
            serde_json::json!({"item": 7}),
            MessagePriority::Urgent,
        );
        bus.send(&msg).unwrap();

        let drained = bus.drain(AgentRole::Architect).unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, msg.id);
        assert_eq!(drained[0].kind, "spec_request");

        // Second drain must not re-deliver.
        assert!(bus.drain(AgentRole::Architect).unwrap().is_empty());
    }

    #[test]
    fn drain_empty_inbox_is_ok() {
        let (_dir, bus) = bus();
        assert!(bus.drain(AgentRole::Assistant).unwrap().is_empty());
    }

    #[test]
    fn urgent_drains_before_normal_before_low() {
        let (_dir, bus) = bus();
        for (kind, priority) in [
            ("low_note", MessagePriority::Low),
            ("status_query", MessagePriority::Normal),
            ("spec_request", MessagePriority::Urgent),
        ] {
            bus.send(&Message::new(
                AgentRole::Supervisor,
                AgentRole::Architect,
                kind,
                serde_json::Value::Null,
                priority,
            ))
            .unwrap();
        }

        let drained = bus.drain(AgentRole::Architect).unwrap();
        let kinds: Vec<&str> = drained.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(kinds, vec!["spec_request", "status_query", "low_note"]);
    }

    #[test]
    fn fifo_within_a_priority() {
        let (_dir, bus) = bus();
        for i in 0..5 {
            let mut msg = Message::new(
                AgentRole::Assistant,
                AgentRole::CodeDeveloper,
                format!("m{i}"),
                serde_json::Value::Null,
                MessagePriority::Normal,
            );
            // Force distinct, ordered timestamps.
            msg.created_at = Utc::now() + chrono::Duration::milliseconds(i as i64);
            bus.send(&msg).unwrap();
        }
        let drained = bus.drain(AgentRole::CodeDeveloper).unwrap();
        let kinds: Vec<&str> = drained.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(kinds, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn corrupt_message_goes_to_dead_letter() {
        let (dir, bus) = bus();
        let inbox = bus.inbox_dir(AgentRole::Architect);
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(inbox.join("bad.json"), b"{truncated").unwrap();

        let drained = bus.drain(AgentRole::Architect).unwrap();
        assert!(drained.is_empty());
        assert!(dir.path().join("dead_letter").join("bad.json").exists());
    }

    #[test]
    fn failed_handler_message_is_parked() {
        let (dir, bus) = bus();
        let msg = Message::new(
            AgentRole::Assistant,
            AgentRole::CodeDeveloper,
            "bug_fix_request",
            serde_json::json!({"item": 3}),
            MessagePriority::Normal,
        );
        bus.dead_letter(&msg, "handler panicked").unwrap();
        let parked = dir.path().join("dead_letter").join(format!("{}.json", msg.id));
        assert!(parked.exists());
    }
}
