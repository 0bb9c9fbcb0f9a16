//! End-to-end scenarios over the role behaviors and the work store:
//! spec-precedes-implementation, blocking on a missing spec, sequential
//! work ordering under racing claimants, and the file-capability boundary.

mod common;

use common::{fixture, FileWritingLlm};
use crewd::agents::architect::Architect;
use crewd::agents::developer::CodeDeveloper;
use crewd::agents::roles::AgentRole;
use crewd::agents::Ticker;
use crewd::bus::{AgentStatus, MessagePriority};
use crewd::config::DeveloperMode;
use crewd::llm::ScriptedLlm;
use crewd::work::{NewWorkUnit, WorkStatus, WorkStore};
use std::sync::Arc;

const SPEC_BODY: &str = "# SPEC-7\n\n## Overview\n\nBus.\n\n## Design\n\nInbox dirs.\n\n## Implementation\n\nRename-based send.\n\n## Testing\n\nDrain order.\n";

// ─── S1: spec precedes implementation ────────────────────────────────────────

#[tokio::test]
async fn spec_precedes_implementation() {
    let fx = fixture(Arc::new(ScriptedLlm::always_ok(SPEC_BODY))).await;

    // Architect tick: planned item 7 has no spec - one gets created and
    // committed.
    let mut status = AgentStatus::new(AgentRole::Architect);
    let mut ticker = Ticker::new(&fx.ctx, &mut status);
    Architect::new().tick(&mut ticker).await.unwrap();

    let spec = fx.ctx.specs.find("7").unwrap().expect("spec must exist");
    assert!(spec.content.contains("## Design"));
    assert!(fx.ctx.vcs.is_clean().unwrap(), "spec commit leaves tree clean");
    assert_eq!(
        status.metrics["specs_created"],
        serde_json::json!(1),
        "metric tracks the new spec"
    );

    // Developer tick: spec resolves, the "LLM" writes the deliverable, tests
    // pass, and a commit record lands.
    let llm = Arc::new(FileWritingLlm {
        repo: fx.repo.clone(),
        rel_path: "notes/p7.md".to_string(),
    });
    let ctx = crewd::AgentContext {
        llm,
        ..fx.ctx.clone()
    };
    let mut status = AgentStatus::new(AgentRole::CodeDeveloper);
    let mut ticker = Ticker::new(&ctx, &mut status);
    CodeDeveloper::new().tick(&mut ticker).await.unwrap();

    assert!(fx.ctx.vcs.is_clean().unwrap(), "implementation was committed");
    let commits = fx.ctx.work.unreviewed_commits(10).await.unwrap();
    assert_eq!(commits.len(), 1);
    assert!(
        commits[0].message.contains("PRIORITY 7"),
        "commit message names the item: {}",
        commits[0].message
    );

    // The assistant got a demo request and the architect a review request.
    let demo = fx.ctx.mailbox.drain(AgentRole::Assistant).unwrap();
    assert_eq!(demo.len(), 1);
    assert_eq!(demo[0].kind, "demo_request");
    let review = fx.ctx.mailbox.drain(AgentRole::Architect).unwrap();
    assert!(review.iter().any(|m| m.kind == "commit_review_request"));
}

// ─── S2: developer blocks on missing spec ────────────────────────────────────

#[tokio::test]
async fn developer_blocks_on_missing_spec() {
    let fx = fixture(Arc::new(ScriptedLlm::always_ok("unused"))).await;

    let mut developer = CodeDeveloper::new();
    // More ticks than max_retries_per_item: spec requests alone must never
    // exhaust the attempt budget.
    for _ in 0..5 {
        let mut status = AgentStatus::new(AgentRole::CodeDeveloper);
        let mut ticker = Ticker::new(&fx.ctx, &mut status);
        developer.tick(&mut ticker).await.unwrap();
    }

    let inbox = fx.ctx.mailbox.drain(AgentRole::Architect).unwrap();
    assert!(!inbox.is_empty(), "urgent spec_request sent");
    assert!(inbox.iter().all(|m| m.kind == "spec_request"));
    assert_eq!(inbox[0].priority, MessagePriority::Urgent);
    assert_eq!(inbox[0].body["item"]["number"], serde_json::json!("7"));

    // No commit happened and no commit record exists.
    assert!(fx.ctx.work.unreviewed_commits(10).await.unwrap().is_empty());
}

// ─── S3: work ordering under racing claimants ────────────────────────────────

#[tokio::test]
async fn work_ordering_two_claimants() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("crewd.db");

    // Two handles simulate two developer processes sharing the store.
    let store_a = WorkStore::open(&db).await.unwrap();
    let store_b = WorkStore::open(&db).await.unwrap();

    for (id, ord) in [("U1", 1), ("U2", 2)] {
        store_a
            .insert_work(&NewWorkUnit {
                work_id: id.to_string(),
                priority_number: 1,
                group_id: "G1".to_string(),
                order: ord,
                spec_id: "1".to_string(),
                scope_description: String::new(),
                assigned_files: vec![],
            })
            .await
            .unwrap();
    }

    // Both see U1 as the candidate.
    let next_a = store_a.next_work_for_priority(1).await.unwrap().unwrap();
    let next_b = store_b.next_work_for_priority(1).await.unwrap().unwrap();
    assert_eq!(next_a.work_id, "U1");
    assert_eq!(next_b.work_id, "U1");

    // Exactly one claim wins.
    let (a, b) = tokio::join!(store_a.claim("U1", "A"), store_b.claim("U1", "B"));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a ^ b, "exactly one of the racing claims must win");

    // Neither can take U2 until U1 completes.
    assert!(!store_a.claim("U2", "A").await.unwrap());
    assert!(!store_b.claim("U2", "B").await.unwrap());

    store_a
        .update_status("U1", WorkStatus::Completed, None)
        .await
        .unwrap();

    // Round-trip law: a fresh handle sees the successor.
    let fresh = WorkStore::open(&db).await.unwrap();
    let next = fresh.next_work_for_priority(1).await.unwrap().unwrap();
    assert_eq!(next.work_id, "U2");
    assert!(fresh.claim("U2", "B").await.unwrap());
}

// ─── S6: file-capability violation ───────────────────────────────────────────

#[tokio::test]
async fn file_capability_violation_fails_the_unit() {
    // The "LLM" edits b.md while the unit only grants a.md.
    let fx = fixture(Arc::new(ScriptedLlm::always_ok("unused"))).await;
    let llm = Arc::new(FileWritingLlm {
        repo: fx.repo.clone(),
        rel_path: "b.md".to_string(),
    });
    let mut ctx = crewd::AgentContext {
        llm,
        ..fx.ctx.clone()
    };
    let mut config = (*ctx.config).clone();
    config.developer_mode = DeveloperMode::WorkUnits;
    ctx.config = Arc::new(config);

    // Spec for item 7 exists so the developer reaches the work unit path;
    // committed so the only working-tree change is the agent's own edit.
    ctx.specs.put("7", "File-based messaging", SPEC_BODY).unwrap();
    ctx.vcs.commit("docs: add SPEC-7", true).unwrap();
    ctx.work
        .insert_work(&NewWorkUnit {
            work_id: "WORK-7-1".to_string(),
            priority_number: 7,
            group_id: "GROUP-7".to_string(),
            order: 1,
            spec_id: "7".to_string(),
            scope_description: String::new(),
            assigned_files: vec!["a.md".to_string()],
        })
        .await
        .unwrap();

    let mut status = AgentStatus::new(AgentRole::CodeDeveloper);
    let mut ticker = Ticker::new(&ctx, &mut status);
    let result = CodeDeveloper::new().tick(&mut ticker).await;

    assert!(result.is_err(), "the tick must fail on a capability violation");
    let unit = ctx.work.get("WORK-7-1").await.unwrap().unwrap();
    assert_eq!(unit.status, WorkStatus::Failed);
    // No commit was made: the offending edit is still uncommitted.
    assert!(!ctx.vcs.is_clean().unwrap());
    assert!(ctx.work.unreviewed_commits(10).await.unwrap().is_empty());
}

// ─── Urgent spec request preempts planned work ───────────────────────────────

#[tokio::test]
async fn architect_serves_urgent_request_then_notifies() {
    let fx = fixture(Arc::new(ScriptedLlm::always_ok(SPEC_BODY))).await;

    // Developer blocks first, which queues the urgent request.
    let mut developer = CodeDeveloper::new();
    let mut status = AgentStatus::new(AgentRole::CodeDeveloper);
    let mut ticker = Ticker::new(&fx.ctx, &mut status);
    developer.tick(&mut ticker).await.unwrap();

    // Architect drains its inbox, then its next tick serves the request and
    // answers with spec_ready.
    let mut architect = Architect::new();
    let mut status = AgentStatus::new(AgentRole::Architect);
    for msg in fx.ctx.mailbox.drain(AgentRole::Architect).unwrap() {
        let mut ticker = Ticker::new(&fx.ctx, &mut status);
        architect.handle_message(&mut ticker, &msg).await.unwrap();
    }
    let mut ticker = Ticker::new(&fx.ctx, &mut status);
    architect.tick(&mut ticker).await.unwrap();

    assert!(fx.ctx.specs.find("7").unwrap().is_some());
    let dev_inbox = fx.ctx.mailbox.drain(AgentRole::CodeDeveloper).unwrap();
    assert!(
        dev_inbox.iter().any(|m| m.kind == "spec_ready"),
        "spec_ready follows a served urgent request"
    );
}
