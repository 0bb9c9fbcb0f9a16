//! Startup skills: health-check outcomes, the startup budget, and the
//! working-branch gate.

mod common;

use common::fixture;
use crewd::agents::roles::AgentRole;
use crewd::llm::ScriptedLlm;
use crewd::startup::{run_startup_skill, MAX_CONTEXT_FRACTION, STARTUP_BUDGET};
use std::sync::Arc;

#[tokio::test]
async fn all_roles_pass_in_a_healthy_environment() {
    let fx = fixture(Arc::new(ScriptedLlm::always_ok("unused"))).await;

    for role in AgentRole::workers() {
        let report = run_startup_skill(role, &fx.ctx).await;
        assert!(
            report.success,
            "{role} startup failed: {:?}",
            report
                .health_checks
                .iter()
                .filter(|c| !c.passed)
                .collect::<Vec<_>>()
        );
        assert!(report.execution_time <= STARTUP_BUDGET);
        assert!(report.context_budget_fraction <= MAX_CONTEXT_FRACTION);
    }
}

#[tokio::test]
async fn wrong_branch_fails_startup() {
    let fx = fixture(Arc::new(ScriptedLlm::always_ok("unused"))).await;
    fx.ctx.vcs.branch_create("side").unwrap();
    fx.ctx.vcs.checkout("side").unwrap();

    let report = run_startup_skill(AgentRole::Architect, &fx.ctx).await;
    assert!(!report.success);
    let branch_check = report
        .health_checks
        .iter()
        .find(|c| c.name == "work_branch")
        .unwrap();
    assert!(!branch_check.passed);
    assert!(branch_check
        .suggested_fix
        .as_deref()
        .unwrap()
        .contains("git checkout roadmap"));
}

#[tokio::test]
async fn missing_roadmap_is_advisory_for_the_assistant_only() {
    let fx = fixture(Arc::new(ScriptedLlm::always_ok("unused"))).await;
    std::fs::remove_file(&fx.ctx.config.roadmap_path).unwrap();

    let assistant = run_startup_skill(AgentRole::Assistant, &fx.ctx).await;
    assert!(assistant.success, "assistant tolerates a missing roadmap");
    assert!(!assistant.suggested_fixes.is_empty());

    let developer = run_startup_skill(AgentRole::CodeDeveloper, &fx.ctx).await;
    assert!(!developer.success, "developer requires the roadmap");
}
