//! Per-role startup skills - bounded bootstrap with health checks.
//!
//! Each role loads a minimal context and probes the environment it depends
//! on before its first tick: bus directories writable, work store reachable,
//! LLM tool present, working-branch invariant. The whole routine runs under
//! a small time budget; a failed non-critical check is reported with a
//! suggested fix instead of failing startup.

use crate::agents::roles::AgentRole;
use crate::AgentContext;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Total startup budget. Exceeding it fails the skill.
pub const STARTUP_BUDGET: Duration = Duration::from_secs(2);

/// Startup may not consume more than this fraction of the role's context.
pub const MAX_CONTEXT_FRACTION: f64 = 0.30;

/// Bytes treated as one full context for the budget fraction estimate.
const CONTEXT_BUDGET_BYTES: u64 = 256 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub passed: bool,
    /// A failed critical check fails the whole startup.
    pub critical: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupReport {
    pub role: AgentRole,
    pub success: bool,
    pub context_budget_fraction: f64,
    pub health_checks: Vec<HealthCheck>,
    pub execution_time: Duration,
    pub suggested_fixes: Vec<String>,
    pub completed_at: chrono::DateTime<Utc>,
}

impl HealthCheck {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            critical: true,
            message: message.into(),
            suggested_fix: None,
        }
    }

    fn fail(name: &str, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            critical: true,
            message: message.into(),
            suggested_fix: Some(fix.into()),
        }
    }

    fn advisory(mut self) -> Self {
        self.critical = false;
        self
    }
}

/// Run the startup skill for `role`. Never panics; a timeout or failed
/// critical check yields `success = false`.
pub async fn run_startup_skill(role: AgentRole, ctx: &AgentContext) -> StartupReport {
    let started = std::time::Instant::now();

    let result = tokio::time::timeout(STARTUP_BUDGET, checks_for(role, ctx)).await;
    let (mut checks, context_bytes) = match result {
        Ok(r) => r,
        Err(_) => (
            vec![HealthCheck::fail(
                "startup_budget",
                format!("startup exceeded {}s budget", STARTUP_BUDGET.as_secs()),
                "reduce startup context or raise the budget",
            )],
            0,
        ),
    };

    let context_budget_fraction =
        (context_bytes as f64 / CONTEXT_BUDGET_BYTES as f64).min(1.0);
    if context_budget_fraction > MAX_CONTEXT_FRACTION {
        checks.push(
            HealthCheck::fail(
                "context_budget",
                format!("startup context uses {:.0}% of budget", context_budget_fraction * 100.0),
                "trim the roadmap or split specs into sections",
            )
            .advisory(),
        );
    }

    let success = checks.iter().all(|c| c.passed || !c.critical);
    let suggested_fixes = checks
        .iter()
        .filter_map(|c| c.suggested_fix.clone())
        .collect();

    StartupReport {
        role,
        success,
        context_budget_fraction,
        health_checks: checks,
        execution_time: started.elapsed(),
        suggested_fixes,
        completed_at: Utc::now(),
    }
}

pub fn log_report(role: AgentRole, report: &StartupReport) {
    for check in &report.health_checks {
        if check.passed {
            info!(%role, check = %check.name, "startup check ok: {}", check.message);
        } else {
            warn!(
                %role,
                check = %check.name,
                critical = check.critical,
                fix = check.suggested_fix.as_deref().unwrap_or("-"),
                "startup check failed: {}",
                check.message
            );
        }
    }
    info!(
        %role,
        success = report.success,
        elapsed_ms = report.execution_time.as_millis() as u64,
        context_fraction = format!("{:.2}", report.context_budget_fraction).as_str(),
        "startup skill finished"
    );
}

/// The common checks plus role-specific ones. Returns the checks and the
/// bytes of context the role loaded while bootstrapping.
async fn checks_for(role: AgentRole, ctx: &AgentContext) -> (Vec<HealthCheck>, u64) {
    let mut checks = Vec::new();
    let mut context_bytes = 0u64;

    // Bus directories must be writable by every role.
    for (name, dir) in [
        ("status_dir", &ctx.config.status_dir),
        ("message_dir", &ctx.config.message_dir),
    ] {
        checks.push(check_dir_writable(name, dir));
    }

    // Work store connectivity.
    checks.push(match ctx.work.ping().await {
        Ok(()) => HealthCheck::pass("work_store", "SQLite reachable"),
        Err(e) => HealthCheck::fail(
            "work_store",
            format!("work store query failed: {e}"),
            "run `crewd init` to create the store",
        ),
    });

    // Working-branch invariant: every role operates on the shared branch.
    checks.push(match ctx.vcs.ensure_branch(&ctx.config.work_branch) {
        Ok(()) => HealthCheck::pass(
            "work_branch",
            format!("on working branch '{}'", ctx.config.work_branch),
        ),
        Err(e) => HealthCheck::fail(
            "work_branch",
            e.to_string(),
            format!("git checkout {}", ctx.config.work_branch),
        ),
    });

    // Roadmap readability. Critical only for roles that steer by it.
    let roadmap_critical = matches!(
        role,
        AgentRole::Architect | AgentRole::CodeDeveloper | AgentRole::ProjectManager
    );
    let roadmap_check = match std::fs::metadata(&ctx.config.roadmap_path) {
        Ok(meta) => {
            context_bytes += meta.len();
            HealthCheck::pass(
                "roadmap",
                format!("roadmap present ({} bytes)", meta.len()),
            )
        }
        Err(_) => HealthCheck::fail(
            "roadmap",
            format!("roadmap missing: {}", ctx.config.roadmap_path.display()),
            "create the roadmap file or point roadmap_path at it",
        ),
    };
    checks.push(if roadmap_critical {
        roadmap_check
    } else {
        roadmap_check.advisory()
    });

    // LLM tool on PATH - only the producing roles need it; elsewhere it is
    // advisory.
    if matches!(role, AgentRole::Architect | AgentRole::CodeDeveloper) {
        checks.push(match which_bin(&ctx.config.llm_command) {
            Some(path) => HealthCheck::pass(
                "llm_cli",
                format!("{} found at {}", ctx.config.llm_command, path.display()),
            ),
            None => HealthCheck::fail(
                "llm_cli",
                format!("'{}' not found on PATH", ctx.config.llm_command),
                "install the CLI or set llm_command in crewd.toml",
            )
            .advisory(),
        });
    }

    // Specs directory listing is part of the architect's minimal context.
    if role == AgentRole::Architect {
        if let Ok(titles) = ctx.specs.list_titles() {
            context_bytes += titles.iter().map(|t| t.len() as u64).sum::<u64>();
            checks.push(HealthCheck::pass(
                "spec_store",
                format!("{} specs indexed", titles.len()),
            ));
        }
    }

    (checks, context_bytes)
}

fn check_dir_writable(name: &str, dir: &Path) -> HealthCheck {
    if std::fs::create_dir_all(dir).is_err() {
        return HealthCheck::fail(
            name,
            format!("cannot create {}", dir.display()),
            "check permissions on the data directory",
        );
    }
    // Probe with a real write; stat alone misses read-only mounts.
    let probe = dir.join(".health_probe");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            HealthCheck::pass(name, format!("{} writable", dir.display()))
        }
        Err(e) => HealthCheck::fail(
            name,
            format!("{} not writable: {e}", dir.display()),
            "check permissions on the data directory",
        ),
    }
}

/// Minimal `which`-equivalent: returns `Some(path)` if the binary is on PATH.
fn which_bin(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let p = PathBuf::from(name);
        return p.is_file().then_some(p);
    }
    std::env::var_os("PATH").and_then(|path_var| {
        std::env::split_paths(&path_var).find_map(|dir| {
            let candidate = dir.join(name);
            candidate.is_file().then_some(candidate)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn which_finds_sh() {
        assert!(which_bin("sh").is_some());
        assert!(which_bin("definitely-not-a-binary-5309").is_none());
    }

    #[test]
    fn writable_check_passes_on_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let check = check_dir_writable("status_dir", dir.path());
        assert!(check.passed);
    }

    #[test]
    fn advisory_failures_do_not_fail_startup() {
        let failed = HealthCheck::fail("x", "m", "f").advisory();
        let checks = [HealthCheck::pass("ok", "fine"), failed];
        assert!(checks.iter().all(|c| c.passed || !c.critical));
    }
}
