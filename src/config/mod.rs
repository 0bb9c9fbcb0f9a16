use crate::agents::roles::AgentRole;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

const DEFAULT_WORK_BRANCH: &str = "roadmap";
const DEFAULT_MAX_RESTARTS: u32 = 3;
const DEFAULT_RESTART_BACKOFF_SECS: u64 = 60;
const DEFAULT_STALE_HEARTBEAT_SECS: u64 = 300;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_MAX_RETRIES_PER_ITEM: u32 = 3;
const DEFAULT_LLM_COMMAND: &str = "claude";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 300;
const DEFAULT_TEST_COMMAND: &str = "cargo test";

/// Which source of "next work" the code_developer uses. Both satisfy the
/// sequential-ordering contract; a deployment picks exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeveloperMode {
    /// Next planned item from the roadmap file.
    Roadmap,
    /// Next claimable unit from the work store.
    WorkUnits,
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/crewd.toml` - all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Required working branch. The supervisor refuses to launch off it.
    work_branch: Option<String>,
    /// Directory for per-role status files (default: `{data_dir}/agent_status`).
    status_dir: Option<PathBuf>,
    /// Directory for per-role inboxes (default: `{data_dir}/agent_messages`).
    message_dir: Option<PathBuf>,
    /// Log level filter string, e.g. "debug", "info,crewd=trace" (default: "info").
    log: Option<String>,
    /// Seconds between ticks, per role, e.g. `[tick_interval] architect = 3600`.
    tick_interval: Option<HashMap<String, u64>>,
    /// Supervisor restart cap before a role is declared halted (default: 3).
    max_restarts_per_agent: Option<u32>,
    /// Base seconds for restart backoff, grows as `base * 2^attempts` (default: 60).
    restart_backoff_base: Option<u64>,
    /// Seconds after which a heartbeat is considered stale (default: 300).
    stale_heartbeat: Option<u64>,
    /// Seconds between graceful and forceful child termination (default: 10).
    shutdown_grace: Option<u64>,
    /// code_developer per-item attempt cap (default: 3).
    max_retries_per_item: Option<u32>,
    /// Subset of worker roles to launch (default: all six).
    enable_roles: Option<Vec<String>>,
    /// Command used to verify a commit candidate (default: "cargo test").
    test_command: Option<String>,
    /// Path to the roadmap markdown (default: `docs/ROADMAP.md`).
    roadmap_path: Option<PathBuf>,
    /// Directory holding technical specs (default: `docs/specs`).
    specs_dir: Option<PathBuf>,
    /// External LLM CLI invoked with the prompt on stdin (default: "claude").
    llm_command: Option<String>,
    /// Per-call LLM timeout in seconds (default: 300, clamped to the tick budget).
    llm_timeout: Option<u64>,
    /// Record a pull request after completed items (default: false).
    enable_pr: Option<bool>,
    /// "roadmap" or "work-units" (default: "roadmap").
    developer_mode: Option<DeveloperMode>,
}

fn load_toml(path: &Path) -> Option<TomlConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse crewd.toml - using defaults");
            None
        }
    }
}

// ─── CrewConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CrewConfig {
    pub data_dir: PathBuf,
    pub repo_path: PathBuf,
    pub log: String,
    pub work_branch: String,
    pub status_dir: PathBuf,
    pub message_dir: PathBuf,
    pub registry_dir: PathBuf,
    tick_intervals: HashMap<AgentRole, Duration>,
    pub max_restarts_per_agent: u32,
    pub restart_backoff_base: Duration,
    pub stale_heartbeat: Duration,
    pub shutdown_grace: Duration,
    pub max_retries_per_item: u32,
    pub enable_roles: Vec<AgentRole>,
    pub test_command: String,
    pub roadmap_path: PathBuf,
    pub specs_dir: PathBuf,
    pub llm_command: String,
    pub llm_timeout: Duration,
    pub enable_pr: bool,
    pub developer_mode: DeveloperMode,
}

impl CrewConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env - passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/crewd.toml`
    ///   3. Built-in defaults
    pub fn new(
        data_dir: Option<PathBuf>,
        repo_path: Option<PathBuf>,
        log: Option<String>,
        work_branch: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let repo_path = repo_path.unwrap_or_else(|| PathBuf::from("."));

        let toml = load_toml(&data_dir.join("crewd.toml")).unwrap_or_default();

        let work_branch = work_branch
            .or(toml.work_branch)
            .unwrap_or_else(|| DEFAULT_WORK_BRANCH.to_string());
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let status_dir = toml
            .status_dir
            .unwrap_or_else(|| data_dir.join("agent_status"));
        let message_dir = toml
            .message_dir
            .unwrap_or_else(|| data_dir.join("agent_messages"));
        let registry_dir = data_dir.join("agent_registry");

        let mut tick_intervals = HashMap::new();
        if let Some(overrides) = toml.tick_interval {
            for (name, secs) in overrides {
                if let Some(role) = AgentRole::parse(&name) {
                    tick_intervals.insert(role, Duration::from_secs(secs.max(1)));
                }
            }
        }

        let enable_roles = toml
            .enable_roles
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| AgentRole::parse(n))
                    .filter(|r| *r != AgentRole::Supervisor)
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| AgentRole::workers().to_vec());

        Self {
            repo_path,
            log,
            work_branch,
            status_dir,
            message_dir,
            registry_dir,
            tick_intervals,
            max_restarts_per_agent: toml
                .max_restarts_per_agent
                .unwrap_or(DEFAULT_MAX_RESTARTS),
            restart_backoff_base: Duration::from_secs(
                toml.restart_backoff_base
                    .unwrap_or(DEFAULT_RESTART_BACKOFF_SECS),
            ),
            stale_heartbeat: Duration::from_secs(
                toml.stale_heartbeat.unwrap_or(DEFAULT_STALE_HEARTBEAT_SECS),
            ),
            shutdown_grace: Duration::from_secs(
                toml.shutdown_grace.unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
            ),
            max_retries_per_item: toml
                .max_retries_per_item
                .unwrap_or(DEFAULT_MAX_RETRIES_PER_ITEM),
            enable_roles,
            test_command: toml
                .test_command
                .unwrap_or_else(|| DEFAULT_TEST_COMMAND.to_string()),
            roadmap_path: toml
                .roadmap_path
                .unwrap_or_else(|| PathBuf::from("docs/ROADMAP.md")),
            specs_dir: toml.specs_dir.unwrap_or_else(|| PathBuf::from("docs/specs")),
            llm_command: toml
                .llm_command
                .unwrap_or_else(|| DEFAULT_LLM_COMMAND.to_string()),
            llm_timeout: Duration::from_secs(
                toml.llm_timeout.unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
            ),
            enable_pr: toml.enable_pr.unwrap_or(false),
            developer_mode: toml.developer_mode.unwrap_or(DeveloperMode::Roadmap),
            data_dir,
        }
    }

    /// Sleep between ticks for `role` (configured or role default).
    pub fn tick_interval(&self, role: AgentRole) -> Duration {
        self.tick_intervals
            .get(&role)
            .copied()
            .unwrap_or_else(|| role.default_tick_interval())
    }

    /// Wall-clock budget for one `do_background_work` call: the tick interval
    /// minus a safety margin, so a slow tick cannot swallow the next one.
    pub fn tick_budget(&self, role: AgentRole) -> Duration {
        let interval = self.tick_interval(role);
        interval.mul_f32(0.9).max(Duration::from_secs(1))
    }

    /// Path to the SQLite work store.
    pub fn work_db_path(&self) -> PathBuf {
        self.data_dir.join("crewd.db")
    }

    /// Dead-letter directory for quarantined messages and status files.
    pub fn dead_letter_dir(&self) -> PathBuf {
        self.message_dir.join("dead_letter")
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("crewd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("crewd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("crewd");
        }
    }
    // Fallback
    PathBuf::from(".crewd")
}
