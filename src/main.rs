use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use crewd::{
    agents::{roles::AgentRole, AgentRuntime},
    config::CrewConfig,
    startup,
    supervisor::Supervisor,
    work::WorkStore,
    AgentContext,
};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "crewd",
    about = "crewd - autonomous multi-agent development supervisor",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Data directory for buses, registry, and the work store
    #[arg(long, env = "CREWD_DATA_DIR", global = true)]
    data_dir: Option<std::path::PathBuf>,

    /// Repository the agents operate on (default: current directory)
    #[arg(long, env = "CREWD_REPO", global = true)]
    repo: Option<std::path::PathBuf>,

    /// Required working branch (default: roadmap)
    #[arg(long, env = "CREWD_WORK_BRANCH", global = true)]
    work_branch: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CREWD_LOG", global = true)]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "CREWD_LOG_FILE", global = true)]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor: launch, monitor, and restart the agent team.
    ///
    /// Default when no subcommand is given. Refuses to start when the
    /// repository is not on the configured working branch.
    Serve,
    /// Run a single agent role in the foreground.
    ///
    /// This is the supervisor's child entry point; running it by hand is
    /// useful for debugging one role. Singleton enforcement still applies.
    Agent {
        /// Role to run (architect, code_developer, project_manager,
        /// assistant, code_searcher, ux_design_expert)
        #[arg(long)]
        role: String,
    },
    /// Initialize buses, registry, and the work store.
    ///
    /// Agents never create or destroy this global state; run `init` once
    /// per deployment before `serve`.
    Init,
    /// Print every role's status file plus the supervisor summary.
    Status,
    /// Run all startup health checks and print the report.
    Doctor,
}

fn init_logging(config: &CrewConfig, log_file: Option<&std::path::Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or(std::path::Path::new("."));
            let file = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "crewd.log".to_string());
            let appender = tracing_appender::rolling::daily(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = CrewConfig::new(
        args.data_dir.clone(),
        args.repo.clone(),
        args.log.clone(),
        args.work_branch.clone(),
    );
    let _log_guard = init_logging(&config, args.log_file.as_deref());

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Agent { role } => run_agent(config, &role).await,
        Command::Init => init(config).await,
        Command::Status => status(config).await,
        Command::Doctor => doctor(config).await,
    };

    if let Err(e) = result {
        eprintln!("crewd: {e:#}");
        // Configuration and environment failures discovered at startup are
        // the non-zero exits; clean shutdowns return Ok.
        std::process::exit(1);
    }
}

async fn serve(config: CrewConfig) -> Result<()> {
    info!(
        data_dir = %config.data_dir.display(),
        repo = %config.repo_path.display(),
        branch = %config.work_branch,
        "starting supervisor"
    );
    let ctx = AgentContext::build(config).await?;
    Supervisor::new(ctx).run().await
}

async fn run_agent(config: CrewConfig, role: &str) -> Result<()> {
    let role = AgentRole::parse(role)
        .with_context(|| format!("unknown role '{role}'"))?;
    anyhow::ensure!(
        role != AgentRole::Supervisor,
        "the supervisor runs via `crewd serve`"
    );
    let ctx = AgentContext::build(config).await?;
    AgentRuntime::new(ctx, role)?.run().await
}

async fn init(config: CrewConfig) -> Result<()> {
    for dir in [
        &config.status_dir,
        &config.message_dir,
        &config.registry_dir,
        &config.dead_letter_dir(),
    ] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create {}", dir.display()))?;
        println!("created {}", dir.display());
    }
    WorkStore::open(&config.work_db_path()).await?;
    println!("work store migrated at {}", config.work_db_path().display());
    Ok(())
}

async fn status(config: CrewConfig) -> Result<()> {
    let ctx = AgentContext::build(config).await?;
    for role in AgentRole::workers() {
        match ctx.status.read(role)? {
            Some(status) => println!(
                "{:<18} {:<9} pid={:<8} heartbeat {}s ago{}",
                role.as_str(),
                format!("{:?}", status.state).to_lowercase(),
                status.pid,
                status.heartbeat_age().as_secs(),
                status
                    .error
                    .as_deref()
                    .map(|e| format!("  error: {e}"))
                    .unwrap_or_default(),
            ),
            None => println!("{:<18} (no status)", role.as_str()),
        }
    }

    let supervisor_file = ctx.config.status_dir.join("supervisor_status.json");
    if let Ok(contents) = std::fs::read_to_string(&supervisor_file) {
        println!("\nsupervisor:\n{contents}");
    } else {
        println!("\nsupervisor: (no status)");
    }
    Ok(())
}

async fn doctor(config: CrewConfig) -> Result<()> {
    let ctx = AgentContext::build(config).await?;
    let mut all_ok = true;
    for role in AgentRole::workers() {
        let report = startup::run_startup_skill(role, &ctx).await;
        println!(
            "{} - {} ({} checks, {:.0}ms, context {:.0}%)",
            role.as_str(),
            if report.success { "ok" } else { "FAILED" },
            report.health_checks.len(),
            report.execution_time.as_secs_f64() * 1000.0,
            report.context_budget_fraction * 100.0,
        );
        for check in &report.health_checks {
            println!(
                "    [{}] {:<14} {}{}",
                if check.passed { "pass" } else { "fail" },
                check.name,
                check.message,
                check
                    .suggested_fix
                    .as_deref()
                    .map(|f| format!("  → {f}"))
                    .unwrap_or_default(),
            );
        }
        all_ok &= report.success;
    }
    anyhow::ensure!(all_ok, "one or more roles failed their startup checks");
    Ok(())
}
