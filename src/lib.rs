pub mod agents;
pub mod backoff;
pub mod bus;
pub mod config;
pub mod llm;
pub mod registry;
pub mod roadmap;
pub mod specs;
pub mod startup;
pub mod supervisor;
pub mod vcs;
pub mod work;

use std::sync::Arc;

use bus::{MessageBus, StatusBus};
use config::CrewConfig;
use llm::{CliLlm, LlmClient};
use registry::Registry;
use roadmap::RoadmapReader;
use specs::SpecStore;
use vcs::Vcs;
use work::WorkStore;

/// Shared handles passed to every agent and to the supervisor.
///
/// All cross-process state lives behind these: the registry and buses on the
/// filesystem, the work store in SQLite. Nothing here owns another agent.
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<CrewConfig>,
    pub registry: Arc<Registry>,
    pub status: StatusBus,
    pub mailbox: MessageBus,
    pub work: WorkStore,
    pub roadmap: Arc<RoadmapReader>,
    pub specs: Arc<SpecStore>,
    pub vcs: Arc<Vcs>,
    pub llm: Arc<dyn LlmClient>,
}

impl AgentContext {
    /// Wire up every subsystem from config. The work store must already be
    /// initialized (`crewd init`); agents do not create global state.
    pub async fn build(config: CrewConfig) -> anyhow::Result<Self> {
        let work = WorkStore::open(&config.work_db_path()).await?;
        let llm: Arc<dyn LlmClient> = Arc::new(CliLlm::new(config.llm_command.clone()));
        Ok(Self {
            registry: Arc::new(Registry::new(config.registry_dir.clone())),
            status: StatusBus::new(config.status_dir.clone()),
            mailbox: MessageBus::new(config.message_dir.clone()),
            work,
            roadmap: Arc::new(RoadmapReader::new(config.roadmap_path.clone())),
            specs: Arc::new(SpecStore::new(config.specs_dir.clone())),
            vcs: Arc::new(Vcs::new(config.repo_path.clone(), config.enable_pr)),
            llm,
            config: Arc::new(config),
        })
    }

    /// Same wiring with an injected LLM client (tests, dry runs).
    pub async fn build_with_llm(
        config: CrewConfig,
        llm: Arc<dyn LlmClient>,
    ) -> anyhow::Result<Self> {
        let mut ctx = Self::build(config).await?;
        ctx.llm = llm;
        Ok(ctx)
    }
}
