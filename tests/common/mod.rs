//! Shared fixture: a temp repository on the working branch, a roadmap with
//! one planned item, and a fully wired agent context with an injected LLM.
#![allow(dead_code)]

use async_trait::async_trait;
use crewd::config::CrewConfig;
use crewd::llm::{LlmClient, LlmResponse};
use crewd::vcs;
use crewd::AgentContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const ROADMAP: &str = r#"# Roadmap

### 🔴 **PRIORITY 7: File-based messaging**

**Status**: 📝 Planned

Add an inter-agent message bus with urgent/normal/low priorities.

**Deliverables**:
- notes/p7.md
"#;

pub struct Fixture {
    _dir: tempfile::TempDir,
    pub repo: PathBuf,
    pub ctx: AgentContext,
}

pub async fn fixture(llm: Arc<dyn LlmClient>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    vcs::init_repo(&repo, "roadmap").unwrap();
    std::fs::create_dir_all(repo.join("docs")).unwrap();
    std::fs::write(repo.join("docs/ROADMAP.md"), ROADMAP).unwrap();
    // Start from a clean tree so change detection sees only agent edits.
    vcs::Vcs::new(&repo, false)
        .commit("chore: seed roadmap", true)
        .unwrap();

    let mut config = CrewConfig::new(
        Some(dir.path().join("data")),
        Some(repo.clone()),
        None,
        None,
    );
    config.roadmap_path = repo.join("docs/ROADMAP.md");
    config.specs_dir = repo.join("docs/specs");
    config.test_command = "true".to_string();

    let ctx = AgentContext::build_with_llm(config, llm).await.unwrap();
    Fixture {
        _dir: dir,
        repo,
        ctx,
    }
}

/// An "LLM" that implements the item by writing one file into the repo -
/// enough to drive the developer's change-detect → test → commit path.
pub struct FileWritingLlm {
    pub repo: PathBuf,
    pub rel_path: String,
}

#[async_trait]
impl LlmClient for FileWritingLlm {
    async fn invoke(&self, _prompt: &str, _timeout: Duration) -> LlmResponse {
        std::fs::create_dir_all(self.repo.join(&self.rel_path).parent().unwrap()).unwrap();
        std::fs::write(self.repo.join(&self.rel_path), "implemented\n").unwrap();
        LlmResponse {
            success: true,
            content: "done".to_string(),
            usage: None,
            error: None,
        }
    }
}
