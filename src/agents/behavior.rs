//! Role dispatch - a closed tagged union of the six worker behaviors.
//!
//! Roles differ only in their background work, their message handling, and
//! their startup skill; everything else is shared loop machinery. The union
//! keeps dispatch static: adding a role means adding a variant, not wiring
//! reflection.

use super::architect::Architect;
use super::assistant::Assistant;
use super::code_searcher::CodeSearcher;
use super::developer::CodeDeveloper;
use super::project_manager::ProjectManager;
use super::roles::AgentRole;
use super::ux_design_expert::UxDesignExpert;
use super::Ticker;
use crate::bus::Message;
use anyhow::Result;

pub enum RoleBehavior {
    Architect(Architect),
    CodeDeveloper(CodeDeveloper),
    ProjectManager(ProjectManager),
    Assistant(Assistant),
    CodeSearcher(CodeSearcher),
    UxDesignExpert(UxDesignExpert),
}

impl RoleBehavior {
    /// Behavior for a worker role; `None` for the supervisor, which has its
    /// own loop.
    pub fn for_role(role: AgentRole) -> Option<Self> {
        match role {
            AgentRole::Supervisor => None,
            AgentRole::Architect => Some(Self::Architect(Architect::new())),
            AgentRole::CodeDeveloper => Some(Self::CodeDeveloper(CodeDeveloper::new())),
            AgentRole::ProjectManager => Some(Self::ProjectManager(ProjectManager::new())),
            AgentRole::Assistant => Some(Self::Assistant(Assistant::new())),
            AgentRole::CodeSearcher => Some(Self::CodeSearcher(CodeSearcher::new())),
            AgentRole::UxDesignExpert => Some(Self::UxDesignExpert(UxDesignExpert::new())),
        }
    }

    /// One bounded unit of background work.
    pub async fn tick(&mut self, t: &mut Ticker<'_>) -> Result<()> {
        match self {
            Self::Architect(a) => a.tick(t).await,
            Self::CodeDeveloper(d) => d.tick(t).await,
            Self::ProjectManager(p) => p.tick(t).await,
            Self::Assistant(a) => a.tick(t).await,
            Self::CodeSearcher(c) => c.tick(t).await,
            Self::UxDesignExpert(u) => u.tick(t).await,
        }
    }

    /// Handle one inbox message. Unknown kinds are logged and ignored by
    /// each role; returning an error dead-letters the message.
    pub async fn handle_message(&mut self, t: &mut Ticker<'_>, msg: &Message) -> Result<()> {
        match self {
            Self::Architect(a) => a.handle_message(t, msg).await,
            Self::CodeDeveloper(d) => d.handle_message(t, msg).await,
            Self::ProjectManager(p) => p.handle_message(t, msg).await,
            Self::Assistant(a) => a.handle_message(t, msg).await,
            Self::CodeSearcher(c) => c.handle_message(t, msg).await,
            Self::UxDesignExpert(u) => u.handle_message(t, msg).await,
        }
    }
}
