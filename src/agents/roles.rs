//! Agent role definitions for the crewd multi-agent team.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The seven agent roles. `Supervisor` launches and monitors the other six.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Supervisor,
    /// Proactive spec creation. Keeps the spec pipeline ahead of the developer.
    Architect,
    /// Implements planned items against specs, runs tests, commits.
    CodeDeveloper,
    /// Monitors delivery, verifies Definition-of-Done. Never mutates code.
    ProjectManager,
    /// Produces demo artifacts, files bug reports for failing demos.
    Assistant,
    /// Long-interval repository analysis snapshots.
    CodeSearcher,
    /// Design reviews and UI-adjacent guidance.
    UxDesignExpert,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::Architect => "architect",
            Self::CodeDeveloper => "code_developer",
            Self::ProjectManager => "project_manager",
            Self::Assistant => "assistant",
            Self::CodeSearcher => "code_searcher",
            Self::UxDesignExpert => "ux_design_expert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "supervisor" => Some(Self::Supervisor),
            "architect" => Some(Self::Architect),
            "code_developer" | "developer" => Some(Self::CodeDeveloper),
            "project_manager" => Some(Self::ProjectManager),
            "assistant" => Some(Self::Assistant),
            "code_searcher" => Some(Self::CodeSearcher),
            "ux_design_expert" | "ux" => Some(Self::UxDesignExpert),
            _ => None,
        }
    }

    /// The six worker roles in launch-priority order. The architect launches
    /// first so specs exist before the developer's first tick.
    pub fn workers() -> [AgentRole; 6] {
        [
            Self::Architect,
            Self::CodeDeveloper,
            Self::ProjectManager,
            Self::Assistant,
            Self::CodeSearcher,
            Self::UxDesignExpert,
        ]
    }

    /// Launch order. Lower launches earlier; equal values launch in
    /// `workers()` order.
    pub fn launch_priority(&self) -> u8 {
        match self {
            Self::Supervisor => 0,
            Self::Architect => 1,
            Self::CodeDeveloper => 2,
            Self::ProjectManager | Self::Assistant => 3,
            Self::CodeSearcher | Self::UxDesignExpert => 4,
        }
    }

    /// Default sleep between ticks, tuned per role the way the original
    /// deployment ran them. Overridable via `[tick_interval]` in config.
    pub fn default_tick_interval(&self) -> Duration {
        match self {
            Self::Supervisor => Duration::from_secs(30),
            Self::Architect => Duration::from_secs(3600),
            Self::CodeDeveloper => Duration::from_secs(300),
            Self::ProjectManager => Duration::from_secs(900),
            Self::Assistant => Duration::from_secs(1800),
            Self::CodeSearcher => Duration::from_secs(86_400),
            Self::UxDesignExpert => Duration::from_secs(3600),
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        for role in AgentRole::workers() {
            assert_eq!(AgentRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(AgentRole::parse("supervisor"), Some(AgentRole::Supervisor));
        assert_eq!(AgentRole::parse("bartender"), None);
    }

    #[test]
    fn architect_launches_before_developer() {
        assert!(
            AgentRole::Architect.launch_priority() < AgentRole::CodeDeveloper.launch_priority()
        );
    }
}
