//! Health evaluation helpers for the supervisor's monitoring tick.

use serde::Serialize;
use uuid::Uuid;

/// Aggregate health of the team, worst condition wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Critical,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        }
    }
}

/// Classify one monitoring pass. Halted roles are critical; anything dead or
/// stale degrades the team; otherwise healthy.
pub fn classify(halted: usize, dead: usize, stale: usize) -> HealthState {
    if halted > 0 {
        HealthState::Critical
    } else if dead > 0 || stale > 0 {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    }
}

/// Identifier handed to the external bug tracker when a crash is filed.
pub fn new_report_id() -> String {
    format!("CRASH-{}", &Uuid::new_v4().to_string()[..8])
}
