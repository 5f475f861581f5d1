use serde::{Deserialize, Serialize};

/// Process-wide scanning configuration. The record store holds exactly one
/// row of this and never deletes it; the orchestrator captures a copy once
/// per scan invocation so a mid-scan settings change cannot alter behavior.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemSettings {
    /// Skip repositories whose last completed scan is within this many days.
    /// Zero disables the recency filter.
    pub skip_recent_days: i64,
    /// Ask the engine for verified secrets only.
    pub verified_only: bool,
    /// Drop candidates not owned by an organization.
    pub org_repos_only: bool,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            skip_recent_days: 15,
            verified_only: true,
            org_repos_only: false,
        }
    }
}
