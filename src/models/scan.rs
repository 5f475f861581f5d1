use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the candidate repository set for a scan is resolved.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    /// Repositories owned by an organization.
    OrgRepos,
    /// Repositories of every member of an organization.
    OrgUsers,
    SearchCode,
    SearchCommits,
    SearchIssues,
    SearchRepos,
    /// User search; each matched user fans out into their repositories.
    SearchUsers,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

/// One user-initiated scan of a target. Counters are written only by the
/// orchestrator while the scan is non-terminal.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Scan {
    pub id: Uuid,
    pub owner: String,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub value: String,
    pub status: ScanStatus,

    pub total_repositories: u64,
    pub scanned_repositories: u64,
    pub ignored_repositories: u64,
    pub total_findings: u64,
    pub ignored_findings: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Scan {
    pub fn new(owner: &str, scan_type: ScanType, value: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            scan_type,
            value: value.to_string(),
            status: ScanStatus::Queued,
            total_repositories: 0,
            scanned_repositories: 0,
            ignored_repositories: 0,
            total_findings: 0,
            ignored_findings: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Per-repository record of a scan outcome, consulted by the recency filter.
/// Only `completed` rows refresh the recency window.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RepoScanHistory {
    pub id: Uuid,
    pub repository: String,
    pub status: RepoScanStatus,
    pub findings_count: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepoScanStatus {
    Started,
    Completed,
    Failed,
    Skipped,
}

impl RepoScanHistory {
    pub fn started(repository: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository: repository.to_string(),
            status: RepoScanStatus::Started,
            findings_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn finish(&mut self, status: RepoScanStatus, findings_count: u64) {
        self.status = status;
        self.findings_count = findings_count;
        self.completed_at = Some(Utc::now());
    }
}
