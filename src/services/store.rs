use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::models::finding::Finding;
use crate::models::integration::{Integration, Provider};
use crate::models::scan::{RepoScanHistory, RepoScanStatus, Scan};
use crate::models::settings::SystemSettings;

/// Persistence collaborator with atomic single-row update semantics. The
/// orchestrator and task units are written against this seam; the real
/// database plugs in behind it.
pub trait RecordStore: Send + Sync {
    fn get_scan(&self, id: Uuid) -> Result<Option<Scan>>;
    fn save_scan(&self, scan: &Scan) -> Result<()>;

    fn create_finding(&self, finding: &Finding) -> Result<()>;
    fn findings_for_scan(&self, scan_id: Uuid) -> Result<Vec<Finding>>;
    /// `validated` is the one finding field that may change after creation.
    fn set_finding_validated(&self, id: Uuid, validated: bool) -> Result<()>;

    fn ignored_finding_types(&self) -> Result<Vec<String>>;
    fn ignored_email_domains(&self) -> Result<Vec<String>>;

    /// Get-or-create the singleton settings row; there is no delete.
    fn system_settings(&self) -> Result<SystemSettings>;

    fn upsert_history(&self, entry: &RepoScanHistory) -> Result<()>;
    /// Most recent completed history row for a repository, the one the
    /// recency filter consults.
    fn latest_completed_history(&self, repository: &str) -> Result<Option<RepoScanHistory>>;

    fn get_integration(&self, id: Uuid) -> Result<Option<Integration>>;
    fn find_integration(&self, owner: &str, provider: Provider) -> Result<Option<Integration>>;
    fn save_integration(&self, integration: &Integration) -> Result<()>;
}

/// In-memory store backing the tests and database-less embedders.
#[derive(Default)]
pub struct MemoryStore {
    scans: RwLock<HashMap<Uuid, Scan>>,
    findings: RwLock<Vec<Finding>>,
    ignore_types: RwLock<Vec<String>>,
    ignore_domains: RwLock<Vec<String>>,
    settings: RwLock<Option<SystemSettings>>,
    histories: RwLock<Vec<RepoScanHistory>>,
    integrations: RwLock<HashMap<Uuid, Integration>>,
}

/// Locks here are only poisoned if a writer panicked mid-update; surface
/// that as a store error rather than cascading the panic.
fn read_guard<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("store lock poisoned"))
}

fn write_guard<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("store lock poisoned"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ignored_type(&self, value: &str) -> Result<()> {
        let mut types = write_guard(&self.ignore_types)?;
        if !types.iter().any(|t| t == value) {
            types.push(value.to_string());
        }
        Ok(())
    }

    pub fn add_ignored_domain(&self, domain: &str) -> Result<()> {
        let mut domains = write_guard(&self.ignore_domains)?;
        if !domains.iter().any(|d| d == domain) {
            domains.push(domain.to_string());
        }
        Ok(())
    }

    pub fn set_system_settings(&self, settings: SystemSettings) -> Result<()> {
        *write_guard(&self.settings)? = Some(settings);
        Ok(())
    }

    pub fn histories_for(&self, repository: &str) -> Result<Vec<RepoScanHistory>> {
        Ok(read_guard(&self.histories)?
            .iter()
            .filter(|h| h.repository == repository)
            .cloned()
            .collect())
    }
}

impl RecordStore for MemoryStore {
    fn get_scan(&self, id: Uuid) -> Result<Option<Scan>> {
        Ok(read_guard(&self.scans)?.get(&id).cloned())
    }

    fn save_scan(&self, scan: &Scan) -> Result<()> {
        write_guard(&self.scans)?.insert(scan.id, scan.clone());
        Ok(())
    }

    fn create_finding(&self, finding: &Finding) -> Result<()> {
        write_guard(&self.findings)?.push(finding.clone());
        Ok(())
    }

    fn findings_for_scan(&self, scan_id: Uuid) -> Result<Vec<Finding>> {
        Ok(read_guard(&self.findings)?
            .iter()
            .filter(|f| f.scan_id == scan_id)
            .cloned()
            .collect())
    }

    fn set_finding_validated(&self, id: Uuid, validated: bool) -> Result<()> {
        let mut findings = write_guard(&self.findings)?;
        let finding = findings
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| anyhow!("finding {} not found", id))?;
        finding.validated = validated;
        finding.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn ignored_finding_types(&self) -> Result<Vec<String>> {
        Ok(read_guard(&self.ignore_types)?.clone())
    }

    fn ignored_email_domains(&self) -> Result<Vec<String>> {
        Ok(read_guard(&self.ignore_domains)?.clone())
    }

    fn system_settings(&self) -> Result<SystemSettings> {
        let mut guard = write_guard(&self.settings)?;
        Ok(guard.get_or_insert_with(SystemSettings::default).clone())
    }

    fn upsert_history(&self, entry: &RepoScanHistory) -> Result<()> {
        let mut histories = write_guard(&self.histories)?;
        match histories.iter_mut().find(|h| h.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => histories.push(entry.clone()),
        }
        Ok(())
    }

    fn latest_completed_history(&self, repository: &str) -> Result<Option<RepoScanHistory>> {
        Ok(read_guard(&self.histories)?
            .iter()
            .filter(|h| h.repository == repository && h.status == RepoScanStatus::Completed)
            .max_by_key(|h| h.completed_at.unwrap_or(h.created_at))
            .cloned())
    }

    fn get_integration(&self, id: Uuid) -> Result<Option<Integration>> {
        Ok(read_guard(&self.integrations)?.get(&id).cloned())
    }

    fn find_integration(&self, owner: &str, provider: Provider) -> Result<Option<Integration>> {
        Ok(read_guard(&self.integrations)?
            .values()
            .find(|i| i.owner == owner && i.provider == provider)
            .cloned())
    }

    fn save_integration(&self, integration: &Integration) -> Result<()> {
        write_guard(&self.integrations)?.insert(integration.id, integration.clone());
        Ok(())
    }
}

/// Builds a completed history row dated `days_ago`, for seeding recency
/// scenarios in tests.
#[cfg(test)]
pub(crate) fn completed_history(repository: &str, days_ago: i64) -> RepoScanHistory {
    let when = chrono::Utc::now() - chrono::Duration::days(days_ago);
    RepoScanHistory {
        id: Uuid::new_v4(),
        repository: repository.to_string(),
        status: RepoScanStatus::Completed,
        findings_count: 0,
        created_at: when,
        completed_at: Some(when),
    }
}
