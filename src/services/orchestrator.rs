use anyhow::Result;
use chrono::{Duration, Utc};
use log::{error, info, warn};
use std::collections::HashSet;

use crate::models::finding::{Finding, RawFinding};
use crate::models::repo::Repository;
use crate::models::scan::{RepoScanHistory, RepoScanStatus, Scan, ScanType};
use crate::models::settings::SystemSettings;
use crate::services::github::GitHubClient;
use crate::services::store::RecordStore;
use crate::services::trufflehog::SecretScanner;
use crate::utils::email::matches_ignored_domain;

/// Executes one full scan lifecycle: resolve candidates, filter them, run
/// the secret scanner per survivor, filter findings, and persist results and
/// per-repository history. Terminal scan status is the caller's job; this
/// returns normally or propagates a fatal accessor error.
pub struct ScanOrchestrator<'a, S: RecordStore, T: SecretScanner> {
    github: &'a GitHubClient,
    scanner: &'a T,
    store: &'a S,
}

impl<'a, S: RecordStore, T: SecretScanner> ScanOrchestrator<'a, S, T> {
    pub fn new(github: &'a GitHubClient, scanner: &'a T, store: &'a S) -> Self {
        Self {
            github,
            scanner,
            store,
        }
    }

    pub async fn run(&self, scan: &mut Scan) -> Result<()> {
        info!("scan run started scan_id={} type={:?} value={}", scan.id, scan.scan_type, scan.value);

        // Settings and ignore lists are captured once so a mid-scan change
        // cannot alter behavior partway through.
        let settings = self.store.system_settings()?;
        let ignore_types: HashSet<String> = self.store.ignored_finding_types()?.into_iter().collect();
        let ignore_domains = self.store.ignored_email_domains()?;

        let mut repositories = dedupe(self.resolve_repositories(scan).await?);

        if settings.org_repos_only {
            repositories.retain(Repository::is_organization_owned);
        }

        scan.total_repositories = repositories.len() as u64;
        self.save_scan(scan)?;

        info!(
            "scan candidates resolved scan_id={} total_repositories={}",
            scan.id, scan.total_repositories
        );

        for repo in &repositories {
            if self.recently_scanned(repo, &settings)? {
                info!(
                    "repository skipped as recently scanned scan_id={} repository={}",
                    scan.id, repo.full_name
                );
                let mut history = RepoScanHistory::started(&repo.full_name);
                history.finish(RepoScanStatus::Skipped, 0);
                self.store.upsert_history(&history)?;

                scan.ignored_repositories += 1;
                self.save_scan(scan)?;
                continue;
            }

            let mut history = RepoScanHistory::started(&repo.full_name);
            self.store.upsert_history(&history)?;

            match self
                .scanner
                .scan_repository(&repo.html_url, settings.verified_only)
                .await
            {
                Ok(raw_findings) => {
                    let kept = self.persist_findings(
                        scan,
                        repo,
                        raw_findings,
                        &ignore_types,
                        &ignore_domains,
                    )?;
                    history.finish(RepoScanStatus::Completed, kept);
                    self.store.upsert_history(&history)?;
                }
                Err(e) => {
                    // Fatal only to this repository; the scan carries on.
                    error!(
                        "repository scan failed scan_id={} repository={} error={}",
                        scan.id, repo.full_name, e
                    );
                    history.finish(RepoScanStatus::Failed, 0);
                    self.store.upsert_history(&history)?;
                }
            }

            scan.scanned_repositories += 1;
            self.save_scan(scan)?;
        }

        info!(
            "scan run completed scan_id={} scanned={} ignored={} findings={}",
            scan.id, scan.scanned_repositories, scan.ignored_repositories, scan.total_findings
        );
        Ok(())
    }

    async fn resolve_repositories(&self, scan: &Scan) -> Result<Vec<Repository>> {
        let repos = match scan.scan_type {
            ScanType::OrgRepos => self.github.get_org_repos(&scan.value).await?,
            ScanType::OrgUsers => self.github.get_org_members_repos(&scan.value).await?,
            ScanType::SearchCode => self.github.search_code(&scan.value).await?,
            ScanType::SearchCommits => self.github.search_commits(&scan.value).await?,
            ScanType::SearchIssues => self.github.search_issues(&scan.value).await?,
            ScanType::SearchRepos => self.github.search_repositories(&scan.value).await?,
            ScanType::SearchUsers => self.github.search_users(&scan.value).await?,
        };
        Ok(repos)
    }

    fn recently_scanned(&self, repo: &Repository, settings: &SystemSettings) -> Result<bool> {
        if settings.skip_recent_days <= 0 {
            return Ok(false);
        }

        let Some(history) = self.store.latest_completed_history(&repo.full_name)? else {
            return Ok(false);
        };
        let Some(completed_at) = history.completed_at else {
            return Ok(false);
        };

        Ok(Utc::now() - completed_at < Duration::days(settings.skip_recent_days))
    }

    /// Applies ignore rules per raw finding and persists survivors. Returns
    /// the kept-findings count for the repository's history row.
    fn persist_findings(
        &self,
        scan: &mut Scan,
        repo: &Repository,
        raw_findings: Vec<RawFinding>,
        ignore_types: &HashSet<String>,
        ignore_domains: &[String],
    ) -> Result<u64> {
        let mut kept = 0;

        for raw in &raw_findings {
            if self.is_ignored(raw, ignore_types, ignore_domains) {
                scan.ignored_findings += 1;
                continue;
            }

            self.store
                .create_finding(&Finding::from_raw(scan.id, repo, raw))?;
            scan.total_findings += 1;
            kept += 1;
        }

        Ok(kept)
    }

    fn is_ignored(
        &self,
        raw: &RawFinding,
        ignore_types: &HashSet<String>,
        ignore_domains: &[String],
    ) -> bool {
        if let Some(detector) = &raw.detector_type {
            if ignore_types.contains(detector) {
                warn!("finding ignored by type detector={}", detector);
                return true;
            }
        }

        if let Some(email) = &raw.email {
            if ignore_domains
                .iter()
                .any(|domain| matches_ignored_domain(email, domain))
            {
                warn!("finding ignored by committer domain email={}", email);
                return true;
            }
        }

        false
    }

    fn save_scan(&self, scan: &mut Scan) -> Result<()> {
        scan.updated_at = Utc::now();
        self.store.save_scan(scan)
    }
}

/// Deduplicates by owner/name identity, first occurrence winning. Runs
/// immediately after candidate resolution, before any filter, so a
/// repository reachable through two members is processed once.
fn dedupe(repositories: Vec<Repository>) -> Vec<Repository> {
    let mut seen = HashSet::new();
    repositories
        .into_iter()
        .filter(|repo| seen.insert(repo.identity()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ScannerError;
    use crate::models::repo::RepoOwner;
    use crate::models::scan::ScanStatus;
    use crate::services::store::{MemoryStore, completed_history};
    use mockito::{Matcher, Server, ServerGuard};
    use std::collections::HashMap;

    /// Canned scanner keyed by repository URL. Unknown URLs yield nothing;
    /// URLs mapped to `None` fail with an engine error.
    struct StubScanner {
        responses: HashMap<String, Option<Vec<RawFinding>>>,
    }

    impl StubScanner {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
            }
        }

        fn with_findings(mut self, url: &str, findings: Vec<RawFinding>) -> Self {
            self.responses.insert(url.to_string(), Some(findings));
            self
        }

        fn with_failure(mut self, url: &str) -> Self {
            self.responses.insert(url.to_string(), None);
            self
        }
    }

    impl SecretScanner for StubScanner {
        async fn scan_repository(
            &self,
            repository_url: &str,
            _only_verified: bool,
        ) -> Result<Vec<RawFinding>, ScannerError> {
            match self.responses.get(repository_url) {
                Some(Some(findings)) => Ok(findings.clone()),
                Some(None) => Err(ScannerError::Engine {
                    status: "exit status: 2".to_string(),
                    stderr: "boom".to_string(),
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    fn raw_finding(detector: &str, email: &str) -> RawFinding {
        RawFinding {
            repository: Some("https://github.com/acme/api".to_string()),
            commit: Some("abc123".to_string()),
            file: Some("settings.py".to_string()),
            line: Some(3),
            email: Some(email.to_string()),
            detector_type: Some(detector.to_string()),
            description: Some("detected credential".to_string()),
            value: Some("s3cret".to_string()),
        }
    }

    fn repo_json(owner: &str, name: &str, owner_type: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "full_name": format!("{}/{}", owner, name),
            "html_url": format!("https://github.com/{}/{}", owner, name),
            "owner": {"login": owner, "type": owner_type}
        })
    }

    async fn org_repos_server(repos: Vec<serde_json::Value>) -> ServerGuard {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/orgs/acme/repos")
            .match_query(Matcher::Any)
            .with_body(serde_json::to_string(&repos).unwrap())
            .create_async()
            .await;
        server
    }

    fn in_progress_scan(store: &MemoryStore) -> Scan {
        let mut scan = Scan::new("alice", ScanType::OrgRepos, "acme");
        scan.status = ScanStatus::InProgress;
        store.save_scan(&scan).unwrap();
        scan
    }

    #[tokio::test]
    async fn scans_all_repositories_and_accumulates_counters() {
        let server = org_repos_server(vec![
            repo_json("acme", "api", "Organization"),
            repo_json("acme", "web", "Organization"),
        ])
        .await;
        let store = MemoryStore::new();
        let mut scan = in_progress_scan(&store);

        let scanner = StubScanner::new()
            .with_findings(
                "https://github.com/acme/api",
                vec![
                    raw_finding("AWS", "a@acme.com"),
                    raw_finding("Slack", "b@acme.com"),
                    raw_finding("Github", "c@acme.com"),
                ],
            )
            .with_findings(
                "https://github.com/acme/web",
                vec![
                    raw_finding("AWS", "a@acme.com"),
                    raw_finding("AWS", "b@acme.com"),
                    raw_finding("AWS", "c@acme.com"),
                    raw_finding("AWS", "d@acme.com"),
                    raw_finding("AWS", "e@acme.com"),
                ],
            );

        let github = GitHubClient::with_base_url(Some("t".into()), &server.url()).unwrap();
        ScanOrchestrator::new(&github, &scanner, &store)
            .run(&mut scan)
            .await
            .unwrap();

        assert_eq!(scan.total_repositories, 2);
        assert_eq!(scan.scanned_repositories, 2);
        assert_eq!(scan.ignored_repositories, 0);
        assert_eq!(scan.total_findings, 8);
        assert_eq!(scan.ignored_findings, 0);
        assert_eq!(store.findings_for_scan(scan.id).unwrap().len(), 8);

        for repo in ["acme/api", "acme/web"] {
            let latest = store.latest_completed_history(repo).unwrap().unwrap();
            assert_eq!(latest.status, RepoScanStatus::Completed);
        }
    }

    #[tokio::test]
    async fn duplicate_candidates_are_processed_once() {
        let server = org_repos_server(vec![
            repo_json("acme", "api", "Organization"),
            repo_json("Acme", "API", "Organization"),
        ])
        .await;
        let store = MemoryStore::new();
        let mut scan = in_progress_scan(&store);
        let scanner = StubScanner::new()
            .with_findings("https://github.com/acme/api", vec![raw_finding("AWS", "a@acme.com")]);

        let github = GitHubClient::with_base_url(Some("t".into()), &server.url()).unwrap();
        ScanOrchestrator::new(&github, &scanner, &store)
            .run(&mut scan)
            .await
            .unwrap();

        assert_eq!(scan.total_repositories, 1);
        assert_eq!(scan.scanned_repositories, 1);
        assert_eq!(scan.total_findings, 1);
    }

    #[tokio::test]
    async fn org_repos_only_drops_user_owned_candidates() {
        let server = org_repos_server(vec![
            repo_json("acme", "api", "Organization"),
            repo_json("bob", "web", "User"),
        ])
        .await;
        let store = MemoryStore::new();
        store
            .set_system_settings(SystemSettings {
                org_repos_only: true,
                ..SystemSettings::default()
            })
            .unwrap();
        let mut scan = in_progress_scan(&store);
        let scanner = StubScanner::new();

        let github = GitHubClient::with_base_url(Some("t".into()), &server.url()).unwrap();
        ScanOrchestrator::new(&github, &scanner, &store)
            .run(&mut scan)
            .await
            .unwrap();

        assert_eq!(scan.total_repositories, 1);
        assert_eq!(scan.scanned_repositories, 1);
        assert!(store.histories_for("bob/web").unwrap().is_empty());
        assert_eq!(store.histories_for("acme/api").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recently_scanned_repository_is_skipped() {
        let server = org_repos_server(vec![
            repo_json("acme", "recent", "Organization"),
            repo_json("acme", "stale", "Organization"),
        ])
        .await;
        let store = MemoryStore::new();
        store
            .upsert_history(&completed_history("acme/recent", 3))
            .unwrap();
        store
            .upsert_history(&completed_history("acme/stale", 20))
            .unwrap();

        let mut scan = in_progress_scan(&store);
        let scanner = StubScanner::new()
            .with_findings("https://github.com/acme/stale", vec![raw_finding("AWS", "a@acme.com")]);

        let github = GitHubClient::with_base_url(Some("t".into()), &server.url()).unwrap();
        ScanOrchestrator::new(&github, &scanner, &store)
            .run(&mut scan)
            .await
            .unwrap();

        // skip_recent_days defaults to 15: 3 days ago is skipped, 20 days
        // ago is scanned.
        assert_eq!(scan.total_repositories, 2);
        assert_eq!(scan.ignored_repositories, 1);
        assert_eq!(scan.scanned_repositories, 1);
        assert_eq!(scan.total_findings, 1);

        let recent_rows = store.histories_for("acme/recent").unwrap();
        assert!(
            recent_rows
                .iter()
                .any(|h| h.status == RepoScanStatus::Skipped)
        );
    }

    #[tokio::test]
    async fn zero_skip_recent_days_disables_recency_filter() {
        let server = org_repos_server(vec![repo_json("acme", "api", "Organization")]).await;
        let store = MemoryStore::new();
        store
            .set_system_settings(SystemSettings {
                skip_recent_days: 0,
                ..SystemSettings::default()
            })
            .unwrap();
        store
            .upsert_history(&completed_history("acme/api", 1))
            .unwrap();

        let mut scan = in_progress_scan(&store);
        let scanner = StubScanner::new();

        let github = GitHubClient::with_base_url(Some("t".into()), &server.url()).unwrap();
        ScanOrchestrator::new(&github, &scanner, &store)
            .run(&mut scan)
            .await
            .unwrap();

        assert_eq!(scan.ignored_repositories, 0);
        assert_eq!(scan.scanned_repositories, 1);
    }

    #[tokio::test]
    async fn ignore_rules_filter_findings() {
        let server = org_repos_server(vec![repo_json("acme", "api", "Organization")]).await;
        let store = MemoryStore::new();
        store.add_ignored_type("Slack").unwrap();
        store.add_ignored_domain("example.com").unwrap();

        let mut scan = in_progress_scan(&store);
        let scanner = StubScanner::new().with_findings(
            "https://github.com/acme/api",
            vec![
                raw_finding("AWS", "dev@acme.com"),
                raw_finding("Slack", "dev@acme.com"),
                raw_finding("AWS", "User@sub.EXAMPLE.com"),
            ],
        );

        let github = GitHubClient::with_base_url(Some("t".into()), &server.url()).unwrap();
        ScanOrchestrator::new(&github, &scanner, &store)
            .run(&mut scan)
            .await
            .unwrap();

        assert_eq!(scan.total_findings, 1);
        assert_eq!(scan.ignored_findings, 2);

        let persisted = store.findings_for_scan(scan.id).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].detector_type, "AWS");
        assert_eq!(persisted[0].email, "dev@acme.com");

        let history = store.latest_completed_history("acme/api").unwrap().unwrap();
        assert_eq!(history.findings_count, 1);
    }

    #[tokio::test]
    async fn one_failing_repository_does_not_abort_the_scan() {
        let server = org_repos_server(vec![
            repo_json("acme", "good", "Organization"),
            repo_json("acme", "bad", "Organization"),
            repo_json("acme", "empty", "Organization"),
        ])
        .await;
        let store = MemoryStore::new();
        let mut scan = in_progress_scan(&store);

        let scanner = StubScanner::new()
            .with_findings("https://github.com/acme/good", vec![raw_finding("AWS", "a@acme.com")])
            .with_failure("https://github.com/acme/bad");

        let github = GitHubClient::with_base_url(Some("t".into()), &server.url()).unwrap();
        ScanOrchestrator::new(&github, &scanner, &store)
            .run(&mut scan)
            .await
            .unwrap();

        assert_eq!(scan.total_repositories, 3);
        assert_eq!(scan.scanned_repositories, 3);
        assert_eq!(scan.total_findings, 1);

        let bad_rows = store.histories_for("acme/bad").unwrap();
        assert!(bad_rows.iter().any(|h| h.status == RepoScanStatus::Failed));
        // A timed-out engine reports an empty batch, which completes with
        // zero findings rather than failing.
        let empty = store.latest_completed_history("acme/empty").unwrap().unwrap();
        assert_eq!(empty.findings_count, 0);
    }

    #[tokio::test]
    async fn fatal_accessor_error_propagates() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/orgs/acme/repos")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let store = MemoryStore::new();
        let mut scan = in_progress_scan(&store);
        let scanner = StubScanner::new();

        let github = GitHubClient::with_base_url(Some("bad".into()), &server.url()).unwrap();
        let err = ScanOrchestrator::new(&github, &scanner, &store)
            .run(&mut scan)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<crate::errors::GitHubError>(),
            Some(crate::errors::GitHubError::AuthenticationFailed)
        ));
        // No repository work happened.
        assert_eq!(scan.scanned_repositories, 0);
        assert!(store.findings_for_scan(scan.id).unwrap().is_empty());
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let a = Repository {
            name: "api".to_string(),
            full_name: "acme/api".to_string(),
            html_url: "https://github.com/acme/api".to_string(),
            owner: RepoOwner {
                login: "acme".to_string(),
                kind: Some("Organization".to_string()),
            },
        };
        let mut b = a.clone();
        b.full_name = "ACME/api".to_string();
        let deduped = dedupe(vec![a, b]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].full_name, "acme/api");
    }
}
