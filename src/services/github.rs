use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK, USER_AGENT};
use serde_json::Value;
use std::time::Duration;

use crate::errors::{GitHubError, RateLimitPool};
use crate::models::repo::Repository;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const PER_PAGE: &str = "100";

/// Inter-page delay for code search, whose quota is the tightest of the
/// search pool.
const CODE_SEARCH_PAGE_DELAY: Duration = Duration::from_secs(10);

lazy_static! {
    static ref NEXT_LINK_REGEX: Regex = Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).unwrap();
}

/// Outcome of a preflight credential check. Invalid carries a message fit
/// for the integration's error_message field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidation {
    Valid,
    Invalid { reason: String },
}

/// Authenticated GitHub client used to resolve candidate repositories for a
/// scan. Stateless beyond the held credential: rate-limit recovery happens
/// inside each request, pagination inside each operation.
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self, GitHubError> {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: Option<String>, base_url: &str) -> Result<Self, GitHubError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("secret-sweep"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        if let Some(t) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", t))
                .map_err(|_| GitHubError::AuthenticationFailed)?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Executes one GET with bounded rate-limit recovery, returning the
    /// parsed body and the `rel="next"` page URL if any. A 401 fails
    /// immediately; a rate-limited 403 sleeps until the reported reset and
    /// retries, up to the budget of whichever pool throttled us.
    async fn request(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<(Value, Option<String>), GitHubError> {
        let mut retries: u32 = 0;

        loop {
            info!("github request started method=GET url={} retries={}", url, retries);

            let mut builder = self.client.get(url);
            if !params.is_empty() {
                builder = builder.query(params);
            }
            let response = builder.send().await.map_err(|e| {
                error!("github request error url={} error={}", url, e);
                GitHubError::Network(e)
            })?;

            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                error!("github authentication failed url={}", url);
                return Err(GitHubError::AuthenticationFailed);
            }

            if status == StatusCode::FORBIDDEN && rate_limit_remaining_is_zero(response.headers()) {
                let pool = throttled_pool(response.headers());
                warn!(
                    "github {} rate limit exceeded url={} retries={}",
                    pool, url, retries
                );

                if retries >= pool.max_retries() {
                    return Err(GitHubError::RateLimitExhausted { pool });
                }

                self.sleep_until_reset(response.headers()).await;
                retries += 1;
                continue;
            }

            if !status.is_success() {
                error!("github api error url={} status={}", url, status);
                return Err(GitHubError::Api { status });
            }

            let next = next_page_url(response.headers());
            let body: Value = response.json().await?;

            info!("github request completed method=GET url={} status={}", url, status);
            return Ok((body, next));
        }
    }

    async fn sleep_until_reset(&self, headers: &HeaderMap) {
        let reset = headers
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let wait = (reset - Utc::now().timestamp()).max(0) as u64;

        warn!("github rate limit hit sleeping_seconds={}", wait);
        tokio::time::sleep(Duration::from_secs(wait)).await;
    }

    /// Follows `next` links until absent, accumulating array bodies.
    /// `per_page` is sent on the first request only; next links carry their
    /// own query string.
    async fn get_all_pages(&self, url: &str) -> Result<Vec<Value>, GitHubError> {
        let mut results = Vec::new();
        let mut page_url = url.to_string();
        let mut first = true;

        loop {
            let params: Vec<(&str, &str)> = if first {
                vec![("per_page", PER_PAGE)]
            } else {
                Vec::new()
            };
            let (body, next) = self.request(&page_url, &params).await?;
            first = false;

            if let Value::Array(items) = body {
                results.extend(items);
            }

            match next {
                Some(n) => page_url = n,
                None => return Ok(results),
            }
        }
    }

    /// Search variant: items live in the envelope's `items` field, and an
    /// optional delay is slept between pages to stay under the search pool's
    /// tighter quota.
    async fn search_all_pages(
        &self,
        url: &str,
        query: &str,
        delay: Duration,
    ) -> Result<Vec<Value>, GitHubError> {
        let mut results = Vec::new();
        let mut page_url = url.to_string();
        let mut first = true;

        loop {
            let params: Vec<(&str, &str)> = if first {
                vec![("q", query), ("per_page", PER_PAGE)]
            } else {
                Vec::new()
            };
            let (body, next) = self.request(&page_url, &params).await?;
            first = false;

            if let Some(Value::Array(items)) = body.get("items").cloned() {
                results.extend(items);
            }

            match next {
                Some(n) => {
                    if !delay.is_zero() {
                        debug!("github search page delay sleeping_seconds={}", delay.as_secs());
                        tokio::time::sleep(delay).await;
                    }
                    page_url = n;
                }
                None => return Ok(results),
            }
        }
    }

    fn repositories_from(items: Vec<Value>) -> Vec<Repository> {
        items
            .iter()
            .filter_map(Repository::from_search_item)
            .collect()
    }

    /// Repositories owned by an organization.
    pub async fn get_org_repos(&self, org: &str) -> Result<Vec<Repository>, GitHubError> {
        info!("get_org_repos started org={}", org);
        let url = format!("{}/orgs/{}/repos", self.base_url, org);
        let repos = Self::repositories_from(self.get_all_pages(&url).await?);
        info!("get_org_repos completed org={} repo_count={}", org, repos.len());
        Ok(repos)
    }

    /// Logins of an organization's members.
    pub async fn get_org_members(&self, org: &str) -> Result<Vec<String>, GitHubError> {
        info!("get_org_members started org={}", org);
        let url = format!("{}/orgs/{}/members", self.base_url, org);
        let members = self.get_all_pages(&url).await?;
        let logins: Vec<String> = members
            .iter()
            .filter_map(|m| m.get("login").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        info!("get_org_members completed org={} member_count={}", org, logins.len());
        Ok(logins)
    }

    /// All repositories of one user.
    pub async fn get_user_repos(&self, username: &str) -> Result<Vec<Repository>, GitHubError> {
        info!("get_user_repos started username={}", username);
        let url = format!("{}/users/{}/repos", self.base_url, username);
        let repos = Self::repositories_from(self.get_all_pages(&url).await?);
        info!(
            "get_user_repos completed username={} repo_count={}",
            username,
            repos.len()
        );
        Ok(repos)
    }

    /// Repositories of every member of an organization, concatenated in
    /// member order.
    pub async fn get_org_members_repos(&self, org: &str) -> Result<Vec<Repository>, GitHubError> {
        info!("get_org_members_repos started org={}", org);
        let mut repositories = Vec::new();

        for username in self.get_org_members(org).await? {
            repositories.extend(self.get_user_repos(&username).await?);
        }

        info!(
            "get_org_members_repos completed org={} repo_count={}",
            org,
            repositories.len()
        );
        Ok(repositories)
    }

    /// Repositories surfaced by code search for a query.
    pub async fn search_code(&self, query: &str) -> Result<Vec<Repository>, GitHubError> {
        info!("search_code started query={}", query);
        let url = format!("{}/search/code", self.base_url);
        let repos = Self::repositories_from(
            self.search_all_pages(&url, query, CODE_SEARCH_PAGE_DELAY)
                .await?,
        );
        info!("search_code completed query={} repo_count={}", query, repos.len());
        Ok(repos)
    }

    /// Repositories surfaced by commit search for a query.
    pub async fn search_commits(&self, query: &str) -> Result<Vec<Repository>, GitHubError> {
        info!("search_commits started query={}", query);
        let url = format!("{}/search/commits", self.base_url);
        let repos =
            Self::repositories_from(self.search_all_pages(&url, query, Duration::ZERO).await?);
        info!("search_commits completed query={} repo_count={}", query, repos.len());
        Ok(repos)
    }

    /// Repositories surfaced by issue search for a query.
    pub async fn search_issues(&self, query: &str) -> Result<Vec<Repository>, GitHubError> {
        info!("search_issues started query={}", query);
        let url = format!("{}/search/issues", self.base_url);
        let repos =
            Self::repositories_from(self.search_all_pages(&url, query, Duration::ZERO).await?);
        info!("search_issues completed query={} repo_count={}", query, repos.len());
        Ok(repos)
    }

    /// Repository search for a query.
    pub async fn search_repositories(&self, query: &str) -> Result<Vec<Repository>, GitHubError> {
        info!("search_repositories started query={}", query);
        let url = format!("{}/search/repositories", self.base_url);
        let repos =
            Self::repositories_from(self.search_all_pages(&url, query, Duration::ZERO).await?);
        info!(
            "search_repositories completed query={} repo_count={}",
            query,
            repos.len()
        );
        Ok(repos)
    }

    /// User search; every matched user fans out into that user's
    /// repositories.
    pub async fn search_users(&self, query: &str) -> Result<Vec<Repository>, GitHubError> {
        info!("search_users started query={}", query);
        let url = format!("{}/search/users", self.base_url);
        let users = self.search_all_pages(&url, query, Duration::ZERO).await?;

        let mut repositories = Vec::new();
        for login in users
            .iter()
            .filter_map(|u| u.get("login").and_then(Value::as_str))
        {
            repositories.extend(self.get_user_repos(login).await?);
        }

        info!(
            "search_users completed query={} repo_count={}",
            query,
            repositories.len()
        );
        Ok(repositories)
    }

    /// Preflight credential check against the authenticated-user endpoint.
    /// Never retries; a dead credential should fail fast, before any
    /// repository work is queued behind it.
    pub async fn validate_token(&self) -> TokenValidation {
        let url = format!("{}/user", self.base_url);

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("token validation network error: {}", e);
                return TokenValidation::Invalid {
                    reason: format!("Network error: {}", e),
                };
            }
        };

        match response.status() {
            StatusCode::OK => TokenValidation::Valid,
            StatusCode::UNAUTHORIZED => TokenValidation::Invalid {
                reason: "Token is invalid or expired".to_string(),
            },
            StatusCode::FORBIDDEN => TokenValidation::Invalid {
                reason: "Token lacks required permissions".to_string(),
            },
            status => TokenValidation::Invalid {
                reason: format!("GitHub API error: {}", status),
            },
        }
    }
}

fn rate_limit_remaining_is_zero(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0")
}

fn throttled_pool(headers: &HeaderMap) -> RateLimitPool {
    match headers.get("x-ratelimit-resource").and_then(|v| v.to_str().ok()) {
        Some("search") => RateLimitPool::Search,
        _ => RateLimitPool::Core,
    }
}

fn next_page_url(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    NEXT_LINK_REGEX
        .captures(link)
        .map(|caps| caps[1].to_string())
}
