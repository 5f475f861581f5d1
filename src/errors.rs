use reqwest::StatusCode;
use thiserror::Error;

/// The two independently throttled GitHub quota pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPool {
    Core,
    Search,
}

impl RateLimitPool {
    /// Core quota resets hourly and exhaustion is rare; search quota is
    /// minute-scale and throttling during pagination is routine, so its
    /// retry budget is much larger.
    pub fn max_retries(&self) -> u32 {
        match self {
            RateLimitPool::Core => 3,
            RateLimitPool::Search => 20,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitPool::Core => "core",
            RateLimitPool::Search => "search",
        }
    }
}

impl std::fmt::Display for RateLimitPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by the GitHub accessor. All of these abort the scan that
/// triggered them; none are retried beyond the rate-limit budget.
#[derive(Error, Debug)]
pub enum GitHubError {
    #[error("GitHub token is invalid or unauthorized")]
    AuthenticationFailed,

    #[error("GitHub {pool} API rate limit retry max reached")]
    RateLimitExhausted { pool: RateLimitPool },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("GitHub API error: {status}")]
    Api { status: StatusCode },
}

/// Failures from the external secret-detection engine. Fatal only to the
/// repository being scanned; a timeout is not an error (the scanner returns
/// an empty batch instead).
#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("failed to launch secret-detection engine: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("secret-detection engine exited with {status}: {stderr}")]
    Engine { status: String, stderr: String },
}
