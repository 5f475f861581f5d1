//! Secret-scanning orchestration core: resolves candidate repositories from
//! GitHub, filters them against ignore rules and scan-recency policy, runs
//! trufflehog against each survivor, and persists findings and per-repository
//! history. The HTTP surface, database, and task queue are collaborators
//! plugged in behind the `RecordStore`, `TokenCipher`, and task-unit seams.

pub mod errors;
pub mod models;
pub mod services;
pub mod utils;

pub use errors::{GitHubError, RateLimitPool, ScannerError};
pub use models::finding::{Finding, IgnoreFindingDomain, IgnoreFindingType, RawFinding};
pub use models::integration::{Integration, IntegrationStatus, Provider};
pub use models::repo::Repository;
pub use models::scan::{RepoScanHistory, RepoScanStatus, Scan, ScanStatus, ScanType};
pub use models::settings::SystemSettings;
pub use services::github::{GitHubClient, TokenValidation};
pub use services::orchestrator::ScanOrchestrator;
pub use services::store::{MemoryStore, RecordStore};
pub use services::tasks::{run_scan_task, run_validation_task};
pub use services::trufflehog::{SecretScanner, TruffleHogClient};
pub use utils::crypto::{Base64Cipher, TokenCipher};
