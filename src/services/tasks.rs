use anyhow::{Context, Result, bail};
use chrono::Utc;
use log::{error, info};
use uuid::Uuid;

use crate::errors::GitHubError;
use crate::models::integration::{Integration, IntegrationStatus, Provider};
use crate::models::scan::{Scan, ScanStatus};
use crate::services::github::{GitHubClient, TokenValidation};
use crate::services::orchestrator::ScanOrchestrator;
use crate::services::store::RecordStore;
use crate::services::trufflehog::SecretScanner;
use crate::utils::crypto::TokenCipher;

/// One unit of scan work, as handed to the task runtime. Drives the scan
/// state machine: in_progress before the orchestrator runs, completed only
/// when it returns cleanly, failed on preflight rejection or any error.
pub async fn run_scan_task<S: RecordStore, T: SecretScanner>(
    store: &S,
    scanner: &T,
    cipher: &impl TokenCipher,
    api_base_url: &str,
    scan_id: Uuid,
) -> Result<()> {
    info!("scan task received scan_id={}", scan_id);

    let mut scan = store
        .get_scan(scan_id)?
        .with_context(|| format!("scan {} not found", scan_id))?;
    scan.status = ScanStatus::InProgress;
    save_scan(store, &mut scan)?;

    // Once the scan is in_progress, every error path must still reach a
    // terminal status; a scan stuck non-terminal blocks its identity from
    // ever being scanned again.
    match execute_scan(store, scanner, cipher, api_base_url, &mut scan).await {
        Ok(()) => {
            scan.status = ScanStatus::Completed;
            scan.completed_at = Some(Utc::now());
            save_scan(store, &mut scan)?;
            info!("scan completed scan_id={}", scan_id);
            Ok(())
        }
        Err(e) => {
            error!("scan failed scan_id={} error={}", scan_id, e);
            fail_scan(store, &mut scan)?;
            Err(e)
        }
    }
}

/// Preflight plus orchestration for one in_progress scan. Integration state
/// is handled here; terminal scan status is the caller's.
async fn execute_scan<S: RecordStore, T: SecretScanner>(
    store: &S,
    scanner: &T,
    cipher: &impl TokenCipher,
    api_base_url: &str,
    scan: &mut Scan,
) -> Result<()> {
    let mut integration = store
        .find_integration(&scan.owner, Provider::Github)?
        .with_context(|| format!("no GitHub integration for owner {}", scan.owner))?;

    let token = integration.token(cipher)?;
    let github = GitHubClient::with_base_url(Some(token), api_base_url)?;

    // Preflight: fail fast on a dead credential before burning scanner
    // invocations against it.
    info!(
        "scan preflight validation scan_id={} integration_id={}",
        scan.id, integration.id
    );
    if let TokenValidation::Invalid { reason } = github.validate_token().await {
        error!(
            "scan preflight failed scan_id={} integration_id={} reason={}",
            scan.id, integration.id, reason
        );
        mark_integration_failed(store, &mut integration, &reason)?;
        bail!("GitHub token validation failed: {}", reason);
    }

    integration.last_validated_at = Some(Utc::now());
    store.save_integration(&integration)?;
    info!(
        "scan preflight passed scan_id={} integration_id={}",
        scan.id, integration.id
    );

    let orchestrator = ScanOrchestrator::new(&github, scanner, store);
    match orchestrator.run(scan).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if matches!(
                e.downcast_ref::<GitHubError>(),
                Some(GitHubError::AuthenticationFailed)
            ) {
                mark_integration_failed(
                    store,
                    &mut integration,
                    "GitHub token is invalid or expired",
                )?;
            }
            Err(e)
        }
    }
}

/// One unit of credential-validation work: pending while checking, then
/// connected or failed with the reason stored on the integration.
pub async fn run_validation_task<S: RecordStore>(
    store: &S,
    cipher: &impl TokenCipher,
    api_base_url: &str,
    integration_id: Uuid,
) -> Result<()> {
    info!("validation task received integration_id={}", integration_id);

    let mut integration = store
        .get_integration(integration_id)?
        .with_context(|| format!("integration {} not found", integration_id))?;
    integration.status = IntegrationStatus::Pending;
    store.save_integration(&integration)?;

    let token = integration.token(cipher)?;
    let github = GitHubClient::with_base_url(Some(token), api_base_url)?;

    match github.validate_token().await {
        TokenValidation::Valid => {
            integration.status = IntegrationStatus::Connected;
            integration.error_message.clear();
        }
        TokenValidation::Invalid { reason } => {
            integration.status = IntegrationStatus::Failed;
            integration.error_message = reason;
        }
    }

    integration.last_validated_at = Some(Utc::now());
    integration.updated_at = Utc::now();
    store.save_integration(&integration)?;

    info!(
        "validation task completed integration_id={} status={:?}",
        integration_id, integration.status
    );
    Ok(())
}

fn save_scan<S: RecordStore>(store: &S, scan: &mut Scan) -> Result<()> {
    scan.updated_at = Utc::now();
    store.save_scan(scan)
}

fn fail_scan<S: RecordStore>(store: &S, scan: &mut Scan) -> Result<()> {
    scan.status = ScanStatus::Failed;
    save_scan(store, scan)
}

fn mark_integration_failed<S: RecordStore>(
    store: &S,
    integration: &mut Integration,
    reason: &str,
) -> Result<()> {
    integration.status = IntegrationStatus::Failed;
    integration.error_message = reason.to_string();
    integration.last_validated_at = Some(Utc::now());
    integration.updated_at = Utc::now();
    store.save_integration(integration)
}
