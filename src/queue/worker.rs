//! Worker loop: take an operation id off the channel and drive it to a terminal state

use crate::credentials::{CredentialLease, FailureReport};
use crate::fetch::{FetchError, FetchRequest};
use crate::platform::AccountTarget;
use crate::queue::QueueInner;
use crate::state::{OperationOrigin, OperationState};
use crate::storage::{lock_storage, OperationRecord, Storage, StorageError, StorageResult};
use std::sync::Arc;
use tokio::sync::watch;

/// Runs one worker until shutdown is signaled
///
/// Shutdown is only observed between operations; an operation that has started is
/// always finished.
pub(crate) async fn run(id: usize, inner: Arc<QueueInner>, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!("Worker {} started", id);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = tokio::select! {
            next = receive(&inner) => next,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let Some(operation_id) = next else {
            break;
        };

        if let Err(e) = process_operation(&inner, &operation_id).await {
            tracing::error!("Worker {} failed on operation {}: {}", id, operation_id, e);
            abandon(&inner, &operation_id, &e.to_string());
        }
    }

    tracing::debug!("Worker {} stopped", id);
}

async fn receive(inner: &QueueInner) -> Option<String> {
    inner.receiver.lock().await.recv().await
}

/// Processes one operation end to end
///
/// Fetch failures are not errors here: they end as a `failed` operation. An error is
/// only returned when the operation could not be read or updated.
async fn process_operation(inner: &QueueInner, operation_id: &str) -> crate::Result<()> {
    let operation = {
        let mut storage = lock_storage(&inner.storage)?;
        let Some(operation) = storage.get_operation(operation_id)? else {
            tracing::warn!("Operation {} vanished before processing", operation_id);
            return Ok(());
        };
        if operation.state != OperationState::Queued {
            tracing::debug!(
                "Skipping operation {} already in state {}",
                operation_id,
                operation.state
            );
            return Ok(());
        }
        // Another process may claim the row between the read and the update
        match storage.mark_operation_processing(operation_id) {
            Ok(()) => {}
            Err(StorageError::InvalidTransition { from, .. }) => {
                tracing::debug!("Operation {} claimed elsewhere ({})", operation_id, from);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        operation
    };

    tracing::info!(
        "Processing operation {} ({} {})",
        operation_id,
        operation.platform,
        operation.account_url
    );

    let lease = match inner.pools.acquire(operation.platform) {
        Ok(lease) => lease,
        Err(e) => {
            tracing::error!("Operation {} failed: {}", operation_id, e);
            record_failure(inner, &operation, &e.to_string())?;
            return Ok(());
        }
    };

    let request = FetchRequest {
        target: AccountTarget {
            platform: operation.platform,
            username: operation.username.clone(),
            url: operation.account_url.clone(),
        },
        content_type: operation.content_type,
        max_items: operation.max_items,
        credential: lease.as_ref().map(|l| l.path().to_path_buf()),
        proxy: inner.config.fetch.proxy.clone(),
        headless: inner.config.fetch.headless,
    };

    match inner.dispatcher.fetch(&request).await {
        Ok(links) => {
            if let Some(lease) = lease {
                if let Err(e) = inner.pools.report_success(lease) {
                    tracing::warn!("Could not record credential success: {}", e);
                }
            }
            record_success(inner, &operation, &links)?;
            tracing::info!(
                "Operation {} completed with {} links",
                operation_id,
                links.len()
            );
        }
        Err(fetch_error) => {
            if let Some(lease) = lease {
                settle_failed_lease(inner, lease, &fetch_error);
            }
            record_failure(inner, &operation, &fetch_error.to_string())?;
            tracing::error!("Operation {} failed: {}", operation_id, fetch_error);
        }
    }

    Ok(())
}

fn settle_failed_lease(inner: &QueueInner, lease: CredentialLease, error: &FetchError) {
    if !error.counts_against_credential() {
        tracing::debug!(
            "Releasing credential {} without penalty ({})",
            lease.name(),
            error.kind
        );
        inner.pools.release(lease);
        return;
    }

    let platform = lease.platform();
    match inner.pools.report_failure(lease) {
        Ok(Some(FailureReport {
            name,
            consecutive_failures,
            burnt: true,
        })) => {
            tracing::error!(
                "Burnt {} credential {} after {} consecutive failures",
                platform,
                name,
                consecutive_failures
            );
        }
        Ok(Some(report)) => {
            tracing::warn!(
                "{} credential {} failed ({} consecutive)",
                platform,
                report.name,
                report.consecutive_failures
            );
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Could not record credential failure: {}", e),
    }
}

/// The managed account an operation's result belongs to, if any
///
/// Monitoring operations carry their account id. On-demand operations belong to a
/// managed account when their canonical URL matches one.
fn owning_account<S: Storage>(
    storage: &S,
    operation: &OperationRecord,
) -> StorageResult<Option<i64>> {
    let account = match (operation.origin, operation.account_id) {
        (OperationOrigin::Monitor, Some(id)) => storage.get_account(id)?,
        (OperationOrigin::Monitor, None) => None,
        (OperationOrigin::OnDemand, _) => storage.get_account_by_url(&operation.account_url)?,
    };
    Ok(account.map(|a| a.id))
}

fn record_success(
    inner: &QueueInner,
    operation: &OperationRecord,
    links: &[String],
) -> StorageResult<()> {
    let mut storage = lock_storage(&inner.storage)?;
    storage.complete_operation(&operation.operation_id, links)?;

    if let Some(account_id) = owning_account(&*storage, operation)? {
        let added = storage.merge_links(account_id, links)?;
        storage.record_check(account_id, None)?;
        if added > 0 {
            tracing::info!(
                "Found {} new links for {} ({})",
                added,
                operation.username,
                operation.platform
            );
        }
    }
    Ok(())
}

fn record_failure(
    inner: &QueueInner,
    operation: &OperationRecord,
    reason: &str,
) -> StorageResult<()> {
    let mut storage = lock_storage(&inner.storage)?;
    storage.fail_operation(&operation.operation_id, reason)?;

    if let Some(account_id) = owning_account(&*storage, operation)? {
        storage.record_check(account_id, Some(reason))?;
    }
    Ok(())
}

/// Best-effort failure of an operation whose processing hit an internal error
fn abandon(inner: &QueueInner, operation_id: &str, reason: &str) {
    let result = lock_storage(&inner.storage)
        .and_then(|mut storage| storage.fail_operation(operation_id, reason));
    if let Err(e) = result {
        tracing::debug!("Could not fail operation {}: {}", operation_id, e);
    }
}
