//! Operation queue
//!
//! This module accepts fetch requests and drains them through a fixed worker pool:
//! - Submission resolves the account, persists a `queued` operation and pushes its id
//!   into a bounded FIFO channel
//! - Workers share the receiving end and process one operation at a time each
//! - Clients poll an operation id for its current status
//! - Every queue registers an instance id and owns the operations it enqueues; a
//!   heartbeat keeps the registration alive
//! - Operations whose owner is gone are adopted: queued ones are re-enqueued and
//!   interrupted ones are failed

mod heartbeat;
mod worker;

use crate::config::Config;
use crate::credentials::CredentialPools;
use crate::fetch::FetchDispatcher;
use crate::platform::{resolve_account, AccountTarget, ContentKind, Platform};
use crate::state::{OperationOrigin, OperationState};
use crate::storage::{
    lock_storage, AccountRecord, NewOperation, SqliteStorage, Storage, StorageError,
};
use crate::{LinkscoutError, Result, ValidationError};
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Upper bound on the links a single request may ask for
pub const MAX_ITEMS_LIMIT: usize = 200;

/// Reason stored on operations that were processing when the process stopped
pub const INTERRUPTED_REASON: &str = "interrupted before completion";

/// Reason stored on operations whose submission was abandoned before they were queued
pub const CANCELLED_REASON: &str = "cancelled before it was queued";

/// How often a running queue refreshes its heartbeat and looks for orphaned operations
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Heartbeat age after which another instance is presumed dead
pub const INSTANCE_STALE_AFTER_SECS: i64 = 30;

/// Per-request options
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    /// YouTube only: which channel tab to read
    pub content_type: Option<ContentKind>,
    /// Number of links to return (1 to 200)
    pub max_items: Option<usize>,
}

impl SubmitOptions {
    /// Checks the options against the target platform
    pub fn validate(&self, platform: Platform) -> std::result::Result<(), ValidationError> {
        if let Some(max_items) = self.max_items {
            if !(1..=MAX_ITEMS_LIMIT).contains(&max_items) {
                return Err(ValidationError::InvalidOption(format!(
                    "max_items must be between 1 and {}, got {}",
                    MAX_ITEMS_LIMIT, max_items
                )));
            }
        }

        if self.content_type.is_some() && platform != Platform::YouTube {
            return Err(ValidationError::InvalidOption(format!(
                "content_type is only supported for youtube, not {}",
                platform
            )));
        }

        Ok(())
    }
}

/// What a client sees when polling an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    /// Still queued or processing
    InProgress { state: OperationState },
    Completed {
        platform: Platform,
        account_url: String,
        username: String,
        links: Vec<String>,
    },
    Failed { reason: String },
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress { .. })
    }
}

/// What adopting orphaned operations did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub interrupted: usize,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.interrupted == 0
    }
}

struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    heartbeat: JoinHandle<()>,
}

pub(crate) struct QueueInner {
    instance_id: String,
    pub(crate) storage: Arc<Mutex<SqliteStorage>>,
    pub(crate) pools: CredentialPools,
    pub(crate) dispatcher: Arc<FetchDispatcher>,
    pub(crate) config: Arc<Config>,
    sender: mpsc::Sender<String>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<String>>,
    workers: Mutex<Option<WorkerPool>>,
}

/// Asynchronous operation queue with a fixed worker pool
///
/// Cloning is cheap; every clone feeds the same channel and workers.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

impl OperationQueue {
    /// Creates a queue; no workers run until `start_workers` is called
    ///
    /// # Arguments
    ///
    /// * `storage` - Shared result store
    /// * `pools` - Credential pools leased by workers
    /// * `dispatcher` - Fetch back-ends
    /// * `config` - Worker, fetch and per-platform settings
    pub fn new(
        storage: Arc<Mutex<SqliteStorage>>,
        pools: CredentialPools,
        dispatcher: Arc<FetchDispatcher>,
        config: Arc<Config>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.worker.queue_capacity.max(1));

        Self {
            inner: Arc::new(QueueInner {
                instance_id: uuid::Uuid::new_v4().to_string(),
                storage,
                pools,
                dispatcher,
                config,
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
                workers: Mutex::new(None),
            }),
        }
    }

    /// Id under which this queue owns its operations in storage
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Submits an on-demand fetch for a free-form account identifier
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The new operation id; the fetch runs in the background
    /// * `Err(LinkscoutError::Validation)` - Bad identifier, bad options or no back-end
    pub async fn submit(&self, identifier: &str, options: SubmitOptions) -> Result<String> {
        let target = resolve_account(identifier)?;
        self.enqueue(target, options, OperationOrigin::OnDemand, None)
            .await
    }

    /// Submits a monitoring fetch for a managed account
    pub async fn submit_for_account(&self, account: &AccountRecord) -> Result<String> {
        self.enqueue(
            account.target(),
            SubmitOptions::default(),
            OperationOrigin::Monitor,
            Some(account.id),
        )
        .await
    }

    async fn enqueue(
        &self,
        target: AccountTarget,
        options: SubmitOptions,
        origin: OperationOrigin,
        account_id: Option<i64>,
    ) -> Result<String> {
        let platform = target.platform;
        options.validate(platform)?;
        if !self.inner.dispatcher.supports(platform) {
            return Err(ValidationError::NoBackend(platform).into());
        }

        let config = &self.inner.config;
        let operation = NewOperation {
            operation_id: uuid::Uuid::new_v4().to_string(),
            platform,
            account_url: target.url,
            username: target.username,
            origin,
            account_id,
            content_type: options
                .content_type
                .unwrap_or_else(|| config.content_type_for(platform)),
            max_items: options
                .max_items
                .unwrap_or_else(|| config.max_items_for(platform)),
            owner: Some(self.inner.instance_id.clone()),
        };

        {
            let mut storage = lock_storage(&self.inner.storage)?;
            storage.touch_instance(&self.inner.instance_id)?;
            storage.insert_operation(&operation)?;
        }

        tracing::debug!(
            "Queued {} operation {} for {}",
            origin,
            operation.operation_id,
            operation.account_url
        );

        let pushed = {
            let mut pending = PendingPush {
                inner: &self.inner,
                operation_id: &operation.operation_id,
                settled: false,
            };
            let pushed = self.inner.push(operation.operation_id.clone()).await;
            pending.settled = true;
            pushed
        };
        pushed?;

        Ok(operation.operation_id)
    }

    /// Gets the current status of an operation
    ///
    /// # Returns
    ///
    /// * `Ok(OperationStatus)` - In progress, completed with links, or failed with a reason
    /// * `Err(LinkscoutError::NotFound)` - No operation has this id
    pub fn poll(&self, operation_id: &str) -> Result<OperationStatus> {
        let storage = lock_storage(&self.inner.storage)?;
        let record = storage
            .get_operation(operation_id)?
            .ok_or_else(|| LinkscoutError::operation_not_found(operation_id))?;

        Ok(match record.state {
            OperationState::Queued | OperationState::Processing => OperationStatus::InProgress {
                state: record.state,
            },
            OperationState::Completed => OperationStatus::Completed {
                platform: record.platform,
                account_url: record.account_url,
                username: record.username,
                links: record.result_links,
            },
            OperationState::Failed => OperationStatus::Failed {
                reason: record
                    .error_message
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
        })
    }

    /// Polls until the operation reaches a terminal state
    pub async fn wait_for(
        &self,
        operation_id: &str,
        poll_interval: std::time::Duration,
    ) -> Result<OperationStatus> {
        loop {
            let status = self.poll(operation_id)?;
            if status.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Spawns the worker pool; calling it again while workers run does nothing
    ///
    /// # Returns
    ///
    /// The number of workers started
    pub fn start_workers(&self) -> Result<usize> {
        let mut workers = self.lock_workers()?;
        if workers.is_some() {
            return Ok(0);
        }

        {
            let mut storage = lock_storage(&self.inner.storage)?;
            storage.touch_instance(&self.inner.instance_id)?;
        }

        let count = self.inner.config.worker.concurrency.max(1);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = (0..count)
            .map(|id| {
                tokio::spawn(worker::run(
                    id,
                    Arc::clone(&self.inner),
                    shutdown_rx.clone(),
                ))
            })
            .collect();
        let heartbeat = tokio::spawn(heartbeat::run(Arc::clone(&self.inner), shutdown_rx));

        *workers = Some(WorkerPool {
            shutdown,
            handles,
            heartbeat,
        });
        tracing::info!(
            "Operation worker pool started ({} workers, instance {})",
            count,
            self.inner.instance_id
        );
        Ok(count)
    }

    /// Stops the worker pool and deregisters this instance
    ///
    /// Workers finish the operation they are processing. Operations still waiting in
    /// the channel stay `queued` in storage; once the instance is deregistered they
    /// are orphans, adopted by the next queue that recovers or heartbeats.
    pub async fn shutdown(&self) -> Result<()> {
        let pool = self.lock_workers()?.take();
        if let Some(pool) = pool {
            let _ = pool.shutdown.send(true);
            for handle in pool.handles {
                if let Err(e) = handle.await {
                    tracing::error!("Worker task failed: {}", e);
                }
            }
            if let Err(e) = pool.heartbeat.await {
                tracing::error!("Heartbeat task failed: {}", e);
            }
            tracing::info!("Operation worker pool stopped");
        }

        let mut storage = lock_storage(&self.inner.storage)?;
        storage.remove_instance(&self.inner.instance_id)?;
        Ok(())
    }

    /// Adopts operations left behind by instances that are gone
    ///
    /// Only operations whose owner is unregistered or has missed its heartbeat are
    /// touched, so a queue running in another process keeps its work. Adopted
    /// `processing` operations are failed; adopted `queued` ones are pushed into the
    /// channel in submission order. Call after `start_workers` so a large backlog
    /// cannot fill the channel.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.inner.adopt_orphans().await
    }

    fn lock_workers(&self) -> Result<std::sync::MutexGuard<'_, Option<WorkerPool>>> {
        self.inner
            .workers
            .lock()
            .map_err(|_| LinkscoutError::from(StorageError::LockPoisoned))
    }
}

impl QueueInner {
    async fn push(&self, operation_id: String) -> Result<()> {
        if self.sender.send(operation_id.clone()).await.is_err() {
            let mut storage = lock_storage(&self.storage)?;
            storage.fail_operation(&operation_id, "operation queue closed")?;
            return Err(LinkscoutError::QueueClosed);
        }
        Ok(())
    }

    async fn adopt_orphans(&self) -> Result<RecoveryReport> {
        let (interrupted, queued) = {
            let mut storage = lock_storage(&self.storage)?;
            storage.touch_instance(&self.instance_id)?;

            let stale_before = Utc::now() - chrono::Duration::seconds(INSTANCE_STALE_AFTER_SECS);
            let (interrupted, queued): (Vec<_>, Vec<_>) = storage
                .adopt_orphaned_operations(&self.instance_id, stale_before)?
                .into_iter()
                .partition(|operation| operation.state == OperationState::Processing);

            for operation in &interrupted {
                storage.fail_operation(&operation.operation_id, INTERRUPTED_REASON)?;
                tracing::warn!(
                    "Operation {} for {} was interrupted; marked failed",
                    operation.operation_id,
                    operation.account_url
                );
            }
            (interrupted.len(), queued)
        };

        let requeued = queued.len();
        for operation in queued {
            self.push(operation.operation_id).await?;
        }

        let report = RecoveryReport {
            requeued,
            interrupted,
        };
        if !report.is_empty() {
            tracing::info!(
                "Adopted orphaned operations: {} re-enqueued, {} interrupted",
                requeued,
                interrupted
            );
        }
        Ok(report)
    }
}

/// Fails a freshly inserted operation if its submission is dropped mid-push
///
/// The row would otherwise stay `queued` under a live owner with nothing in the
/// channel, and the scheduler would skip its account for good.
struct PendingPush<'a> {
    inner: &'a QueueInner,
    operation_id: &'a str,
    settled: bool,
}

impl Drop for PendingPush<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let failed = lock_storage(&self.inner.storage)
            .map_err(LinkscoutError::from)
            .and_then(|mut storage| {
                storage
                    .fail_operation(self.operation_id, CANCELLED_REASON)
                    .map_err(LinkscoutError::from)
            });
        match failed {
            Ok(()) => tracing::debug!(
                "Operation {} cancelled before it was queued",
                self.operation_id
            ),
            Err(e) => tracing::warn!(
                "Could not fail cancelled operation {}: {}",
                self.operation_id,
                e
            ),
        }
    }
}
