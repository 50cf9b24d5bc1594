//! Process-wide context
//!
//! The orchestrator is built once from the configuration and owns the shared
//! storage, the credential pools, the operation queue and the round-robin
//! scheduler. It also hosts account management for continuous monitoring.

use crate::config::Config;
use crate::credentials::{CredentialPools, PoolStats};
use crate::fetch::FetchDispatcher;
use crate::output::{self, SystemStatistics};
use crate::platform::resolve_account;
use crate::queue::{OperationQueue, OperationStatus, RecoveryReport, SubmitOptions};
use crate::scheduler::{self, RoundRobinScheduler};
use crate::state::AccountStatus;
use crate::storage::{
    lock_storage, open_storage, AccountFilter, AccountRecord, LinkRecord, SqliteStorage, Storage,
    StorageError,
};
use crate::{LinkscoutError, Result, ValidationError};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Result of importing one row of a bulk account import
#[derive(Debug)]
pub struct ImportOutcome {
    /// The identifier as given
    pub identifier: String,
    pub result: Result<AccountRecord>,
}

/// Shared context for the queue, the scheduler and account management
pub struct Orchestrator {
    config: Arc<Config>,
    storage: Arc<Mutex<SqliteStorage>>,
    pools: CredentialPools,
    queue: OperationQueue,
    scheduler: RoundRobinScheduler,
}

impl Orchestrator {
    /// Builds the orchestrator with the back-ends described by the configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Orchestrator)` - Storage opened, credential pools loaded; nothing is running yet
    /// * `Err(LinkscoutError)` - Storage, credentials or HTTP client could not be set up
    pub fn new(config: Config) -> Result<Self> {
        let dispatcher = FetchDispatcher::from_config(&config)?;
        Self::with_dispatcher(config, dispatcher)
    }

    /// Builds the orchestrator around an existing dispatcher
    pub fn with_dispatcher(config: Config, dispatcher: FetchDispatcher) -> Result<Self> {
        let config = Arc::new(config);

        let storage = Arc::new(Mutex::new(open_storage(&config.database_path())?));
        let pools = CredentialPools::open(
            &config.credentials_dir(),
            config.credentials.burn_threshold,
            |platform| config.exclusive_credentials(platform),
        )?;

        let queue = OperationQueue::new(
            Arc::clone(&storage),
            pools.clone(),
            Arc::new(dispatcher),
            Arc::clone(&config),
        );
        let scheduler =
            RoundRobinScheduler::new(Arc::clone(&storage), queue.clone(), &config.scheduler)?;

        Ok(Self {
            config,
            storage,
            pools,
            queue,
            scheduler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn scheduler(&self) -> &RoundRobinScheduler {
        &self.scheduler
    }

    pub fn credential_pools(&self) -> &CredentialPools {
        &self.pools
    }

    /// Starts the worker pool and adopts operations left by instances that are gone
    pub async fn start(&self) -> Result<RecoveryReport> {
        self.queue.start_workers()?;
        self.queue.recover().await
    }

    /// Starts the scheduler if it was left running or `autostart` is set
    ///
    /// # Returns
    ///
    /// True if the scheduler is running afterwards
    pub fn resume_monitoring(&self) -> Result<bool> {
        if self.config.scheduler.autostart || self.scheduler.persisted_running()? {
            self.scheduler.start()?;
            Ok(true)
        } else {
            tracing::info!("Scheduler is stopped; not resuming monitoring");
            Ok(false)
        }
    }

    /// Stops the scheduler loop and the workers
    ///
    /// The persisted scheduler status is kept so the next process resumes it.
    /// Operations being processed are finished first.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.halt().await?;
        self.queue.shutdown().await
    }

    /// Submits an on-demand fetch; see `OperationQueue::submit`
    pub async fn submit(&self, identifier: &str, options: SubmitOptions) -> Result<String> {
        self.queue.submit(identifier, options).await
    }

    /// Polls an operation; see `OperationQueue::poll`
    pub fn poll(&self, operation_id: &str) -> Result<OperationStatus> {
        self.queue.poll(operation_id)
    }

    // ===== Accounts =====

    /// Adds an account to the monitored set
    ///
    /// # Returns
    ///
    /// * `Ok(AccountRecord)` - The new, active account
    /// * `Err(LinkscoutError::Validation)` - Bad identifier or the account is already managed
    pub fn add_account(&self, identifier: &str) -> Result<AccountRecord> {
        let target = resolve_account(identifier)?;

        let mut storage = lock_storage(&self.storage)?;
        if storage.get_account_by_url(&target.url)?.is_some() {
            return Err(ValidationError::DuplicateAccount(target.url).into());
        }

        let id = storage
            .insert_account(target.platform, &target.username, &target.url)
            .map_err(|e| match e {
                StorageError::ConstraintViolation(_) => {
                    LinkscoutError::from(ValidationError::DuplicateAccount(target.url.clone()))
                }
                other => other.into(),
            })?;

        tracing::info!(
            "Added {} account {} ({})",
            target.platform,
            target.username,
            target.url
        );

        storage
            .get_account(id)?
            .ok_or_else(|| LinkscoutError::account_not_found(id))
    }

    /// Adds several accounts, one result per non-blank identifier
    ///
    /// A failing row never stops the import.
    pub fn import_accounts<'a, I>(&self, identifiers: I) -> Vec<ImportOutcome>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let outcomes: Vec<ImportOutcome> = identifiers
            .into_iter()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|identifier| ImportOutcome {
                identifier: identifier.to_string(),
                result: self.add_account(identifier),
            })
            .collect();

        let added = outcomes.iter().filter(|o| o.result.is_ok()).count();
        tracing::info!(
            "Imported {} of {} accounts",
            added,
            outcomes.len()
        );
        outcomes
    }

    /// Lists managed accounts ordered by id
    pub fn list_accounts(&self, filter: AccountFilter) -> Result<Vec<AccountRecord>> {
        let storage = lock_storage(&self.storage)?;
        Ok(storage.list_accounts(filter)?)
    }

    /// Gets one managed account
    pub fn get_account(&self, account_id: i64) -> Result<AccountRecord> {
        let storage = lock_storage(&self.storage)?;
        storage
            .get_account(account_id)?
            .ok_or_else(|| LinkscoutError::account_not_found(account_id))
    }

    /// Removes an account from round-robin monitoring without forgetting it
    pub fn pause_account(&self, account_id: i64) -> Result<AccountRecord> {
        self.set_account_status(account_id, AccountStatus::Paused)
    }

    /// Puts a paused account back into round-robin monitoring
    pub fn resume_account(&self, account_id: i64) -> Result<AccountRecord> {
        self.set_account_status(account_id, AccountStatus::Active)
    }

    fn set_account_status(&self, account_id: i64, status: AccountStatus) -> Result<AccountRecord> {
        let mut storage = lock_storage(&self.storage)?;
        storage
            .set_account_status(account_id, status)
            .map_err(account_error)?;
        tracing::info!("Account {} is now {}", account_id, status);

        storage
            .get_account(account_id)?
            .ok_or_else(|| LinkscoutError::account_not_found(account_id))
    }

    /// Deletes an account and its link history
    pub fn delete_account(&self, account_id: i64) -> Result<()> {
        let mut storage = lock_storage(&self.storage)?;
        storage.delete_account(account_id).map_err(account_error)?;
        tracing::info!("Deleted account {}", account_id);
        Ok(())
    }

    /// Gets an account's stored links, newest first
    pub fn account_links(&self, account_id: i64) -> Result<Vec<LinkRecord>> {
        let storage = lock_storage(&self.storage)?;
        if storage.get_account(account_id)?.is_none() {
            return Err(LinkscoutError::account_not_found(account_id));
        }
        Ok(storage.get_links(account_id)?)
    }

    /// Writes an account's links as CSV
    ///
    /// # Returns
    ///
    /// The number of links written
    pub fn export_links<W: Write>(&self, account_id: i64, writer: W) -> Result<usize> {
        let storage = lock_storage(&self.storage)?;
        if storage.get_account(account_id)?.is_none() {
            return Err(LinkscoutError::account_not_found(account_id));
        }
        Ok(output::export_account_links(&*storage, account_id, writer)?)
    }

    // ===== Reporting =====

    /// Credential pool state for every credential-bearing platform
    pub fn credential_stats(&self) -> Result<Vec<PoolStats>> {
        Ok(self.pools.stats()?)
    }

    /// Collects system statistics
    pub fn statistics(&self) -> Result<SystemStatistics> {
        let pools = self.credential_stats()?;
        let storage = lock_storage(&self.storage)?;
        Ok(output::load_statistics(&*storage, pools)?)
    }

    /// Records the scheduler as running or stopped without starting it in this process
    ///
    /// A scheduler loop running elsewhere on the same database follows the change at
    /// its next tick.
    pub fn set_persisted_scheduler(&self, running: bool) -> Result<()> {
        scheduler::persist_running(&self.storage, running)
    }
}

fn account_error(error: StorageError) -> LinkscoutError {
    match error {
        StorageError::AccountNotFound(id) => LinkscoutError::account_not_found(id),
        other => other.into(),
    }
}
