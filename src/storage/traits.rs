//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::platform::Platform;
use crate::state::{AccountStatus, OperationState};
use crate::storage::{AccountFilter, AccountRecord, LinkRecord, NewOperation, OperationRecord};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Invalid state transition for operation {operation_id}: {from} -> {to}")]
    InvalidTransition {
        operation_id: String,
        from: OperationState,
        to: OperationState,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the queue, the scheduler
/// and the account management commands. Callers share one backend behind a mutex.
pub trait Storage {
    // ===== Operations =====

    /// Persists a new operation in the `queued` state
    ///
    /// # Returns
    ///
    /// The submission sequence number of the new row
    fn insert_operation(&mut self, operation: &NewOperation) -> StorageResult<i64>;

    /// Gets an operation by its id
    fn get_operation(&self, operation_id: &str) -> StorageResult<Option<OperationRecord>>;

    /// Moves an operation from `queued` to `processing`
    ///
    /// Fails with `InvalidTransition` if the operation is not queued.
    fn mark_operation_processing(&mut self, operation_id: &str) -> StorageResult<()>;

    /// Moves an operation from `processing` to `completed` and stores its links
    fn complete_operation(&mut self, operation_id: &str, links: &[String]) -> StorageResult<()>;

    /// Moves a non-terminal operation to `failed` with the given reason
    fn fail_operation(&mut self, operation_id: &str, reason: &str) -> StorageResult<()>;

    /// Lists operations in a state, in submission order
    fn list_operations_by_state(&self, state: OperationState) -> StorageResult<Vec<OperationRecord>>;

    /// Returns true if the account has an operation that is queued or processing
    fn has_pending_operation(&self, account_id: i64) -> StorageResult<bool>;

    /// Counts operations in a state
    fn count_operations_by_state(&self, state: OperationState) -> StorageResult<u64>;

    // ===== Accounts =====

    /// Inserts a new active account
    ///
    /// Fails with `ConstraintViolation` if the URL is already managed.
    fn insert_account(
        &mut self,
        platform: Platform,
        username: &str,
        url: &str,
    ) -> StorageResult<i64>;

    /// Gets an account by id
    fn get_account(&self, account_id: i64) -> StorageResult<Option<AccountRecord>>;

    /// Gets an account by its canonical URL
    fn get_account_by_url(&self, url: &str) -> StorageResult<Option<AccountRecord>>;

    /// Lists accounts ordered by id
    fn list_accounts(&self, filter: AccountFilter) -> StorageResult<Vec<AccountRecord>>;

    /// Sets the monitoring status of an account
    fn set_account_status(&mut self, account_id: i64, status: AccountStatus) -> StorageResult<()>;

    /// Deletes an account together with its link history
    fn delete_account(&mut self, account_id: i64) -> StorageResult<()>;

    /// Records the outcome of a check: updates `last_checked` and sets or clears `last_error`
    fn record_check(&mut self, account_id: i64, last_error: Option<&str>) -> StorageResult<()>;

    /// Counts accounts with a status
    fn count_accounts_by_status(&self, status: AccountStatus) -> StorageResult<u64>;

    // ===== Links =====

    /// Merges links into an account's history
    ///
    /// Already-known URLs are ignored.
    ///
    /// # Returns
    ///
    /// The number of links that were new to the account
    fn merge_links(&mut self, account_id: i64, links: &[String]) -> StorageResult<usize>;

    /// Gets an account's links, newest first
    fn get_links(&self, account_id: i64) -> StorageResult<Vec<LinkRecord>>;

    /// Counts links, for one account or overall
    fn count_links(&self, account_id: Option<i64>) -> StorageResult<u64>;

    // ===== Instances =====

    /// Registers a queue instance or refreshes its heartbeat
    fn touch_instance(&mut self, instance_id: &str) -> StorageResult<()>;

    /// Forgets a queue instance that is shutting down
    fn remove_instance(&mut self, instance_id: &str) -> StorageResult<()>;

    /// Takes over unfinished operations whose owner is gone
    ///
    /// An owner is gone when it is not a registered instance or its last heartbeat
    /// is older than `stale_before`; stale instances are removed. Runs in one
    /// immediate transaction, so two instances never adopt the same operation.
    ///
    /// # Returns
    ///
    /// The adopted `queued` and `processing` operations in submission order, now
    /// owned by `instance_id`
    fn adopt_orphaned_operations(
        &mut self,
        instance_id: &str,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<Vec<OperationRecord>>;

    // ===== Settings =====

    /// Gets a setting value
    fn get_setting(&self, key: &str) -> StorageResult<Option<String>>;

    /// Sets a setting value, replacing any previous one
    fn set_setting(&mut self, key: &str, value: &str) -> StorageResult<()>;
}
