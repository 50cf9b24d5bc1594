//! Storage module for persisting operations, accounts and discovered links
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Operation lifecycle persistence with guarded state transitions
//! - Managed account records and their deduplicated link history
//! - Small key/value settings such as the persisted scheduler status

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::platform::{AccountTarget, ContentKind, Platform};
use crate::state::{AccountStatus, OperationOrigin, OperationState};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Settings key holding the persisted scheduler status
pub const SCHEDULER_STATUS_KEY: &str = "scheduler_status";

/// Settings key holding the id of the last account the scheduler visited
pub const SCHEDULER_CURSOR_KEY: &str = "scheduler_cursor";

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Locks shared storage, turning a poisoned mutex into a storage error
pub(crate) fn lock_storage(
    storage: &Mutex<SqliteStorage>,
) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage.lock().map_err(|_| StorageError::LockPoisoned)
}

/// Computes the SHA-256 hex digest used to deduplicate link URLs
pub fn hash_url(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Data needed to persist a newly submitted operation
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub operation_id: String,
    pub platform: Platform,
    pub account_url: String,
    pub username: String,
    pub origin: OperationOrigin,
    pub account_id: Option<i64>,
    pub content_type: ContentKind,
    pub max_items: usize,
    /// Instance id of the queue whose channel will carry this operation
    pub owner: Option<String>,
}

/// Represents an operation in the database
#[derive(Debug, Clone)]
pub struct OperationRecord {
    /// Submission sequence number; orders recovery
    pub seq: i64,
    pub operation_id: String,
    pub platform: Platform,
    pub account_url: String,
    pub username: String,
    pub origin: OperationOrigin,
    pub account_id: Option<i64>,
    pub content_type: ContentKind,
    pub max_items: usize,
    pub state: OperationState,
    pub result_links: Vec<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub owner: Option<String>,
}

/// Represents a managed account in the database
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: i64,
    pub platform: Platform,
    pub username: String,
    pub url: String,
    pub status: AccountStatus,
    pub created_at: String,
    pub last_checked: Option<String>,
    pub last_error: Option<String>,
}

impl AccountRecord {
    /// The fetch target for this account
    pub fn target(&self) -> AccountTarget {
        AccountTarget {
            platform: self.platform,
            username: self.username.clone(),
            url: self.url.clone(),
        }
    }
}

/// Represents a discovered link owned by an account
#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub id: i64,
    pub account_id: i64,
    pub url: String,
    pub url_hash: String,
    pub discovered_at: String,
}

/// Optional filters applied when listing accounts
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountFilter {
    pub platform: Option<Platform>,
    pub status: Option<AccountStatus>,
}
