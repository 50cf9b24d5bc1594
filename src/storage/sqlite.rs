//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::platform::Platform;
use crate::state::{AccountStatus, OperationOrigin, OperationState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    hash_url, AccountFilter, AccountRecord, LinkRecord, NewOperation, OperationRecord,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::str::FromStr;

const OPERATION_COLUMNS: &str = "seq, operation_id, platform, account_url, username, origin,
     account_id, content_type, max_items, state, result_links, error_message,
     created_at, started_at, completed_at, owner";

const ACCOUNT_COLUMNS: &str =
    "id, platform, username, url, status, created_at, last_checked, last_error";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Builds the error for a transition the guarded UPDATE refused
    fn rejected_transition(&self, operation_id: &str, to: OperationState) -> StorageError {
        match self.get_operation(operation_id) {
            Ok(Some(operation)) => StorageError::InvalidTransition {
                operation_id: operation_id.to_string(),
                from: operation.state,
                to,
            },
            Ok(None) => StorageError::OperationNotFound(operation_id.to_string()),
            Err(e) => e,
        }
    }

    fn ensure_account_exists(&self, account_id: i64) -> StorageResult<()> {
        match self.get_account(account_id)? {
            Some(_) => Ok(()),
            None => Err(StorageError::AccountNotFound(account_id)),
        }
    }
}

/// Timestamps use a fixed width so they sort lexically
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> String {
    timestamp(Utc::now())
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let value: String = row.get(idx)?;
    value.parse().map_err(|e: String| conversion_error(idx, e))
}

fn db_enum_column<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let value: String = row.get(idx)?;
    parse(&value).ok_or_else(|| conversion_error(idx, format!("unknown value '{}'", value)))
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<OperationRecord> {
    let result_links = match row.get::<_, Option<String>>(10)? {
        Some(json) => serde_json::from_str(&json).map_err(|e| conversion_error(10, e))?,
        None => Vec::new(),
    };

    Ok(OperationRecord {
        seq: row.get(0)?,
        operation_id: row.get(1)?,
        platform: parse_column::<Platform>(row, 2)?,
        account_url: row.get(3)?,
        username: row.get(4)?,
        origin: db_enum_column(row, 5, OperationOrigin::from_db_string)?,
        account_id: row.get(6)?,
        content_type: parse_column(row, 7)?,
        max_items: row.get::<_, i64>(8)?.max(0) as usize,
        state: db_enum_column(row, 9, OperationState::from_db_string)?,
        result_links,
        error_message: row.get(11)?,
        created_at: row.get(12)?,
        started_at: row.get(13)?,
        completed_at: row.get(14)?,
        owner: row.get(15)?,
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<AccountRecord> {
    Ok(AccountRecord {
        id: row.get(0)?,
        platform: parse_column(row, 1)?,
        username: row.get(2)?,
        url: row.get(3)?,
        status: db_enum_column(row, 4, AccountStatus::from_db_string)?,
        created_at: row.get(5)?,
        last_checked: row.get(6)?,
        last_error: row.get(7)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Operations =====

    fn insert_operation(&mut self, operation: &NewOperation) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO operations (operation_id, platform, account_url, username, origin,
             account_id, content_type, max_items, state, created_at, owner)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                operation.operation_id,
                operation.platform.as_str(),
                operation.account_url,
                operation.username,
                operation.origin.to_db_string(),
                operation.account_id,
                operation.content_type.as_str(),
                operation.max_items as i64,
                OperationState::Queued.to_db_string(),
                now(),
                operation.owner,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_operation(&self, operation_id: &str) -> StorageResult<Option<OperationRecord>> {
        let sql = format!(
            "SELECT {} FROM operations WHERE operation_id = ?1",
            OPERATION_COLUMNS
        );
        let operation = self
            .conn
            .query_row(&sql, params![operation_id], operation_from_row)
            .optional()?;
        Ok(operation)
    }

    fn mark_operation_processing(&mut self, operation_id: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE operations SET state = ?1, started_at = ?2
             WHERE operation_id = ?3 AND state = ?4",
            params![
                OperationState::Processing.to_db_string(),
                now(),
                operation_id,
                OperationState::Queued.to_db_string(),
            ],
        )?;

        if changed == 0 {
            return Err(self.rejected_transition(operation_id, OperationState::Processing));
        }
        Ok(())
    }

    fn complete_operation(&mut self, operation_id: &str, links: &[String]) -> StorageResult<()> {
        let links_json = serde_json::to_string(links)?;
        let changed = self.conn.execute(
            "UPDATE operations SET state = ?1, result_links = ?2, completed_at = ?3
             WHERE operation_id = ?4 AND state = ?5",
            params![
                OperationState::Completed.to_db_string(),
                links_json,
                now(),
                operation_id,
                OperationState::Processing.to_db_string(),
            ],
        )?;

        if changed == 0 {
            return Err(self.rejected_transition(operation_id, OperationState::Completed));
        }
        Ok(())
    }

    fn fail_operation(&mut self, operation_id: &str, reason: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE operations SET state = ?1, error_message = ?2, completed_at = ?3
             WHERE operation_id = ?4 AND state IN (?5, ?6)",
            params![
                OperationState::Failed.to_db_string(),
                reason,
                now(),
                operation_id,
                OperationState::Queued.to_db_string(),
                OperationState::Processing.to_db_string(),
            ],
        )?;

        if changed == 0 {
            return Err(self.rejected_transition(operation_id, OperationState::Failed));
        }
        Ok(())
    }

    fn list_operations_by_state(
        &self,
        state: OperationState,
    ) -> StorageResult<Vec<OperationRecord>> {
        let sql = format!(
            "SELECT {} FROM operations WHERE state = ?1 ORDER BY seq",
            OPERATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let operations = stmt
            .query_map(params![state.to_db_string()], operation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(operations)
    }

    fn has_pending_operation(&self, account_id: i64) -> StorageResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM operations WHERE account_id = ?1 AND state IN (?2, ?3)",
            params![
                account_id,
                OperationState::Queued.to_db_string(),
                OperationState::Processing.to_db_string(),
            ],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn count_operations_by_state(&self, state: OperationState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM operations WHERE state = ?1",
            params![state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Accounts =====

    fn insert_account(&mut self, platform: Platform, username: &str, url: &str) -> StorageResult<i64> {
        if self.get_account_by_url(url)?.is_some() {
            return Err(StorageError::ConstraintViolation(format!(
                "account {} already exists",
                url
            )));
        }

        self.conn.execute(
            "INSERT INTO accounts (platform, username, url, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                platform.as_str(),
                username,
                url,
                AccountStatus::Active.to_db_string(),
                now(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_account(&self, account_id: i64) -> StorageResult<Option<AccountRecord>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        let account = self
            .conn
            .query_row(&sql, params![account_id], account_from_row)
            .optional()?;
        Ok(account)
    }

    fn get_account_by_url(&self, url: &str) -> StorageResult<Option<AccountRecord>> {
        let sql = format!("SELECT {} FROM accounts WHERE url = ?1", ACCOUNT_COLUMNS);
        let account = self
            .conn
            .query_row(&sql, params![url], account_from_row)
            .optional()?;
        Ok(account)
    }

    fn list_accounts(&self, filter: AccountFilter) -> StorageResult<Vec<AccountRecord>> {
        let sql = format!(
            "SELECT {} FROM accounts
             WHERE (?1 IS NULL OR platform = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY id",
            ACCOUNT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let accounts = stmt
            .query_map(
                params![
                    filter.platform.map(|p| p.as_str()),
                    filter.status.map(|s| s.to_db_string()),
                ],
                account_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn set_account_status(&mut self, account_id: i64, status: AccountStatus) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE accounts SET status = ?1 WHERE id = ?2",
            params![status.to_db_string(), account_id],
        )?;
        if changed == 0 {
            return Err(StorageError::AccountNotFound(account_id));
        }
        Ok(())
    }

    fn delete_account(&mut self, account_id: i64) -> StorageResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM accounts WHERE id = ?1", params![account_id])?;
        if changed == 0 {
            return Err(StorageError::AccountNotFound(account_id));
        }
        Ok(())
    }

    fn record_check(&mut self, account_id: i64, last_error: Option<&str>) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE accounts SET last_checked = ?1, last_error = ?2 WHERE id = ?3",
            params![now(), last_error, account_id],
        )?;
        if changed == 0 {
            return Err(StorageError::AccountNotFound(account_id));
        }
        Ok(())
    }

    fn count_accounts_by_status(&self, status: AccountStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Links =====

    fn merge_links(&mut self, account_id: i64, links: &[String]) -> StorageResult<usize> {
        self.ensure_account_exists(account_id)?;

        let discovered_at = now();
        let tx = self.conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO video_links (account_id, url, url_hash, discovered_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for link in links {
                added += stmt.execute(params![account_id, link, hash_url(link), discovered_at])?;
            }
        }
        tx.commit()?;

        Ok(added)
    }

    fn get_links(&self, account_id: i64) -> StorageResult<Vec<LinkRecord>> {
        // Later batches first; fetch order is kept within a batch
        let mut stmt = self.conn.prepare(
            "SELECT id, account_id, url, url_hash, discovered_at FROM video_links
             WHERE account_id = ?1 ORDER BY discovered_at DESC, id ASC",
        )?;
        let links = stmt
            .query_map(params![account_id], |row| {
                Ok(LinkRecord {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    url: row.get(2)?,
                    url_hash: row.get(3)?,
                    discovered_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn count_links(&self, account_id: Option<i64>) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM video_links WHERE (?1 IS NULL OR account_id = ?1)",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Instances =====

    fn touch_instance(&mut self, instance_id: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO instances (instance_id, heartbeat_at) VALUES (?1, ?2)
             ON CONFLICT(instance_id) DO UPDATE SET heartbeat_at = excluded.heartbeat_at",
            params![instance_id, now()],
        )?;
        Ok(())
    }

    fn remove_instance(&mut self, instance_id: &str) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM instances WHERE instance_id = ?1",
            params![instance_id],
        )?;
        Ok(())
    }

    fn adopt_orphaned_operations(
        &mut self,
        instance_id: &str,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<Vec<OperationRecord>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM instances WHERE heartbeat_at < ?1 AND instance_id != ?2",
            params![timestamp(stale_before), instance_id],
        )?;

        let sql = format!(
            "SELECT {} FROM operations
             WHERE state IN (?1, ?2)
               AND (owner IS NULL OR owner NOT IN (SELECT instance_id FROM instances))
             ORDER BY seq",
            OPERATION_COLUMNS
        );
        let mut orphans = {
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        OperationState::Queued.to_db_string(),
                        OperationState::Processing.to_db_string(),
                    ],
                    operation_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for operation in &mut orphans {
            tx.execute(
                "UPDATE operations SET owner = ?1 WHERE operation_id = ?2",
                params![instance_id, operation.operation_id],
            )?;
            operation.owner = Some(instance_id.to_string());
        }

        tx.commit()?;
        Ok(orphans)
    }

    // ===== Settings =====

    fn get_setting(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now()],
        )?;
        Ok(())
    }
}
