//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the linkscout database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Fetch operations, both on-demand and scheduler-driven
CREATE TABLE IF NOT EXISTS operations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    operation_id TEXT NOT NULL UNIQUE,
    platform TEXT NOT NULL,
    account_url TEXT NOT NULL,
    username TEXT NOT NULL,
    origin TEXT NOT NULL,
    account_id INTEGER REFERENCES accounts(id) ON DELETE SET NULL,
    content_type TEXT NOT NULL,
    max_items INTEGER NOT NULL,
    state TEXT NOT NULL,
    result_links TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    owner TEXT
);

CREATE INDEX IF NOT EXISTS idx_operations_state ON operations(state);
CREATE INDEX IF NOT EXISTS idx_operations_account ON operations(account_id);

-- Accounts under continuous monitoring
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    platform TEXT NOT NULL,
    username TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    last_checked TEXT,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_accounts_status ON accounts(status);

-- Deduplicated links discovered for each account
CREATE TABLE IF NOT EXISTS video_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    discovered_at TEXT NOT NULL,
    UNIQUE(account_id, url_hash)
);

CREATE INDEX IF NOT EXISTS idx_video_links_account ON video_links(account_id);

-- Processes running a worker pool, with their last heartbeat
CREATE TABLE IF NOT EXISTS instances (
    instance_id TEXT PRIMARY KEY,
    heartbeat_at TEXT NOT NULL
);

-- Key/value settings
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    add_operation_owner(conn)?;
    Ok(())
}

/// Adds the `owner` column to databases created before operations had owners
fn add_operation_owner(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    let has_owner: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('operations') WHERE name = 'owner'",
        [],
        |row| row.get(0),
    )?;
    if has_owner == 0 {
        conn.execute_batch("ALTER TABLE operations ADD COLUMN owner TEXT;")?;
    }
    Ok(())
}
