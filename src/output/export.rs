use crate::output::OutputError;
use crate::storage::{AccountRecord, Storage, StorageError};
use chrono::{DateTime, Utc};
use std::io::Write;

/// Writes an account's links as CSV, newest first
///
/// Columns: `URL`, `Discovered At`.
///
/// # Arguments
///
/// * `storage` - The storage backend holding the links
/// * `account_id` - The account to export
/// * `writer` - Destination for the CSV data
///
/// # Returns
///
/// * `Ok(usize)` - Number of links written
/// * `Err(OutputError)` - The account does not exist or writing failed
pub fn export_account_links<W: Write>(
    storage: &dyn Storage,
    account_id: i64,
    writer: W,
) -> Result<usize, OutputError> {
    if storage.get_account(account_id)?.is_none() {
        return Err(StorageError::AccountNotFound(account_id).into());
    }

    let links = storage.get_links(account_id)?;

    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["URL", "Discovered At"])?;
    for link in &links {
        csv.write_record([link.url.as_str(), link.discovered_at.as_str()])?;
    }
    csv.flush()?;

    Ok(links.len())
}

/// File name for an export, e.g. `someone_instagram_links_20240101_120000.csv`
pub fn default_export_filename(account: &AccountRecord, now: DateTime<Utc>) -> String {
    let username = account.username.trim_start_matches('@');
    format!(
        "{}_{}_links_{}.csv",
        username,
        account.platform,
        now.format("%Y%m%d_%H%M%S")
    )
}
