//! Statistics generation from the result store and credential pools
//!
//! This module provides functionality for collecting and displaying a
//! snapshot of the whole system.

use crate::credentials::PoolStats;
use crate::state::{AccountStatus, OperationState};
use crate::storage::{Storage, StorageResult};

/// System statistics summary
#[derive(Debug, Clone)]
pub struct SystemStatistics {
    /// Count of operations by state, in lifecycle order
    pub operations_by_state: Vec<(OperationState, u64)>,

    /// Number of accounts taking part in monitoring
    pub active_accounts: u64,

    /// Number of paused accounts
    pub paused_accounts: u64,

    /// Total number of links stored across all accounts
    pub total_links: u64,

    /// Credential pool state per platform
    pub credential_pools: Vec<PoolStats>,
}

impl SystemStatistics {
    pub fn total_operations(&self) -> u64 {
        self.operations_by_state.iter().map(|(_, count)| count).sum()
    }

    pub fn operations_in(&self, state: OperationState) -> u64 {
        self.operations_by_state
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `credential_pools` - Pool statistics, usually from `CredentialPools::stats`
///
/// # Returns
///
/// * `Ok(SystemStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(
    storage: &dyn Storage,
    credential_pools: Vec<PoolStats>,
) -> StorageResult<SystemStatistics> {
    let operations_by_state = OperationState::all_states()
        .into_iter()
        .map(|state| Ok((state, storage.count_operations_by_state(state)?)))
        .collect::<StorageResult<Vec<_>>>()?;

    Ok(SystemStatistics {
        operations_by_state,
        active_accounts: storage.count_accounts_by_status(AccountStatus::Active)?,
        paused_accounts: storage.count_accounts_by_status(AccountStatus::Paused)?,
        total_links: storage.count_links(None)?,
        credential_pools,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &SystemStatistics) {
    println!("=== Linkscout Statistics ===\n");

    println!("Overview:");
    println!(
        "  Accounts: {} ({} active, {} paused)",
        stats.active_accounts + stats.paused_accounts,
        stats.active_accounts,
        stats.paused_accounts
    );
    println!("  Links stored: {}", stats.total_links);
    println!("  Operations: {}", stats.total_operations());
    println!();

    println!("Operations by State:");
    let total = stats.total_operations();
    for (state, count) in &stats.operations_by_state {
        let percentage = if total > 0 {
            (*count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!();

    if !stats.credential_pools.is_empty() {
        println!("Credential Pools:");
        for pool in &stats.credential_pools {
            println!(
                "  {}: {} active, {} burnt, {} in use",
                pool.platform, pool.active, pool.burnt, pool.in_use
            );
        }
        println!();
    }

    let completed = stats.operations_in(OperationState::Completed);
    let finished = completed + stats.operations_in(OperationState::Failed);
    let success_rate = if finished > 0 {
        (completed as f64 / finished as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} finished operations completed)",
        success_rate, completed, finished
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ContentKind, Platform};
    use crate::state::OperationOrigin;
    use crate::storage::{NewOperation, SqliteStorage};

    fn operation(id: &str) -> NewOperation {
        NewOperation {
            operation_id: id.to_string(),
            platform: Platform::TikTok,
            account_url: "https://www.tiktok.com/@dancer".to_string(),
            username: "dancer".to_string(),
            origin: OperationOrigin::OnDemand,
            account_id: None,
            content_type: ContentKind::Shorts,
            max_items: 5,
            owner: None,
        }
    }

    #[test]
    fn test_load_statistics() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        storage.insert_operation(&operation("a")).unwrap();
        storage.insert_operation(&operation("b")).unwrap();
        storage.mark_operation_processing("b").unwrap();
        storage
            .complete_operation("b", &["https://a/1".to_string()])
            .unwrap();

        let active = storage
            .insert_account(Platform::TikTok, "dancer", "https://www.tiktok.com/@dancer")
            .unwrap();
        let paused = storage
            .insert_account(Platform::X, "someone", "https://x.com/someone")
            .unwrap();
        storage
            .set_account_status(paused, AccountStatus::Paused)
            .unwrap();
        storage
            .merge_links(active, &["https://a/1".to_string(), "https://a/2".to_string()])
            .unwrap();

        let stats = load_statistics(&storage, Vec::new()).unwrap();
        assert_eq!(stats.total_operations(), 2);
        assert_eq!(stats.operations_in(OperationState::Queued), 1);
        assert_eq!(stats.operations_in(OperationState::Completed), 1);
        assert_eq!(stats.operations_in(OperationState::Failed), 0);
        assert_eq!(stats.active_accounts, 1);
        assert_eq!(stats.paused_accounts, 1);
        assert_eq!(stats.total_links, 2);
    }
}
