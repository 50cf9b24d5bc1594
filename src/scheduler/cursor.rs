//! Round-robin selection over the active account set

/// Picks the accounts to visit in one tick
///
/// Starts with the first id greater than the cursor and wraps around to the lowest
/// id. An account is never picked twice in one tick, even when the batch is larger
/// than the active set. Because selection is relative to the cursor id rather than a
/// position, accounts that were paused or deleted since the last tick drop out
/// without shifting the others.
///
/// # Arguments
///
/// * `active_ids` - Ids of the active accounts, ascending
/// * `cursor` - Id of the last account visited, if any
/// * `batch_size` - Maximum number of accounts to pick
pub fn next_batch(active_ids: &[i64], cursor: Option<i64>, batch_size: usize) -> Vec<i64> {
    if active_ids.is_empty() {
        return Vec::new();
    }

    let start = match cursor {
        Some(cursor) => active_ids.partition_point(|&id| id <= cursor),
        None => 0,
    };

    active_ids
        .iter()
        .cycle()
        .skip(start)
        .take(batch_size.min(active_ids.len()))
        .copied()
        .collect()
}

/// Position of the cursor within the active set, if the cursor account is active
pub fn cursor_position(active_ids: &[i64], cursor: Option<i64>) -> Option<usize> {
    let cursor = cursor?;
    active_ids.binary_search(&cursor).ok()
}
