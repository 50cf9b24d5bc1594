//! Per-platform credential pool
//!
//! All mutation happens under the pool's mutex, which is never held across an await.

use crate::credentials::store::CredentialStore;
use crate::credentials::{CredentialError, CredentialResult, Unavailability};
use crate::platform::Platform;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lifecycle status of a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Active,
    Burnt,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Burnt => "burnt",
        }
    }
}

#[derive(Debug, Clone)]
struct CredentialEntry {
    status: CredentialStatus,
    consecutive_failures: u32,
    last_used: Option<DateTime<Utc>>,
    /// Pool clock value at the last lease; 0 means never used
    use_seq: u64,
    leases: u32,
}

impl CredentialEntry {
    fn new(status: CredentialStatus, consecutive_failures: u32) -> Self {
        Self {
            status,
            consecutive_failures,
            last_used: None,
            use_seq: 0,
            leases: 0,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    entries: BTreeMap<String, CredentialEntry>,
    clock: u64,
}

/// Snapshot of one credential for reporting
#[derive(Debug, Clone)]
pub struct CredentialSnapshot {
    pub name: String,
    pub status: CredentialStatus,
    pub consecutive_failures: u32,
    pub last_used: Option<DateTime<Utc>>,
    pub in_use: bool,
}

/// Aggregate pool statistics for one platform
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub platform: Platform,
    pub active: usize,
    pub burnt: usize,
    pub in_use: usize,
    pub exclusive: bool,
    pub credentials: Vec<CredentialSnapshot>,
}

/// Result of reporting a failure against a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub name: String,
    pub consecutive_failures: u32,
    pub burnt: bool,
}

/// A credential handed out by the pool
///
/// Dropping a lease without reporting returns it to the pool with no accounting.
#[derive(Debug)]
pub struct CredentialLease {
    pool: Arc<CredentialPool>,
    name: String,
    path: PathBuf,
    settled: bool,
}

impl CredentialLease {
    pub fn platform(&self) -> Platform {
        self.pool.platform
    }

    /// File name of the credential, its identity within the pool
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the credential's secret material
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        if !self.settled {
            self.pool.return_lease(&self.name);
        }
    }
}

/// Credential pool for a single platform
#[derive(Debug)]
pub struct CredentialPool {
    platform: Platform,
    store: CredentialStore,
    burn_threshold: u32,
    exclusive: bool,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Opens the pool for a platform from its credential directory
    ///
    /// Active files whose ledger count already reached the threshold are burnt on
    /// load, so an active credential never carries a count at the threshold.
    ///
    /// # Arguments
    ///
    /// * `base_dir` - Root credentials directory
    /// * `platform` - The platform this pool serves
    /// * `burn_threshold` - Consecutive failures that retire a credential
    /// * `exclusive` - Whether a credential may only be leased once at a time
    pub fn open(
        base_dir: &Path,
        platform: Platform,
        burn_threshold: u32,
        exclusive: bool,
    ) -> CredentialResult<Self> {
        let store = CredentialStore::open(base_dir, platform)?;
        let ledger = store.load_ledger();

        let mut entries = BTreeMap::new();
        for name in store.list_burnt()? {
            let failures = ledger.get(&name).copied().unwrap_or(burn_threshold);
            entries.insert(
                name,
                CredentialEntry::new(CredentialStatus::Burnt, failures.min(burn_threshold)),
            );
        }

        let mut burnt_on_load = false;
        for name in store.list_active()? {
            let failures = ledger.get(&name).copied().unwrap_or(0).min(burn_threshold);
            if failures >= burn_threshold {
                tracing::warn!(
                    "Credential {}/{} reached {} failures before restart, burning it",
                    platform,
                    name,
                    failures
                );
                store.burn(&name)?;
                entries.insert(name, CredentialEntry::new(CredentialStatus::Burnt, failures));
                burnt_on_load = true;
            } else {
                entries.insert(name, CredentialEntry::new(CredentialStatus::Active, failures));
            }
        }

        let pool = Self {
            platform,
            store,
            burn_threshold,
            exclusive,
            state: Mutex::new(PoolState { entries, clock: 0 }),
        };

        if burnt_on_load {
            let state = pool.lock()?;
            pool.persist(&state.entries)?;
        }

        tracing::debug!(
            "Opened {} credential pool (threshold {}, exclusive {})",
            platform,
            burn_threshold,
            exclusive
        );

        Ok(pool)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    fn lock(&self) -> CredentialResult<MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|_| CredentialError::LockPoisoned(self.platform))
    }

    fn persist(&self, entries: &BTreeMap<String, CredentialEntry>) -> CredentialResult<()> {
        let ledger: BTreeMap<String, u32> = entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.consecutive_failures))
            .collect();
        self.store.save_ledger(&ledger)
    }

    /// Picks up credential files added to `active/` since the last scan
    fn refresh(&self, entries: &mut BTreeMap<String, CredentialEntry>) -> CredentialResult<()> {
        for name in self.store.list_active()? {
            entries
                .entry(name)
                .or_insert_with(|| CredentialEntry::new(CredentialStatus::Active, 0));
        }
        Ok(())
    }

    /// Leases the least recently used usable credential
    ///
    /// Never waits: when nothing is usable it fails with `NoCredentialAvailable`
    /// naming why.
    pub fn acquire(self: &Arc<Self>) -> CredentialResult<CredentialLease> {
        let mut state = self.lock()?;
        self.refresh(&mut state.entries)?;

        // BTreeMap iteration is name-ordered, so min_by_key keeps the first name on ties
        let selected = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.status == CredentialStatus::Active)
            .filter(|(_, entry)| !self.exclusive || entry.leases == 0)
            .min_by_key(|(_, entry)| entry.use_seq)
            .map(|(name, _)| name.clone());

        let name = match selected {
            Some(name) => name,
            None => {
                let reason = if state.entries.is_empty() {
                    Unavailability::NoneConfigured
                } else if state
                    .entries
                    .values()
                    .all(|entry| entry.status == CredentialStatus::Burnt)
                {
                    Unavailability::AllBurnt
                } else {
                    Unavailability::AllInUse
                };
                tracing::warn!("No credential available for {}: {}", self.platform, reason);
                return Err(CredentialError::NoCredentialAvailable {
                    platform: self.platform,
                    reason,
                });
            }
        };

        state.clock += 1;
        let clock = state.clock;
        if let Some(entry) = state.entries.get_mut(&name) {
            entry.leases += 1;
            entry.use_seq = clock;
            entry.last_used = Some(Utc::now());
        }

        tracing::debug!("Leased credential {}/{}", self.platform, name);

        Ok(CredentialLease {
            pool: Arc::clone(self),
            path: self.store.active_dir().join(&name),
            name,
            settled: false,
        })
    }

    /// Reports a successful fetch: resets the failure counter and returns the lease
    ///
    /// A credential burnt while this lease was out stays burnt with its counter
    /// clamped at the threshold.
    pub fn report_success(&self, mut lease: CredentialLease) -> CredentialResult<()> {
        lease.settled = true;
        let mut state = self.lock()?;

        if let Some(entry) = state.entries.get_mut(&lease.name) {
            entry.leases = entry.leases.saturating_sub(1);
            entry.last_used = Some(Utc::now());
            if entry.status == CredentialStatus::Burnt || entry.consecutive_failures == 0 {
                return Ok(());
            }
            entry.consecutive_failures = 0;
        }

        self.persist(&state.entries)
    }

    /// Reports a failed fetch against the leased credential
    ///
    /// The counter is incremented and clamped at the burn threshold. Reaching the
    /// threshold burns the credential: it is never leased again and its file moves
    /// to `burnt/`.
    pub fn report_failure(&self, mut lease: CredentialLease) -> CredentialResult<FailureReport> {
        lease.settled = true;
        let mut state = self.lock()?;

        let Some(entry) = state.entries.get_mut(&lease.name) else {
            return Ok(FailureReport {
                name: lease.name.clone(),
                consecutive_failures: 0,
                burnt: false,
            });
        };

        entry.leases = entry.leases.saturating_sub(1);
        entry.last_used = Some(Utc::now());

        if entry.status == CredentialStatus::Burnt {
            return Ok(FailureReport {
                name: lease.name.clone(),
                consecutive_failures: entry.consecutive_failures,
                burnt: true,
            });
        }

        entry.consecutive_failures = (entry.consecutive_failures + 1).min(self.burn_threshold);
        let failures = entry.consecutive_failures;
        let burn = failures >= self.burn_threshold;

        if burn {
            entry.status = CredentialStatus::Burnt;
            tracing::error!(
                "Credential {}/{} failed {} times in a row, burning it",
                self.platform,
                lease.name,
                failures
            );
        } else {
            tracing::warn!(
                "Credential {}/{} failure #{}",
                self.platform,
                lease.name,
                failures
            );
        }

        // The in-memory status is authoritative even if the move fails
        let moved = if burn {
            self.store.burn(&lease.name).map(|_| ())
        } else {
            Ok(())
        };
        self.persist(&state.entries)?;
        moved?;

        Ok(FailureReport {
            name: lease.name.clone(),
            consecutive_failures: failures,
            burnt: burn,
        })
    }

    /// Returns a lease without touching its failure counter
    pub fn release(&self, lease: CredentialLease) {
        drop(lease);
    }

    fn return_lease(&self, name: &str) {
        match self.state.lock() {
            Ok(mut state) => {
                if let Some(entry) = state.entries.get_mut(name) {
                    entry.leases = entry.leases.saturating_sub(1);
                }
            }
            Err(_) => {
                tracing::error!(
                    "Credential pool for {} is poisoned, could not return {}",
                    self.platform,
                    name
                );
            }
        }
    }

    /// Takes a snapshot of the pool
    pub fn stats(&self) -> CredentialResult<PoolStats> {
        let state = self.lock()?;

        let credentials: Vec<CredentialSnapshot> = state
            .entries
            .iter()
            .map(|(name, entry)| CredentialSnapshot {
                name: name.clone(),
                status: entry.status,
                consecutive_failures: entry.consecutive_failures,
                last_used: entry.last_used,
                in_use: entry.leases > 0,
            })
            .collect();

        Ok(PoolStats {
            platform: self.platform,
            active: credentials
                .iter()
                .filter(|c| c.status == CredentialStatus::Active)
                .count(),
            burnt: credentials
                .iter()
                .filter(|c| c.status == CredentialStatus::Burnt)
                .count(),
            in_use: credentials.iter().filter(|c| c.in_use).count(),
            exclusive: self.exclusive,
            credentials,
        })
    }
}
