//! Credential pools for platforms that fetch through a logged-in browser session
//!
//! Each credential-bearing platform owns one pool of cookie files. Pools hand out
//! leases least-recently-used first, count consecutive failures per credential and
//! retire ("burn") a credential once it reaches the configured threshold.

mod pool;
mod store;

pub use pool::{
    CredentialLease, CredentialPool, CredentialSnapshot, CredentialStatus, FailureReport,
    PoolStats,
};
pub use store::CredentialStore;

use crate::platform::Platform;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Why no credential could be handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailability {
    NoneConfigured,
    AllBurnt,
    AllInUse,
}

impl fmt::Display for Unavailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoneConfigured => "no credentials configured",
            Self::AllBurnt => "all credentials burnt",
            Self::AllInUse => "all credentials in use",
        };
        write!(f, "{}", text)
    }
}

/// Errors raised by credential pools
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("No credential available for {platform}: {reason}")]
    NoCredentialAvailable {
        platform: Platform,
        reason: Unavailability,
    },

    #[error("Credential file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failure ledger error: {0}")]
    Ledger(#[from] serde_json::Error),

    #[error("Credential pool for {0} is poisoned")]
    LockPoisoned(Platform),
}

/// Result type for credential operations
pub type CredentialResult<T> = Result<T, CredentialError>;

/// The set of credential pools, one per credential-bearing platform
#[derive(Debug, Clone, Default)]
pub struct CredentialPools {
    pools: HashMap<Platform, Arc<CredentialPool>>,
}

impl CredentialPools {
    /// Opens a pool for every platform that needs credentials
    ///
    /// # Arguments
    ///
    /// * `base_dir` - Root credentials directory
    /// * `burn_threshold` - Consecutive failures that retire a credential
    /// * `exclusive` - Per-platform exclusivity flag
    pub fn open(
        base_dir: &Path,
        burn_threshold: u32,
        exclusive: impl Fn(Platform) -> bool,
    ) -> CredentialResult<Self> {
        let mut pools = HashMap::new();
        for platform in Platform::all() {
            if platform.requires_credential() {
                let pool = CredentialPool::open(base_dir, platform, burn_threshold, exclusive(platform))?;
                pools.insert(platform, Arc::new(pool));
            }
        }
        Ok(Self { pools })
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<CredentialPool>> {
        self.pools.get(&platform)
    }

    /// Leases a credential for a platform
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - The platform fetches without credentials
    /// * `Ok(Some(lease))` - A credential was leased
    /// * `Err(NoCredentialAvailable)` - The platform needs a credential and none is usable
    pub fn acquire(&self, platform: Platform) -> CredentialResult<Option<CredentialLease>> {
        if !platform.requires_credential() {
            return Ok(None);
        }

        match self.pools.get(&platform) {
            Some(pool) => pool.acquire().map(Some),
            None => Err(CredentialError::NoCredentialAvailable {
                platform,
                reason: Unavailability::NoneConfigured,
            }),
        }
    }

    /// Reports a successful fetch made with the lease
    pub fn report_success(&self, lease: CredentialLease) -> CredentialResult<()> {
        match self.pools.get(&lease.platform()) {
            Some(pool) => pool.report_success(lease),
            None => Ok(()),
        }
    }

    /// Reports a failed fetch made with the lease
    pub fn report_failure(&self, lease: CredentialLease) -> CredentialResult<Option<FailureReport>> {
        match self.pools.get(&lease.platform()) {
            Some(pool) => pool.report_failure(lease).map(Some),
            None => Ok(None),
        }
    }

    /// Returns a lease without touching its failure counter
    pub fn release(&self, lease: CredentialLease) {
        match self.pools.get(&lease.platform()) {
            Some(pool) => pool.release(lease),
            None => drop(lease),
        }
    }

    /// Returns statistics for every pool, ordered by platform
    pub fn stats(&self) -> CredentialResult<Vec<PoolStats>> {
        let mut stats = self
            .pools
            .values()
            .map(|pool| pool.stats())
            .collect::<CredentialResult<Vec<_>>>()?;
        stats.sort_by_key(|s| s.platform);
        Ok(stats)
    }
}
