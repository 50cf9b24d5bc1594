//! Round-robin scheduler for continuous account monitoring
//!
//! This module handles:
//! - Periodic ticks on a fixed cadence
//! - Fair selection of active accounts relative to a cursor (see `next_batch`)
//! - Skipping accounts whose previous operation is still pending
//! - Persisting the running/stopped state and the cursor across restarts
//! - Following the persisted state while running, so another process can pause or
//!   resume the loop
//!
//! The scheduler only submits operations; workers fetch and merge the results.

mod cursor;

pub use cursor::{cursor_position, next_batch};

use crate::config::SchedulerConfig;
use crate::queue::OperationQueue;
use crate::state::AccountStatus;
use crate::storage::{
    lock_storage, AccountFilter, AccountRecord, SqliteStorage, Storage, StorageError,
    SCHEDULER_CURSOR_KEY, SCHEDULER_STATUS_KEY,
};
use crate::{LinkscoutError, Result};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const STATUS_RUNNING: &str = "running";
const STATUS_STOPPED: &str = "stopped";

/// Snapshot of the scheduler for status reporting
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub running: bool,
    /// Id of the last account visited
    pub cursor: Option<i64>,
    /// Index of the cursor account within the active set
    pub position: Option<usize>,
    pub active_accounts: usize,
    pub tick_interval: Duration,
    pub batch_size: usize,
    pub ticks_completed: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

/// Outcome of a single tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Accounts picked for this tick, in visiting order
    pub considered: Vec<i64>,
    /// Operation ids submitted
    pub submitted: Vec<String>,
    /// Accounts skipped because an earlier operation is still pending
    pub skipped: Vec<i64>,
}

#[derive(Debug, Default)]
struct Progress {
    cursor: Option<i64>,
    ticks_completed: u64,
    last_tick: Option<DateTime<Utc>>,
    /// The loop is alive but the persisted status says stopped
    suspended: bool,
}

struct SchedulerInner {
    storage: Arc<Mutex<SqliteStorage>>,
    queue: OperationQueue,
    tick_interval: Duration,
    batch_size: usize,
    progress: Mutex<Progress>,
}

struct TickLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Cycles through the active accounts, submitting one monitoring operation per visit
pub struct RoundRobinScheduler {
    inner: Arc<SchedulerInner>,
    running: Mutex<Option<TickLoop>>,
}

impl RoundRobinScheduler {
    /// Creates a stopped scheduler, restoring the persisted cursor
    pub fn new(
        storage: Arc<Mutex<SqliteStorage>>,
        queue: OperationQueue,
        config: &SchedulerConfig,
    ) -> Result<Self> {
        let cursor = {
            let storage = lock_storage(&storage)?;
            storage
                .get_setting(SCHEDULER_CURSOR_KEY)?
                .and_then(|value| match value.parse::<i64>() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid scheduler cursor '{}'", value);
                        None
                    }
                })
        };

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                storage,
                queue,
                tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
                batch_size: config.batch_size.max(1),
                progress: Mutex::new(Progress {
                    cursor,
                    ..Default::default()
                }),
            }),
            running: Mutex::new(None),
        })
    }

    /// Returns true if the tick loop is running in this process and not suspended
    pub fn is_running(&self) -> bool {
        let has_loop = self
            .lock_running()
            .map(|running| running.is_some())
            .unwrap_or(false);
        has_loop
            && self
                .inner
                .lock_progress()
                .map(|progress| !progress.suspended)
                .unwrap_or(false)
    }

    /// Returns true if the scheduler was left running by the last process
    pub fn persisted_running(&self) -> Result<bool> {
        read_persisted_running(&self.inner.storage)
    }

    /// Starts the tick loop, or resumes it if it was suspended
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The loop was started or resumed
    /// * `Ok(false)` - It was already running; nothing changed
    pub fn start(&self) -> Result<bool> {
        let mut running = self.lock_running()?;
        if running.is_some() {
            let mut progress = self.inner.lock_progress()?;
            if !progress.suspended {
                return Ok(false);
            }
            write_persisted_status(&self.inner.storage, STATUS_RUNNING)?;
            progress.suspended = false;
            tracing::info!("Round-robin scheduler resumed");
            return Ok(true);
        }

        write_persisted_status(&self.inner.storage, STATUS_RUNNING)?;
        self.inner.lock_progress()?.suspended = false;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), shutdown_rx));
        *running = Some(TickLoop { shutdown, handle });

        tracing::info!(
            "Round-robin scheduler started (every {}s, {} per tick)",
            self.inner.tick_interval.as_secs(),
            self.inner.batch_size
        );
        Ok(true)
    }

    /// Stops the tick loop and records the scheduler as stopped
    ///
    /// A tick in progress is abandoned at its next await point; a submission cut
    /// short is failed rather than left queued. Operations already submitted keep
    /// running.
    ///
    /// # Returns
    ///
    /// True if a running loop was stopped
    pub async fn stop(&self) -> Result<bool> {
        let stopped = self.halt().await?;
        write_persisted_status(&self.inner.storage, STATUS_STOPPED)?;
        tracing::info!("Round-robin scheduler stopped");
        Ok(stopped)
    }

    /// Stops the tick loop but keeps the persisted status, so the next process resumes
    pub async fn halt(&self) -> Result<bool> {
        let tick_loop = self.lock_running()?.take();
        let Some(tick_loop) = tick_loop else {
            return Ok(false);
        };

        let _ = tick_loop.shutdown.send(true);
        if let Err(e) = tick_loop.handle.await {
            tracing::error!("Scheduler task failed: {}", e);
        }
        Ok(true)
    }

    /// Runs one tick immediately, independent of the tick loop
    pub async fn tick(&self) -> Result<TickReport> {
        self.inner.tick().await
    }

    /// Returns the current scheduler status
    pub fn status(&self) -> Result<SchedulerStatus> {
        let active_ids = {
            let storage = lock_storage(&self.inner.storage)?;
            active_accounts(&storage)?
                .iter()
                .map(|a| a.id)
                .collect::<Vec<_>>()
        };
        let progress = self.inner.lock_progress()?;

        Ok(SchedulerStatus {
            running: self.is_running(),
            cursor: progress.cursor,
            position: cursor_position(&active_ids, progress.cursor),
            active_accounts: active_ids.len(),
            tick_interval: self.inner.tick_interval,
            batch_size: self.inner.batch_size,
            ticks_completed: progress.ticks_completed,
            last_tick: progress.last_tick,
        })
    }

    fn lock_running(&self) -> Result<MutexGuard<'_, Option<TickLoop>>> {
        self.running
            .lock()
            .map_err(|_| LinkscoutError::from(StorageError::LockPoisoned))
    }
}

impl SchedulerInner {
    fn lock_progress(&self) -> Result<MutexGuard<'_, Progress>> {
        self.progress
            .lock()
            .map_err(|_| LinkscoutError::from(StorageError::LockPoisoned))
    }

    /// Adopts a status change made by another process
    ///
    /// # Returns
    ///
    /// True if the persisted status says running and the tick should go ahead
    fn follow_persisted_status(&self) -> Result<bool> {
        let running = read_persisted_running(&self.storage)?;
        let mut progress = self.lock_progress()?;
        if running == progress.suspended {
            if running {
                tracing::info!("Scheduler status set to running; resuming ticks");
            } else {
                tracing::info!("Scheduler status set to stopped; suspending ticks");
            }
            progress.suspended = !running;
        }
        Ok(running)
    }

    async fn tick(&self) -> Result<TickReport> {
        let cursor = self.lock_progress()?.cursor;

        let (considered, due, skipped) = {
            let mut storage = lock_storage(&self.storage)?;
            let active = active_accounts(&storage)?;
            let ids: Vec<i64> = active.iter().map(|a| a.id).collect();
            let considered = next_batch(&ids, cursor, self.batch_size);

            let mut due = Vec::new();
            let mut skipped = Vec::new();
            for id in &considered {
                if storage.has_pending_operation(*id)? {
                    skipped.push(*id);
                } else if let Some(account) = active.iter().find(|a| a.id == *id) {
                    due.push(account.clone());
                }
            }

            if let Some(last) = considered.last() {
                storage.set_setting(SCHEDULER_CURSOR_KEY, &last.to_string())?;
            }
            (considered, due, skipped)
        };

        if let Some(&last) = considered.last() {
            self.lock_progress()?.cursor = Some(last);
        }

        let mut submitted = Vec::with_capacity(due.len());
        for account in &due {
            match self.queue.submit_for_account(account).await {
                Ok(operation_id) => {
                    tracing::debug!(
                        "Scheduled {} ({}) as operation {}",
                        account.username,
                        account.platform,
                        operation_id
                    );
                    submitted.push(operation_id);
                }
                Err(e) => {
                    tracing::warn!("Could not schedule {}: {}", account.url, e);
                    let mut storage = lock_storage(&self.storage)?;
                    storage.record_check(account.id, Some(&e.to_string()))?;
                }
            }
        }

        for id in &skipped {
            tracing::debug!("Skipping account {}: previous operation still pending", id);
        }

        {
            let mut progress = self.lock_progress()?;
            progress.ticks_completed += 1;
            progress.last_tick = Some(Utc::now());
        }

        Ok(TickReport {
            considered,
            submitted,
            skipped,
        })
    }
}

async fn run_loop(inner: Arc<SchedulerInner>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(inner.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match inner.follow_persisted_status() {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                tracing::error!("Could not read scheduler status: {}", e);
                continue;
            }
        }

        // A submission can block on a full queue; shutdown must not wait for it
        let report = tokio::select! {
            report = inner.tick() => report,
            _ = shutdown.changed() => break,
        };

        match report {
            Ok(report) if report.considered.is_empty() => {
                tracing::debug!("No active accounts to check");
            }
            Ok(report) => {
                tracing::info!(
                    "Scheduler tick: {} submitted, {} skipped",
                    report.submitted.len(),
                    report.skipped.len()
                );
            }
            Err(e) => tracing::error!("Scheduler tick failed: {}", e),
        }
    }
}

fn active_accounts(storage: &SqliteStorage) -> Result<Vec<AccountRecord>> {
    Ok(storage.list_accounts(AccountFilter {
        status: Some(AccountStatus::Active),
        ..Default::default()
    })?)
}

/// Reads the persisted scheduler status; anything but "running" counts as stopped
pub fn read_persisted_running(storage: &Mutex<SqliteStorage>) -> Result<bool> {
    let storage = lock_storage(storage)?;
    Ok(storage.get_setting(SCHEDULER_STATUS_KEY)?.as_deref() == Some(STATUS_RUNNING))
}

/// Records the scheduler as running or stopped for the next process
pub fn persist_running(storage: &Mutex<SqliteStorage>, running: bool) -> Result<()> {
    write_persisted_status(storage, if running { STATUS_RUNNING } else { STATUS_STOPPED })
}

fn write_persisted_status(storage: &Mutex<SqliteStorage>, status: &str) -> Result<()> {
    let mut storage = lock_storage(storage)?;
    storage.set_setting(SCHEDULER_STATUS_KEY, status)?;
    Ok(())
}
