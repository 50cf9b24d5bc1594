//! Integration tests for the orchestrator
//!
//! These tests replace the platform back-ends with a scripted in-memory source and
//! drive the queue, the credential pools and the scheduler end-to-end against a
//! real SQLite database in a temporary directory.

use async_trait::async_trait;
use linkscout::config::Config;
use linkscout::credentials::CredentialStatus;
use linkscout::fetch::{FetchDispatcher, FetchError, FetchErrorKind, FetchRequest, LinkSource};
use linkscout::queue::{RecoveryReport, INTERRUPTED_REASON};
use linkscout::state::OperationOrigin;
use linkscout::storage::{NewOperation, SqliteStorage, Storage, StorageError};
use linkscout::{
    LinkscoutError, OperationState, OperationStatus, Orchestrator, Platform, SubmitOptions,
    ValidationError,
};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const POLL: Duration = Duration::from_millis(10);

/// A back-end that replays scripted responses, then returns no links
#[derive(Default)]
struct ScriptedSource {
    responses: Mutex<VecDeque<Result<Vec<String>, FetchError>>>,
    credentials_seen: Mutex<Vec<Option<PathBuf>>>,
}

impl ScriptedSource {
    fn new(responses: Vec<Result<Vec<String>, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            credentials_seen: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, response: Result<Vec<String>, FetchError>) {
        self.responses.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl LinkSource for ScriptedSource {
    async fn fetch_links(&self, request: &FetchRequest) -> Result<Vec<String>, FetchError> {
        self.credentials_seen
            .lock()
            .unwrap()
            .push(request.credential.clone());
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A back-end whose fetches block until the test hands out permits
struct GatedSource {
    gate: tokio::sync::Semaphore,
    calls: AtomicUsize,
}

impl GatedSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: tokio::sync::Semaphore::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LinkSource for GatedSource {
    async fn fetch_links(&self, _request: &FetchRequest) -> Result<Vec<String>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FetchError::new(FetchErrorKind::Unknown, "gate closed"))?;
        permit.forget();
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "gated"
    }
}

fn links(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|u| u.to_string()).collect()
}

fn auth_rejected() -> Result<Vec<String>, FetchError> {
    Err(FetchError::new(FetchErrorKind::AuthRejected, "login required"))
}

fn not_found() -> Result<Vec<String>, FetchError> {
    Err(FetchError::new(FetchErrorKind::NotFound, "no such account"))
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::with_storage(
        dir.path().join("linkscout.db").to_string_lossy(),
        dir.path().join("cookies").to_string_lossy(),
    );
    config.worker.concurrency = 2;
    config.scheduler.batch_size = 1;
    config.scheduler.tick_interval_secs = 3600;
    config
}

fn add_cookie(dir: &TempDir, platform: &str, name: &str) {
    let active = dir.path().join("cookies").join(platform).join("active");
    std::fs::create_dir_all(&active).unwrap();
    std::fs::write(active.join(name), "# Netscape HTTP Cookie File\n").unwrap();
}

fn build_orchestrator(config: Config, sources: &[(Platform, Arc<ScriptedSource>)]) -> Orchestrator {
    let mut dispatcher = FetchDispatcher::new(Duration::from_secs(5));
    for (platform, source) in sources {
        dispatcher.register(*platform, Arc::clone(source) as Arc<dyn LinkSource>);
    }
    Orchestrator::with_dispatcher(config, dispatcher).unwrap()
}

fn build_gated(config: Config, source: &Arc<GatedSource>) -> Orchestrator {
    let mut dispatcher = FetchDispatcher::new(Duration::from_secs(5));
    dispatcher.register(Platform::TikTok, Arc::clone(source) as Arc<dyn LinkSource>);
    Orchestrator::with_dispatcher(config, dispatcher).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

async fn run_to_end(orchestrator: &Orchestrator, identifier: &str) -> OperationStatus {
    let id = orchestrator
        .submit(identifier, SubmitOptions::default())
        .await
        .unwrap();
    orchestrator.queue().wait_for(&id, POLL).await.unwrap()
}

fn instagram_credential(orchestrator: &Orchestrator, name: &str) -> (CredentialStatus, u32) {
    let stats = orchestrator
        .credential_pools()
        .get(Platform::Instagram)
        .unwrap()
        .stats()
        .unwrap();
    let credential = stats
        .credentials
        .iter()
        .find(|c| c.name == name)
        .unwrap();
    (credential.status, credential.consecutive_failures)
}

fn open_second_connection(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::new(&dir.path().join("linkscout.db")).unwrap()
}

#[tokio::test]
async fn test_submit_poll_complete() {
    let dir = tempfile::tempdir().unwrap();
    let fetched = links(&[
        "https://www.tiktok.com/@dancer/video/5",
        "https://www.tiktok.com/@dancer/video/4",
        "https://www.tiktok.com/@dancer/video/3",
        "https://www.tiktok.com/@dancer/video/2",
        "https://www.tiktok.com/@dancer/video/1",
    ]);
    let source = ScriptedSource::new(vec![Ok(fetched.clone())]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::TikTok, source)]);
    orchestrator.start().await.unwrap();

    let id = orchestrator
        .submit("https://www.tiktok.com/@dancer?lang=en", SubmitOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        orchestrator.poll(&id),
        Ok(OperationStatus::InProgress { .. }) | Ok(OperationStatus::Completed { .. })
    ));

    let status = orchestrator.queue().wait_for(&id, POLL).await.unwrap();
    assert_eq!(
        status,
        OperationStatus::Completed {
            platform: Platform::TikTok,
            account_url: "https://www.tiktok.com/@dancer".to_string(),
            username: "dancer".to_string(),
            links: fetched,
        }
    );

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_poll_unknown_operation() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = build_orchestrator(test_config(&dir), &[]);

    assert!(matches!(
        orchestrator.poll("00000000-0000-4000-8000-000000000000"),
        Err(LinkscoutError::NotFound {
            kind: "Operation",
            ..
        })
    ));
}

#[tokio::test]
async fn test_platform_without_backend_rejected_at_submission() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = build_orchestrator(test_config(&dir), &[]);

    let err = orchestrator
        .submit("https://www.instagram.com/someone", SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LinkscoutError::Validation(ValidationError::NoBackend(Platform::Instagram))
    ));
}

#[tokio::test]
async fn test_invalid_options_rejected_at_submission() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(vec![]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::TikTok, source)]);

    let err = orchestrator
        .submit(
            "tiktok.com/@dancer",
            SubmitOptions {
                max_items: Some(500),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LinkscoutError::Validation(ValidationError::InvalidOption(_))
    ));
}

#[tokio::test]
async fn test_single_credential_burns_after_three_failures() {
    let dir = tempfile::tempdir().unwrap();
    add_cookie(&dir, "instagram", "a.txt");
    let source = ScriptedSource::new(vec![auth_rejected(), auth_rejected(), auth_rejected()]);
    let orchestrator = build_orchestrator(
        test_config(&dir),
        &[(Platform::Instagram, Arc::clone(&source))],
    );
    orchestrator.start().await.unwrap();

    for expected in 1..=2 {
        let status = run_to_end(&orchestrator, "someone").await;
        assert_eq!(
            status,
            OperationStatus::Failed {
                reason: "auth_rejected: login required".to_string()
            }
        );
        assert_eq!(
            instagram_credential(&orchestrator, "a.txt"),
            (CredentialStatus::Active, expected)
        );
    }

    run_to_end(&orchestrator, "someone").await;
    assert_eq!(
        instagram_credential(&orchestrator, "a.txt"),
        (CredentialStatus::Burnt, 3)
    );

    let instagram = dir.path().join("cookies").join("instagram");
    assert!(!instagram.join("active").join("a.txt").exists());
    assert!(instagram.join("burnt").join("a.txt").exists());
    let ledger: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(instagram.join("failures.json")).unwrap())
            .unwrap();
    assert_eq!(ledger["a.txt"], 3);

    // The burnt credential is never handed out again
    let status = run_to_end(&orchestrator, "someone").await;
    assert_eq!(
        status,
        OperationStatus::Failed {
            reason: "No credential available for instagram: all credentials burnt".to_string()
        }
    );
    assert_eq!(source.credentials_seen.lock().unwrap().len(), 3);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_success_resets_failure_counter() {
    let dir = tempfile::tempdir().unwrap();
    add_cookie(&dir, "instagram", "a.txt");
    let source = ScriptedSource::new(vec![
        auth_rejected(),
        auth_rejected(),
        Ok(links(&["https://www.instagram.com/p/1/"])),
        auth_rejected(),
    ]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::Instagram, source)]);
    orchestrator.start().await.unwrap();

    run_to_end(&orchestrator, "someone").await;
    run_to_end(&orchestrator, "someone").await;
    assert_eq!(
        instagram_credential(&orchestrator, "a.txt"),
        (CredentialStatus::Active, 2)
    );

    let status = run_to_end(&orchestrator, "someone").await;
    assert!(matches!(status, OperationStatus::Completed { .. }));
    assert_eq!(
        instagram_credential(&orchestrator, "a.txt"),
        (CredentialStatus::Active, 0)
    );

    // One more failure after the reset does not burn it
    run_to_end(&orchestrator, "someone").await;
    assert_eq!(
        instagram_credential(&orchestrator, "a.txt"),
        (CredentialStatus::Active, 1)
    );

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_not_found_leaves_counter_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    add_cookie(&dir, "instagram", "a.txt");
    let source = ScriptedSource::new(vec![auth_rejected(), not_found(), not_found()]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::Instagram, source)]);
    orchestrator.start().await.unwrap();

    run_to_end(&orchestrator, "someone").await;
    assert_eq!(
        instagram_credential(&orchestrator, "a.txt"),
        (CredentialStatus::Active, 1)
    );

    let status = run_to_end(&orchestrator, "someone").await;
    assert_eq!(
        status,
        OperationStatus::Failed {
            reason: "not_found: no such account".to_string()
        }
    );
    run_to_end(&orchestrator, "someone").await;
    assert_eq!(
        instagram_credential(&orchestrator, "a.txt"),
        (CredentialStatus::Active, 1)
    );

    // The lease was returned, so the credential is free again
    let stats = orchestrator
        .credential_pools()
        .get(Platform::Instagram)
        .unwrap()
        .stats()
        .unwrap();
    assert_eq!(stats.in_use, 0);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_credentials_rotate_least_recently_used() {
    let dir = tempfile::tempdir().unwrap();
    add_cookie(&dir, "x", "b.txt");
    add_cookie(&dir, "x", "a.txt");
    let source = ScriptedSource::new(vec![]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::X, Arc::clone(&source))]);
    orchestrator.start().await.unwrap();

    for _ in 0..3 {
        run_to_end(&orchestrator, "x.com/someone").await;
    }

    let seen: Vec<String> = source
        .credentials_seen
        .lock()
        .unwrap()
        .iter()
        .map(|path| {
            path.as_deref()
                .and_then(Path::file_name)
                .unwrap()
                .to_string_lossy()
                .to_string()
        })
        .collect();
    assert_eq!(seen, vec!["a.txt", "b.txt", "a.txt"]);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unique_ids_under_concurrent_submission() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(vec![]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::TikTok, source)]);
    orchestrator.start().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..40 {
        let queue = orchestrator.queue().clone();
        handles.push(tokio::spawn(async move {
            queue
                .submit("tiktok.com/@dancer", SubmitOptions::default())
                .await
                .unwrap()
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }
    assert_eq!(ids.len(), 40);

    for id in &ids {
        let status = orchestrator.queue().wait_for(id, POLL).await.unwrap();
        assert!(matches!(status, OperationStatus::Completed { .. }));
    }

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_terminal_state_never_reverts() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(vec![Ok(links(&["https://www.tiktok.com/@dancer/video/1"]))]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::TikTok, source)]);
    orchestrator.start().await.unwrap();

    let status = run_to_end(&orchestrator, "tiktok.com/@dancer").await;
    assert!(matches!(status, OperationStatus::Completed { .. }));
    let id = {
        let storage = open_second_connection(&dir);
        storage.list_operations_by_state(OperationState::Completed).unwrap()[0]
            .operation_id
            .clone()
    };

    let mut storage = open_second_connection(&dir);
    assert!(matches!(
        storage.mark_operation_processing(&id),
        Err(StorageError::InvalidTransition { .. })
    ));
    assert!(matches!(
        storage.fail_operation(&id, "late failure"),
        Err(StorageError::InvalidTransition { .. })
    ));
    assert!(matches!(
        orchestrator.poll(&id),
        Ok(OperationStatus::Completed { .. })
    ));

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_monitoring_merges_links_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let first = links(&[
        "https://www.tiktok.com/@dancer/video/2",
        "https://www.tiktok.com/@dancer/video/1",
    ]);
    let second = links(&[
        "https://www.tiktok.com/@dancer/video/3",
        "https://www.tiktok.com/@dancer/video/2",
        "https://www.tiktok.com/@dancer/video/1",
    ]);
    let source = ScriptedSource::new(vec![Ok(first.clone()), Ok(first), Ok(second)]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::TikTok, source)]);
    let account = orchestrator.add_account("tiktok.com/@dancer").unwrap();
    orchestrator.start().await.unwrap();

    for expected in [2, 2, 3] {
        let report = orchestrator.scheduler().tick().await.unwrap();
        assert_eq!(report.considered, vec![account.id]);
        let status = orchestrator
            .queue()
            .wait_for(&report.submitted[0], POLL)
            .await
            .unwrap();
        assert!(matches!(status, OperationStatus::Completed { .. }));
        assert_eq!(orchestrator.account_links(account.id).unwrap().len(), expected);
    }

    let stored = orchestrator.account_links(account.id).unwrap();
    assert_eq!(stored[0].url, "https://www.tiktok.com/@dancer/video/3");

    let account = orchestrator.get_account(account.id).unwrap();
    assert!(account.last_checked.is_some());
    assert!(account.last_error.is_none());

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_monitoring_failure_recorded_on_account() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(vec![not_found(), Ok(vec![])]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::TikTok, source)]);
    let account = orchestrator.add_account("tiktok.com/@dancer").unwrap();
    orchestrator.start().await.unwrap();

    let report = orchestrator.scheduler().tick().await.unwrap();
    orchestrator
        .queue()
        .wait_for(&report.submitted[0], POLL)
        .await
        .unwrap();
    let failed = orchestrator.get_account(account.id).unwrap();
    assert_eq!(
        failed.last_error.as_deref(),
        Some("not_found: no such account")
    );

    let report = orchestrator.scheduler().tick().await.unwrap();
    orchestrator
        .queue()
        .wait_for(&report.submitted[0], POLL)
        .await
        .unwrap();
    let recovered = orchestrator.get_account(account.id).unwrap();
    assert!(recovered.last_error.is_none());

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_on_demand_result_merges_into_managed_account() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(vec![Ok(links(&["https://t.me/somechannel/7"]))]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::Telegram, source)]);
    let account = orchestrator.add_account("https://t.me/somechannel").unwrap();
    orchestrator.start().await.unwrap();

    run_to_end(&orchestrator, "t.me/s/somechannel").await;
    let stored = orchestrator.account_links(account.id).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].url, "https://t.me/somechannel/7");

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pause_mid_cycle_keeps_round_robin_order() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(vec![]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::TikTok, source)]);
    let a = orchestrator.add_account("tiktok.com/@a").unwrap().id;
    let b = orchestrator.add_account("tiktok.com/@b").unwrap().id;
    let c = orchestrator.add_account("tiktok.com/@c").unwrap().id;
    orchestrator.start().await.unwrap();

    let mut visited = Vec::new();
    for tick in 0..3 {
        if tick == 1 {
            orchestrator.pause_account(b).unwrap();
        }
        let report = orchestrator.scheduler().tick().await.unwrap();
        for id in &report.submitted {
            orchestrator.queue().wait_for(id, POLL).await.unwrap();
        }
        visited.extend(report.considered);
    }

    assert_eq!(visited, vec![a, c, a]);

    let status = orchestrator.scheduler().status().unwrap();
    assert_eq!(status.cursor, Some(a));
    assert_eq!(status.active_accounts, 2);
    assert_eq!(status.ticks_completed, 3);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scheduler_skips_account_with_pending_operation() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(vec![]);
    let mut config = test_config(&dir);
    config.scheduler.batch_size = 2;
    let orchestrator = build_orchestrator(config, &[(Platform::TikTok, source)]);
    let a = orchestrator.add_account("tiktok.com/@a").unwrap().id;

    // Workers are not started, so the first operation stays queued
    let first = orchestrator.scheduler().tick().await.unwrap();
    assert_eq!(first.submitted.len(), 1);

    let second = orchestrator.scheduler().tick().await.unwrap();
    assert!(second.submitted.is_empty());
    assert_eq!(second.skipped, vec![a]);
}

#[tokio::test]
async fn test_restart_recovers_queue() {
    let dir = tempfile::tempdir().unwrap();

    // An operation interrupted mid-fetch and one still waiting
    {
        let mut storage = open_second_connection(&dir);
        for id in ["interrupted", "waiting"] {
            storage
                .insert_operation(&NewOperation {
                    operation_id: id.to_string(),
                    platform: Platform::TikTok,
                    account_url: "https://www.tiktok.com/@dancer".to_string(),
                    username: "dancer".to_string(),
                    origin: OperationOrigin::OnDemand,
                    account_id: None,
                    content_type: Default::default(),
                    max_items: 5,
                    owner: None,
                })
                .unwrap();
        }
        storage.mark_operation_processing("interrupted").unwrap();

        // Work held by another process that is still alive
        storage.touch_instance("other-process").unwrap();
        storage
            .insert_operation(&NewOperation {
                operation_id: "foreign".to_string(),
                platform: Platform::TikTok,
                account_url: "https://www.tiktok.com/@singer".to_string(),
                username: "singer".to_string(),
                origin: OperationOrigin::OnDemand,
                account_id: None,
                content_type: Default::default(),
                max_items: 5,
                owner: Some("other-process".to_string()),
            })
            .unwrap();
        storage.mark_operation_processing("foreign").unwrap();
    }

    let source = ScriptedSource::new(vec![Ok(links(&["https://www.tiktok.com/@dancer/video/1"]))]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::TikTok, source)]);
    let report = orchestrator.start().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.interrupted, 1);

    assert_eq!(
        orchestrator.poll("interrupted").unwrap(),
        OperationStatus::Failed {
            reason: INTERRUPTED_REASON.to_string()
        }
    );
    let status = orchestrator.queue().wait_for("waiting", POLL).await.unwrap();
    assert!(matches!(status, OperationStatus::Completed { .. }));
    assert_eq!(
        orchestrator.poll("foreign").unwrap(),
        OperationStatus::InProgress {
            state: OperationState::Processing
        }
    );

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_instance_leaves_live_operations_alone() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.worker.concurrency = 1;

    let gate = GatedSource::new();
    let first = build_gated(config.clone(), &gate);
    first.start().await.unwrap();

    let running = first
        .submit("tiktok.com/@dancer", SubmitOptions::default())
        .await
        .unwrap();
    wait_until(|| gate.calls.load(Ordering::SeqCst) == 1).await;
    let waiting = first
        .submit("tiktok.com/@singer", SubmitOptions::default())
        .await
        .unwrap();

    // A one-shot command opening the same database while the first is busy
    let other = GatedSource::new();
    let second = build_gated(config, &other);
    assert_eq!(second.start().await.unwrap(), RecoveryReport::default());

    assert_eq!(
        second.poll(&running).unwrap(),
        OperationStatus::InProgress {
            state: OperationState::Processing
        }
    );
    assert_eq!(
        second.poll(&waiting).unwrap(),
        OperationStatus::InProgress {
            state: OperationState::Queued
        }
    );

    gate.gate.add_permits(2);
    for id in [&running, &waiting] {
        let status = first.queue().wait_for(id, POLL).await.unwrap();
        assert!(matches!(status, OperationStatus::Completed { .. }));
    }
    assert_eq!(other.calls.load(Ordering::SeqCst), 0);

    second.shutdown().await.unwrap();
    first.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_queued_work_handed_over_after_shutdown() {
    let dir = tempfile::tempdir().unwrap();

    // Workers never start, so the operation is still queued at shutdown
    let id = {
        let source = ScriptedSource::new(vec![]);
        let first = build_orchestrator(test_config(&dir), &[(Platform::TikTok, source)]);
        let id = first
            .submit("tiktok.com/@dancer", SubmitOptions::default())
            .await
            .unwrap();
        first.shutdown().await.unwrap();
        id
    };

    let source = ScriptedSource::new(vec![Ok(links(&["https://www.tiktok.com/@dancer/video/1"]))]);
    let second = build_orchestrator(test_config(&dir), &[(Platform::TikTok, source)]);
    let report = second.start().await.unwrap();
    assert_eq!(report.requeued, 1);

    let status = second.queue().wait_for(&id, POLL).await.unwrap();
    assert!(matches!(status, OperationStatus::Completed { .. }));
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scheduler_follows_status_set_by_another_process() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.scheduler.tick_interval_secs = 1;

    let source = ScriptedSource::new(vec![]);
    let monitor = build_orchestrator(config.clone(), &[(Platform::TikTok, source)]);
    monitor.add_account("tiktok.com/@dancer").unwrap();
    monitor.start().await.unwrap();
    monitor.scheduler().start().unwrap();
    let ticks = || monitor.scheduler().status().unwrap().ticks_completed;
    wait_until(|| ticks() >= 1).await;

    // `linkscout scheduler stop` from another shell
    let cli = build_orchestrator(config, &[]);
    cli.set_persisted_scheduler(false).unwrap();
    wait_until(|| !monitor.scheduler().is_running()).await;

    let paused_at = ticks();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(ticks(), paused_at);

    cli.set_persisted_scheduler(true).unwrap();
    wait_until(|| monitor.scheduler().is_running() && ticks() > paused_at).await;

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scheduler_resumes_when_left_running() {
    let dir = tempfile::tempdir().unwrap();

    {
        let orchestrator = build_orchestrator(test_config(&dir), &[]);
        assert!(!orchestrator.resume_monitoring().unwrap());
        orchestrator.scheduler().start().unwrap();
        orchestrator.shutdown().await.unwrap();
    }

    let orchestrator = build_orchestrator(test_config(&dir), &[]);
    assert!(orchestrator.resume_monitoring().unwrap());
    assert!(orchestrator.scheduler().is_running());

    orchestrator.scheduler().stop().await.unwrap();
    assert!(!orchestrator.scheduler().persisted_running().unwrap());
}

#[tokio::test]
async fn test_export_links_csv() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(vec![Ok(links(&[
        "https://www.youtube.com/shorts/b",
        "https://www.youtube.com/shorts/a",
    ]))]);
    let orchestrator = build_orchestrator(test_config(&dir), &[(Platform::YouTube, source)]);
    let account = orchestrator.add_account("youtube.com/@chan").unwrap();
    orchestrator.start().await.unwrap();

    let report = orchestrator.scheduler().tick().await.unwrap();
    orchestrator
        .queue()
        .wait_for(&report.submitted[0], POLL)
        .await
        .unwrap();

    let mut csv = Vec::new();
    let written = orchestrator.export_links(account.id, &mut csv).unwrap();
    assert_eq!(written, 2);
    let text = String::from_utf8(csv).unwrap();
    assert!(text.starts_with("URL,Discovered At\n"));
    assert!(text.contains("https://www.youtube.com/shorts/b,"));

    orchestrator.shutdown().await.unwrap();
}
