//! Integration tests for the sync service façade
//!
//! These tests cover:
//! - Initialization with Google Drive credentials and with custom remotes
//! - The start/subscribe/acknowledge control surface
//! - End-to-end runs through the Drive adapter over a mocked HTTP client
//! - The periodic scheduler

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult,
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
    ManualClock, MemoryLocalStorage, MemoryRemoteStorage, NetworkInfo, NetworkMonitor,
};
use core_runtime::config::{CoreConfig, CoreConfigBuilder};
use core_runtime::events::{CoreEvent, EventStream, SyncEvent};
use core_service::{CoreError, SyncScheduler, SyncService};
use core_sync::{InMemoryMetadataStore, SyncConfig, SyncError, SyncMetadataStore, SyncPhase};
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;

const T0: i64 = 1_700_000_000_000;
const MD: &str = "text/markdown";

mock! {
    pub Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

struct Online;

#[async_trait]
impl NetworkMonitor for Online {
    async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
        Ok(NetworkInfo::connected())
    }
}

struct Harness {
    local: Arc<MemoryLocalStorage>,
    remote: Arc<MemoryRemoteStorage>,
    service: Arc<SyncService>,
}

fn builder(local: Arc<MemoryLocalStorage>, http: MockHttp) -> CoreConfigBuilder {
    CoreConfig::builder()
        .local_root("/tmp/vault")
        .database_path("/tmp/vault-sync.db")
        .remote_root_folder_id("vault-folder")
        .http_client(Arc::new(http))
        .local_storage(local)
        .network_monitor(Arc::new(Online))
}

impl Harness {
    fn new() -> Self {
        Self::with_http(MockHttp::new())
    }

    fn with_http(http: MockHttp) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let local = Arc::new(MemoryLocalStorage::new(clock.clone()));
        let remote = Arc::new(MemoryRemoteStorage::new(clock.clone()));
        let config = builder(local.clone(), http).clock(clock).build().unwrap();
        let service = SyncService::with_metadata_store(
            config,
            SyncConfig::default(),
            Arc::new(InMemoryMetadataStore::new()),
        );
        Self {
            local,
            remote,
            service: Arc::new(service),
        }
    }

    fn with_memory_remote(self) -> Self {
        self.service
            .init_sync_with_remote(self.remote.clone())
            .unwrap();
        self
    }
}

async fn next_completion(events: &mut EventStream) -> (u64, u64) {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            if let Ok(CoreEvent::Sync(SyncEvent::Completed {
                uploaded,
                downloaded,
                ..
            })) = events.recv().await
            {
                return (uploaded, downloaded);
            }
        }
    })
    .await
    .expect("no completed run")
}

// ============================================================================
// Control surface
// ============================================================================

#[tokio::test]
async fn test_start_before_init_is_rejected() {
    let h = Harness::new();
    assert!(!h.service.is_initialized());
    assert!(matches!(
        h.service.start_sync().await,
        Err(CoreError::NotInitialized)
    ));
    assert!(!h.service.cancel_sync());
}

#[tokio::test]
async fn test_blank_token_is_invalid_credential() {
    let h = Harness::new();
    assert!(matches!(
        h.service.init_sync("   "),
        Err(CoreError::InvalidCredential(_))
    ));
    assert!(!h.service.is_initialized());
}

#[tokio::test]
async fn test_reinit_swaps_token() {
    let h = Harness::new();
    h.service.init_sync("first").unwrap();
    h.service.init_sync("second").unwrap();
    assert!(h.service.is_initialized());
}

#[tokio::test]
async fn test_run_reports_counts_and_subscribers_see_it() {
    let h = Harness::new();
    let mut status = h.service.subscribe();
    let h = h.with_memory_remote();

    h.local.insert("notes/a.md", "alpha", MD, T0).await;
    h.remote.insert("notes/b.md", "beta", MD, T0).await;

    let report = h.service.start_sync().await.unwrap();
    assert_eq!(report.uploads, 1);
    assert_eq!(report.downloads, 1);
    assert_eq!(report.errors, 0);
    assert!(!report.cancelled);

    assert!(status.has_changed().unwrap());
    let state = status.borrow_and_update().clone();
    assert_eq!(state.phase, SyncPhase::Idle);
    assert_eq!(state.stats.uploaded, 1);
    assert_eq!(
        state.last_run_id.map(|id| id.as_str()),
        Some(report.run_id.clone())
    );
    assert_eq!(h.service.metadata_store().len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_total_failure_sets_error_until_acknowledged() {
    let h = Harness::new().with_memory_remote();
    h.local.insert("a.md", "alpha", MD, T0).await;
    h.remote.fail_path("a.md", true);

    let report = h.service.start_sync().await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(h.service.status().phase, SyncPhase::Error);

    assert!(h.service.acknowledge_error());
    let state = h.service.status();
    assert_eq!(state.phase, SyncPhase::Idle);
    assert!(state.last_error.is_some());
    assert!(!h.service.acknowledge_error());
}

#[tokio::test]
async fn test_events_stream_carries_run_lifecycle() {
    let h = Harness::new().with_memory_remote();
    let mut events = h.service.events();
    h.local.insert("a.md", "alpha", MD, T0).await;

    h.service.start_sync().await.unwrap();

    let first = events.recv().await.unwrap();
    assert!(matches!(first, CoreEvent::Sync(SyncEvent::Started { .. })));
    assert_eq!(next_completion(&mut events).await, (1, 0));
}

#[tokio::test]
async fn test_sqlite_backed_service_persists_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sync.db");
    let clock = Arc::new(ManualClock::new(T0));
    let local = Arc::new(MemoryLocalStorage::new(clock.clone()));
    let remote = Arc::new(MemoryRemoteStorage::new(clock.clone()));
    local.insert("a.md", "alpha", MD, T0).await;

    let config = builder(local.clone(), MockHttp::new())
        .database_path(db.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    let service = SyncService::new(config.clone(), SyncConfig::default())
        .await
        .unwrap();
    service.init_sync_with_remote(remote.clone()).unwrap();
    service.start_sync().await.unwrap();
    drop(service);

    let reopened = SyncService::new(config, SyncConfig::default())
        .await
        .unwrap();
    assert_eq!(reopened.metadata_store().len().await.unwrap(), 1);
    reopened.init_sync_with_remote(remote).unwrap();
    let report = reopened.start_sync().await.unwrap();
    assert_eq!(report.uploads, 0);
}

// ============================================================================
// Google Drive end to end
// ============================================================================

#[tokio::test]
async fn test_drive_upload_through_service() {
    let mut http = MockHttp::new();
    http.expect_execute().returning(|req| {
        let body = match (req.method, req.url.as_str()) {
            (HttpMethod::Get, _) => serde_json::json!({ "files": [] }),
            (HttpMethod::Post, "https://www.googleapis.com/upload/drive/v3/files") => {
                return Ok(HttpResponse::new(200, "").with_header("Location", "https://upload/s1"))
            }
            (HttpMethod::Put, "https://upload/s1") => serde_json::json!({
                "id": "drive-a",
                "name": "a.md",
                "version": "5",
                "modifiedTime": "2024-01-01T00:00:00.000Z"
            }),
            other => panic!("unexpected request {:?}", other),
        };
        Ok(HttpResponse::new(200, body.to_string()))
    });

    let h = Harness::with_http(http);
    h.service.init_sync("token").unwrap();
    h.local.insert("a.md", "alpha", MD, T0).await;

    let report = h.service.start_sync().await.unwrap();
    assert_eq!(report.uploads, 1);

    let entry = h.service.metadata_store().get("a.md").await.unwrap().unwrap();
    assert_eq!(entry.last_synced_remote_revision, "5");
}

#[tokio::test]
async fn test_drive_rejected_token_is_auth_expired() {
    let mut http = MockHttp::new();
    http.expect_execute().returning(|_| {
        Ok(HttpResponse::new(
            401,
            r#"{"error": {"code": 401, "message": "Invalid Credentials"}}"#,
        ))
    });

    let h = Harness::with_http(http);
    h.service.init_sync("stale").unwrap();

    let err = h.service.start_sync().await.unwrap_err();
    assert!(matches!(
        err.as_sync_error(),
        Some(SyncError::AuthExpired(_))
    ));

    let state = h.service.status();
    assert_eq!(state.phase, SyncPhase::Error);
    let last_error = state.last_error.unwrap();
    assert!(!last_error.recoverable);
}

// ============================================================================
// Scheduler
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_immediately_then_every_interval() {
    let h = Harness::new().with_memory_remote();
    let mut events = h.service.events();
    h.local.insert("a.md", "alpha", MD, T0).await;

    let scheduler = SyncScheduler::spawn(Arc::clone(&h.service), Duration::from_secs(60));
    assert_eq!(next_completion(&mut events).await, (1, 0));
    assert!(h.remote.get("a.md").await.is_some());

    h.local.insert("b.md", "beta", MD, T0).await;
    assert_eq!(next_completion(&mut events).await, (1, 0));
    assert!(h.remote.get("b.md").await.is_some());

    scheduler.shutdown().await;
    assert!(!h.service.is_running());
}

#[tokio::test]
async fn test_scheduler_from_config_requires_interval() {
    let h = Harness::new();
    assert!(SyncScheduler::from_config(Arc::clone(&h.service)).is_none());
}

#[tokio::test]
async fn test_scheduler_from_config_uses_interval() {
    let clock = Arc::new(ManualClock::new(T0));
    let local = Arc::new(MemoryLocalStorage::new(clock.clone()));
    let config = builder(local, MockHttp::new())
        .sync_interval_secs(120)
        .build()
        .unwrap();
    let service = Arc::new(SyncService::with_metadata_store(
        config,
        SyncConfig::default(),
        Arc::new(InMemoryMetadataStore::new()),
    ));

    let scheduler = SyncScheduler::from_config(service).unwrap();
    assert_eq!(scheduler.interval(), Duration::from_secs(120));
    scheduler.stop();
    assert!(scheduler.is_stopped());
}
