//! Sync service façade.
//!
//! [`SyncService`] is the control surface a host talks to: it owns the event
//! bus, the metadata store and the status reporter, and builds a
//! [`SyncEngine`] once a remote credential arrives through
//! [`SyncService::init_sync`].

use crate::error::{CoreError, Result};
use bridge_traits::storage::RemoteStorage;
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use core_sync::{
    SqliteMetadataStore, StatusReporter, SyncConfig, SyncEngine, SyncError, SyncMetadataStore,
    SyncRunId, SyncState, SyncSummary,
};
use provider_google_drive::{DriveConfig, GoogleDriveStorage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{info, instrument};

/// Counters returned by [`SyncService::start_sync`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: String,
    pub uploads: u64,
    pub downloads: u64,
    pub deletions: u64,
    pub conflicts: u64,
    pub errors: u64,
    pub cancelled: bool,
}

impl From<&SyncSummary> for SyncReport {
    fn from(summary: &SyncSummary) -> Self {
        Self {
            run_id: summary.run_id.as_str(),
            uploads: summary.stats.uploaded,
            downloads: summary.stats.downloaded,
            deletions: summary.stats.deleted,
            conflicts: summary.stats.conflicts,
            errors: summary.errors(),
            cancelled: summary.cancelled,
        }
    }
}

/// Engine plus the Drive adapter when the session talks to Google Drive.
#[derive(Clone)]
struct Session {
    engine: SyncEngine,
    drive: Option<Arc<GoogleDriveStorage>>,
}

/// Host-facing sync service.
pub struct SyncService {
    config: CoreConfig,
    sync_config: SyncConfig,
    events: EventBus,
    reporter: StatusReporter,
    metadata: Arc<dyn SyncMetadataStore>,
    session: RwLock<Option<Session>>,
}

impl SyncService {
    /// Open the SQLite metadata store at `config.database_path` and create
    /// an uninitialized service.
    pub async fn new(config: CoreConfig, sync_config: SyncConfig) -> Result<Self> {
        let store = SqliteMetadataStore::open(&config.database_path)
            .await
            .map_err(|e| {
                CoreError::InitializationFailed(format!(
                    "Cannot open metadata database {}: {}",
                    config.database_path.display(),
                    e
                ))
            })?;
        Ok(Self::with_metadata_store(config, sync_config, Arc::new(store)))
    }

    /// Create a service over an existing metadata store.
    pub fn with_metadata_store(
        config: CoreConfig,
        sync_config: SyncConfig,
        metadata: Arc<dyn SyncMetadataStore>,
    ) -> Self {
        let events = EventBus::new(config.event_buffer_size);
        let reporter = StatusReporter::new(Some(events.clone()));
        Self {
            config,
            sync_config,
            events,
            reporter,
            metadata,
            session: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.sync_config
    }

    /// Connect to Google Drive with an OAuth access token.
    ///
    /// Calling it again swaps the token on the existing session; run state
    /// and the Drive path caches are kept.
    #[instrument(skip(self, access_token))]
    pub fn init_sync(&self, access_token: impl Into<String>) -> Result<()> {
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(CoreError::InvalidCredential(
                "Access token must not be empty".to_string(),
            ));
        }

        if let Some(drive) = self.current().and_then(|session| session.drive) {
            drive.set_access_token(access_token);
            info!("Access token refreshed");
            return Ok(());
        }

        self.ensure_idle()?;
        let drive = Arc::new(GoogleDriveStorage::new(
            Arc::clone(&self.config.http_client),
            access_token,
            DriveConfig::new(self.config.remote_root_folder_id.clone()),
        ));
        let remote: Arc<dyn RemoteStorage> = drive.clone();
        self.install(self.build_engine(remote), Some(drive));
        info!(
            folder_id = %self.config.remote_root_folder_id,
            "Sync initialized with Google Drive"
        );
        Ok(())
    }

    /// Connect to an arbitrary remote store, replacing any current session.
    ///
    /// Fails with `SyncInProgress` while a run is active.
    pub fn init_sync_with_remote(&self, remote: Arc<dyn RemoteStorage>) -> Result<()> {
        self.ensure_idle()?;
        self.install(self.build_engine(remote), None);
        info!("Sync initialized with custom remote");
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.current_run_id() {
            Some(run_id) => Err(SyncError::SyncInProgress {
                run_id: run_id.as_str(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn build_engine(&self, remote: Arc<dyn RemoteStorage>) -> SyncEngine {
        let engine = SyncEngine::new(
            self.sync_config.clone(),
            Arc::clone(&self.config.local_storage),
            remote,
            Arc::clone(&self.metadata),
        )
        .with_clock(Arc::clone(&self.config.clock))
        .with_status_reporter(self.reporter.clone());

        match &self.config.network_monitor {
            Some(monitor) => engine.with_network_monitor(Arc::clone(monitor)),
            None => engine,
        }
    }

    fn install(&self, engine: SyncEngine, drive: Option<Arc<GoogleDriveStorage>>) {
        let mut session = self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *session = Some(Session { engine, drive });
    }

    fn current(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn engine(&self) -> Result<SyncEngine> {
        self.current()
            .map(|session| session.engine)
            .ok_or(CoreError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// Run one sync and return its counters.
    ///
    /// Rejected with `SyncInProgress` while another run is active.
    pub async fn start_sync(&self) -> Result<SyncReport> {
        let summary = self.engine()?.start_sync().await?;
        Ok(SyncReport::from(&summary))
    }

    /// Like [`start_sync`](Self::start_sync) but returns the full summary,
    /// including per-item failures.
    pub async fn start_sync_detailed(&self) -> Result<SyncSummary> {
        Ok(self.engine()?.start_sync().await?)
    }

    /// Request cancellation of the active run. Returns `false` when idle.
    pub fn cancel_sync(&self) -> bool {
        self.current()
            .map_or(false, |session| session.engine.cancel())
    }

    pub fn is_running(&self) -> bool {
        self.current()
            .map_or(false, |session| session.engine.is_running())
    }

    pub fn current_run_id(&self) -> Option<SyncRunId> {
        self.current()
            .and_then(|session| session.engine.current_run_id())
    }

    /// Current published state.
    pub fn status(&self) -> SyncState {
        self.reporter.snapshot()
    }

    /// Observe every status transition. Works before `init_sync`.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.reporter.subscribe()
    }

    /// Stream of run and per-item events.
    pub fn events(&self) -> EventStream {
        self.events.stream()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Leave the ERROR phase without running. `last_error` is kept.
    pub fn acknowledge_error(&self) -> bool {
        self.reporter.acknowledge_error()
    }

    pub fn metadata_store(&self) -> &Arc<dyn SyncMetadataStore> {
        &self.metadata
    }
}

impl fmt::Debug for SyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncService")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .field("phase", &self.reporter.phase())
            .finish()
    }
}
