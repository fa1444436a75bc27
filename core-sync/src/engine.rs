//! # Sync Engine
//!
//! Runs a bidirectional sync between a local working copy and a remote
//! store.
//!
//! ## Workflow
//!
//! 1. **Guard**: only one run at a time; a second start fails with
//!    [`SyncError::SyncInProgress`]
//! 2. **Scan**: optional connectivity pre-check, then list local, remote and
//!    metadata concurrently
//! 3. **Diff**: three-way reconciliation into a [`SyncPlan`]
//! 4. **Apply**: every transfer item, then every deletion item, each routed
//!    through a per-path FIFO queue and bounded by a concurrency limit
//! 5. **Settle**: `Idle`, or `Error` when nothing succeeded and something
//!    failed
//!
//! Metadata for a path is written only after its transfer fully succeeded.
//! Item failures are isolated: they are counted and reported, and the path is
//! retried naturally by the next run.
//!
//! ## Usage
//!
//! ```no_run
//! use bridge_traits::{MemoryLocalStorage, MemoryRemoteStorage, SystemClock};
//! use core_sync::{InMemoryMetadataStore, SyncConfig, SyncEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> core_sync::Result<()> {
//! let clock = Arc::new(SystemClock);
//! let engine = SyncEngine::new(
//!     SyncConfig::default(),
//!     Arc::new(MemoryLocalStorage::new(clock.clone())),
//!     Arc::new(MemoryRemoteStorage::new(clock)),
//!     Arc::new(InMemoryMetadataStore::new()),
//! );
//!
//! let summary = engine.start_sync().await?;
//! println!("uploaded {} files", summary.stats.uploaded);
//! # Ok(())
//! # }
//! ```

use crate::conflict::{conflict_copy_path, TieBreak, SKEW_TOLERANCE_MS};
use crate::error::{Result, SyncError};
use crate::metadata_store::SyncMetadataStore;
use crate::model::{Resolution, ScanSnapshot, SyncMetadataEntry, SyncPlan, SyncPlanItem};
use crate::reconciler::Reconciler;
use crate::run::{ItemFailure, ItemOutcome, SyncPhase, SyncRunId, SyncState, SyncSummary};
use crate::status::StatusReporter;
use crate::task_queue::KeyedTaskQueue;
use bridge_traits::network::NetworkMonitor;
use bridge_traits::storage::{
    validate_relative_path, ContentHash, FileContent, LocalStorage, RemoteFingerprint,
    RemoteStorage,
};
use bridge_traits::time::{Clock, SystemClock};
use core_runtime::events::EventBus;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Clock skew tolerated when comparing modification times (ms)
    pub skew_tolerance_ms: i64,

    /// Outcome for conflicts inside the skew window
    pub tie_break: TieBreak,

    /// Keep the losing side of a conflict as a local `.conflict-<ms>` copy
    pub preserve_conflict_copies: bool,

    /// Plan items applied at the same time
    pub max_concurrent_transfers: usize,

    /// Per-item time limit (seconds); `None` waits indefinitely
    pub item_timeout_secs: Option<u64>,

    /// Fail fast with `Offline` when the network monitor reports no
    /// connectivity
    pub check_network_before_scan: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            skew_tolerance_ms: SKEW_TOLERANCE_MS,
            tie_break: TieBreak::PreferRemote,
            preserve_conflict_copies: true,
            max_concurrent_transfers: 8,
            item_timeout_secs: Some(300),
            check_network_before_scan: true,
        }
    }
}

impl SyncConfig {
    fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    fn transfer_slots(&self) -> usize {
        self.max_concurrent_transfers.max(1)
    }
}

// ============================================================================
// Run Tracking
// ============================================================================

#[derive(Clone)]
struct ActiveRun {
    run_id: SyncRunId,
    cancel: CancellationToken,
}

/// Holds the single-flight slot for one run.
///
/// The run future and every item it dispatched share the lease, so the slot
/// is released only after the last of them is gone. A run future dropped
/// mid-flight therefore keeps the engine busy until its queued items drain,
/// and the run is then settled back to `Idle`.
struct RunLease {
    active: Arc<Mutex<Option<ActiveRun>>>,
    reporter: StatusReporter,
    clock: Arc<dyn Clock>,
    run: ActiveRun,
}

impl Drop for RunLease {
    fn drop(&mut self) {
        // Settle under the slot lock so no new run can begin in between
        let mut active = lock(&self.active);
        if self.reporter.phase().is_active() {
            self.reporter
                .abandon(self.run.run_id, self.clock.unix_timestamp_millis());
        }
        if active
            .as_ref()
            .is_some_and(|run| run.run_id == self.run.run_id)
        {
            *active = None;
        }
    }
}

fn lock(active: &Mutex<Option<ActiveRun>>) -> MutexGuard<'_, Option<ActiveRun>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Engine
// ============================================================================

/// Orchestrates scan, reconciliation and plan execution.
///
/// Cheap to clone; clones share the run slot, the status and the queues.
#[derive(Clone)]
pub struct SyncEngine {
    config: SyncConfig,
    reconciler: Reconciler,
    local: Arc<dyn LocalStorage>,
    remote: Arc<dyn RemoteStorage>,
    metadata: Arc<dyn SyncMetadataStore>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Arc<dyn Clock>,
    reporter: StatusReporter,
    queue: KeyedTaskQueue,
    transfer_slots: Arc<Semaphore>,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        local: Arc<dyn LocalStorage>,
        remote: Arc<dyn RemoteStorage>,
        metadata: Arc<dyn SyncMetadataStore>,
    ) -> Self {
        let reconciler = Reconciler::new(config.skew_tolerance_ms, config.tie_break);
        let transfer_slots = Arc::new(Semaphore::new(config.transfer_slots()));
        Self {
            config,
            reconciler,
            local,
            remote,
            metadata,
            network_monitor: None,
            clock: Arc::new(SystemClock),
            reporter: StatusReporter::default(),
            queue: KeyedTaskQueue::new(),
            transfer_slots,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mirror status changes onto `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.reporter = StatusReporter::new(Some(bus));
        self
    }

    /// Publish through a reporter created ahead of the engine, so observers
    /// subscribed earlier keep receiving updates.
    pub fn with_status_reporter(mut self, reporter: StatusReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn metadata_store(&self) -> &Arc<dyn SyncMetadataStore> {
        &self.metadata
    }

    pub fn status(&self) -> SyncState {
        self.reporter.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.reporter.subscribe()
    }

    pub fn acknowledge_error(&self) -> bool {
        self.reporter.acknowledge_error()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    pub fn current_run_id(&self) -> Option<SyncRunId> {
        lock(&self.active).as_ref().map(|run| run.run_id)
    }

    /// Request cancellation of the active run.
    ///
    /// Items already dispatched finish; no further items start. Returns
    /// `false` when no run is active.
    pub fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(run) => {
                info!(run_id = %run.run_id, "Cancellation requested");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn claim_run(&self) -> Result<Arc<RunLease>> {
        let mut active = lock(&self.active);
        if let Some(run) = active.as_ref() {
            return Err(SyncError::SyncInProgress {
                run_id: run.run_id.as_str(),
            });
        }
        let run = ActiveRun {
            run_id: SyncRunId::new(),
            cancel: CancellationToken::new(),
        };
        *active = Some(run.clone());
        Ok(Arc::new(RunLease {
            active: Arc::clone(&self.active),
            reporter: self.reporter.clone(),
            clock: Arc::clone(&self.clock),
            run,
        }))
    }

    // ------------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------------

    /// Run one full sync: scan, reconcile, apply.
    ///
    /// Returns `Err` only for run-level failures (already running, offline,
    /// credential rejected, unreadable listing). Item failures are reported
    /// in the summary.
    #[instrument(skip(self))]
    pub async fn start_sync(&self) -> Result<SyncSummary> {
        let lease = self.claim_run()?;
        let run_id = lease.run.run_id;
        let cancel = lease.run.cancel.clone();
        let started = Instant::now();

        self.reporter
            .begin_run(run_id, self.clock.unix_timestamp_millis())?;

        let snapshot = match self.scan().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.reporter
                    .fail(run_id, &e, self.clock.unix_timestamp_millis())?;
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            let mut summary = SyncSummary::new(run_id);
            summary.cancelled = true;
            summary.stats.duration_ms = started.elapsed().as_millis() as u64;
            self.reporter
                .finish(&summary, self.clock.unix_timestamp_millis())?;
            return Ok(summary);
        }

        let plan = self.calculate_diff(&snapshot);
        self.run_plan(&lease, plan, started).await
    }

    /// Apply a precomputed plan as its own run.
    #[instrument(skip(self, plan), fields(items = plan.len()))]
    pub async fn apply_plan(&self, plan: SyncPlan) -> Result<SyncSummary> {
        let lease = self.claim_run()?;
        let started = Instant::now();

        self.reporter
            .begin_run(lease.run.run_id, self.clock.unix_timestamp_millis())?;
        self.run_plan(&lease, plan, started).await
    }

    async fn run_plan(
        &self,
        lease: &Arc<RunLease>,
        plan: SyncPlan,
        started: Instant,
    ) -> Result<SyncSummary> {
        let run_id = lease.run.run_id;
        self.reporter
            .plan_ready(run_id, plan.summary(), plan.len())?;

        let mut summary = self.execute_plan(lease, plan).await;
        summary.stats.duration_ms = started.elapsed().as_millis() as u64;
        self.queue.prune_idle();

        let phase = self
            .reporter
            .finish(&summary, self.clock.unix_timestamp_millis())?;
        if phase == SyncPhase::Error {
            warn!(run_id = %run_id, errors = summary.errors(), "Every plan item failed");
        }
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Scan and diff
    // ------------------------------------------------------------------------

    /// Capture local, remote and metadata views.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<ScanSnapshot> {
        if self.config.check_network_before_scan {
            if let Some(monitor) = &self.network_monitor {
                if monitor.is_offline().await {
                    return Err(SyncError::Offline(
                        "network monitor reports no connectivity".to_string(),
                    ));
                }
            }
        }

        let (local, remote, metadata) = tokio::join!(
            self.local.list_tree(),
            self.remote.list_tree(),
            self.metadata.all_entries()
        );
        let local = local?;
        let remote = remote?;
        let metadata = metadata?;

        let remote: Vec<RemoteFingerprint> = remote
            .into_iter()
            .filter(|fp| match validate_relative_path(&fp.path) {
                Ok(()) => true,
                Err(e) => {
                    warn!(path = %fp.path, error = %e, "Skipping remote object with unusable path");
                    false
                }
            })
            .collect();

        debug!(
            local = local.len(),
            remote = remote.len(),
            metadata = metadata.len(),
            "Scan complete"
        );
        Ok(ScanSnapshot::from_parts(local, remote, metadata))
    }

    pub fn calculate_diff(&self, snapshot: &ScanSnapshot) -> SyncPlan {
        self.reconciler.reconcile(snapshot)
    }

    // ------------------------------------------------------------------------
    // Plan execution
    // ------------------------------------------------------------------------

    async fn execute_plan(&self, lease: &Arc<RunLease>, plan: SyncPlan) -> SyncSummary {
        let (transfers, deletions) = plan.into_stages();
        let mut summary = SyncSummary::new(lease.run.run_id);

        for stage in [transfers, deletions] {
            if summary.cancelled {
                summary.skipped += stage.len() as u64;
                continue;
            }
            self.run_stage(lease, stage, &mut summary).await;
        }

        summary
    }

    /// Dispatch one stage and wait for every dispatched item to settle.
    async fn run_stage(
        &self,
        lease: &Arc<RunLease>,
        items: Vec<SyncPlanItem>,
        summary: &mut SyncSummary,
    ) {
        let run_id = lease.run.run_id;
        let cancel = &lease.run.cancel;
        let mut handles = Vec::with_capacity(items.len());
        let mut pending = items.into_iter();

        while let Some(item) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&self.transfer_slots).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                summary.cancelled = true;
                summary.skipped += 1 + pending.len() as u64;
                info!(run_id = %run_id, skipped = summary.skipped, "Dispatch stopped");
                break;
            };

            let path = item.path().to_string();
            let action = item.action();
            let engine = self.clone();
            let item_lease = Arc::clone(lease);
            let handle = self.queue.enqueue(path.clone(), move || async move {
                let _lease = item_lease;
                let _permit = permit;
                engine.execute_item(run_id, item).await
            });
            handles.push((path, action, handle));
        }

        for (path, action, handle) in handles {
            match handle.await {
                Ok(outcome) => {
                    summary.stats.record_success(outcome);
                    summary.succeeded += 1;
                }
                Err(error) => {
                    if matches!(error, SyncError::TaskAborted(_)) {
                        self.reporter.item_failed(run_id, &path, action, &error);
                    }
                    summary.stats.record_failure();
                    summary.failures.push(ItemFailure {
                        path,
                        action,
                        error,
                    });
                }
            }
        }
    }

    /// Apply one item under the per-item time limit and report the result.
    async fn execute_item(&self, run_id: SyncRunId, item: SyncPlanItem) -> Result<ItemOutcome> {
        let path = item.path().to_string();
        let action = item.action();

        let result = match self.config.item_timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.apply_item(item)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::transfer(
                    &path,
                    format!("timed out after {}s", limit.as_secs()),
                )),
            },
            None => self.apply_item(item).await,
        };

        match &result {
            Ok(outcome) => {
                debug!(run_id = %run_id, path = %path, action = %action, "Item applied");
                self.reporter.item_succeeded(run_id, &path, action, *outcome);
            }
            Err(error) => self.reporter.item_failed(run_id, &path, action, error),
        }
        result
    }

    async fn apply_item(&self, item: SyncPlanItem) -> Result<ItemOutcome> {
        match item {
            SyncPlanItem::Upload { local } => {
                self.upload(&local.path).await?;
                Ok(ItemOutcome::Uploaded)
            }
            SyncPlanItem::Download {
                remote,
                expected_local,
            } => {
                self.download(&remote, expected_local.as_ref()).await?;
                Ok(ItemOutcome::Downloaded)
            }
            SyncPlanItem::DeleteLocal {
                path,
                expected_local,
            } => {
                self.ensure_local_unchanged(&path, Some(&expected_local))
                    .await?;
                match self.local.delete_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(SyncError::transfer(&path, e)),
                }
                self.metadata.delete(&path).await?;
                Ok(ItemOutcome::Deleted)
            }
            SyncPlanItem::DeleteRemote { path } => {
                match self.remote.delete_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(SyncError::transfer(&path, e)),
                }
                self.metadata.delete(&path).await?;
                Ok(ItemOutcome::Deleted)
            }
            SyncPlanItem::Conflict {
                path,
                resolution,
                local,
                remote,
            } => {
                match resolution {
                    Resolution::PreferLocal => {
                        if self.config.preserve_conflict_copies {
                            let theirs = self
                                .remote
                                .download_file(&path)
                                .await
                                .map_err(|e| SyncError::transfer(&path, e))?;
                            self.write_conflict_copy(&path, theirs).await?;
                        }
                        self.upload(&path).await?;
                    }
                    Resolution::PreferRemote => {
                        if self.config.preserve_conflict_copies {
                            let ours = self
                                .local
                                .read_file(&path)
                                .await
                                .map_err(|e| SyncError::transfer(&path, e))?;
                            self.write_conflict_copy(&path, ours).await?;
                        }
                        self.download(&remote, Some(&local.content_hash)).await?;
                    }
                }
                info!(path = %path, resolution = ?resolution, "Conflict resolved");
                Ok(ItemOutcome::ConflictResolved(resolution))
            }
            SyncPlanItem::Unresolved { path, .. } => {
                Err(SyncError::PathConflictUnresolved { path })
            }
            SyncPlanItem::Link {
                path,
                hash,
                revision,
            } => {
                self.commit(&path, hash, revision).await?;
                Ok(ItemOutcome::Linked)
            }
            SyncPlanItem::Forget { path } => {
                self.metadata.delete(&path).await?;
                Ok(ItemOutcome::Forgotten)
            }
        }
    }

    async fn upload(&self, path: &str) -> Result<()> {
        let content = self
            .local
            .read_file(path)
            .await
            .map_err(|e| SyncError::transfer(path, e))?;
        // Hash what is actually sent, not what the scan saw
        let hash = ContentHash::of(&content.data);
        let receipt = self
            .remote
            .upload_file(path, content.data, &content.mime_type)
            .await
            .map_err(|e| SyncError::transfer(path, e))?;
        self.commit(path, hash, receipt.revision).await
    }

    async fn download(
        &self,
        remote: &RemoteFingerprint,
        expected_local: Option<&ContentHash>,
    ) -> Result<()> {
        let path = remote.path.as_str();
        self.ensure_local_unchanged(path, expected_local).await?;

        let content = self
            .remote
            .download_file(path)
            .await
            .map_err(|e| SyncError::transfer(path, e))?;
        let hash = ContentHash::of(&content.data);
        self.local
            .write_file(path, content.data, &content.mime_type)
            .await
            .map_err(|e| SyncError::transfer(path, e))?;
        self.commit(path, hash, remote.revision.clone()).await
    }

    /// Refuse to touch a local file edited since the scan.
    async fn ensure_local_unchanged(
        &self,
        path: &str,
        expected: Option<&ContentHash>,
    ) -> Result<()> {
        let current = self
            .local
            .fingerprint(path)
            .await
            .map_err(|e| SyncError::transfer(path, e))?;
        if current.as_ref().map(|fp| &fp.content_hash) != expected {
            return Err(SyncError::transfer(path, "local file changed since scan"));
        }
        Ok(())
    }

    async fn write_conflict_copy(&self, path: &str, content: FileContent) -> Result<()> {
        let copy = conflict_copy_path(path, self.clock.unix_timestamp_millis());
        self.local
            .write_file(&copy, content.data, &content.mime_type)
            .await
            .map_err(|e| SyncError::transfer(path, e))?;
        info!(path, copy = %copy, "Preserved conflicting version");
        Ok(())
    }

    async fn commit(&self, path: &str, hash: ContentHash, revision: String) -> Result<()> {
        self.metadata
            .put(&SyncMetadataEntry {
                path: path.to_string(),
                last_synced_hash: hash,
                last_synced_remote_revision: revision,
                last_synced_at: self.clock.unix_timestamp_millis(),
            })
            .await
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("phase", &self.reporter.phase())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
