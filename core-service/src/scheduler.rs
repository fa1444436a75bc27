//! Periodic sync trigger.

use crate::error::CoreError;
use crate::service::SyncService;
use core_sync::SyncError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs [`SyncService::start_sync`] on a fixed interval.
///
/// The first run starts immediately. A tick that arrives while a run is
/// still going is skipped. Dropping the scheduler stops it; an in-flight run
/// is cancelled and drains in the background.
pub struct SyncScheduler {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl SyncScheduler {
    /// Start ticking. Must be called from within a tokio runtime.
    pub fn spawn(service: Arc<SyncService>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(run_loop(service, interval, token));
        info!(interval_secs = interval.as_secs(), "Sync scheduler started");
        Self {
            cancel,
            handle: Some(handle),
            interval,
        }
    }

    /// Start with `config.sync_interval_secs`, or `None` when the host did
    /// not configure periodic sync.
    pub fn from_config(service: Arc<SyncService>) -> Option<Self> {
        let secs = service.config().sync_interval_secs?;
        Some(Self::spawn(service, Duration::from_secs(secs)))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop ticking without waiting.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop ticking and wait for an in-flight run to drain.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Sync scheduler task ended abnormally: {}", e);
            }
        }
        info!("Sync scheduler stopped");
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_loop(service: Arc<SyncService>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if service.is_running() {
            debug!("Previous run still active, skipping tick");
            continue;
        }

        let run = service.start_sync();
        tokio::pin!(run);
        let result = tokio::select! {
            result = &mut run => result,
            _ = cancel.cancelled() => {
                service.cancel_sync();
                run.await
            }
        };

        match result {
            Ok(report) => debug!(
                uploads = report.uploads,
                downloads = report.downloads,
                errors = report.errors,
                "Scheduled sync finished"
            ),
            Err(CoreError::Sync(SyncError::SyncInProgress { .. })) => {
                debug!("Run started elsewhere, skipping tick")
            }
            Err(CoreError::NotInitialized) => debug!("Sync not initialized yet, skipping tick"),
            Err(e) => warn!("Scheduled sync failed: {}", e),
        }
    }
}
