//! Status reporting for sync runs.
//!
//! [`StatusReporter`] owns the published [`SyncState`]. Hosts either watch
//! the state directly or subscribe to the [`EventBus`], which receives a
//! mirrored stream of run and per-item events.

use crate::error::{Result, SyncError};
use crate::model::{PlanAction, PlanSummary};
use crate::run::{ErrorReport, ItemOutcome, SyncPhase, SyncRunId, SyncState, SyncSummary};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent, TransferEvent};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Cloneable writer for the published sync state.
#[derive(Clone)]
pub struct StatusReporter {
    state: Arc<watch::Sender<SyncState>>,
    events: Option<EventBus>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StatusReporter {
    pub fn new(events: Option<EventBus>) -> Self {
        let (tx, _rx) = watch::channel(SyncState::default());
        Self {
            state: Arc::new(tx),
            events,
        }
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.state.borrow().phase
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.events.as_ref()
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(bus) = &self.events {
            if bus.emit(event).is_err() {
                trace!("No event subscribers");
            }
        }
    }

    fn emit_phase(&self, run_id: Option<SyncRunId>, phase: SyncPhase) {
        self.emit(CoreEvent::Sync(SyncEvent::PhaseChanged {
            run_id: run_id.map(|id| id.as_str()),
            phase: phase.as_str().to_string(),
        }));
    }

    /// Apply a fallible update; observers are only notified on success.
    fn try_update<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut SyncState) -> Result<()>,
    {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            let mut next = state.clone();
            match update(&mut next) {
                Ok(()) => {
                    *state = next;
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }

    // ------------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------------

    pub(crate) fn begin_run(&self, run_id: SyncRunId, now_millis: i64) -> Result<()> {
        self.try_update(|state| state.begin(run_id, now_millis))?;
        info!(run_id = %run_id, "Sync run started");
        self.emit(CoreEvent::Sync(SyncEvent::Started {
            run_id: run_id.as_str(),
        }));
        self.emit_phase(Some(run_id), SyncPhase::Scanning);
        Ok(())
    }

    pub(crate) fn plan_ready(&self, run_id: SyncRunId, summary: PlanSummary, total: usize) -> Result<()> {
        self.try_update(|state| {
            state.transition(SyncPhase::Syncing)?;
            state.stats.total = total as u64;
            Ok(())
        })?;
        debug!(
            run_id = %run_id,
            uploads = summary.uploads,
            downloads = summary.downloads,
            deletions = summary.deletions,
            conflicts = summary.conflicts,
            "Sync plan ready"
        );
        self.emit(CoreEvent::Sync(SyncEvent::Planned {
            run_id: run_id.as_str(),
            uploads: summary.uploads,
            downloads: summary.downloads,
            deletions: summary.deletions,
            conflicts: summary.conflicts,
        }));
        self.emit_phase(Some(run_id), SyncPhase::Syncing);
        Ok(())
    }

    pub(crate) fn item_succeeded(
        &self,
        run_id: SyncRunId,
        path: &str,
        action: PlanAction,
        outcome: ItemOutcome,
    ) {
        let counted = self.state.send_if_modified(|state| {
            if state.last_run_id != Some(run_id) {
                return false;
            }
            state.stats.record_success(outcome);
            true
        });
        if !counted {
            debug!(run_id = %run_id, path, "Ignoring result from a superseded run");
            return;
        }
        self.emit(CoreEvent::Transfer(TransferEvent::Completed {
            run_id: run_id.as_str(),
            path: path.to_string(),
            action: action.as_str().to_string(),
        }));
    }

    pub(crate) fn item_failed(
        &self,
        run_id: SyncRunId,
        path: &str,
        action: PlanAction,
        error: &SyncError,
    ) {
        warn!(run_id = %run_id, path, action = %action, error = %error, "Plan item failed");
        let report = ErrorReport::from(error);
        let counted = self.state.send_if_modified(|state| {
            if state.last_run_id != Some(run_id) {
                return false;
            }
            state.stats.record_failure();
            state.last_error = Some(report);
            true
        });
        if !counted {
            debug!(run_id = %run_id, path, "Ignoring failure from a superseded run");
            return;
        }
        self.emit(CoreEvent::Transfer(TransferEvent::Failed {
            run_id: run_id.as_str(),
            path: path.to_string(),
            action: action.as_str().to_string(),
            message: error.to_string(),
        }));
    }

    /// Settle a run whose plan was dispatched (fully or until cancelled).
    ///
    /// Ends in `Error` when nothing succeeded and something failed, in
    /// `Idle` otherwise.
    pub(crate) fn finish(&self, summary: &SyncSummary, now_millis: i64) -> Result<SyncPhase> {
        let phase = if summary.is_total_failure() {
            SyncPhase::Error
        } else {
            SyncPhase::Idle
        };

        self.try_update(|state| {
            state.transition(phase)?;
            state.stats.duration_ms = summary.stats.duration_ms;
            state.finished_at = Some(now_millis);
            if summary.failures.is_empty() {
                state.last_error = None;
            }
            Ok(())
        })?;

        let run_id = summary.run_id;
        if summary.cancelled {
            info!(run_id = %run_id, processed = summary.stats.current, "Sync run cancelled");
            self.emit(CoreEvent::Sync(SyncEvent::Cancelled {
                run_id: run_id.as_str(),
                items_processed: summary.stats.current,
            }));
        } else if phase == SyncPhase::Error {
            let report = self
                .snapshot()
                .last_error
                .unwrap_or_else(|| ErrorReport::from(&SyncError::Unknown("all items failed".into())));
            warn!(run_id = %run_id, errors = summary.errors(), "Sync run failed");
            self.emit(CoreEvent::Sync(SyncEvent::Failed {
                run_id: run_id.as_str(),
                kind: report.kind,
                message: report.message,
                recoverable: report.recoverable,
            }));
        } else {
            info!(
                run_id = %run_id,
                uploaded = summary.stats.uploaded,
                downloaded = summary.stats.downloaded,
                deleted = summary.stats.deleted,
                errors = summary.errors(),
                duration_ms = summary.stats.duration_ms,
                "Sync run completed"
            );
            self.emit(CoreEvent::Sync(SyncEvent::Completed {
                run_id: run_id.as_str(),
                uploaded: summary.stats.uploaded,
                downloaded: summary.stats.downloaded,
                deleted: summary.stats.deleted,
                errors: summary.errors(),
                duration_ms: summary.stats.duration_ms,
            }));
        }

        self.emit_phase(Some(run_id), phase);
        Ok(phase)
    }

    /// Move to `Error` after a run-level failure (scan, pre-check).
    pub(crate) fn fail(&self, run_id: SyncRunId, error: &SyncError, now_millis: i64) -> Result<()> {
        let report = ErrorReport::from(error);
        self.try_update(|state| {
            state.transition(SyncPhase::Error)?;
            state.last_error = Some(report.clone());
            state.finished_at = Some(now_millis);
            Ok(())
        })?;
        warn!(run_id = %run_id, kind = error.kind(), error = %error, "Sync run failed");
        self.emit(CoreEvent::Sync(SyncEvent::Failed {
            run_id: run_id.as_str(),
            kind: report.kind,
            message: report.message,
            recoverable: report.recoverable,
        }));
        self.emit_phase(Some(run_id), SyncPhase::Error);
        Ok(())
    }

    /// Return to `Idle` after a run ended without settling, e.g. when its
    /// future was dropped and the items it had dispatched drained.
    pub(crate) fn abandon(&self, run_id: SyncRunId, now_millis: i64) {
        let abandoned = self.try_update(|state| {
            if !state.phase.is_active() || state.last_run_id != Some(run_id) {
                return Err(SyncError::Cancelled);
            }
            state.transition(SyncPhase::Idle)?;
            state.finished_at = Some(now_millis);
            Ok(())
        });
        if abandoned.is_ok() {
            let processed = self.snapshot().stats.current;
            warn!(run_id = %run_id, processed, "Sync run abandoned");
            self.emit(CoreEvent::Sync(SyncEvent::Cancelled {
                run_id: run_id.as_str(),
                items_processed: processed,
            }));
            self.emit_phase(Some(run_id), SyncPhase::Idle);
        }
    }

    /// Leave `Error` for `Idle`. Returns `false` when not in `Error`.
    ///
    /// The last error report is kept.
    pub fn acknowledge_error(&self) -> bool {
        let acknowledged = self.try_update(|state| {
            if state.phase != SyncPhase::Error {
                return Err(SyncError::InvalidStateTransition {
                    from: state.phase.as_str().to_string(),
                    to: SyncPhase::Idle.as_str().to_string(),
                });
            }
            state.transition(SyncPhase::Idle)
        });
        if acknowledged.is_ok() {
            debug!("Sync error acknowledged");
            self.emit_phase(None, SyncPhase::Idle);
        }
        acknowledged.is_ok()
    }
}
