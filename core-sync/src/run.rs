//! # Sync Run State Machine
//!
//! Published state of the engine, reset at the start of every run.
//!
//! ## Phases
//!
//! ```text
//!  Idle ──→ Scanning ──→ Syncing ──→ Idle
//!   ↑          │            │
//!   │          └──→ Error ←─┘
//!   └──────────────┘  │
//!        Scanning ←───┘
//! ```
//!
//! `Error` persists until the next run starts or the host acknowledges it.
//! The last error report survives the return to `Idle` so a UI can keep
//! showing it.

use crate::error::{Result, SyncError};
use crate::model::{PlanAction, Resolution};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for one sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(Uuid);

impl SyncRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncRunId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::Unknown(format!("invalid run id {}: {}", s, e)))
    }
}

// ============================================================================
// Phase
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    #[default]
    Idle,
    Scanning,
    Syncing,
    Error,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "IDLE",
            SyncPhase::Scanning => "SCANNING",
            SyncPhase::Syncing => "SYNCING",
            SyncPhase::Error => "ERROR",
        }
    }

    /// A run is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncPhase::Scanning | SyncPhase::Syncing)
    }

    pub fn can_transition_to(&self, to: SyncPhase) -> bool {
        matches!(
            (self, to),
            // Starting a run
            (SyncPhase::Idle, SyncPhase::Scanning)
                | (SyncPhase::Error, SyncPhase::Scanning)
                // Progressing
                | (SyncPhase::Scanning, SyncPhase::Syncing)
                // Cancelled before dispatch, or finished
                | (SyncPhase::Scanning, SyncPhase::Idle)
                | (SyncPhase::Syncing, SyncPhase::Idle)
                // Failing
                | (SyncPhase::Scanning, SyncPhase::Error)
                | (SyncPhase::Syncing, SyncPhase::Error)
                // Acknowledged
                | (SyncPhase::Error, SyncPhase::Idle)
        )
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncPhase {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IDLE" => Ok(SyncPhase::Idle),
            "SCANNING" => Ok(SyncPhase::Scanning),
            "SYNCING" => Ok(SyncPhase::Syncing),
            "ERROR" => Ok(SyncPhase::Error),
            _ => Err(SyncError::Unknown(format!("invalid sync phase: {}", s))),
        }
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub uploaded: u64,
    pub downloaded: u64,
    /// Deletions applied on either side
    pub deleted: u64,
    /// Conflicts settled (by either resolution)
    pub conflicts: u64,
    pub errors: u64,
    /// Items settled so far
    pub current: u64,
    /// Items in the plan
    pub total: u64,
    pub duration_ms: u64,
}

impl SyncStats {
    /// Progress in percent, 100 for an empty plan.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.current as f64 / self.total as f64) * 100.0).min(100.0) as u8
    }
}

/// Serializable view of a [`SyncError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    pub recoverable: bool,
}

impl From<&SyncError> for ErrorReport {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

// ============================================================================
// Item Outcomes
// ============================================================================

/// What a successfully applied plan item did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Uploaded,
    Downloaded,
    Deleted,
    /// Conflict settled; the winning side was transferred
    ConflictResolved(Resolution),
    /// Metadata written without a transfer
    Linked,
    /// Metadata dropped without a transfer
    Forgotten,
}

/// A plan item that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub path: String,
    pub action: PlanAction,
    pub error: SyncError,
}

impl SyncStats {
    pub(crate) fn record_success(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Uploaded => self.uploaded += 1,
            ItemOutcome::Downloaded => self.downloaded += 1,
            ItemOutcome::Deleted => self.deleted += 1,
            ItemOutcome::ConflictResolved(Resolution::PreferLocal) => {
                self.conflicts += 1;
                self.uploaded += 1;
            }
            ItemOutcome::ConflictResolved(Resolution::PreferRemote) => {
                self.conflicts += 1;
                self.downloaded += 1;
            }
            ItemOutcome::Linked | ItemOutcome::Forgotten => {}
        }
        self.current += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.errors += 1;
        self.current += 1;
    }
}

/// Result of one completed (or cancelled) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub run_id: SyncRunId,
    pub stats: SyncStats,
    /// Items that completed, including metadata-only ones
    pub succeeded: u64,
    pub failures: Vec<ItemFailure>,
    /// Items never dispatched because the run was cancelled
    pub skipped: u64,
    pub cancelled: bool,
}

impl SyncSummary {
    pub fn new(run_id: SyncRunId) -> Self {
        Self {
            run_id,
            stats: SyncStats::default(),
            succeeded: 0,
            failures: Vec::new(),
            skipped: 0,
            cancelled: false,
        }
    }

    pub fn errors(&self) -> u64 {
        self.failures.len() as u64
    }

    /// Nothing succeeded and at least one item failed.
    pub fn is_total_failure(&self) -> bool {
        self.succeeded == 0 && !self.failures.is_empty()
    }

    pub fn failure_for(&self, path: &str) -> Option<&ItemFailure> {
        self.failures.iter().find(|f| f.path == path)
    }
}

// ============================================================================
// Published State
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub phase: SyncPhase,
    pub stats: SyncStats,
    pub last_error: Option<ErrorReport>,
    pub last_run_id: Option<SyncRunId>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl SyncState {
    /// Move to `to`, rejecting transitions outside the phase graph.
    pub fn transition(&mut self, to: SyncPhase) -> Result<()> {
        if !self.phase.can_transition_to(to) {
            return Err(SyncError::InvalidStateTransition {
                from: self.phase.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Enter `Scanning` for a new run with fresh counters.
    pub fn begin(&mut self, run_id: SyncRunId, now_millis: i64) -> Result<()> {
        self.transition(SyncPhase::Scanning)?;
        self.stats = SyncStats::default();
        self.last_run_id = Some(run_id);
        self.started_at = Some(now_millis);
        self.finished_at = None;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique_and_parse() {
        let a = SyncRunId::new();
        let b = SyncRunId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().parse::<SyncRunId>().unwrap(), a);
        assert!("not-a-uuid".parse::<SyncRunId>().is_err());
    }

    #[test]
    fn test_phase_round_trips_as_upper_case() {
        for phase in [
            SyncPhase::Idle,
            SyncPhase::Scanning,
            SyncPhase::Syncing,
            SyncPhase::Error,
        ] {
            assert_eq!(phase.as_str().parse::<SyncPhase>().unwrap(), phase);
        }
        assert_eq!(
            serde_json::to_string(&SyncPhase::Scanning).unwrap(),
            "\"SCANNING\""
        );
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut state = SyncState::default();
        state.begin(SyncRunId::new(), 10).unwrap();
        assert!(state.is_running());
        state.transition(SyncPhase::Syncing).unwrap();
        state.transition(SyncPhase::Idle).unwrap();
        assert!(!state.is_running());
    }

    #[test]
    fn test_error_lifecycle() {
        let mut state = SyncState::default();
        state.begin(SyncRunId::new(), 10).unwrap();
        state.transition(SyncPhase::Error).unwrap();

        // A new run may start from ERROR
        state.begin(SyncRunId::new(), 20).unwrap();
        state.transition(SyncPhase::Error).unwrap();

        // Or the host acknowledges it
        state.transition(SyncPhase::Idle).unwrap();
        assert_eq!(state.phase, SyncPhase::Idle);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut state = SyncState::default();
        let err = state.transition(SyncPhase::Syncing).unwrap_err();
        assert_eq!(
            err,
            SyncError::InvalidStateTransition {
                from: "IDLE".into(),
                to: "SYNCING".into()
            }
        );
        assert!(state.transition(SyncPhase::Error).is_err());
        assert!(state.transition(SyncPhase::Idle).is_err());

        state.begin(SyncRunId::new(), 0).unwrap();
        // Only one run at a time
        assert!(state.begin(SyncRunId::new(), 0).is_err());
    }

    #[test]
    fn test_begin_resets_counters() {
        let mut state = SyncState::default();
        state.stats.uploaded = 4;
        state.stats.errors = 1;
        state.finished_at = Some(5);

        let run = SyncRunId::new();
        state.begin(run, 99).unwrap();
        assert_eq!(state.stats, SyncStats::default());
        assert_eq!(state.last_run_id, Some(run));
        assert_eq!(state.started_at, Some(99));
        assert_eq!(state.finished_at, None);
    }

    #[test]
    fn test_conflict_outcomes_count_transfer_direction() {
        let mut stats = SyncStats::default();
        stats.record_success(ItemOutcome::ConflictResolved(Resolution::PreferLocal));
        stats.record_success(ItemOutcome::ConflictResolved(Resolution::PreferRemote));
        stats.record_success(ItemOutcome::Linked);
        stats.record_failure();

        assert_eq!(stats.conflicts, 2);
        assert_eq!(stats.uploaded, 1);
        assert_eq!(stats.downloaded, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.current, 4);
    }

    #[test]
    fn test_summary_total_failure() {
        let mut summary = SyncSummary::new(SyncRunId::new());
        assert!(!summary.is_total_failure());

        summary.failures.push(ItemFailure {
            path: "a.md".into(),
            action: PlanAction::Upload,
            error: SyncError::transfer("a.md", "reset"),
        });
        assert!(summary.is_total_failure());
        assert!(summary.failure_for("a.md").is_some());

        summary.succeeded = 1;
        assert!(!summary.is_total_failure());
    }

    #[test]
    fn test_percent() {
        let mut stats = SyncStats::default();
        assert_eq!(stats.percent(), 100);
        stats.total = 4;
        stats.current = 1;
        assert_eq!(stats.percent(), 25);
    }
}
