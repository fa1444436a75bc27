//! # Bidirectional Sync Engine
//!
//! Keeps a local working copy and a remote file store in agreement.
//!
//! ## Overview
//!
//! A run scans both sides, compares them against the last-synced metadata
//! (three-way reconciliation), and applies the resulting plan:
//! - Uploads and downloads for files changed on one side
//! - Deletions propagated from the side that deleted
//! - Conflicts settled by modification time with a clock-skew tolerance,
//!   keeping the losing version as a conflict copy
//!
//! ## Components
//!
//! - **Model** (`model`): snapshots, metadata entries and the sync plan
//! - **Reconciler** (`reconciler`): pure three-way diff producing a plan
//! - **Conflict Policy** (`conflict`): winner selection and conflict copy naming
//! - **Metadata Store** (`metadata_store`): SQLite and in-memory persistence
//! - **Task Queue** (`task_queue`): per-path FIFO execution
//! - **Run State** (`run`): phases, counters and run summaries
//! - **Status** (`status`): watch channel and event bus publication
//! - **Engine** (`engine`): run orchestration

pub mod conflict;
pub mod engine;
pub mod error;
pub mod metadata_store;
pub mod model;
pub mod reconciler;
pub mod run;
pub mod status;
pub mod task_queue;

pub use conflict::{conflict_copy_path, is_conflict_copy, resolve_conflict, TieBreak, SKEW_TOLERANCE_MS};
pub use engine::{SyncConfig, SyncEngine};
pub use error::{Result, SyncError};
pub use metadata_store::{InMemoryMetadataStore, SqliteMetadataStore, SyncMetadataStore};
pub use model::{
    PlanAction, PlanSummary, Resolution, ScanSnapshot, SyncMetadataEntry, SyncPlan, SyncPlanItem,
};
pub use reconciler::{reconcile, Reconciler};
pub use run::{
    ErrorReport, ItemFailure, ItemOutcome, SyncPhase, SyncRunId, SyncState, SyncStats,
    SyncSummary,
};
pub use status::StatusReporter;
pub use task_queue::{KeyedTaskQueue, TaskHandle};
