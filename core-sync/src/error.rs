use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Remote credential rejected: {0}")]
    AuthExpired(String),

    #[error("Local storage access denied: {0}")]
    PermissionDenied(String),

    #[error("Conflict on {path} needs a manual choice")]
    PathConflictUnresolved { path: String },

    #[error("Transfer failed for {path}: {cause}")]
    TransferFailed { path: String, cause: String },

    #[error("Sync already in progress (run {run_id})")]
    SyncInProgress { run_id: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Metadata store error: {0}")]
    Database(String),

    #[error("Queued task aborted: {0}")]
    TaskAborted(String),

    #[error("Unknown sync failure: {0}")]
    Unknown(String),
}

impl SyncError {
    /// Per-item transfer failure.
    pub fn transfer(path: impl Into<String>, cause: impl ToString) -> Self {
        SyncError::TransferFailed {
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    /// Stable category used in status events and host UIs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Offline(_) => "offline",
            SyncError::AuthExpired(_) => "auth_expired",
            SyncError::PermissionDenied(_) => "permission_denied",
            SyncError::PathConflictUnresolved { .. } => "path_conflict_unresolved",
            SyncError::TransferFailed { .. } => "transfer_failed",
            SyncError::SyncInProgress { .. } => "sync_in_progress",
            SyncError::Cancelled => "cancelled",
            SyncError::InvalidStateTransition { .. } => "invalid_state_transition",
            SyncError::Database(_) => "database",
            SyncError::TaskAborted(_) => "task_aborted",
            SyncError::Unknown(_) => "unknown",
        }
    }

    /// Whether a later retry can succeed without user action.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SyncError::AuthExpired(_)
                | SyncError::PermissionDenied(_)
                | SyncError::PathConflictUnresolved { .. }
        )
    }
}

/// Classify adapter failures into the run-level taxonomy.
impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Offline(msg) => SyncError::Offline(msg),
            BridgeError::Timeout(msg) => SyncError::Offline(format!("timed out: {}", msg)),
            BridgeError::Unauthorized(msg) => SyncError::AuthExpired(msg),
            BridgeError::PermissionDenied(msg) => SyncError::PermissionDenied(msg),
            BridgeError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                SyncError::PermissionDenied(e.to_string())
            }
            other => SyncError::Unknown(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
