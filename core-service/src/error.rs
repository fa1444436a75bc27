use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Sync is not initialized, call init_sync first")]
    NotInitialized,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),
}

impl CoreError {
    /// The sync error behind this failure, if any.
    pub fn as_sync_error(&self) -> Option<&core_sync::SyncError> {
        match self {
            CoreError::Sync(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
