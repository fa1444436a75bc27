//! Error types for the Google Drive provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Google Drive provider errors
#[derive(Error, Debug)]
pub enum GoogleDriveError {
    /// Access token missing, expired or revoked (HTTP 401)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Token lacks the scope or the caller lacks access (HTTP 403)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// API request returned a non-retryable error
    #[error("Google Drive API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Still throttled or failing after every retry
    #[error("Request still failing after {attempts} attempts (last status {status_code})")]
    RetriesExhausted { attempts: u32, status_code: u16 },

    /// No file or folder at the given vault path
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Resumable upload initiation returned no session URL
    #[error("Upload session for {path} has no Location header")]
    MissingUploadSession { path: String },

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Google Drive operations
pub type Result<T> = std::result::Result<T, GoogleDriveError>;

impl GoogleDriveError {
    /// Classify a final, non-success HTTP status.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            401 => GoogleDriveError::AuthenticationFailed(message),
            403 => GoogleDriveError::PermissionDenied(message),
            _ => GoogleDriveError::ApiError {
                status_code,
                message,
            },
        }
    }
}

impl From<GoogleDriveError> for BridgeError {
    fn from(error: GoogleDriveError) -> Self {
        match error {
            GoogleDriveError::AuthenticationFailed(msg) => BridgeError::Unauthorized(msg),
            GoogleDriveError::PermissionDenied(msg) => BridgeError::PermissionDenied(msg),
            GoogleDriveError::FileNotFound { path } => BridgeError::NotFound(path),
            GoogleDriveError::ApiError {
                status_code: 404,
                message,
            } => BridgeError::NotFound(message),
            GoogleDriveError::BridgeError(e) => e,
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = GoogleDriveError::ApiError {
            status_code: 400,
            message: "Invalid query".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Google Drive API error (status 400): Invalid query"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            GoogleDriveError::from_status(401, "expired"),
            GoogleDriveError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            GoogleDriveError::from_status(403, "insufficient scope"),
            GoogleDriveError::PermissionDenied(_)
        ));
        assert!(matches!(
            GoogleDriveError::from_status(400, "bad"),
            GoogleDriveError::ApiError { status_code: 400, .. }
        ));
    }

    #[test]
    fn test_error_conversion() {
        let bridge: BridgeError = GoogleDriveError::AuthenticationFailed("Token expired".into()).into();
        assert!(matches!(bridge, BridgeError::Unauthorized(_)));

        let bridge: BridgeError = GoogleDriveError::PermissionDenied("scope".into()).into();
        assert!(matches!(bridge, BridgeError::PermissionDenied(_)));

        let bridge: BridgeError = GoogleDriveError::FileNotFound {
            path: "notes/a.md".into(),
        }
        .into();
        assert!(bridge.is_not_found());

        let bridge: BridgeError = GoogleDriveError::BridgeError(BridgeError::Offline("dns".into())).into();
        assert!(bridge.is_offline());

        let bridge: BridgeError = GoogleDriveError::RetriesExhausted {
            attempts: 3,
            status_code: 503,
        }
        .into();
        assert!(matches!(bridge, BridgeError::OperationFailed(_)));
    }
}
