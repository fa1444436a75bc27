//! Google Drive API request and response types
//!
//! Data structures for the subset of the Drive API v3 used to mirror a vault.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// MIME type Drive uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// `appProperties` key holding the vault-relative path
pub const APP_PROPERTY_PATH: &str = "vault_path";

/// `appProperties` key holding the SHA-256 of the uploaded bytes
pub const APP_PROPERTY_HASH: &str = "content_hash";

/// `appProperties` key holding the MD5 of the uploaded bytes, compared
/// against Drive's own `md5Checksum` to detect content replaced elsewhere
pub const APP_PROPERTY_MD5: &str = "content_md5";

/// Google Drive API file resource
///
/// See: https://developers.google.com/drive/api/v3/reference/files#resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID
    pub id: String,

    /// File name
    #[serde(default)]
    pub name: String,

    /// MIME type
    #[serde(default)]
    pub mime_type: String,

    /// File size in bytes (omitted for folders and Google Docs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Modification time (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,

    /// Monotonically increasing version, bumped on every change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// MD5 checksum (binary files only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_checksum: Option<String>,

    /// Parent folder IDs
    #[serde(default)]
    pub parents: Vec<String>,

    /// Whether file is trashed
    #[serde(default)]
    pub trashed: bool,

    /// Private key/value pairs visible only to this app
    #[serde(default)]
    pub app_properties: HashMap<String, String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn app_property(&self, key: &str) -> Option<&str> {
        self.app_properties.get(key).map(String::as_str)
    }
}

/// Google Drive API files.list response
///
/// See: https://developers.google.com/drive/api/v3/reference/files/list
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesListResponse {
    /// List of files
    #[serde(default)]
    pub files: Vec<DriveFile>,

    /// Token for next page
    pub next_page_token: Option<String>,

    /// Whether the result set may be incomplete
    #[serde(default)]
    pub incomplete_search: bool,
}

/// Metadata body for files.create, files.update and resumable initiation
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub app_properties: HashMap<String, String>,
}

impl FileMetadataRequest {
    pub fn folder(name: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            parents: Some(vec![parent_id.into()]),
            app_properties: HashMap::new(),
        }
    }
}

/// Error envelope returned by the Drive API
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u16,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub reason: String,
}

impl ApiErrorResponse {
    /// Drive reports quota exhaustion as 403 with one of these reasons.
    pub fn is_rate_limited(&self) -> bool {
        self.error.errors.iter().any(|detail| {
            matches!(
                detail.reason.as_str(),
                "rateLimitExceeded" | "userRateLimitExceeded"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_drive_file() {
        let json = r#"{
            "id": "file1",
            "name": "plan.md",
            "mimeType": "text/markdown",
            "size": "42",
            "modifiedTime": "2024-01-01T00:00:00.000Z",
            "version": "17",
            "parents": ["folder1"],
            "appProperties": {"vault_path": "notes/plan.md", "content_hash": "abc"}
        }"#;

        let file: DriveFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.id, "file1");
        assert_eq!(file.version.as_deref(), Some("17"));
        assert_eq!(file.app_property(APP_PROPERTY_PATH), Some("notes/plan.md"));
        assert!(!file.is_folder());
        assert!(!file.trashed);
    }

    #[test]
    fn test_deserialize_folder_without_optional_fields() {
        let json = r#"{"id": "f", "name": "notes", "mimeType": "application/vnd.google-apps.folder"}"#;
        let file: DriveFile = serde_json::from_str(json).unwrap();
        assert!(file.is_folder());
        assert!(file.size.is_none());
        assert!(file.app_properties.is_empty());
    }

    #[test]
    fn test_metadata_request_omits_empty_fields() {
        let body = serde_json::to_value(FileMetadataRequest::folder("notes", "root")).unwrap();
        assert_eq!(body["mimeType"], FOLDER_MIME_TYPE);
        assert_eq!(body["parents"][0], "root");
        assert!(body.get("appProperties").is_none());
    }

    #[test]
    fn test_rate_limit_detection() {
        let json = r#"{"error": {"code": 403, "message": "slow down",
            "errors": [{"reason": "userRateLimitExceeded"}]}}"#;
        let parsed: ApiErrorResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.is_rate_limited());

        let json = r#"{"error": {"code": 403, "message": "no",
            "errors": [{"reason": "insufficientFilePermissions"}]}}"#;
        let parsed: ApiErrorResponse = serde_json::from_str(json).unwrap();
        assert!(!parsed.is_rate_limited());
    }
}
