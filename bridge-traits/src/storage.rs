//! Storage Abstractions
//!
//! Contracts for the two endpoints of a sync session: the local working copy
//! and the remote object store. Both sides report their trees as fingerprints
//! keyed by a POSIX-style relative path (`notes/daily/2024-01-01.md`).
//!
//! Payloads always travel as raw [`Bytes`] with a MIME tag alongside them, so
//! text and binary files share a single code path.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{BridgeError, Result};

/// MIME type used when nothing better is known.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// ============================================================================
// Content hashing
// ============================================================================

/// SHA-256 digest of a file's raw bytes, stored as lowercase hex.
///
/// Every adapter must produce hashes through this type so that equality is a
/// valid "unchanged" check across endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash a complete buffer.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finish()
    }

    /// Wrap a previously computed hex digest (e.g. read back from storage).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental hasher for content that is read in chunks.
#[derive(Default)]
pub struct ContentHasher(Sha256);

impl ContentHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finish(self) -> ContentHash {
        ContentHash(format!("{:x}", self.0.finalize()))
    }
}

// ============================================================================
// Fingerprints
// ============================================================================

/// Snapshot of a single local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Relative, forward-slash separated, case-sensitive path
    pub path: String,
    pub size: u64,
    pub content_hash: ContentHash,
    /// Milliseconds since the Unix epoch
    pub modified_at: i64,
    pub mime_type: String,
}

/// Snapshot of a single remote object.
///
/// Remote stores identify content by revision rather than by hash. When the
/// object was written by this engine the hash recorded at upload time is
/// reported too, which lets identical creations on both sides be linked
/// without a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFingerprint {
    pub path: String,
    pub size: u64,
    pub revision: String,
    pub modified_at: i64,
    pub content_hash: Option<ContentHash>,
    pub mime_type: String,
}

/// Raw file body with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub data: Bytes,
    pub mime_type: String,
}

impl FileContent {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Result of a successful remote write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub revision: String,
    pub modified_at: i64,
}

// ============================================================================
// Adapter contracts
// ============================================================================

/// Local working copy.
///
/// Implementations create intermediate directories implicitly on write and
/// must never decode or transform file bodies.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::LocalStorage;
///
/// async fn total_size(local: &dyn LocalStorage) -> Result<u64> {
///     Ok(local.list_tree().await?.iter().map(|f| f.size).sum())
/// }
/// ```
#[async_trait]
pub trait LocalStorage: Send + Sync {
    /// Enumerate every regular file below the root.
    async fn list_tree(&self) -> Result<Vec<FileFingerprint>>;

    /// Fingerprint a single path, `None` if it does not exist.
    async fn fingerprint(&self, path: &str) -> Result<Option<FileFingerprint>> {
        Ok(self
            .list_tree()
            .await?
            .into_iter()
            .find(|f| f.path == path))
    }

    /// Read the raw bytes of a file.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] when the path does not exist.
    async fn read_file(&self, path: &str) -> Result<FileContent>;

    /// Write a file, creating parent directories as needed.
    async fn write_file(&self, path: &str, data: Bytes, mime_type: &str) -> Result<()>;

    /// Delete a file.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] when the path does not exist.
    async fn delete_file(&self, path: &str) -> Result<()>;
}

/// Remote object store (cloud drive).
///
/// Constructed by the host with an access credential; the engine never sees
/// authentication details. Timeouts are enforced per request inside the
/// adapter and surface as [`BridgeError::Timeout`].
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Enumerate every object below the sync root.
    async fn list_tree(&self) -> Result<Vec<RemoteFingerprint>>;

    /// Fetch the raw bytes of an object.
    async fn download_file(&self, path: &str) -> Result<FileContent>;

    /// Create or replace an object, returning its new revision.
    async fn upload_file(&self, path: &str, data: Bytes, mime_type: &str)
        -> Result<UploadReceipt>;

    /// Delete an object.
    async fn delete_file(&self, path: &str) -> Result<()>;
}

// ============================================================================
// Path helpers
// ============================================================================

/// Guess a content type from the file extension.
pub fn mime_type_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("md") | Some("markdown") => "text/markdown",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Reject paths that could escape the sync root.
///
/// Valid paths are relative, use `/` as separator, and contain no empty,
/// `.` or `..` segments.
pub fn validate_relative_path(path: &str) -> Result<()> {
    let invalid = |reason: &str| BridgeError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.starts_with('/') {
        return Err(invalid("absolute path"));
    }
    if path.contains('\\') {
        return Err(invalid("backslash separator"));
    }
    if path.contains(':') && path.split('/').next().is_some_and(|s| s.ends_with(':')) {
        return Err(invalid("drive prefix"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("relative segment")),
            _ => {}
        }
    }
    Ok(())
}

/// Parent directory of a relative path, `None` at the root.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        let hash = ContentHash::of(b"hello");
        assert_eq!(
            hash.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_incremental_hash_matches_one_shot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hel");
        hasher.update(b"lo");
        assert_eq!(hasher.finish(), ContentHash::of(b"hello"));
    }

    #[test]
    fn test_from_hex_normalizes_case() {
        assert_eq!(ContentHash::from_hex("ABCDEF"), ContentHash::from_hex("abcdef"));
    }

    #[test]
    fn test_mime_type_for_path() {
        assert_eq!(mime_type_for_path("notes/a.md"), "text/markdown");
        assert_eq!(mime_type_for_path("img/photo.JPG"), "image/jpeg");
        assert_eq!(mime_type_for_path("img/pic.png"), "image/png");
        assert_eq!(mime_type_for_path("data.json"), "application/json");
        assert_eq!(mime_type_for_path("archive.tar.gz"), DEFAULT_MIME_TYPE);
        assert_eq!(mime_type_for_path("dir.v2/README"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_validate_relative_path() {
        assert!(validate_relative_path("a/b/c.png").is_ok());
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("a/../../b").is_err());
        assert!(validate_relative_path("a//b").is_err());
        assert!(validate_relative_path("a\\b").is_err());
        assert!(validate_relative_path("C:/windows").is_err());
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("a/b/c.md"), Some("a/b"));
        assert_eq!(parent_path("c.md"), None);
    }
}
