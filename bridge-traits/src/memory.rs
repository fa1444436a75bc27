//! In-memory storage adapters.
//!
//! Both endpoints kept in process memory. Used by hosts that sync into an
//! ephemeral store and by tests that need deterministic trees, revision
//! counters and injected failures.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{BridgeError, Result};
use crate::storage::{
    validate_relative_path, ContentHash, FileContent, FileFingerprint, LocalStorage,
    RemoteFingerprint, RemoteStorage, UploadReceipt,
};
use crate::time::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct StoredFile {
    content: FileContent,
    modified_at: i64,
    revision: u64,
}

/// Failure switches shared by both in-memory adapters.
#[derive(Default)]
struct Faults {
    offline: AtomicBool,
    failing_paths: std::sync::Mutex<HashSet<String>>,
}

impl Faults {
    fn check(&self, path: Option<&str>) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::Offline("simulated offline".to_string()));
        }
        if let Some(path) = path {
            let failing = self
                .failing_paths
                .lock()
                .map_err(|_| BridgeError::OperationFailed("fault table poisoned".into()))?;
            if failing.contains(path) {
                return Err(BridgeError::OperationFailed(format!(
                    "simulated failure for {}",
                    path
                )));
            }
        }
        Ok(())
    }

    fn set_failing(&self, path: &str, failing: bool) {
        if let Ok(mut paths) = self.failing_paths.lock() {
            if failing {
                paths.insert(path.to_string());
            } else {
                paths.remove(path);
            }
        }
    }
}

// ============================================================================
// Local
// ============================================================================

/// Local working copy held in memory.
pub struct MemoryLocalStorage {
    files: RwLock<BTreeMap<String, StoredFile>>,
    clock: Arc<dyn Clock>,
    faults: Faults,
    access_denied: AtomicBool,
}

impl Default for MemoryLocalStorage {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryLocalStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            clock,
            faults: Faults::default(),
            access_denied: AtomicBool::new(false),
        }
    }

    /// Insert a file with an explicit modification time, bypassing faults.
    pub async fn insert(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        mime_type: &str,
        modified_at: i64,
    ) {
        self.files.write().await.insert(
            path.to_string(),
            StoredFile {
                content: FileContent::new(data, mime_type),
                modified_at,
                revision: 0,
            },
        );
    }

    /// Remove a file directly, bypassing faults.
    pub async fn remove(&self, path: &str) {
        self.files.write().await.remove(path);
    }

    pub async fn get(&self, path: &str) -> Option<FileContent> {
        self.files.read().await.get(path).map(|f| f.content.clone())
    }

    pub async fn paths(&self) -> Vec<String> {
        self.files.read().await.keys().cloned().collect()
    }

    pub fn set_permission_denied(&self, denied: bool) {
        self.access_denied.store(denied, Ordering::SeqCst);
    }

    pub fn fail_path(&self, path: &str, failing: bool) {
        self.faults.set_failing(path, failing);
    }

    fn check(&self, path: Option<&str>) -> Result<()> {
        if self.access_denied.load(Ordering::SeqCst) {
            return Err(BridgeError::PermissionDenied(
                "simulated revoked access".to_string(),
            ));
        }
        self.faults.check(path)
    }
}

fn local_fingerprint(path: &str, file: &StoredFile) -> FileFingerprint {
    FileFingerprint {
        path: path.to_string(),
        size: file.content.data.len() as u64,
        content_hash: ContentHash::of(&file.content.data),
        modified_at: file.modified_at,
        mime_type: file.content.mime_type.clone(),
    }
}

#[async_trait]
impl LocalStorage for MemoryLocalStorage {
    async fn list_tree(&self) -> Result<Vec<FileFingerprint>> {
        self.check(None)?;
        let files = self.files.read().await;
        Ok(files
            .iter()
            .map(|(path, file)| local_fingerprint(path, file))
            .collect())
    }

    async fn fingerprint(&self, path: &str) -> Result<Option<FileFingerprint>> {
        self.check(None)?;
        let files = self.files.read().await;
        Ok(files.get(path).map(|file| local_fingerprint(path, file)))
    }

    async fn read_file(&self, path: &str) -> Result<FileContent> {
        self.check(Some(path))?;
        let files = self.files.read().await;
        files
            .get(path)
            .map(|f| f.content.clone())
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, data: Bytes, mime_type: &str) -> Result<()> {
        validate_relative_path(path)?;
        self.check(Some(path))?;
        let modified_at = self.clock.unix_timestamp_millis();
        self.files.write().await.insert(
            path.to_string(),
            StoredFile {
                content: FileContent::new(data, mime_type),
                modified_at,
                revision: 0,
            },
        );
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.check(Some(path))?;
        self.files
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }
}

// ============================================================================
// Remote
// ============================================================================

/// Remote object store held in memory.
///
/// Every write bumps a store-wide revision counter, so revisions are unique
/// and never reused for a path.
pub struct MemoryRemoteStorage {
    files: RwLock<BTreeMap<String, StoredFile>>,
    next_revision: AtomicU64,
    clock: Arc<dyn Clock>,
    faults: Faults,
    auth_expired: AtomicBool,
}

impl Default for MemoryRemoteStorage {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryRemoteStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            next_revision: AtomicU64::new(1),
            clock,
            faults: Faults::default(),
            auth_expired: AtomicBool::new(false),
        }
    }

    /// Insert an object as if another client had written it.
    ///
    /// Returns the assigned revision.
    pub async fn insert(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        mime_type: &str,
        modified_at: i64,
    ) -> String {
        let revision = self.next_revision.fetch_add(1, Ordering::SeqCst);
        self.files.write().await.insert(
            path.to_string(),
            StoredFile {
                content: FileContent::new(data, mime_type),
                modified_at,
                revision,
            },
        );
        revision.to_string()
    }

    pub async fn remove(&self, path: &str) {
        self.files.write().await.remove(path);
    }

    pub async fn get(&self, path: &str) -> Option<FileContent> {
        self.files.read().await.get(path).map(|f| f.content.clone())
    }

    pub async fn revision_of(&self, path: &str) -> Option<String> {
        self.files
            .read()
            .await
            .get(path)
            .map(|f| f.revision.to_string())
    }

    pub async fn paths(&self) -> Vec<String> {
        self.files.read().await.keys().cloned().collect()
    }

    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_auth_expired(&self, expired: bool) {
        self.auth_expired.store(expired, Ordering::SeqCst);
    }

    pub fn fail_path(&self, path: &str, failing: bool) {
        self.faults.set_failing(path, failing);
    }

    fn check(&self, path: Option<&str>) -> Result<()> {
        if self.auth_expired.load(Ordering::SeqCst) {
            return Err(BridgeError::Unauthorized("simulated expired token".into()));
        }
        self.faults.check(path)
    }
}

#[async_trait]
impl RemoteStorage for MemoryRemoteStorage {
    async fn list_tree(&self) -> Result<Vec<RemoteFingerprint>> {
        self.check(None)?;
        let files = self.files.read().await;
        Ok(files
            .iter()
            .map(|(path, file)| RemoteFingerprint {
                path: path.clone(),
                size: file.content.data.len() as u64,
                revision: file.revision.to_string(),
                modified_at: file.modified_at,
                content_hash: Some(ContentHash::of(&file.content.data)),
                mime_type: file.content.mime_type.clone(),
            })
            .collect())
    }

    async fn download_file(&self, path: &str) -> Result<FileContent> {
        self.check(Some(path))?;
        let files = self.files.read().await;
        files
            .get(path)
            .map(|f| f.content.clone())
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }

    async fn upload_file(
        &self,
        path: &str,
        data: Bytes,
        mime_type: &str,
    ) -> Result<UploadReceipt> {
        validate_relative_path(path)?;
        self.check(Some(path))?;
        let revision = self.next_revision.fetch_add(1, Ordering::SeqCst);
        let modified_at = self.clock.unix_timestamp_millis();
        self.files.write().await.insert(
            path.to_string(),
            StoredFile {
                content: FileContent::new(data, mime_type),
                modified_at,
                revision,
            },
        );
        Ok(UploadReceipt {
            revision: revision.to_string(),
            modified_at,
        })
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.check(Some(path))?;
        self.files
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    #[tokio::test]
    async fn test_remote_upload_bumps_revision() {
        let remote = MemoryRemoteStorage::new(Arc::new(ManualClock::new(1_000)));
        let first = remote
            .upload_file("a.md", Bytes::from_static(b"one"), "text/markdown")
            .await
            .unwrap();
        let second = remote
            .upload_file("a.md", Bytes::from_static(b"two"), "text/markdown")
            .await
            .unwrap();

        assert_ne!(first.revision, second.revision);
        assert_eq!(second.modified_at, 1_000);

        let tree = remote.list_tree().await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].revision, second.revision);
        assert_eq!(tree[0].content_hash, Some(ContentHash::of(b"two")));
    }

    #[tokio::test]
    async fn test_local_fault_injection() {
        let local = MemoryLocalStorage::default();
        local.insert("a.md", "x", "text/markdown", 0).await;
        local.fail_path("a.md", true);

        assert!(local.read_file("a.md").await.is_err());
        assert_eq!(local.list_tree().await.unwrap().len(), 1);

        local.set_permission_denied(true);
        assert!(matches!(
            local.list_tree().await,
            Err(BridgeError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_offline_and_auth() {
        let remote = MemoryRemoteStorage::default();
        remote.set_offline(true);
        assert!(remote.list_tree().await.unwrap_err().is_offline());

        remote.set_offline(false);
        remote.set_auth_expired(true);
        assert!(matches!(
            remote.list_tree().await,
            Err(BridgeError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let local = MemoryLocalStorage::default();
        assert!(local.delete_file("nope.md").await.unwrap_err().is_not_found());
    }
}
