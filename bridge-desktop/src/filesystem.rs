//! Local working copy backed by a directory on disk.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{
        mime_type_for_path, validate_relative_path, ContentHasher, FileContent, FileFingerprint,
        LocalStorage,
    },
};
use bytes::Bytes;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

/// Suffix of in-flight write files; never reported by `list_tree`.
const TEMP_SUFFIX: &str = ".sync-tmp";

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Directory-backed [`LocalStorage`].
///
/// - Listing walks the tree on a blocking thread and hashes every file with
///   SHA-256
/// - Writes go to a sibling temp file first and are renamed into place, so a
///   crash never leaves a half-written file under the real name
/// - Deleting the last file in a directory prunes the empty directories up
///   to (not including) the root
pub struct LocalDirectory {
    root: PathBuf,
}

impl LocalDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a working copy, creating the root directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| map_io_error(&root.display().to_string(), e))?;
        debug!(root = ?root, "Opened local working copy");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_relative_path(path)?;
        Ok(path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg)))
    }

    async fn prune_empty_parents(&self, file: &Path) {
        let mut current = file.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            debug!(dir = ?dir, "Pruned empty directory");
            current = dir.parent();
        }
    }
}

fn map_io_error(path: &str, e: std::io::Error) -> BridgeError {
    match e.kind() {
        std::io::ErrorKind::NotFound => BridgeError::NotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => {
            BridgeError::PermissionDenied(format!("{}: {}", path, e))
        }
        _ => BridgeError::Io(e),
    }
}

fn millis_since_epoch(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Convert an absolute path below `root` into a forward-slash relative path.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in rel.components() {
        segments.push(component.as_os_str().to_str()?);
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

fn hash_file(path: &Path, rel: &str) -> Result<FileFingerprint> {
    let mut file = std::fs::File::open(path).map_err(|e| map_io_error(rel, e))?;
    let meta = file.metadata().map_err(|e| map_io_error(rel, e))?;

    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| map_io_error(rel, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(FileFingerprint {
        path: rel.to_string(),
        size: meta.len(),
        content_hash: hasher.finish(),
        modified_at: millis_since_epoch(&meta),
        mime_type: mime_type_for_path(rel).to_string(),
    })
}

fn scan_tree(root: &Path) -> Result<Vec<FileFingerprint>> {
    if !root.is_dir() {
        return Err(BridgeError::NotAvailable(format!(
            "local root {} is not a directory",
            root.display()
        )));
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let shown = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                return Err(match e.into_io_error() {
                    Some(io) => map_io_error(&shown, io),
                    None => BridgeError::OperationFailed(format!("filesystem loop at {}", shown)),
                });
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative_path(root, entry.path()) else {
            warn!(path = ?entry.path(), "Skipping file with non UTF-8 name");
            continue;
        };
        if rel.ends_with(TEMP_SUFFIX) {
            continue;
        }
        match hash_file(entry.path(), &rel) {
            Ok(fp) => out.push(fp),
            // Deleted between the directory read and the open
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

#[async_trait]
impl LocalStorage for LocalDirectory {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list_tree(&self) -> Result<Vec<FileFingerprint>> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || scan_tree(&root))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("scan task failed: {}", e)))??;
        debug!(count = files.len(), "Scanned local tree");
        Ok(files)
    }

    async fn fingerprint(&self, path: &str) -> Result<Option<FileFingerprint>> {
        let full = self.resolve(path)?;
        let rel = path.to_string();
        let result = tokio::task::spawn_blocking(move || hash_file(&full, &rel))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("hash task failed: {}", e)))?;
        match result {
            Ok(fp) => Ok(Some(fp)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn read_file(&self, path: &str) -> Result<FileContent> {
        let full = self.resolve(path)?;
        let data = fs::read(&full).await.map_err(|e| map_io_error(path, e))?;
        debug!(path, size = data.len(), "Read local file");
        Ok(FileContent::new(data, mime_type_for_path(path)))
    }

    async fn write_file(&self, path: &str, data: Bytes, mime_type: &str) -> Result<()> {
        let full = self.resolve(path)?;
        let mut tmp_name = full.as_os_str().to_owned();
        tmp_name.push(TEMP_SUFFIX);
        let tmp = PathBuf::from(tmp_name);

        let parent = full.parent().map(Path::to_path_buf);
        if let Some(parent) = &parent {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_error(path, e))?;
        }

        if let Err(e) = fs::write(&tmp, &data).await {
            // A concurrent delete may have pruned the freshly created parent
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(map_io_error(path, e));
            }
            if let Some(parent) = &parent {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| map_io_error(path, e))?;
            }
            fs::write(&tmp, &data)
                .await
                .map_err(|e| map_io_error(path, e))?;
        }

        if let Err(e) = fs::rename(&tmp, &full).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(map_io_error(path, e));
        }

        debug!(path, size = data.len(), mime_type, "Wrote local file");
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full)
            .await
            .map_err(|e| map_io_error(path, e))?;
        debug!(path, "Deleted local file");
        self.prune_empty_parents(&full).await;
        Ok(())
    }
}
