//! Google Drive remote storage
//!
//! Implements [`RemoteStorage`] on top of the Drive API v3. The vault is a
//! folder tree below `DriveConfig::root_folder_id`; vault paths are rebuilt
//! from folder nesting while listing.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::{
    mime_type_for_path, parent_path, validate_relative_path, ContentHash, FileContent,
    RemoteFingerprint, RemoteStorage, UploadReceipt,
};
use bytes::Bytes;
use chrono::DateTime;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::DriveConfig;
use crate::error::{GoogleDriveError, Result};
use crate::types::{
    ApiErrorResponse, DriveFile, FileMetadataRequest, FilesListResponse, APP_PROPERTY_HASH,
    APP_PROPERTY_MD5, APP_PROPERTY_PATH,
};

/// Google Drive API base URL
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Google Drive upload endpoint base URL
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Maximum results per page (Google Drive API limit)
const MAX_PAGE_SIZE: u32 = 1000;

/// Fields to request for file resources
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,version,md5Checksum,parents,trashed,appProperties";

/// Google Docs, Sheets and friends have no binary body to mirror.
const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";

/// Path to id caches, rebuilt on every listing.
#[derive(Default)]
struct DriveIndex {
    files: HashMap<String, String>,
    folders: HashMap<String, String>,
}

/// Google Drive backed [`RemoteStorage`].
///
/// # Example
///
/// ```ignore
/// use provider_google_drive::{DriveConfig, GoogleDriveStorage};
///
/// let drive = GoogleDriveStorage::new(http_client, access_token, DriveConfig::new(folder_id));
/// let files = drive.list_tree().await?;
/// ```
pub struct GoogleDriveStorage {
    http_client: Arc<dyn HttpClient>,
    access_token: RwLock<String>,
    config: DriveConfig,
    index: Mutex<DriveIndex>,
    /// Serializes folder creation so parallel uploads into a new directory
    /// create it once.
    folder_lock: tokio::sync::Mutex<()>,
}

impl GoogleDriveStorage {
    /// Create a new Google Drive storage adapter
    ///
    /// # Arguments
    ///
    /// * `http_client` - HTTP client implementation
    /// * `access_token` - OAuth 2.0 access token with the `drive.file` scope
    /// * `config` - Root folder and retry settings
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        access_token: impl Into<String>,
        config: DriveConfig,
    ) -> Self {
        Self {
            http_client,
            access_token: RwLock::new(access_token.into()),
            config,
            index: Mutex::new(DriveIndex::default()),
            folder_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Replace the access token after the host refreshed it.
    pub fn set_access_token(&self, token: impl Into<String>) {
        let mut guard = self
            .access_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = token.into();
    }

    /// Cached Drive id for a vault path, if the last listing saw it.
    pub fn cached_file_id(&self, path: &str) -> Option<String> {
        self.index().files.get(path).cloned()
    }

    fn token(&self) -> String {
        self.access_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn index(&self) -> MutexGuard<'_, DriveIndex> {
        self.index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Parse RFC 3339 timestamp to Unix milliseconds
    fn parse_timestamp(rfc3339: &str) -> Option<i64> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.timestamp_millis())
    }

    fn parse<T: DeserializeOwned>(response: &HttpResponse, what: &str) -> Result<T> {
        serde_json::from_slice(&response.body).map_err(|e| {
            GoogleDriveError::ParseError(format!("Failed to parse {}: {}", what, e))
        })
    }

    /// Convert DriveFile to RemoteFingerprint
    fn to_fingerprint(path: String, file: &DriveFile) -> RemoteFingerprint {
        let modified_at = file
            .modified_time
            .as_deref()
            .and_then(Self::parse_timestamp)
            .unwrap_or(0);
        let mime_type = if file.mime_type.is_empty() {
            mime_type_for_path(&path).to_string()
        } else {
            file.mime_type.clone()
        };

        RemoteFingerprint {
            size: file.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
            revision: Self::revision_of(file),
            modified_at,
            content_hash: Self::recorded_hash(file),
            mime_type,
            path,
        }
    }

    /// SHA-256 recorded at upload, trusted only while Drive still holds the
    /// bytes we uploaded. Another client replacing the content keeps our
    /// `appProperties` but changes `md5Checksum`.
    fn recorded_hash(file: &DriveFile) -> Option<ContentHash> {
        let recorded_md5 = file.app_property(APP_PROPERTY_MD5)?;
        let current_md5 = file.md5_checksum.as_deref()?;
        if !recorded_md5.eq_ignore_ascii_case(current_md5) {
            return None;
        }
        file.app_property(APP_PROPERTY_HASH).map(ContentHash::from_hex)
    }

    fn revision_of(file: &DriveFile) -> String {
        file.version
            .clone()
            .or_else(|| file.modified_time.clone())
            .unwrap_or_default()
    }

    fn is_retryable(response: &HttpResponse) -> bool {
        if response.status == 429 || response.is_server_error() {
            return true;
        }
        response.status == 403
            && response
                .json::<ApiErrorResponse>()
                .map(|body| body.is_rate_limited())
                .unwrap_or(false)
    }

    fn status_error(response: &HttpResponse) -> GoogleDriveError {
        let message = response
            .json::<ApiErrorResponse>()
            .map(|body| body.error.message)
            .unwrap_or_else(|_| response.text_lossy());
        GoogleDriveError::from_status(response.status, message)
    }

    fn is_not_found(error: &GoogleDriveError) -> bool {
        matches!(
            error,
            GoogleDriveError::ApiError {
                status_code: 404,
                ..
            } | GoogleDriveError::FileNotFound { .. }
        )
    }

    /// Execute API request with retry logic
    ///
    /// Implements exponential backoff for rate limiting, server errors and
    /// transport failures. Client errors are returned on the first attempt.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    async fn execute_with_retry(&self, request: HttpRequest) -> Result<HttpResponse> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut prepared = request.clone().bearer_token(self.token());
            if prepared.timeout.is_none() {
                prepared = prepared.timeout(self.config.request_timeout);
            }

            match self.http_client.execute(prepared).await {
                Ok(response) if response.is_success() => {
                    debug!("API request succeeded: status={}", response.status);
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status;
                    if !Self::is_retryable(&response) {
                        warn!("API request failed: status={}", status);
                        return Err(Self::status_error(&response));
                    }
                    if attempt >= max_attempts {
                        warn!(
                            "API request failed after {} attempts: status={}",
                            attempt, status
                        );
                        return Err(GoogleDriveError::RetriesExhausted {
                            attempts: attempt,
                            status_code: status,
                        });
                    }
                    let backoff = self.config.backoff(attempt);
                    warn!(
                        "API request failed (attempt {}/{}): status={}, retrying in {:?}",
                        attempt, max_attempts, status, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    let transient = e.is_offline() || matches!(e, BridgeError::Timeout(_));
                    if !transient || attempt >= max_attempts {
                        warn!("API request failed after {} attempts: {}", attempt, e);
                        return Err(e.into());
                    }
                    let backoff = self.config.backoff(attempt);
                    warn!(
                        "API request failed (attempt {}/{}): {}, retrying in {:?}",
                        attempt, max_attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// All non-trashed children of a folder, across every page.
    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let mut children = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = HttpRequest::new(HttpMethod::Get, format!("{}/files", DRIVE_API_BASE))
                .query(
                    "q",
                    format!("'{}' in parents and trashed = false", escape_query(folder_id)),
                )
                .query("pageSize", MAX_PAGE_SIZE.to_string())
                .query(
                    "fields",
                    format!("nextPageToken,incompleteSearch,files({})", FILE_FIELDS),
                );
            if let Some(token) = &page_token {
                request = request.query("pageToken", token.as_str());
            }

            let response = self.execute_with_retry(request).await?;
            let page: FilesListResponse = Self::parse(&response, "files list response")?;
            if page.incomplete_search {
                warn!(folder_id, "Drive reported an incomplete listing");
            }
            children.extend(page.files);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(children),
            }
        }
    }

    /// Breadth-first walk of the vault folder.
    async fn walk_tree(&self) -> Result<Vec<RemoteFingerprint>> {
        let mut pending = VecDeque::from([(self.config.root_folder_id.clone(), String::new())]);
        let mut index = DriveIndex::default();
        let mut by_path: BTreeMap<String, RemoteFingerprint> = BTreeMap::new();

        while let Some((folder_id, prefix)) = pending.pop_front() {
            for file in self.list_children(&folder_id).await? {
                if file.trashed {
                    continue;
                }
                if file.name.is_empty() || file.name.contains('/') || file.name.contains('\\') {
                    warn!(id = %file.id, name = %file.name, "Skipping Drive entry with unusable name");
                    continue;
                }

                let path = join_path(&prefix, &file.name);
                if file.is_folder() {
                    index.folders.insert(path.clone(), file.id.clone());
                    pending.push_back((file.id, path));
                    continue;
                }
                if file.mime_type.starts_with(GOOGLE_APPS_PREFIX) {
                    debug!(path = %path, "Skipping native Google Apps document");
                    continue;
                }

                let fingerprint = Self::to_fingerprint(path.clone(), &file);
                if let Some(existing) = by_path.get(&path) {
                    if existing.modified_at >= fingerprint.modified_at {
                        warn!(path = %path, "Duplicate Drive file name, keeping the newest");
                        continue;
                    }
                }
                index.files.insert(path.clone(), file.id);
                by_path.insert(path, fingerprint);
            }
        }

        *self.index() = index;
        Ok(by_path.into_values().collect())
    }

    /// Find a direct child of `parent_id` by exact name.
    async fn find_child(
        &self,
        parent_id: &str,
        name: &str,
        folder: bool,
    ) -> Result<Option<DriveFile>> {
        let kind = if folder { "=" } else { "!=" };
        let request = HttpRequest::new(HttpMethod::Get, format!("{}/files", DRIVE_API_BASE))
            .query(
                "q",
                format!(
                    "'{}' in parents and name = '{}' and mimeType {} '{}' and trashed = false",
                    escape_query(parent_id),
                    escape_query(name),
                    kind,
                    crate::types::FOLDER_MIME_TYPE
                ),
            )
            .query("orderBy", "modifiedTime desc")
            .query("pageSize", "10")
            .query("fields", format!("files({})", FILE_FIELDS));

        let response = self.execute_with_retry(request).await?;
        let page: FilesListResponse = Self::parse(&response, "files list response")?;
        Ok(page.files.into_iter().next())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveFile> {
        info!(parent_id, name, "Creating Drive folder");
        let request = HttpRequest::new(HttpMethod::Post, format!("{}/files", DRIVE_API_BASE))
            .query("fields", FILE_FIELDS)
            .json(&FileMetadataRequest::folder(name, parent_id))?;
        let response = self.execute_with_retry(request).await?;
        Self::parse(&response, "created folder")
    }

    /// Resolve the folder id for a vault directory, optionally creating the
    /// missing segments. The empty path is the root folder.
    async fn folder_id(&self, dir: &str, create: bool) -> Result<Option<String>> {
        if dir.is_empty() {
            return Ok(Some(self.config.root_folder_id.clone()));
        }
        if let Some(id) = self.index().folders.get(dir) {
            return Ok(Some(id.clone()));
        }

        let _creating = if create {
            Some(self.folder_lock.lock().await)
        } else {
            None
        };

        let mut parent_id = self.config.root_folder_id.clone();
        let mut current = String::new();
        for segment in dir.split('/') {
            current = join_path(&current, segment);
            let cached = self.index().folders.get(&current).cloned();
            let id = match cached {
                Some(id) => id,
                None => match self.find_child(&parent_id, segment, true).await? {
                    Some(folder) => folder.id,
                    None if create => self.create_folder(&parent_id, segment).await?.id,
                    None => return Ok(None),
                },
            };
            self.index().folders.insert(current.clone(), id.clone());
            parent_id = id;
        }
        Ok(Some(parent_id))
    }

    /// Drive id for a vault file, from the cache or by lookup.
    async fn file_id(&self, path: &str) -> Result<Option<String>> {
        if let Some(id) = self.cached_file_id(path) {
            return Ok(Some(id));
        }
        let Some(parent_id) = self.folder_id(parent_path(path).unwrap_or(""), false).await? else {
            return Ok(None);
        };
        let found = self.find_child(&parent_id, file_name(path), false).await?;
        Ok(found.map(|file| {
            self.index().files.insert(path.to_string(), file.id.clone());
            file.id
        }))
    }

    fn forget(&self, path: &str) {
        self.index().files.remove(path);
    }

    /// Start a resumable upload session and return its URL.
    ///
    /// `existing` selects between updating a known file and creating a new
    /// one inside the (possibly new) parent folder.
    async fn start_upload_session(
        &self,
        path: &str,
        existing: Option<&str>,
        mime_type: &str,
        hash: &ContentHash,
        md5: &str,
        len: usize,
    ) -> Result<String> {
        let app_properties = HashMap::from([
            (APP_PROPERTY_PATH.to_string(), path.to_string()),
            (APP_PROPERTY_HASH.to_string(), hash.as_str().to_string()),
            (APP_PROPERTY_MD5.to_string(), md5.to_string()),
        ]);

        let (request, metadata) = match existing {
            Some(id) => (
                HttpRequest::new(
                    HttpMethod::Patch,
                    format!("{}/files/{}", DRIVE_UPLOAD_BASE, urlencoding::encode(id)),
                ),
                FileMetadataRequest {
                    mime_type: Some(mime_type.to_string()),
                    app_properties,
                    ..Default::default()
                },
            ),
            None => {
                let dir = parent_path(path).unwrap_or("");
                let parent_id = self.folder_id(dir, true).await?.ok_or_else(|| {
                    GoogleDriveError::FileNotFound {
                        path: dir.to_string(),
                    }
                })?;
                (
                    HttpRequest::new(HttpMethod::Post, format!("{}/files", DRIVE_UPLOAD_BASE)),
                    FileMetadataRequest {
                        name: Some(file_name(path).to_string()),
                        mime_type: Some(mime_type.to_string()),
                        parents: Some(vec![parent_id]),
                        app_properties,
                    },
                )
            }
        };

        let request = request
            .query("uploadType", "resumable")
            .query("fields", FILE_FIELDS)
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", len.to_string())
            .json(&metadata)?;

        let response = self.execute_with_retry(request).await?;
        response
            .header("location")
            .map(str::to_string)
            .ok_or_else(|| GoogleDriveError::MissingUploadSession {
                path: path.to_string(),
            })
    }

    async fn upload(&self, path: &str, data: Bytes, mime_type: &str) -> Result<UploadReceipt> {
        validate_relative_path(path)?;
        let hash = ContentHash::of(&data);
        let md5 = format!("{:x}", md5::compute(&data));
        let existing = self.file_id(path).await?;

        let session_url = match self
            .start_upload_session(path, existing.as_deref(), mime_type, &hash, &md5, data.len())
            .await
        {
            Err(e) if existing.is_some() && Self::is_not_found(&e) => {
                debug!(path, "Cached file vanished, creating it again");
                self.forget(path);
                self.start_upload_session(path, None, mime_type, &hash, &md5, data.len())
                    .await?
            }
            other => other?,
        };

        let size = data.len();
        let request = HttpRequest::new(HttpMethod::Put, session_url)
            .header("Content-Type", mime_type)
            .body(data)
            .timeout(self.config.transfer_timeout);
        let response = self.execute_with_retry(request).await?;
        let file: DriveFile = Self::parse(&response, "uploaded file")?;

        info!(path, size, file_id = %file.id, "Uploaded file to Drive");
        self.index().files.insert(path.to_string(), file.id.clone());

        Ok(UploadReceipt {
            revision: Self::revision_of(&file),
            modified_at: file
                .modified_time
                .as_deref()
                .and_then(Self::parse_timestamp)
                .unwrap_or(0),
        })
    }

    async fn download(&self, path: &str) -> Result<FileContent> {
        let id = self
            .file_id(path)
            .await?
            .ok_or_else(|| GoogleDriveError::FileNotFound {
                path: path.to_string(),
            })?;

        let request = HttpRequest::new(
            HttpMethod::Get,
            format!("{}/files/{}", DRIVE_API_BASE, urlencoding::encode(&id)),
        )
        .query("alt", "media")
        .timeout(self.config.transfer_timeout);

        let response = match self.execute_with_retry(request).await {
            Err(e) if Self::is_not_found(&e) => {
                self.forget(path);
                return Err(GoogleDriveError::FileNotFound {
                    path: path.to_string(),
                });
            }
            other => other?,
        };

        let mime_type = response
            .header("content-type")
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| mime_type_for_path(path))
            .to_string();

        info!(path, size = response.body.len(), "Downloaded file from Drive");
        Ok(FileContent::new(response.body, mime_type))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let id = self
            .file_id(path)
            .await?
            .ok_or_else(|| GoogleDriveError::FileNotFound {
                path: path.to_string(),
            })?;

        let request = HttpRequest::new(
            HttpMethod::Delete,
            format!("{}/files/{}", DRIVE_API_BASE, urlencoding::encode(&id)),
        );
        let result = self.execute_with_retry(request).await;
        self.forget(path);

        match result {
            Ok(_) => {
                info!(path, file_id = %id, "Deleted file from Drive");
                Ok(())
            }
            Err(e) if Self::is_not_found(&e) => Err(GoogleDriveError::FileNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for GoogleDriveStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleDriveStorage")
            .field("config", &self.config)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl RemoteStorage for GoogleDriveStorage {
    #[instrument(skip(self))]
    async fn list_tree(&self) -> BridgeResult<Vec<RemoteFingerprint>> {
        info!("Listing vault from Google Drive");
        let files = self.walk_tree().await?;
        info!("Listed {} files from Google Drive", files.len());
        Ok(files)
    }

    #[instrument(skip(self))]
    async fn download_file(&self, path: &str) -> BridgeResult<FileContent> {
        Ok(self.download(path).await?)
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn upload_file(
        &self,
        path: &str,
        data: Bytes,
        mime_type: &str,
    ) -> BridgeResult<UploadReceipt> {
        Ok(self.upload(path, data, mime_type).await?)
    }

    #[instrument(skip(self))]
    async fn delete_file(&self, path: &str) -> BridgeResult<()> {
        Ok(self.delete(path).await?)
    }
}

/// Escape a literal for a Drive `q` expression.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}
