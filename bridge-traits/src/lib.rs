//! # Host Bridge Traits
//!
//! Capability contracts between the sync core and the host it runs in.
//!
//! ## Overview
//!
//! The sync engine never touches a filesystem, a socket, or a clock directly.
//! Each of those is a trait defined here and implemented by an adapter crate
//! (`bridge-desktop` for native hosts, `provider-*` crates for cloud drives).
//!
//! ## Traits
//!
//! ### Sync endpoints
//! - [`LocalStorage`](storage::LocalStorage) - The user's working copy
//! - [`RemoteStorage`](storage::RemoteStorage) - The cloud object tree
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Transport used by remote providers
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity pre-check before a scan
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Implementations
//!
//! | Capability | Crate |
//! |------------|-------|
//! | `LocalStorage` | `bridge-desktop::LocalDirectory`, [`memory::MemoryLocalStorage`] |
//! | `RemoteStorage` | `provider-google-drive::GoogleDriveStorage`, [`memory::MemoryRemoteStorage`] |
//! | `HttpClient` | `bridge-desktop::ReqwestHttpClient` |
//! | `NetworkMonitor` | `bridge-desktop::DesktopNetworkMonitor` |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Adapters should
//! map platform failures onto the specific variants (`Offline`, `Unauthorized`,
//! `PermissionDenied`, `NotFound`, `Timeout`) because the sync engine decides
//! whether a failure is run-fatal or per-path from the variant alone.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so adapters can be shared across
//! the per-path tasks spawned during plan execution.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::storage::{LocalStorage, RemoteStorage};
//!
//! async fn push_one(local: &dyn LocalStorage, remote: &dyn RemoteStorage, path: &str) -> Result<String> {
//!     let content = local.read_file(path).await?;
//!     let receipt = remote.upload_file(path, content.data, &content.mime_type).await?;
//!     Ok(receipt.revision)
//! }
//! ```

pub mod error;
pub mod http;
pub mod memory;
pub mod network;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use memory::{MemoryLocalStorage, MemoryRemoteStorage};
pub use network::{NetworkInfo, NetworkMonitor, NetworkStatus};
pub use storage::{
    mime_type_for_path, ContentHash, ContentHasher, FileContent, FileFingerprint, LocalStorage,
    RemoteFingerprint, RemoteStorage, UploadReceipt,
};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
