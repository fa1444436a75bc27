//! # Core Configuration Module
//!
//! Host-level configuration for a sync session.
//!
//! ## Overview
//!
//! [`CoreConfig`] is assembled with [`CoreConfigBuilder`] and validated
//! fail-fast in `build()`: every required capability must be present before
//! a sync service can be constructed.
//!
//! ## Required Settings
//!
//! - `local_root` - Directory of the working copy
//! - `database_path` - SQLite file holding the sync metadata
//! - `remote_root_folder_id` - Remote folder that mirrors `local_root`
//!
//! ## Bridges
//!
//! - `HttpClient` - required (desktop default: reqwest)
//! - `LocalStorage` - required (desktop default: `LocalDirectory` at `local_root`)
//! - `NetworkMonitor` - optional (desktop default: TCP probe)
//! - `Clock` - optional (default: system clock)
//!
//! With the `desktop-shims` feature the desktop defaults are injected for any
//! bridge that was not provided explicitly.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .local_root("/home/me/Vault")
//!     .database_path("/home/me/.local/share/vault/sync.db")
//!     .remote_root_folder_id("1AbCdEf")
//!     .sync_interval_secs(300)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, HttpClient, LocalStorage, NetworkMonitor, SystemClock};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Shortest allowed period between scheduled runs.
pub const MIN_SYNC_INTERVAL_SECS: u64 = 10;

/// Validated host configuration.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root directory of the local working copy
    pub local_root: PathBuf,

    /// Path to the SQLite database holding sync metadata
    pub database_path: PathBuf,

    /// Remote folder that mirrors `local_root`
    pub remote_root_folder_id: String,

    /// Period for scheduled runs, `None` for manual sync only
    pub sync_interval_secs: Option<u64>,

    /// Buffer size of the event bus
    pub event_buffer_size: usize,

    pub http_client: Arc<dyn HttpClient>,

    pub local_storage: Arc<dyn LocalStorage>,

    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    pub clock: Arc<dyn Clock>,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Re-check invariants; `build()` calls this before returning.
    pub fn validate(&self) -> Result<()> {
        if self.remote_root_folder_id.trim().is_empty() {
            return Err(Error::Config(
                "Remote root folder id must not be empty".to_string(),
            ));
        }
        if let Some(interval) = self.sync_interval_secs {
            if interval < MIN_SYNC_INTERVAL_SECS {
                return Err(Error::Config(format!(
                    "Sync interval must be at least {} seconds, got {}",
                    MIN_SYNC_INTERVAL_SECS, interval
                )));
            }
        }
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("local_root", &self.local_root)
            .field("database_path", &self.database_path)
            .field("remote_root_folder_id", &self.remote_root_folder_id)
            .field("sync_interval_secs", &self.sync_interval_secs)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("http_client", &"<dyn HttpClient>")
            .field("local_storage", &"<dyn LocalStorage>")
            .field("network_monitor", &self.network_monitor.is_some())
            .finish()
    }
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    local_root: Option<PathBuf>,
    database_path: Option<PathBuf>,
    remote_root_folder_id: Option<String>,
    sync_interval_secs: Option<u64>,
    event_buffer_size: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    local_storage: Option<Arc<dyn LocalStorage>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    pub fn local_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.local_root = Some(path.into());
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn remote_root_folder_id(mut self, id: impl Into<String>) -> Self {
        self.remote_root_folder_id = Some(id.into());
        self
    }

    /// Run a sync every `secs` seconds once the service is started.
    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.sync_interval_secs = Some(secs);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Override the working copy adapter (defaults to a directory at
    /// `local_root` on desktop).
    pub fn local_storage(mut self, storage: Arc<dyn LocalStorage>) -> Self {
        self.local_storage = Some(storage);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate and assemble the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when a required setting is missing or invalid
    /// - [`Error::CapabilityMissing`] when a required bridge is missing and
    ///   no platform default is available
    pub fn build(self) -> Result<CoreConfig> {
        let local_root = self.local_root.ok_or_else(|| {
            Error::Config("Local root is required. Use .local_root() to set it.".to_string())
        })?;

        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let remote_root_folder_id = self.remote_root_folder_id.ok_or_else(|| {
            Error::Config(
                "Remote root folder id is required. Use .remote_root_folder_id() to set it."
                    .to_string(),
            )
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let local_storage = match self.local_storage {
            Some(storage) => storage,
            None => provide_default_local_storage(&local_root)?,
        };

        let network_monitor = self.network_monitor.or_else(provide_default_network_monitor);

        let config = CoreConfig {
            local_root,
            database_path,
            remote_root_folder_id,
            sync_interval_secs: self.sync_interval_secs,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            local_storage,
            network_monitor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                  Desktop: enable the 'desktop-shims' feature. \
                  Other hosts: inject a platform-native adapter with .http_client()."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_local_storage(root: &std::path::Path) -> Result<Arc<dyn LocalStorage>> {
    Ok(Arc::new(bridge_desktop::LocalDirectory::new(root)))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_local_storage(_root: &std::path::Path) -> Result<Arc<dyn LocalStorage>> {
    Err(Error::CapabilityMissing {
        capability: "LocalStorage".to_string(),
        message: "No local storage adapter provided. \
                  Desktop: enable the 'desktop-shims' feature to use LocalDirectory. \
                  Other hosts: inject an adapter with .local_storage()."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_network_monitor() -> Option<Arc<dyn NetworkMonitor>> {
    Some(Arc::new(bridge_desktop::DesktopNetworkMonitor::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_network_monitor() -> Option<Arc<dyn NetworkMonitor>> {
    None
}
