//! Sync service façade and scheduling.
//!
//! This crate wires host-provided bridges (local storage, HTTP, network
//! monitor, clock) and the Google Drive provider into the sync engine.
//! Desktop hosts enable the `desktop-shims` feature, which lets
//! `CoreConfig` fall back to the adapters from `bridge-desktop`.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::{SyncScheduler, SyncService};
//! use core_sync::SyncConfig;
//!
//! let config = CoreConfig::builder()
//!     .local_root("/home/me/Vault")
//!     .database_path("/home/me/.local/share/vault/sync.db")
//!     .remote_root_folder_id("1AbCdEf")
//!     .sync_interval_secs(300)
//!     .build()?;
//!
//! let service = Arc::new(SyncService::new(config, SyncConfig::default()).await?);
//! service.init_sync(access_token)?;
//! let report = service.start_sync().await?;
//! let scheduler = SyncScheduler::from_config(Arc::clone(&service));
//! ```

pub mod error;
pub mod scheduler;
pub mod service;

pub use error::{CoreError, Result};
pub use scheduler::SyncScheduler;
pub use service::{SyncReport, SyncService};
