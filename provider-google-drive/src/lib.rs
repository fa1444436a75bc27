//! # Google Drive Provider
//!
//! Implements `RemoteStorage` for Google Drive API v3.
//!
//! ## Overview
//!
//! This module provides:
//! - Recursive listing of a vault folder with pagination
//! - Vault path reconstruction from folder nesting, with path to id caches
//! - Resumable uploads that tag files with `appProperties`
//! - Downloads via `alt=media` and permanent deletion
//! - Exponential backoff for rate limiting and server errors

pub mod config;
pub mod error;
pub mod storage;
pub mod types;

pub use config::DriveConfig;
pub use error::{GoogleDriveError, Result};
pub use storage::GoogleDriveStorage;
