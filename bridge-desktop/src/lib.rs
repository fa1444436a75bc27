//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `LocalStorage` over a directory using `tokio::fs` and `walkdir`
//! - `HttpClient` using `reqwest` with rustls
//! - `NetworkMonitor` using a TCP reachability probe
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{LocalDirectory, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let local = Arc::new(LocalDirectory::open("/home/me/Vault").await?);
//!     let http = Arc::new(ReqwestHttpClient::new()?);
//!     // Hand both to the core configuration
//!     Ok(())
//! }
//! ```

mod filesystem;
mod http;
mod network;

pub use filesystem::LocalDirectory;
pub use http::ReqwestHttpClient;
pub use network::DesktopNetworkMonitor;
