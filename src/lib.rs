//! Workspace umbrella crate.
//!
//! Re-exports the sync service so a desktop host can depend on a single
//! crate. The individual workspace crates (`core-sync`, `bridge-desktop`,
//! `provider-google-drive`, ...) remain usable on their own.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
