//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the sync crates:
//! - Logging and tracing setup
//! - Host configuration with fail-fast bridge validation
//! - Event bus for sync lifecycle notifications

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
