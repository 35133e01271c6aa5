//! Certvault Common
//!
//! Shared utilities for the Certvault crates.
//!
//! This crate provides:
//! - Component-based structured logging with an instance id and an
//!   optional owner/operation scope
//! - `log_debug!`/`log_info!`/`log_warn!`/`log_error!` formatting macros

pub mod logging;
mod macros;

#[doc(hidden)]
pub use log;

pub use logging::{Component, Logger};
