//! Shared utilities for lockwarden
//!
//! This crate provides:
//! - ID types (RunId, ResourceGroupName)
//! - The error taxonomy shared by every workflow
//! - Schedule windows and the pure `is_scheduled_now` evaluation
//! - Default paths for config and data directories

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
