//! Data model shared by every lockwarden crate
//!
//! This crate defines:
//! - Scopes and management locks
//! - Resources, resource groups and probe results
//! - Budget alert events
//! - Run reports (the only externally observable artifact of a workflow)

mod event;
mod report;
mod types;

pub use event::*;
pub use report::*;
pub use types::*;

/// Current report format version
pub const REPORT_VERSION: u32 = 1;
