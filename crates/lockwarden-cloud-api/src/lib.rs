//! Cloud client traits for lockwarden
//!
//! This crate defines the capability-based interface between the governance
//! core and a resource-manager backend. It contains no vendor code itself;
//! `MemoryCloud` is an in-memory backend for tests and local dry runs.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
