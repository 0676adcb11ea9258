//! Governance engine for lockwarden
//!
//! This crate is the heart of lockwarden, containing:
//! - Scope resolution (the only place scope strings are parsed)
//! - The lock registry with per-call timeouts
//! - Lock and resource policy, orphan heuristics
//! - Budget alert ingestion
//! - The workflow orchestrator (Listing -> Classifying -> Acting -> Reporting)
//!   driving a bounded worker pool with cancellation

mod budget;
mod engine;
mod orphan;
mod policy;
mod pool;
mod registry;
mod run;
mod scope;

pub use budget::*;
pub use engine::*;
pub use orphan::*;
pub use policy::*;
pub use pool::*;
pub use registry::*;
pub use run::*;
pub use scope::*;
