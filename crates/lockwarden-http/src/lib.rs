//! HTTP surface for lockwarden
//!
//! Provides:
//! - `WorkflowRunner`: one run per workflow kind at a time, AllowedSet
//!   seeding and persistence, audit of every completed run
//! - The axum router: manual workflow invocation, the budget alert webhook,
//!   health and configuration summary

mod error;
mod router;
mod routes;
mod runner;

pub use error::*;
pub use router::*;
pub use runner::*;
