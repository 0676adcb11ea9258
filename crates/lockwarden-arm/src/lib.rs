//! Azure Resource Manager backend for lockwarden
//!
//! Implements `CloudClient` over the resource-manager REST API:
//! - OAuth2 client-credentials tokens, cached until shortly before expiry
//! - Management locks at subscription, resource-group and resource scope
//! - Resource group and resource listing with `nextLink` paging
//! - Disk, network interface, VM instance view and blob container probes

mod client;
mod models;
mod token;

pub use client::*;
pub use token::*;
