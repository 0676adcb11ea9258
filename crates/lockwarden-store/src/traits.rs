//! Store trait definitions

use lockwarden_api::WorkflowKind;
use lockwarden_util::ResourceGroupName;

use crate::{AuditEvent, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Allowed resource groups

    /// Load the persisted AllowedSet
    fn load_allowed_groups(&self) -> StoreResult<Vec<ResourceGroupName>>;

    /// Add groups to the AllowedSet; returns how many were new
    fn add_allowed_groups(&self, groups: &[ResourceGroupName]) -> StoreResult<usize>;

    // Schedule slots

    /// Last window slot a scheduled run was executed for
    fn get_last_slot(&self, workflow: WorkflowKind) -> StoreResult<Option<String>>;

    /// Record the window slot a scheduled run was executed for
    fn set_last_slot(&self, workflow: WorkflowKind, slot: &str) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
