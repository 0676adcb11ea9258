//! Cloud client traits

use async_trait::async_trait;
use lockwarden_api::{
    DiskState, LockSpec, ManagementLock, NicAssociation, PublicIpAssociation, ResourceGroup, Scope,
    StorageEmptiness, TaggedResource, VmInstanceView,
};
use lockwarden_util::GovernanceError;
use std::time::Duration;
use thiserror::Error;

/// Hard failures from the backend.
///
/// "Absent" is never an error: probes return `None` and deletes return
/// `DeleteOutcome::NotFound`.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Throttled by provider (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    #[error("Provider returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type CloudResult<T> = Result<T, CloudError>;

impl From<CloudError> for GovernanceError {
    fn from(err: CloudError) -> Self {
        GovernanceError::RemoteCall(err.to_string())
    }
}

/// Result of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing to delete; not a failure
    NotFound,
}

/// Read-only queries used by orphan heuristics
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn disk_state(&self, disk: &Scope) -> CloudResult<Option<DiskState>>;

    async fn nic_association(&self, nic: &Scope) -> CloudResult<Option<NicAssociation>>;

    async fn public_ip_association(&self, ip: &Scope)
        -> CloudResult<Option<PublicIpAssociation>>;

    async fn vm_instance_view(&self, vm: &Scope) -> CloudResult<Option<VmInstanceView>>;

    async fn storage_emptiness(&self, account: &Scope) -> CloudResult<Option<StorageEmptiness>>;
}

/// Lock and resource operations against one subscription.
///
/// Lock operations take the resolved scope so the backend can pick the
/// subscription, resource-group or resource variant of the underlying call.
#[async_trait]
pub trait CloudClient: ResourceProbe {
    fn subscription_id(&self) -> &str;

    /// Locks at `scope` and, as resource managers report them, every scope below it
    async fn list_locks(&self, scope: &Scope) -> CloudResult<Vec<ManagementLock>>;

    /// Create or update; an existing `(name, scope)` lock is updated in place
    async fn upsert_lock(&self, scope: &Scope, lock: &LockSpec) -> CloudResult<ManagementLock>;

    async fn delete_lock(&self, scope: &Scope, name: &str) -> CloudResult<DeleteOutcome>;

    async fn list_resource_groups(&self) -> CloudResult<Vec<ResourceGroup>>;

    /// Resources in the subscription, or below `scope` when given
    async fn list_resources(&self, scope: Option<&Scope>) -> CloudResult<Vec<TaggedResource>>;

    async fn delete_resource(&self, resource: &Scope) -> CloudResult<DeleteOutcome>;

    /// Optional: check if the backend is usable
    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_errors_become_remote_call_errors() {
        let err: GovernanceError = CloudError::Remote {
            status: 503,
            message: "busy".into(),
        }
        .into();
        assert!(matches!(err, GovernanceError::RemoteCall(ref m) if m.contains("503")));
        assert!(!err.is_fatal());
    }
}
