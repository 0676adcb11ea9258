//! Orphan heuristics
//!
//! Per resource type, decide whether a resource is unused. Every
//! uncertainty (no probe for the type, absent probe data, probe failure)
//! answers "not orphaned".

use chrono::{DateTime, Utc};
use lockwarden_api::{DiskState, PowerState, Scope, StorageEmptiness};
use lockwarden_cloud_api::{CloudError, ResourceProbe};
use lockwarden_util::{GovernanceError, Result};
use tracing::debug;

pub const DISK_TYPE: &str = "microsoft.compute/disks";
pub const NIC_TYPE: &str = "microsoft.network/networkinterfaces";
pub const PUBLIC_IP_TYPE: &str = "microsoft.network/publicipaddresses";
pub const VM_TYPE: &str = "microsoft.compute/virtualmachines";
pub const STORAGE_TYPE: &str = "microsoft.storage/storageaccounts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanRules {
    /// A VM deallocated at least this long is orphaned
    pub min_deallocated_days: u32,
}

/// Whether the heuristics know how to judge this resource type
pub fn has_orphan_rule(resource_type: &str) -> bool {
    matches!(
        resource_type.to_ascii_lowercase().as_str(),
        DISK_TYPE | NIC_TYPE | PUBLIC_IP_TYPE | VM_TYPE | STORAGE_TYPE
    )
}

/// Run the type's heuristic, surfacing probe failures
pub async fn check_orphan<P: ResourceProbe + ?Sized>(
    scope: &Scope,
    resource_type: &str,
    probe: &P,
    rules: OrphanRules,
    now: DateTime<Utc>,
) -> Result<bool> {
    let probe_err = |e: CloudError| GovernanceError::probe(format!("{}: {}", scope, e));

    let orphaned = match resource_type.to_ascii_lowercase().as_str() {
        DISK_TYPE => matches!(
            probe.disk_state(scope).await.map_err(probe_err)?,
            Some(DiskState::Unattached)
        ),
        NIC_TYPE => probe
            .nic_association(scope)
            .await
            .map_err(probe_err)?
            .is_some_and(|nic| nic.is_unassociated()),
        PUBLIC_IP_TYPE => probe
            .public_ip_association(scope)
            .await
            .map_err(probe_err)?
            .is_some_and(|ip| ip.is_unassociated()),
        VM_TYPE => probe
            .vm_instance_view(scope)
            .await
            .map_err(probe_err)?
            .is_some_and(|view| {
                view.power_state == PowerState::Deallocated
                    && view.since.is_some_and(|since| {
                        (now - since).num_days() >= i64::from(rules.min_deallocated_days)
                    })
            }),
        STORAGE_TYPE => matches!(
            probe.storage_emptiness(scope).await.map_err(probe_err)?,
            Some(StorageEmptiness::Empty)
        ),
        _ => false,
    };

    debug!(resource = %scope, resource_type, orphaned, "Orphan check");
    Ok(orphaned)
}

/// Fail-closed predicate: any error is "not orphaned"
pub async fn is_orphaned<P: ResourceProbe + ?Sized>(
    scope: &Scope,
    resource_type: &str,
    probe: &P,
    rules: OrphanRules,
    now: DateTime<Utc>,
) -> bool {
    check_orphan(scope, resource_type, probe, rules, now)
        .await
        .unwrap_or(false)
}
