//! Scope, lock and resource types

use chrono::{DateTime, Utc};
use lockwarden_util::ResourceGroupName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Level of the management hierarchy a scope points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Subscription,
    ResourceGroup,
    Resource,
}

/// A resolved resource-manager scope.
///
/// Built only by the scope resolver in `lockwarden-core` or directly from
/// typed parts; `path()` yields the canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum Scope {
    Subscription {
        subscription_id: String,
    },
    ResourceGroup {
        subscription_id: String,
        resource_group: ResourceGroupName,
    },
    Resource {
        subscription_id: String,
        resource_group: ResourceGroupName,
        provider_namespace: String,
        /// Alternating `type/name` segments of parent resources, e.g. `virtualNetworks/vnet1`
        parent_path: Option<String>,
        resource_type: String,
        resource_name: String,
    },
}

impl Scope {
    pub fn subscription(subscription_id: impl Into<String>) -> Self {
        Scope::Subscription {
            subscription_id: subscription_id.into(),
        }
    }

    pub fn resource_group(
        subscription_id: impl Into<String>,
        resource_group: impl Into<ResourceGroupName>,
    ) -> Self {
        Scope::ResourceGroup {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
        }
    }

    /// A top-level resource (no parent path)
    pub fn resource(
        subscription_id: impl Into<String>,
        resource_group: impl Into<ResourceGroupName>,
        provider_namespace: impl Into<String>,
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        Scope::Resource {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            provider_namespace: provider_namespace.into(),
            parent_path: None,
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
        }
    }

    pub fn level(&self) -> ScopeLevel {
        match self {
            Scope::Subscription { .. } => ScopeLevel::Subscription,
            Scope::ResourceGroup { .. } => ScopeLevel::ResourceGroup,
            Scope::Resource { .. } => ScopeLevel::Resource,
        }
    }

    pub fn subscription_id(&self) -> &str {
        match self {
            Scope::Subscription { subscription_id }
            | Scope::ResourceGroup {
                subscription_id, ..
            }
            | Scope::Resource {
                subscription_id, ..
            } => subscription_id,
        }
    }

    pub fn resource_group_name(&self) -> Option<&ResourceGroupName> {
        match self {
            Scope::Subscription { .. } => None,
            Scope::ResourceGroup { resource_group, .. }
            | Scope::Resource { resource_group, .. } => Some(resource_group),
        }
    }

    /// Fully qualified resource type, e.g. `Microsoft.Network/virtualNetworks/subnets`
    pub fn full_resource_type(&self) -> Option<String> {
        let Scope::Resource {
            provider_namespace,
            parent_path,
            resource_type,
            ..
        } = self
        else {
            return None;
        };

        let mut parts = vec![provider_namespace.as_str()];
        if let Some(parent) = parent_path {
            // Parent segments alternate type/name; keep the types
            parts.extend(parent.split('/').step_by(2));
        }
        parts.push(resource_type);
        Some(parts.join("/"))
    }

    /// The scope of the resource group containing this scope, if any
    pub fn group_scope(&self) -> Option<Scope> {
        self.resource_group_name()
            .map(|rg| Scope::resource_group(self.subscription_id(), rg.clone()))
    }

    /// Whether `other` lies at or below this scope in the hierarchy
    pub fn contains(&self, other: &Scope) -> bool {
        if !self
            .subscription_id()
            .eq_ignore_ascii_case(other.subscription_id())
        {
            return false;
        }
        match self {
            Scope::Subscription { .. } => true,
            Scope::ResourceGroup { resource_group, .. } => {
                other.resource_group_name() == Some(resource_group)
            }
            Scope::Resource { .. } => self.path().eq_ignore_ascii_case(&other.path()),
        }
    }

    /// Canonical string form of this scope
    pub fn path(&self) -> String {
        match self {
            Scope::Subscription { subscription_id } => format!("/subscriptions/{}", subscription_id),
            Scope::ResourceGroup {
                subscription_id,
                resource_group,
            } => format!(
                "/subscriptions/{}/resourceGroups/{}",
                subscription_id, resource_group
            ),
            Scope::Resource {
                subscription_id,
                resource_group,
                provider_namespace,
                parent_path,
                resource_type,
                resource_name,
            } => {
                let parent = parent_path
                    .as_deref()
                    .map(|p| format!("{}/", p))
                    .unwrap_or_default();
                format!(
                    "/subscriptions/{}/resourceGroups/{}/providers/{}/{}{}/{}",
                    subscription_id,
                    resource_group,
                    provider_namespace,
                    parent,
                    resource_type,
                    resource_name
                )
            }
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Lock level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockLevel {
    ReadOnly,
    CanNotDelete,
}

impl LockLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockLevel::ReadOnly => "ReadOnly",
            LockLevel::CanNotDelete => "CanNotDelete",
        }
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A management lock as reported by the provider.
///
/// `scope` is the raw scope string the provider returned; it is resolved
/// before any operation is dispatched on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagementLock {
    pub name: String,
    pub scope: String,
    pub level: LockLevel,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ManagementLock {
    /// Identity used for deduplication: names and scopes are case-insensitive
    pub fn identity(&self) -> (String, String) {
        (
            self.name.to_ascii_lowercase(),
            self.scope.trim_end_matches('/').to_ascii_lowercase(),
        )
    }
}

/// Desired state for a lock upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSpec {
    pub name: String,
    pub level: LockLevel,
    pub notes: Option<String>,
}

/// A resource group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub name: ResourceGroupName,
    pub location: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A resource with its tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedResource {
    /// Resource-manager id (a resource scope string)
    pub id: String,
    pub name: String,
    /// Fully qualified type, e.g. `Microsoft.Compute/disks`
    pub resource_type: String,
    pub location: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl TaggedResource {
    /// Required tags absent from this resource, in required order
    pub fn missing_tags(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|key| !self.has_tag(key))
            .cloned()
            .collect()
    }

    /// Tag keys compare case-insensitively, as the resource manager does
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.keys().any(|k| k.eq_ignore_ascii_case(key))
    }
}

/// Managed disk attachment state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskState {
    Attached,
    Unattached,
    Reserved,
    Other(String),
}

impl DiskState {
    pub fn from_provider(state: &str) -> Self {
        match state {
            "Attached" => DiskState::Attached,
            "Unattached" => DiskState::Unattached,
            "Reserved" => DiskState::Reserved,
            other => DiskState::Other(other.to_string()),
        }
    }
}

/// What a network interface is bound to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NicAssociation {
    pub virtual_machine: Option<String>,
    pub private_endpoint: Option<String>,
}

impl NicAssociation {
    pub fn is_unassociated(&self) -> bool {
        self.virtual_machine.is_none() && self.private_endpoint.is_none()
    }
}

/// The IP configuration a public IP address is attached to, if any
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublicIpAssociation {
    pub ip_configuration: Option<String>,
}

impl PublicIpAssociation {
    pub fn is_unassociated(&self) -> bool {
        self.ip_configuration.is_none()
    }
}

/// VM power state from the instance view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Running,
    Starting,
    Stopping,
    Stopped,
    Deallocating,
    Deallocated,
    Unknown(String),
}

impl PowerState {
    /// Parse a status code like `PowerState/deallocated`
    pub fn from_code(code: &str) -> Self {
        match code.strip_prefix("PowerState/").unwrap_or(code) {
            "running" => PowerState::Running,
            "starting" => PowerState::Starting,
            "stopping" => PowerState::Stopping,
            "stopped" => PowerState::Stopped,
            "deallocating" => PowerState::Deallocating,
            "deallocated" => PowerState::Deallocated,
            other => PowerState::Unknown(other.to_string()),
        }
    }
}

/// Subset of a VM instance view needed by orphan heuristics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInstanceView {
    pub power_state: PowerState,
    /// When the VM entered its current power state, if the provider says
    pub since: Option<DateTime<Utc>>,
}

/// Whether a storage account still holds data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StorageEmptiness {
    Empty,
    NonEmpty { containers: usize },
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub store_ok: bool,
    /// Whether the cloud client can authenticate at all
    pub cloud_ok: bool,
    pub subscription_id: String,
    pub workflows: Vec<crate::WorkflowKind>,
}
