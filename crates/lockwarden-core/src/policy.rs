//! Lock and resource policy
//!
//! Pure decision functions. The only shared state is the `AllowedSet`,
//! which classification grows through a synchronized accumulator.

use chrono::{DateTime, Utc};
use lockwarden_api::{
    LockCategory, LockLevel, ManagementLock, MarkerFinding, MarkerOutcome, ResourceDisposition,
    Scope, TaggedResource,
};
use lockwarden_util::{ResourceGroupName, Result};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::{resolve, resource_group_of};

/// Resource groups exempt from automated removal during a run.
///
/// Clones share the same set. Membership only grows.
#[derive(Debug, Clone, Default)]
pub struct AllowedSet {
    inner: Arc<Mutex<BTreeSet<ResourceGroupName>>>,
}

impl AllowedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(groups: impl IntoIterator<Item = ResourceGroupName>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(groups.into_iter().collect())),
        }
    }

    fn guard(&self) -> MutexGuard<'_, BTreeSet<ResourceGroupName>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if the group was not already a member
    pub fn insert(&self, group: ResourceGroupName) -> bool {
        self.guard().insert(group)
    }

    pub fn contains(&self, group: &ResourceGroupName) -> bool {
        self.guard().contains(group)
    }

    /// Current members, sorted case-insensitively
    pub fn snapshot(&self) -> Vec<ResourceGroupName> {
        self.guard().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreserveReason {
    /// The lock is itself an exemption marker on a resource group
    Exemption,
    /// An exemption marker that is not at resource-group scope
    NonGroupScope,
    /// The lock sits in a group of the AllowedSet
    AllowedGroup,
}

impl PreserveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreserveReason::Exemption => "exemption",
            PreserveReason::NonGroupScope => "non-group-scope",
            PreserveReason::AllowedGroup => "allowed-group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDecision {
    Preserve(PreserveReason),
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockClassification {
    pub decision: LockDecision,
    /// Set when the lock is an exemption marker
    pub marker: Option<MarkerFinding>,
}

pub fn is_marker(lock: &ManagementLock, marker_name: &str) -> bool {
    lock.name.eq_ignore_ascii_case(marker_name)
}

/// Classify one lock, growing `allowed` when it is a resource-group marker.
///
/// Only a marker at resource-group scope exempts a group. A marker anywhere
/// else is preserved and reported but exempts nothing. Fails only when a
/// marker's scope cannot be resolved.
pub fn classify_lock(
    lock: &ManagementLock,
    allowed: &AllowedSet,
    marker_name: &str,
) -> Result<LockClassification> {
    if !is_marker(lock, marker_name) {
        return Ok(LockClassification {
            decision: LockDecision::Remove,
            marker: None,
        });
    }

    let scope = resolve(&lock.scope)?;
    let classification = match &scope {
        Scope::ResourceGroup { resource_group, .. } => {
            let outcome = if allowed.insert(resource_group.clone()) {
                info!(resource_group = %resource_group, "Exemption marker added resource group");
                MarkerOutcome::AddedToAllowedList
            } else {
                MarkerOutcome::AlreadyInAllowedList
            };
            LockClassification {
                decision: LockDecision::Preserve(PreserveReason::Exemption),
                marker: Some(MarkerFinding {
                    scope: lock.scope.clone(),
                    resource_group: Some(resource_group.clone()),
                    outcome,
                }),
            }
        }
        _ => {
            warn!(scope = %lock.scope, "Exemption marker is not at resource-group scope");
            LockClassification {
                decision: LockDecision::Preserve(PreserveReason::NonGroupScope),
                marker: Some(MarkerFinding {
                    scope: lock.scope.clone(),
                    resource_group: scope.resource_group_name().cloned(),
                    outcome: MarkerOutcome::ScopeNotResourceGroup,
                }),
            }
        }
    };
    Ok(classification)
}

/// Second pass once every marker has been seen: a `Remove` inside an
/// allowed group becomes `Preserve(AllowedGroup)`
pub fn protect_allowed(lock: &ManagementLock, decision: LockDecision, allowed: &AllowedSet) -> LockDecision {
    match decision {
        LockDecision::Remove => match resource_group_of(&lock.scope) {
            Some(group) if allowed.contains(&group) => {
                LockDecision::Preserve(PreserveReason::AllowedGroup)
            }
            _ => LockDecision::Remove,
        },
        preserve => preserve,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCompliance {
    Compliant,
    /// Missing keys, in required order
    MissingTags(Vec<String>),
}

pub fn classify_resource(resource: &TaggedResource, required: &[String]) -> TagCompliance {
    let missing = resource.missing_tags(required);
    if missing.is_empty() {
        TagCompliance::Compliant
    } else {
        TagCompliance::MissingTags(missing)
    }
}

/// A resource in an allowed group, or carrying the marker tag, is protected
pub fn is_protected(
    resource: &TaggedResource,
    group: Option<&ResourceGroupName>,
    allowed: &AllowedSet,
    marker_name: &str,
) -> bool {
    group.is_some_and(|g| allowed.contains(g)) || resource.has_tag(marker_name)
}

pub fn disposition(protected: bool, orphaned: bool) -> ResourceDisposition {
    if protected {
        ResourceDisposition::Protected
    } else if orphaned {
        ResourceDisposition::Orphaned
    } else {
        ResourceDisposition::NonOrphanNonCompliant
    }
}

/// Scope fragments whose `CanNotDelete` locks are never removed by cleanup
pub const CRITICAL_SCOPE_MARKERS: [&str; 5] = [
    "microsoft.keyvault",
    "microsoft.storage",
    "microsoft.sql",
    "microsoft.network/virtualnetworks",
    "microsoft.compute/virtualmachines",
];

/// What still exists in the subscription, for orphaned-lock detection.
///
/// `None` means the listing failed; nothing is judged orphaned then.
#[derive(Debug, Clone, Default)]
pub struct ExistingState {
    pub groups: Option<HashSet<ResourceGroupName>>,
    /// Lowercased canonical paths of top-level resources
    pub resources: Option<HashSet<String>>,
}

impl ExistingState {
    pub fn resource_key(scope: &Scope) -> Option<String> {
        top_level(scope).map(|s| s.path().to_ascii_lowercase())
    }
}

/// The top-level resource a nested resource belongs to
fn top_level(scope: &Scope) -> Option<Scope> {
    let Scope::Resource {
        subscription_id,
        resource_group,
        provider_namespace,
        parent_path,
        resource_type,
        resource_name,
    } = scope
    else {
        return None;
    };

    match parent_path.as_deref().map(|p| p.split('/').collect::<Vec<_>>()) {
        Some(parts) if parts.len() >= 2 => Some(Scope::resource(
            subscription_id,
            resource_group.clone(),
            provider_namespace,
            parts[0],
            parts[1],
        )),
        _ => Some(Scope::resource(
            subscription_id,
            resource_group.clone(),
            provider_namespace,
            resource_type,
            resource_name,
        )),
    }
}

pub fn is_critical(lock: &ManagementLock) -> bool {
    let scope = lock.scope.to_ascii_lowercase();
    lock.level == LockLevel::CanNotDelete
        && CRITICAL_SCOPE_MARKERS.iter().any(|m| scope.contains(m))
}

pub fn is_expired(lock: &ManagementLock, now: DateTime<Utc>, max_age_days: u32) -> bool {
    lock.created_at
        .is_some_and(|created| (now - created).num_days() > i64::from(max_age_days))
}

pub fn is_orphaned_lock(scope: &Scope, existing: &ExistingState) -> bool {
    match scope {
        Scope::Subscription { .. } => false,
        Scope::ResourceGroup { resource_group, .. } => existing
            .groups
            .as_ref()
            .is_some_and(|groups| !groups.contains(resource_group)),
        Scope::Resource { resource_group, .. } => {
            let group_gone = existing
                .groups
                .as_ref()
                .is_some_and(|groups| !groups.contains(resource_group));
            let resource_gone = match (&existing.resources, ExistingState::resource_key(scope)) {
                (Some(resources), Some(key)) => !resources.contains(&key),
                _ => false,
            };
            group_gone || resource_gone
        }
    }
}

/// Cleanup category of a lock that is not exempt.
///
/// Critical wins over every other category; then orphaned, then expired.
pub fn categorize_lock(
    lock: &ManagementLock,
    scope: &Scope,
    existing: &ExistingState,
    now: DateTime<Utc>,
    max_age_days: u32,
) -> (LockCategory, String) {
    if is_critical(lock) {
        return (LockCategory::Critical, "critical resource".to_string());
    }
    if is_orphaned_lock(scope, existing) {
        return (LockCategory::Orphaned, "target no longer exists".to_string());
    }
    if is_expired(lock, now, max_age_days) {
        let age = lock.created_at.map(|c| (now - c).num_days()).unwrap_or_default();
        return (
            LockCategory::Expired,
            format!("{} days old (max {})", age, max_age_days),
        );
    }
    (LockCategory::Retained, "active".to_string())
}
