//! Lock registry
//!
//! Every remote call goes through here so it carries the configured
//! timeout. Scope strings are resolved before dispatch, which picks the
//! subscription, resource-group or resource variant of the call.

use lockwarden_api::{LockSpec, ManagementLock, ResourceGroup, Scope, ScopeLevel, TaggedResource};
use lockwarden_cloud_api::{CloudClient, CloudResult, DeleteOutcome};
use lockwarden_util::{GovernanceError, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{resolve, RunContext, WorkerPool};

#[derive(Clone)]
pub struct LockRegistry {
    cloud: Arc<dyn CloudClient>,
    call_timeout: Duration,
}

/// Every lock visible in the subscription, gathered across resource groups
#[derive(Debug, Default)]
pub struct LockInventory {
    /// Deduplicated by `(name, scope)`, in discovery order
    pub locks: Vec<ManagementLock>,
    /// None when the resource group listing failed
    pub groups: Option<Vec<ResourceGroup>>,
    /// Listing failures by target scope
    pub errors: Vec<(String, GovernanceError)>,
    pub cancelled: bool,
}

impl LockRegistry {
    pub fn new(cloud: Arc<dyn CloudClient>, call_timeout: Duration) -> Self {
        Self {
            cloud,
            call_timeout,
        }
    }

    pub fn subscription_scope(&self) -> Scope {
        Scope::subscription(self.cloud.subscription_id())
    }

    async fn timed<T>(&self, call: impl Future<Output = CloudResult<T>>) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result.map_err(GovernanceError::from),
            Err(_) => Err(GovernanceError::Timeout(self.call_timeout)),
        }
    }

    pub async fn list_locks(&self, scope: &str) -> Result<Vec<ManagementLock>> {
        let scope = resolve(scope)?;
        self.list_locks_at(&scope).await
    }

    pub async fn list_locks_at(&self, scope: &Scope) -> Result<Vec<ManagementLock>> {
        self.timed(self.cloud.list_locks(scope)).await
    }

    /// Create or update a lock; repeating the call leaves one lock
    pub async fn upsert_lock(&self, scope: &str, spec: &LockSpec) -> Result<ManagementLock> {
        let scope = resolve(scope)?;
        let lock = self.timed(self.cloud.upsert_lock(&scope, spec)).await?;
        debug!(scope = %scope, name = %spec.name, level = %spec.level, "Lock upserted");
        Ok(lock)
    }

    /// Delete a lock; an absent lock is `DeleteOutcome::NotFound`, not an error
    pub async fn delete_lock(&self, scope: &str, name: &str) -> Result<DeleteOutcome> {
        let scope = resolve(scope)?;
        let outcome = self.timed(self.cloud.delete_lock(&scope, name)).await?;
        debug!(scope = %scope, lock = name, outcome = ?outcome, "Lock delete");
        Ok(outcome)
    }

    pub async fn list_resource_groups(&self) -> Result<Vec<ResourceGroup>> {
        self.timed(self.cloud.list_resource_groups()).await
    }

    pub async fn list_resources(&self, scope: Option<&Scope>) -> Result<Vec<TaggedResource>> {
        self.timed(self.cloud.list_resources(scope)).await
    }

    pub async fn delete_resource(&self, id: &str) -> Result<DeleteOutcome> {
        let scope = resolve(id)?;
        if scope.level() != ScopeLevel::Resource {
            return Err(GovernanceError::scope(id, "not a resource id"));
        }
        self.timed(self.cloud.delete_resource(&scope)).await
    }

    /// List locks at the subscription and in every resource group.
    ///
    /// Resource groups are listed through the pool, so one slow or failing
    /// group does not hold up the rest.
    pub async fn enumerate_locks(&self, pool: &WorkerPool, ctx: &RunContext) -> LockInventory {
        let mut inventory = LockInventory::default();
        let mut seen = HashSet::new();
        let mut push = |inventory: &mut LockInventory, locks: Vec<ManagementLock>| {
            for lock in locks {
                if seen.insert(lock.identity()) {
                    inventory.locks.push(lock);
                }
            }
        };

        let subscription = self.subscription_scope();
        match self.list_locks_at(&subscription).await {
            Ok(locks) => push(&mut inventory, locks),
            Err(err) => inventory.errors.push((subscription.path(), err)),
        }

        let groups = match self.list_resource_groups().await {
            Ok(groups) => groups,
            Err(err) => {
                inventory.errors.push((subscription.path(), err));
                return inventory;
            }
        };

        let scopes: Vec<Scope> = groups
            .iter()
            .map(|g| Scope::resource_group(self.cloud.subscription_id(), g.name.clone()))
            .collect();
        inventory.groups = Some(groups);

        let registry = self.clone();
        let outcome = pool
            .run(scopes, ctx, move |scope: Scope| {
                let registry = registry.clone();
                async move { registry.list_locks_at(&scope).await }
            })
            .await;

        for (scope, result) in outcome.completed {
            match result {
                Ok(locks) => push(&mut inventory, locks),
                Err(err) => inventory.errors.push((scope.path(), err)),
            }
        }
        inventory.cancelled = outcome.cancelled;

        debug!(
            locks = inventory.locks.len(),
            errors = inventory.errors.len(),
            "Lock enumeration finished"
        );
        inventory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockwarden_api::LockLevel;
    use lockwarden_cloud_api::MemoryCloud;

    fn setup() -> (Arc<MemoryCloud>, LockRegistry) {
        let cloud = Arc::new(MemoryCloud::new("sub-1"));
        let registry = LockRegistry::new(cloud.clone(), Duration::from_secs(5));
        (cloud, registry)
    }

    fn spec(name: &str) -> LockSpec {
        LockSpec {
            name: name.into(),
            level: LockLevel::ReadOnly,
            notes: Some("guard".into()),
        }
    }

    #[tokio::test]
    async fn upsert_twice_yields_one_lock() {
        let (cloud, registry) = setup();
        registry.upsert_lock("/subscriptions/sub-1", &spec("guard")).await.unwrap();
        registry.upsert_lock("/subscriptions/sub-1/", &spec("guard")).await.unwrap();

        let locks = registry.list_locks("/subscriptions/sub-1").await.unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(cloud.locks_exactly_at(&cloud.subscription_scope()).len(), 1);
    }

    #[tokio::test]
    async fn delete_absent_lock_is_not_found() {
        let (_cloud, registry) = setup();
        let outcome = registry
            .delete_lock("/subscriptions/sub-1/resourceGroups/rg", "missing")
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn dispatch_uses_resolved_level() {
        let (cloud, registry) = setup();
        let rg = cloud.add_resource_group("rg-a");
        cloud.add_lock(&rg, "rg-lock", LockLevel::CanNotDelete);

        let outcome = registry
            .delete_lock("/SUBSCRIPTIONS/sub-1/resourcegroups/RG-A", "RG-LOCK")
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert!(cloud.all_locks().is_empty());
    }

    #[tokio::test]
    async fn unparseable_scope_is_never_dispatched() {
        let (cloud, registry) = setup();
        let err = registry.delete_lock("/tenants/t1", "x").await.unwrap_err();
        assert!(matches!(err, GovernanceError::ScopeParse { .. }));
        assert_eq!(cloud.delete_lock_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let (cloud, registry) = setup();
        cloud.set_latency(Some(Duration::from_secs(30)));
        let err = registry.list_locks("/subscriptions/sub-1").await.unwrap_err();
        assert!(matches!(err, GovernanceError::Timeout(_)));
    }

    #[tokio::test]
    async fn enumeration_dedups_and_survives_group_failures() {
        let (cloud, registry) = setup();
        let a = cloud.add_resource_group("rg-a");
        let b = cloud.add_resource_group("rg-b");
        cloud.add_lock(&cloud.subscription_scope(), "sub-lock", LockLevel::ReadOnly);
        cloud.add_lock(&a, "a-lock", LockLevel::CanNotDelete);
        cloud.add_lock(&b, "b-lock", LockLevel::CanNotDelete);
        cloud.fail_list_locks_at(&b);

        let ctx = RunContext::detached(Duration::from_secs(60));
        let inventory = registry.enumerate_locks(&WorkerPool::new(2), &ctx).await;

        // The subscription listing already covers every group
        let mut names: Vec<_> = inventory.locks.iter().map(|l| l.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a-lock", "b-lock", "sub-lock"]);
        assert_eq!(inventory.errors.len(), 1);
        assert!(inventory.errors[0].0.ends_with("rg-b"));
        assert_eq!(inventory.groups.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn resource_delete_requires_resource_scope() {
        let (_cloud, registry) = setup();
        let err = registry
            .delete_resource("/subscriptions/sub-1/resourceGroups/rg")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::ScopeParse { .. }));
    }
}
