//! In-memory cloud backend for testing and dry runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lockwarden_api::{
    DiskState, LockLevel, LockSpec, ManagementLock, NicAssociation, PublicIpAssociation,
    ResourceGroup, Scope, StorageEmptiness, TaggedResource, VmInstanceView,
};
use lockwarden_util::ResourceGroupName;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::{CloudClient, CloudError, CloudResult, DeleteOutcome, ResourceProbe};

#[derive(Debug, Clone)]
struct StoredLock {
    scope: Scope,
    lock: ManagementLock,
}

#[derive(Debug, Clone)]
struct StoredResource {
    scope: Scope,
    resource: TaggedResource,
}

#[derive(Debug, Default)]
struct MemoryState {
    locks: Vec<StoredLock>,
    groups: Vec<ResourceGroup>,
    resources: Vec<StoredResource>,
    disks: HashMap<String, DiskState>,
    nics: HashMap<String, NicAssociation>,
    public_ips: HashMap<String, PublicIpAssociation>,
    vms: HashMap<String, VmInstanceView>,
    storage: HashMap<String, StorageEmptiness>,
}

fn key(scope: &Scope) -> String {
    scope.path().to_ascii_lowercase()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory cloud backend.
///
/// Listing follows resource-manager semantics: listing at a scope returns
/// locks at that scope and every scope below it.
pub struct MemoryCloud {
    subscription_id: String,
    state: Mutex<MemoryState>,
    delete_lock_calls: AtomicUsize,
    delete_resource_calls: AtomicUsize,

    /// Delay applied to every call (simulates provider latency)
    pub latency: Arc<Mutex<Option<Duration>>>,

    /// Lock names (case-insensitive) whose deletion fails
    pub fail_delete_locks: Arc<Mutex<HashSet<String>>>,

    /// Scope paths (case-insensitive) whose lock listing fails
    pub fail_list_locks: Arc<Mutex<HashSet<String>>>,

    /// Configure upsert to fail
    pub fail_upsert: Arc<Mutex<bool>>,

    /// Configure every probe to fail
    pub fail_probes: Arc<Mutex<bool>>,

    /// Reported by `is_healthy`
    pub healthy: Arc<Mutex<bool>>,
}

impl MemoryCloud {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            state: Mutex::new(MemoryState::default()),
            delete_lock_calls: AtomicUsize::new(0),
            delete_resource_calls: AtomicUsize::new(0),
            latency: Arc::new(Mutex::new(None)),
            fail_delete_locks: Arc::new(Mutex::new(HashSet::new())),
            fail_list_locks: Arc::new(Mutex::new(HashSet::new())),
            fail_upsert: Arc::new(Mutex::new(false)),
            fail_probes: Arc::new(Mutex::new(false)),
            healthy: Arc::new(Mutex::new(true)),
        }
    }

    pub fn subscription_scope(&self) -> Scope {
        Scope::subscription(&self.subscription_id)
    }

    pub fn group_scope(&self, name: &str) -> Scope {
        Scope::resource_group(&self.subscription_id, name)
    }

    /// Add a resource group (no-op if it exists)
    pub fn add_resource_group(&self, name: &str) -> Scope {
        let name = ResourceGroupName::new(name);
        let mut state = lock(&self.state);
        if !state.groups.iter().any(|g| g.name == name) {
            state.groups.push(ResourceGroup {
                name: name.clone(),
                location: "westeurope".into(),
                tags: BTreeMap::new(),
            });
        }
        Scope::resource_group(&self.subscription_id, name)
    }

    pub fn add_lock(&self, scope: &Scope, name: &str, level: LockLevel) {
        self.add_lock_created(scope, name, level, None);
    }

    /// Add a lock with a provider creation timestamp
    pub fn add_lock_created(
        &self,
        scope: &Scope,
        name: &str,
        level: LockLevel,
        created_at: Option<DateTime<Utc>>,
    ) {
        lock(&self.state).locks.push(StoredLock {
            scope: scope.clone(),
            lock: ManagementLock {
                name: name.to_string(),
                scope: scope.path(),
                level,
                notes: None,
                created_at,
            },
        });
    }

    /// Add a lock whose scope string is stored verbatim, bypassing typed scopes
    pub fn add_raw_lock(&self, scope: &str, name: &str, level: LockLevel) {
        lock(&self.state).locks.push(StoredLock {
            scope: self.subscription_scope(),
            lock: ManagementLock {
                name: name.to_string(),
                scope: scope.to_string(),
                level,
                notes: None,
                created_at: None,
            },
        });
    }

    /// Add a resource with the given tags; its resource group is created if missing
    pub fn add_resource(&self, scope: Scope, tags: &[(&str, &str)]) -> Scope {
        if let Some(rg) = scope.resource_group_name() {
            self.add_resource_group(rg.as_str());
        }
        let resource = TaggedResource {
            id: scope.path(),
            name: match &scope {
                Scope::Resource { resource_name, .. } => resource_name.clone(),
                other => other.path(),
            },
            resource_type: scope.full_resource_type().unwrap_or_default(),
            location: "westeurope".into(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        lock(&self.state).resources.push(StoredResource {
            scope: scope.clone(),
            resource,
        });
        scope
    }

    pub fn set_disk_state(&self, disk: &Scope, state: DiskState) {
        lock(&self.state).disks.insert(key(disk), state);
    }

    pub fn set_nic_association(&self, nic: &Scope, association: NicAssociation) {
        lock(&self.state).nics.insert(key(nic), association);
    }

    pub fn set_public_ip_association(&self, ip: &Scope, association: PublicIpAssociation) {
        lock(&self.state).public_ips.insert(key(ip), association);
    }

    pub fn set_vm_instance_view(&self, vm: &Scope, view: VmInstanceView) {
        lock(&self.state).vms.insert(key(vm), view);
    }

    pub fn set_storage_emptiness(&self, account: &Scope, emptiness: StorageEmptiness) {
        lock(&self.state).storage.insert(key(account), emptiness);
    }

    /// Remove a resource group and everything in it, without counting a delete call
    pub fn drop_resource_group(&self, name: &str) {
        let name = ResourceGroupName::new(name);
        let mut state = lock(&self.state);
        state.groups.retain(|g| g.name != name);
        state
            .resources
            .retain(|r| r.scope.resource_group_name() != Some(&name));
    }

    pub fn fail_delete_lock(&self, name: &str) {
        lock(&self.fail_delete_locks).insert(name.to_ascii_lowercase());
    }

    pub fn fail_list_locks_at(&self, scope: &Scope) {
        lock(&self.fail_list_locks).insert(key(scope));
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// Snapshot of every stored lock
    pub fn all_locks(&self) -> Vec<ManagementLock> {
        lock(&self.state)
            .locks
            .iter()
            .map(|s| s.lock.clone())
            .collect()
    }

    /// Locks stored exactly at `scope`
    pub fn locks_exactly_at(&self, scope: &Scope) -> Vec<ManagementLock> {
        let k = key(scope);
        lock(&self.state)
            .locks
            .iter()
            .filter(|s| key(&s.scope) == k)
            .map(|s| s.lock.clone())
            .collect()
    }

    pub fn resource_count(&self) -> usize {
        lock(&self.state).resources.len()
    }

    pub fn delete_lock_calls(&self) -> usize {
        self.delete_lock_calls.load(Ordering::SeqCst)
    }

    pub fn delete_resource_calls(&self) -> usize {
        self.delete_resource_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *lock(&self.latency);
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_probe(&self) -> CloudResult<()> {
        if *lock(&self.fail_probes) {
            return Err(CloudError::Remote {
                status: 500,
                message: "Mock probe failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceProbe for MemoryCloud {
    async fn disk_state(&self, disk: &Scope) -> CloudResult<Option<DiskState>> {
        self.simulate_latency().await;
        self.check_probe()?;
        Ok(lock(&self.state).disks.get(&key(disk)).cloned())
    }

    async fn nic_association(&self, nic: &Scope) -> CloudResult<Option<NicAssociation>> {
        self.simulate_latency().await;
        self.check_probe()?;
        Ok(lock(&self.state).nics.get(&key(nic)).cloned())
    }

    async fn public_ip_association(
        &self,
        ip: &Scope,
    ) -> CloudResult<Option<PublicIpAssociation>> {
        self.simulate_latency().await;
        self.check_probe()?;
        Ok(lock(&self.state).public_ips.get(&key(ip)).cloned())
    }

    async fn vm_instance_view(&self, vm: &Scope) -> CloudResult<Option<VmInstanceView>> {
        self.simulate_latency().await;
        self.check_probe()?;
        Ok(lock(&self.state).vms.get(&key(vm)).cloned())
    }

    async fn storage_emptiness(&self, account: &Scope) -> CloudResult<Option<StorageEmptiness>> {
        self.simulate_latency().await;
        self.check_probe()?;
        Ok(lock(&self.state).storage.get(&key(account)).cloned())
    }
}

#[async_trait]
impl CloudClient for MemoryCloud {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn list_locks(&self, scope: &Scope) -> CloudResult<Vec<ManagementLock>> {
        self.simulate_latency().await;
        if lock(&self.fail_list_locks).contains(&key(scope)) {
            return Err(CloudError::Remote {
                status: 500,
                message: format!("Mock list failure at {}", scope),
            });
        }

        Ok(lock(&self.state)
            .locks
            .iter()
            .filter(|s| scope.contains(&s.scope))
            .map(|s| s.lock.clone())
            .collect())
    }

    async fn upsert_lock(&self, scope: &Scope, spec: &LockSpec) -> CloudResult<ManagementLock> {
        self.simulate_latency().await;
        if *lock(&self.fail_upsert) {
            return Err(CloudError::Remote {
                status: 409,
                message: "Mock upsert failure".into(),
            });
        }

        let k = key(scope);
        let mut state = lock(&self.state);
        if let Some(existing) = state
            .locks
            .iter_mut()
            .find(|s| key(&s.scope) == k && s.lock.name.eq_ignore_ascii_case(&spec.name))
        {
            existing.lock.level = spec.level;
            existing.lock.notes = spec.notes.clone();
            return Ok(existing.lock.clone());
        }

        let created = ManagementLock {
            name: spec.name.clone(),
            scope: scope.path(),
            level: spec.level,
            notes: spec.notes.clone(),
            created_at: Some(lockwarden_util::now()),
        };
        state.locks.push(StoredLock {
            scope: scope.clone(),
            lock: created.clone(),
        });
        Ok(created)
    }

    async fn delete_lock(&self, scope: &Scope, name: &str) -> CloudResult<DeleteOutcome> {
        self.simulate_latency().await;
        self.delete_lock_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.fail_delete_locks).contains(&name.to_ascii_lowercase()) {
            return Err(CloudError::Remote {
                status: 500,
                message: format!("Mock delete failure for {}", name),
            });
        }

        let k = key(scope);
        let mut state = lock(&self.state);
        let before = state.locks.len();
        state
            .locks
            .retain(|s| !(key(&s.scope) == k && s.lock.name.eq_ignore_ascii_case(name)));

        if state.locks.len() < before {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn list_resource_groups(&self) -> CloudResult<Vec<ResourceGroup>> {
        self.simulate_latency().await;
        Ok(lock(&self.state).groups.clone())
    }

    async fn list_resources(&self, scope: Option<&Scope>) -> CloudResult<Vec<TaggedResource>> {
        self.simulate_latency().await;
        Ok(lock(&self.state)
            .resources
            .iter()
            .filter(|r| scope.is_none_or(|s| s.contains(&r.scope)))
            .map(|r| r.resource.clone())
            .collect())
    }

    async fn delete_resource(&self, resource: &Scope) -> CloudResult<DeleteOutcome> {
        self.simulate_latency().await;
        self.delete_resource_calls.fetch_add(1, Ordering::SeqCst);

        let k = key(resource);
        let mut state = lock(&self.state);
        let before = state.resources.len();
        state.resources.retain(|r| key(&r.scope) != k);
        if state.resources.len() < before {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    fn is_healthy(&self) -> bool {
        *lock(&self.healthy)
    }
}
