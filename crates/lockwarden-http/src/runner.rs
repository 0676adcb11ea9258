//! Workflow runner shared by the HTTP handlers and the scheduler tick

use chrono::{DateTime, Utc};
use lockwarden_api::{RunReport, RunStatus, WorkflowKind, WorkflowTrigger};
use lockwarden_config::GovernanceConfig;
use lockwarden_core::{AllowedSet, GovernanceEngine, RunContext, WorkflowRequest};
use lockwarden_store::{AuditEvent, AuditEventType, Store};
use lockwarden_util::ResourceGroupName;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Runs workflows against the engine.
///
/// Runs of the same kind are serialized; different kinds may overlap.
/// The AllowedSet of each run is seeded from configuration plus the store,
/// and any growth is written back once the run ends.
pub struct WorkflowRunner {
    engine: Arc<GovernanceEngine>,
    store: Arc<dyn Store>,
    cancel: watch::Receiver<bool>,
    running: HashMap<WorkflowKind, Mutex<()>>,
}

impl WorkflowRunner {
    pub fn new(
        engine: Arc<GovernanceEngine>,
        store: Arc<dyn Store>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let running = WorkflowKind::ALL
            .iter()
            .map(|kind| (*kind, Mutex::new(())))
            .collect();

        Self {
            engine,
            store,
            cancel,
            running,
        }
    }

    pub fn engine(&self) -> &GovernanceEngine {
        &self.engine
    }

    pub fn config(&self) -> &GovernanceConfig {
        self.engine.config()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to write audit event");
        }
    }

    fn seed_allowed(&self) -> AllowedSet {
        let mut seed: Vec<ResourceGroupName> = self.config().locks.allowed_resource_groups.clone();
        match self.store.load_allowed_groups() {
            Ok(stored) => seed.extend(stored),
            Err(e) => warn!(error = %e, "Failed to load allowed resource groups, using configured seed"),
        }
        AllowedSet::seeded(seed)
    }

    fn persist_allowed(&self, before: &[ResourceGroupName], allowed: &AllowedSet) {
        let added: Vec<ResourceGroupName> = allowed
            .snapshot()
            .into_iter()
            .filter(|g| !before.contains(g))
            .collect();
        if added.is_empty() {
            return;
        }

        match self.store.add_allowed_groups(&added) {
            Ok(new) => {
                info!(added = added.len(), new, "Allowed resource groups grew");
                self.audit(AuditEventType::AllowedSetGrew { added });
            }
            Err(e) => warn!(error = %e, "Failed to persist allowed resource groups"),
        }
    }

    /// Run a workflow now, waiting for any run of the same kind to finish
    pub async fn run(&self, request: WorkflowRequest, trigger: WorkflowTrigger) -> RunReport {
        let kind = request.kind();
        let _guard = match self.running.get(&kind) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let allowed = self.seed_allowed();
        let before = allowed.snapshot();
        let ctx = RunContext::new(self.cancel.clone(), self.config().limits.run_timeout);

        debug!(workflow = %kind, trigger = ?trigger, "Starting run");
        let report = self.engine.run(request, trigger, &allowed, &ctx).await;

        self.persist_allowed(&before, &allowed);
        self.audit(AuditEventType::run_completed(&report));
        report
    }

    /// Run a workflow on its own task.
    ///
    /// Dropping the returned future does not stop the run; only the stop
    /// signal or the run deadline can cancel it.
    pub async fn run_detached(
        self: &Arc<Self>,
        request: WorkflowRequest,
        trigger: WorkflowTrigger,
    ) -> Result<RunReport, JoinError> {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.run(request, trigger).await }).await
    }

    /// Run a windowed workflow if `now` is inside its window and the
    /// current window slot has not been served yet
    pub async fn run_scheduled(&self, kind: WorkflowKind, now: DateTime<Utc>) -> Option<RunReport> {
        let request = match kind {
            WorkflowKind::LockCheck => WorkflowRequest::LockCheck,
            WorkflowKind::TagCleanup => WorkflowRequest::TagCleanup { dry_run: false },
            WorkflowKind::BudgetUnlock | WorkflowKind::LockCleanup => return None,
        };
        let slot = self.engine.window_for(kind)?.slot_key(&now)?;

        match self.store.get_last_slot(kind) {
            Ok(Some(last)) if last == slot => return None,
            Ok(_) => {}
            Err(e) => {
                // Without the slot record a restart could repeat the run
                warn!(workflow = %kind, error = %e, "Failed to read schedule slot, skipping tick");
                return None;
            }
        }

        info!(workflow = %kind, slot = %slot, "Scheduled window open");
        let report = self
            .run(request, WorkflowTrigger::Scheduled { at: now })
            .await;

        // A cancelled run leaves the slot open for the next tick
        if let RunStatus::Cancelled { phase } = report.status {
            info!(workflow = %kind, slot = %slot, phase = %phase, "Scheduled run cancelled, slot not recorded");
        } else if let Err(e) = self.store.set_last_slot(kind, &slot) {
            warn!(workflow = %kind, error = %e, "Failed to record schedule slot");
        }
        Some(report)
    }
}
