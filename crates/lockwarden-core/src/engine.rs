//! Workflow orchestrator
//!
//! Each workflow walks `Listing -> Classifying -> Acting -> Reporting` and
//! always hands back a `RunReport`. Per-item failures land in the report
//! and the run moves on to the next item.

use lockwarden_api::{
    ActionKind, BudgetUnlockDetails, BudgetUnlockParams, GuardLockOutcome, LockCategory,
    LockCheckDetails, LockCleanupDetails, LockFinding, LockLevel, LockSpec, ManagementLock,
    MarkerOutcome, ResourceDisposition, ResourceFinding, RunPhase, RunReport, RunStatus, Scope,
    ScopeLevel, TagCleanupDetails, TaggedResource, Verification, WorkflowDetails, WorkflowKind,
    WorkflowTrigger,
};
use lockwarden_cloud_api::{CloudClient, DeleteOutcome};
use lockwarden_config::GovernanceConfig;
use lockwarden_util::{is_scheduled_now, GovernanceError, ScheduleWindow};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    categorize_lock, check_orphan, classify_lock, classify_resource, disposition,
    has_orphan_rule, is_marker, is_protected, protect_allowed, resolve, AllowedSet, ExistingState,
    LockDecision, LockRegistry, OrphanRules, PoolOutcome, ReportBuilder, RunContext,
    TagCompliance, WorkerPool,
};

/// A workflow to run and its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowRequest {
    LockCheck,
    BudgetUnlock(BudgetUnlockParams),
    TagCleanup { dry_run: bool },
    LockCleanup {
        dry_run: bool,
        max_age_days: Option<u32>,
    },
}

impl WorkflowRequest {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            WorkflowRequest::LockCheck => WorkflowKind::LockCheck,
            WorkflowRequest::BudgetUnlock(_) => WorkflowKind::BudgetUnlock,
            WorkflowRequest::TagCleanup { .. } => WorkflowKind::TagCleanup,
            WorkflowRequest::LockCleanup { .. } => WorkflowKind::LockCleanup,
        }
    }
}

/// The governance engine
pub struct GovernanceEngine {
    config: Arc<GovernanceConfig>,
    cloud: Arc<dyn CloudClient>,
    registry: LockRegistry,
    pool: WorkerPool,
}

/// Resource id of a lock, used as the report target
fn lock_target(lock: &ManagementLock) -> String {
    format!(
        "{}/providers/Microsoft.Authorization/locks/{}",
        lock.scope.trim_end_matches('/'),
        lock.name
    )
}

impl GovernanceEngine {
    pub fn new(config: Arc<GovernanceConfig>, cloud: Arc<dyn CloudClient>) -> Self {
        let registry = LockRegistry::new(Arc::clone(&cloud), config.limits.call_timeout);
        let pool = WorkerPool::new(config.limits.concurrency);

        info!(
            subscription_id = %cloud.subscription_id(),
            concurrency = pool.concurrency(),
            auto_delete = config.cleanup.auto_delete,
            "Governance engine initialized"
        );

        Self {
            config,
            cloud,
            registry,
            pool,
        }
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn cloud_healthy(&self) -> bool {
        self.cloud.is_healthy()
    }

    /// Schedule window of a workflow, if it runs on one
    pub fn window_for(&self, workflow: WorkflowKind) -> Option<ScheduleWindow> {
        match workflow {
            WorkflowKind::LockCheck => Some(self.config.lock_check_window()),
            WorkflowKind::TagCleanup => Some(self.config.tag_check_window()),
            WorkflowKind::BudgetUnlock | WorkflowKind::LockCleanup => None,
        }
    }

    pub async fn run(
        &self,
        request: WorkflowRequest,
        trigger: WorkflowTrigger,
        allowed: &AllowedSet,
        ctx: &RunContext,
    ) -> RunReport {
        match request {
            WorkflowRequest::LockCheck => self.run_lock_check(trigger, ctx).await,
            WorkflowRequest::BudgetUnlock(params) => {
                self.run_budget_unlock(params, allowed, trigger, ctx).await
            }
            WorkflowRequest::TagCleanup { dry_run } => {
                self.run_tag_cleanup(dry_run, allowed, trigger, ctx).await
            }
            WorkflowRequest::LockCleanup {
                dry_run,
                max_age_days,
            } => {
                self.run_lock_cleanup(dry_run, max_age_days, allowed, trigger, ctx)
                    .await
            }
        }
    }

    /// Start a report and decide whether a scheduled trigger falls outside
    /// the workflow's window
    fn start(
        &self,
        workflow: WorkflowKind,
        trigger: WorkflowTrigger,
        ctx: &RunContext,
    ) -> (ReportBuilder, Option<String>) {
        let window = self.window_for(workflow);
        let at = match &trigger {
            WorkflowTrigger::Scheduled { at } => *at,
            _ => ctx.now(),
        };
        let open = window.as_ref().map(|w| is_scheduled_now(w, &at));

        let skip = match (&window, open) {
            (Some(w), Some(false)) if trigger.is_scheduled() => {
                Some(format!("outside schedule window ({})", w.describe()))
            }
            _ => None,
        };

        let mut report = ReportBuilder::new(workflow, trigger);
        report.set_window_open(open);
        (report, skip)
    }

    fn destructive(&self, dry_run: bool) -> bool {
        self.config.cleanup.auto_delete && !dry_run
    }

    /// Targeted check: remove the guard lock at subscription scope and
    /// confirm it is gone
    pub async fn run_lock_check(&self, trigger: WorkflowTrigger, ctx: &RunContext) -> RunReport {
        let name = self.config.locks.guard_lock_name.clone();
        let subscription = self.registry.subscription_scope();
        let mut details = LockCheckDetails {
            target_lock_name: name.clone(),
            scope: subscription.path(),
            lock_found: false,
            lock_removed: false,
            verification: Verification::NotAttempted,
        };

        let (mut report, skip) = self.start(WorkflowKind::LockCheck, trigger, ctx);
        if let Some(reason) = skip {
            info!(reason = %reason, "Lock check skipped");
            return report.finish(
                RunStatus::Skipped { reason },
                WorkflowDetails::LockCheck(details),
                "Outside schedule window",
            );
        }

        report.enter(RunPhase::Listing);
        let locks = match ctx
            .until_cancelled(self.registry.list_locks_at(&subscription))
            .await
        {
            None => {
                let status = report.cancelled_status();
                return report.finish(status, WorkflowDetails::LockCheck(details), "Cancelled");
            }
            Some(Ok(locks)) => locks,
            Some(Err(err)) => {
                report.error(subscription.path(), &err);
                return report.finish(
                    RunStatus::Completed,
                    WorkflowDetails::LockCheck(details),
                    "Failed to list locks at subscription scope",
                );
            }
        };

        report.enter(RunPhase::Classifying);
        report.analyzed(locks.len());
        let target = locks.into_iter().find(|lock| {
            lock.name.eq_ignore_ascii_case(&name)
                && resolve(&lock.scope).is_ok_and(|s| s.level() == ScopeLevel::Subscription)
        });
        let Some(target) = target else {
            let message = format!("Lock '{}' not found at subscription scope", name);
            return report.finish(
                RunStatus::Completed,
                WorkflowDetails::LockCheck(details),
                message,
            );
        };
        details.lock_found = true;

        report.enter(RunPhase::Acting);
        let deleted = ctx
            .until_cancelled(self.registry.delete_lock(&target.scope, &target.name))
            .await;
        match deleted {
            None => {
                let status = report.cancelled_status();
                return report.finish(status, WorkflowDetails::LockCheck(details), "Cancelled");
            }
            Some(Ok(DeleteOutcome::Deleted)) => {
                details.lock_removed = true;
                report.action(ActionKind::LockDeleted, lock_target(&target), None);
            }
            Some(Ok(DeleteOutcome::NotFound)) => {
                report.action(ActionKind::LockAlreadyAbsent, lock_target(&target), None);
            }
            Some(Err(err)) => {
                report.error(lock_target(&target), &err);
                return report.finish(
                    RunStatus::Completed,
                    WorkflowDetails::LockCheck(details),
                    format!("Failed to remove lock '{}'", name),
                );
            }
        }

        details.verification = match self.registry.list_locks_at(&subscription).await {
            Ok(after) => {
                let identity = target.identity();
                if after.iter().any(|l| l.identity() == identity) {
                    report.error(
                        lock_target(&target),
                        &GovernanceError::remote("lock still present after delete"),
                    );
                    Verification::StillPresent
                } else {
                    Verification::RemovedAndVerified
                }
            }
            Err(err) => {
                warn!(error = %err, "Could not verify lock removal");
                Verification::Unverifiable
            }
        };

        let message = match details.verification {
            Verification::RemovedAndVerified => format!("Lock '{}' removed and verified", name),
            Verification::StillPresent => format!("Lock '{}' is still present", name),
            _ => format!("Lock '{}' removed; verification unavailable", name),
        };
        report.finish(
            RunStatus::Completed,
            WorkflowDetails::LockCheck(details),
            message,
        )
    }

    /// Emergency unlock: remove every non-exempt lock, then put the
    /// subscription under a `ReadOnly` guard lock
    pub async fn run_budget_unlock(
        &self,
        params: BudgetUnlockParams,
        allowed: &AllowedSet,
        trigger: WorkflowTrigger,
        ctx: &RunContext,
    ) -> RunReport {
        let initial = allowed.snapshot();
        let mut details = BudgetUnlockDetails {
            budget_limit: params.budget_limit,
            current_cost: params.current_cost,
            total_locks_processed: 0,
            holdlocks_found: 0,
            markers: Vec::new(),
            allowed_resource_groups_initial: initial.clone(),
            allowed_resource_groups_final: initial.clone(),
            allowed_rgs_added: Vec::new(),
            guard_lock: None,
            ready_for_resource_deletion: false,
        };

        let (mut report, _) = self.start(WorkflowKind::BudgetUnlock, trigger, ctx);
        if let (Some(limit), Some(cost)) = (params.budget_limit, params.current_cost) {
            error!(budget_limit = limit, current_cost = cost, "Budget exceeded, unlocking");
        }

        report.enter(RunPhase::Listing);
        let inventory = self.registry.enumerate_locks(&self.pool, ctx).await;
        for (target, err) in &inventory.errors {
            report.error(target.clone(), err);
        }
        if inventory.cancelled || ctx.is_cancelled() {
            let status = report.cancelled_status();
            return report.finish(status, WorkflowDetails::BudgetUnlock(details), "Cancelled");
        }

        report.enter(RunPhase::Classifying);
        report.analyzed(inventory.locks.len());
        details.total_locks_processed = inventory.locks.len();

        let marker = &self.config.locks.marker_name;
        let mut decided = Vec::with_capacity(inventory.locks.len());
        for lock in inventory.locks {
            match classify_lock(&lock, allowed, marker) {
                Ok(classification) => {
                    if let Some(finding) = classification.marker {
                        if finding.outcome == MarkerOutcome::AddedToAllowedList
                            && let Some(group) = &finding.resource_group
                        {
                            report.action(ActionKind::ResourceGroupAllowed, group.as_str(), None);
                        }
                        details.markers.push(finding);
                    }
                    decided.push((lock, classification.decision));
                }
                Err(err) => report.error(lock_target(&lock), &err),
            }
        }
        details.holdlocks_found = details.markers.len();

        let mut to_remove = Vec::new();
        for (lock, decision) in decided {
            match protect_allowed(&lock, decision, allowed) {
                LockDecision::Preserve(reason) => report.action(
                    ActionKind::LockPreserved,
                    lock_target(&lock),
                    Some(reason.as_str().to_string()),
                ),
                LockDecision::Remove => to_remove.push(lock),
            }
        }

        report.enter(RunPhase::Acting);
        let outcome = self.delete_locks(to_remove, ctx).await;
        let cancelled = outcome.cancelled;
        self.record_lock_deletions(&mut report, outcome, |_, _| {});

        // The guard goes on even when the run was cut short
        let subscription = self.registry.subscription_scope().path();
        let spec = LockSpec {
            name: self.config.locks.guard_lock_name.clone(),
            level: LockLevel::ReadOnly,
            notes: Some(self.config.locks.guard_lock_notes.clone()),
        };
        let applied = match self.registry.upsert_lock(&subscription, &spec).await {
            Ok(lock) => {
                report.action(ActionKind::LockUpserted, lock_target(&lock), None);
                true
            }
            Err(err) => {
                report.error(subscription.clone(), &err);
                false
            }
        };
        details.guard_lock = Some(GuardLockOutcome {
            name: spec.name,
            scope: subscription,
            level: spec.level,
            applied,
        });

        let final_set = allowed.snapshot();
        details.allowed_rgs_added = final_set
            .iter()
            .filter(|g| !initial.contains(g))
            .cloned()
            .collect();
        details.allowed_resource_groups_final = final_set;
        details.ready_for_resource_deletion = !report.has_errors() && !cancelled;

        let message = format!(
            "Budget unlock: {} locks removed, {} exempt resource groups, guard lock {}",
            report.removed(),
            details.allowed_resource_groups_final.len(),
            if applied { "applied" } else { "not applied" },
        );
        let status = if cancelled {
            report.cancelled_status()
        } else {
            RunStatus::Completed
        };
        report.finish(status, WorkflowDetails::BudgetUnlock(details), message)
    }

    /// Find resources missing required tags, judge them and, only in
    /// destructive mode, delete the orphaned ones
    pub async fn run_tag_cleanup(
        &self,
        dry_run: bool,
        allowed: &AllowedSet,
        trigger: WorkflowTrigger,
        ctx: &RunContext,
    ) -> RunReport {
        let required = self.config.tags.required.clone();
        let mut destructive = self.destructive(dry_run);
        let mut details = TagCleanupDetails {
            required_tags: required.clone(),
            auto_delete: destructive,
            total_resources: 0,
            resources_without_tags: 0,
            protected_resources: 0,
            orphaned_resources: 0,
            resources_deleted: 0,
            findings: Vec::new(),
        };

        let (mut report, skip) = self.start(WorkflowKind::TagCleanup, trigger, ctx);
        if let Some(reason) = skip {
            info!(reason = %reason, "Tag cleanup skipped");
            return report.finish(
                RunStatus::Skipped { reason },
                WorkflowDetails::TagCleanup(details),
                "Outside schedule window",
            );
        }

        report.enter(RunPhase::Listing);
        let resources = match ctx.until_cancelled(self.registry.list_resources(None)).await {
            None => {
                let status = report.cancelled_status();
                return report.finish(status, WorkflowDetails::TagCleanup(details), "Cancelled");
            }
            Some(Ok(resources)) => resources,
            Some(Err(err)) => {
                report.error(self.registry.subscription_scope().path(), &err);
                return report.finish(
                    RunStatus::Completed,
                    WorkflowDetails::TagCleanup(details),
                    "Failed to list resources",
                );
            }
        };
        details.total_resources = resources.len();

        // Markers protect their groups here too; no lock is removed
        let inventory = self.registry.enumerate_locks(&self.pool, ctx).await;
        for (target, err) in &inventory.errors {
            report.error(target.clone(), err);
        }
        if !inventory.errors.is_empty() && destructive {
            warn!("Lock listing incomplete, exemptions unknown; not deleting resources");
            destructive = false;
            details.auto_delete = false;
        }
        if inventory.cancelled || ctx.is_cancelled() {
            let status = report.cancelled_status();
            return report.finish(status, WorkflowDetails::TagCleanup(details), "Cancelled");
        }

        report.enter(RunPhase::Classifying);
        let marker = &self.config.locks.marker_name;
        for lock in inventory.locks.iter().filter(|l| is_marker(l, marker)) {
            if let Err(err) = classify_lock(lock, allowed, marker) {
                report.error(lock_target(lock), &err);
            }
        }

        report.analyzed(resources.len());
        let mut candidates: Vec<(TaggedResource, Scope, Vec<String>, bool)> = Vec::new();
        for resource in resources {
            let TagCompliance::MissingTags(missing) = classify_resource(&resource, &required)
            else {
                continue;
            };
            details.resources_without_tags += 1;
            match resolve(&resource.id) {
                Ok(scope) => {
                    let protected =
                        is_protected(&resource, scope.resource_group_name(), allowed, marker);
                    candidates.push((resource, scope, missing, protected));
                }
                Err(err) => report.error(resource.id.clone(), &err),
            }
        }

        let probes: Vec<(usize, Scope, String)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, (resource, _, _, protected))| {
                !protected && has_orphan_rule(&resource.resource_type)
            })
            .map(|(i, (resource, scope, _, _))| (i, scope.clone(), resource.resource_type.clone()))
            .collect();

        let cloud = Arc::clone(&self.cloud);
        let rules = OrphanRules {
            min_deallocated_days: self.config.cleanup.min_deallocated_days,
        };
        let now = ctx.now();
        let timeout = self.config.limits.call_timeout;
        let checked = self
            .pool
            .run(probes, ctx, move |(_, scope, resource_type): (usize, Scope, String)| {
                let cloud = Arc::clone(&cloud);
                async move {
                    let check = check_orphan(&scope, &resource_type, cloud.as_ref(), rules, now);
                    match tokio::time::timeout(timeout, check).await {
                        Ok(result) => result,
                        Err(_) => Err(GovernanceError::Timeout(timeout)),
                    }
                }
            })
            .await;

        let mut orphaned = vec![false; candidates.len()];
        for ((index, _, _), result) in checked.completed {
            match result {
                Ok(is_orphan) => orphaned[index] = is_orphan,
                Err(err) => report.error(candidates[index].0.id.clone(), &err),
            }
        }

        let mut findings: Vec<ResourceFinding> = candidates
            .iter()
            .zip(&orphaned)
            .map(|((resource, scope, missing, protected), orphan)| ResourceFinding {
                id: resource.id.clone(),
                resource_type: resource.resource_type.clone(),
                resource_group: scope.resource_group_name().cloned(),
                missing_tags: missing.clone(),
                disposition: disposition(*protected, *orphan),
                deleted: false,
            })
            .collect();
        let protected = findings
            .iter()
            .filter(|f| f.disposition == ResourceDisposition::Protected)
            .count();
        report.add_preserved(protected);
        details.protected_resources = protected;
        details.orphaned_resources = findings
            .iter()
            .filter(|f| f.disposition == ResourceDisposition::Orphaned)
            .count();

        if checked.cancelled {
            details.findings = findings;
            let status = report.cancelled_status();
            return report.finish(status, WorkflowDetails::TagCleanup(details), "Cancelled");
        }

        report.enter(RunPhase::Acting);
        let mut cancelled = false;
        if destructive {
            let targets: Vec<(usize, String)> = findings
                .iter()
                .enumerate()
                .filter(|(_, f)| f.disposition == ResourceDisposition::Orphaned)
                .map(|(i, f)| (i, f.id.clone()))
                .collect();

            let registry = self.registry.clone();
            let outcome = self
                .pool
                .run(targets, ctx, move |(_, id): (usize, String)| {
                    let registry = registry.clone();
                    async move { registry.delete_resource(&id).await }
                })
                .await;
            cancelled = outcome.cancelled;

            for ((index, id), result) in outcome.completed {
                match result {
                    Ok(DeleteOutcome::Deleted) => {
                        findings[index].deleted = true;
                        report.action(ActionKind::ResourceDeleted, id, None);
                    }
                    Ok(DeleteOutcome::NotFound) => {
                        info!(resource = %id, "Orphaned resource already gone");
                    }
                    Err(err) => report.error(id, &err),
                }
            }
            for (_, id) in outcome.interrupted {
                report.error(id, &GovernanceError::Cancelled);
            }
        }
        details.resources_deleted = findings.iter().filter(|f| f.deleted).count();
        details.findings = findings;

        let message = if destructive {
            format!(
                "{} resources without required tags, {} orphaned, {} deleted",
                details.resources_without_tags, details.orphaned_resources, details.resources_deleted
            )
        } else {
            format!(
                "{} resources without required tags, {} orphaned; manual action required",
                details.resources_without_tags, details.orphaned_resources
            )
        };
        let status = if cancelled {
            report.cancelled_status()
        } else {
            RunStatus::Completed
        };
        report.finish(status, WorkflowDetails::TagCleanup(details), message)
    }

    /// Periodic lock hygiene: find expired, orphaned and critical locks and,
    /// in destructive mode, remove the expired and orphaned ones
    pub async fn run_lock_cleanup(
        &self,
        dry_run: bool,
        max_age_days: Option<u32>,
        allowed: &AllowedSet,
        trigger: WorkflowTrigger,
        ctx: &RunContext,
    ) -> RunReport {
        let destructive = self.destructive(dry_run);
        let max_age_days = max_age_days.unwrap_or(self.config.locks.max_age_days);
        let mut details = LockCleanupDetails {
            max_age_days,
            destructive,
            expired: 0,
            orphaned: 0,
            critical: 0,
            retained: 0,
            findings: Vec::new(),
        };

        let (mut report, _) = self.start(WorkflowKind::LockCleanup, trigger, ctx);

        report.enter(RunPhase::Listing);
        let inventory = self.registry.enumerate_locks(&self.pool, ctx).await;
        for (target, err) in &inventory.errors {
            report.error(target.clone(), err);
        }
        let resources = match ctx.until_cancelled(self.registry.list_resources(None)).await {
            Some(Ok(resources)) => Some(resources),
            Some(Err(err)) => {
                report.error(self.registry.subscription_scope().path(), &err);
                None
            }
            None => None,
        };
        if inventory.cancelled || ctx.is_cancelled() {
            let status = report.cancelled_status();
            return report.finish(status, WorkflowDetails::LockCleanup(details), "Cancelled");
        }

        let existing = ExistingState {
            groups: inventory
                .groups
                .as_ref()
                .map(|groups| groups.iter().map(|g| g.name.clone()).collect()),
            resources: resources.map(|resources| {
                resources
                    .iter()
                    .filter_map(|r| resolve(&r.id).ok())
                    .filter_map(|scope| ExistingState::resource_key(&scope))
                    .collect::<HashSet<String>>()
            }),
        };

        report.enter(RunPhase::Classifying);
        report.analyzed(inventory.locks.len());
        let marker = &self.config.locks.marker_name;
        let guard = &self.config.locks.guard_lock_name;

        let mut resolved = Vec::with_capacity(inventory.locks.len());
        for lock in inventory.locks {
            match resolve(&lock.scope) {
                Ok(scope) => resolved.push((lock, scope)),
                Err(err) => report.error(lock_target(&lock), &err),
            }
        }
        for (lock, _) in resolved.iter().filter(|(l, _)| is_marker(l, marker)) {
            if let Err(err) = classify_lock(lock, allowed, marker) {
                report.error(lock_target(lock), &err);
            }
        }

        let now = ctx.now();
        for (lock, scope) in &resolved {
            let in_allowed_group = scope
                .resource_group_name()
                .is_some_and(|g| allowed.contains(g));
            let (category, reason) = if is_marker(lock, marker) {
                (LockCategory::Retained, "exemption marker".to_string())
            } else if lock.name.eq_ignore_ascii_case(guard)
                && scope.level() == ScopeLevel::Subscription
            {
                (LockCategory::Retained, "budget guard lock".to_string())
            } else if in_allowed_group {
                (LockCategory::Retained, "allowed resource group".to_string())
            } else {
                categorize_lock(lock, scope, &existing, now, max_age_days)
            };

            match category {
                LockCategory::Expired => details.expired += 1,
                LockCategory::Orphaned => details.orphaned += 1,
                LockCategory::Critical => details.critical += 1,
                LockCategory::Retained => details.retained += 1,
            }
            details.findings.push(LockFinding {
                name: lock.name.clone(),
                scope: lock.scope.clone(),
                level: lock.level,
                category,
                reason,
                removed: false,
            });
        }

        report.enter(RunPhase::Acting);
        let mut cancelled = false;
        if destructive {
            let removable: Vec<ManagementLock> = resolved
                .iter()
                .zip(&details.findings)
                .filter(|(_, f)| matches!(f.category, LockCategory::Expired | LockCategory::Orphaned))
                .map(|((lock, _), _)| lock.clone())
                .collect();

            let outcome = self.delete_locks(removable, ctx).await;
            cancelled = outcome.cancelled;
            let findings = &mut details.findings;
            self.record_lock_deletions(&mut report, outcome, |lock, removed| {
                let identity = lock.identity();
                if let Some(f) = findings.iter_mut().find(|f| {
                    (f.name.to_ascii_lowercase(), f.scope.trim_end_matches('/').to_ascii_lowercase())
                        == identity
                }) {
                    f.removed = removed;
                }
            });
        }
        let kept = details.findings.iter().filter(|f| !f.removed).count();
        report.add_preserved(kept);

        let removed = details.findings.iter().filter(|f| f.removed).count();
        let message = if destructive {
            format!(
                "{} expired, {} orphaned, {} critical; {} locks removed",
                details.expired, details.orphaned, details.critical, removed
            )
        } else {
            format!(
                "{} expired, {} orphaned, {} critical; report only",
                details.expired, details.orphaned, details.critical
            )
        };
        let status = if cancelled {
            report.cancelled_status()
        } else {
            RunStatus::Completed
        };
        report.finish(status, WorkflowDetails::LockCleanup(details), message)
    }

    async fn delete_locks(
        &self,
        locks: Vec<ManagementLock>,
        ctx: &RunContext,
    ) -> PoolOutcome<ManagementLock, DeleteOutcome> {
        let registry = self.registry.clone();
        self.pool
            .run(locks, ctx, move |lock: ManagementLock| {
                let registry = registry.clone();
                async move { registry.delete_lock(&lock.scope, &lock.name).await }
            })
            .await
    }

    /// Turn deletion results into report entries; `on_result` sees every
    /// completed lock and whether it is now gone
    fn record_lock_deletions(
        &self,
        report: &mut ReportBuilder,
        outcome: PoolOutcome<ManagementLock, DeleteOutcome>,
        mut on_result: impl FnMut(&ManagementLock, bool),
    ) {
        for (lock, result) in outcome.completed {
            match result {
                Ok(DeleteOutcome::Deleted) => {
                    report.action(ActionKind::LockDeleted, lock_target(&lock), None);
                    on_result(&lock, true);
                }
                Ok(DeleteOutcome::NotFound) => {
                    report.action(ActionKind::LockAlreadyAbsent, lock_target(&lock), None);
                    on_result(&lock, false);
                }
                Err(err) => {
                    report.error(lock_target(&lock), &err);
                    on_result(&lock, false);
                }
            }
        }
        for lock in &outcome.interrupted {
            report.error(lock_target(lock), &GovernanceError::Cancelled);
        }
        if !outcome.not_started.is_empty() {
            warn!(count = outcome.not_started.len(), "Lock deletions not started before cancellation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lockwarden_api::{DiskState, NicAssociation, StorageEmptiness};
    use lockwarden_cloud_api::MemoryCloud;
    use lockwarden_config::{config_from_overrides, EnvOverrides};
    use lockwarden_util::ResourceGroupName;
    use std::time::Duration;

    const SUB: &str = "sub-1";

    fn config(auto_delete: bool) -> Arc<GovernanceConfig> {
        let overrides = EnvOverrides {
            subscription_id: Some(SUB.into()),
            auto_delete: Some(auto_delete),
            ..Default::default()
        };
        Arc::new(config_from_overrides(&overrides).unwrap())
    }

    fn engine(cloud: &Arc<MemoryCloud>, auto_delete: bool) -> GovernanceEngine {
        GovernanceEngine::new(config(auto_delete), cloud.clone())
    }

    fn ctx() -> RunContext {
        RunContext::detached(Duration::from_secs(60))
    }

    fn disk(rg: &str, name: &str) -> Scope {
        Scope::resource(SUB, rg, "Microsoft.Compute", "disks", name)
    }

    #[tokio::test]
    async fn lock_check_removes_and_verifies() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        cloud.add_lock(
            &cloud.subscription_scope(),
            "Prevent-Spending-BudgetControl",
            LockLevel::ReadOnly,
        );
        cloud.add_lock(&cloud.subscription_scope(), "other", LockLevel::CanNotDelete);
        let engine = engine(&cloud, false);

        // Day 2 at 08:00 is inside the default window
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 8, 15, 0).unwrap();
        let report = engine
            .run_lock_check(WorkflowTrigger::Scheduled { at }, &ctx().at(at))
            .await;

        let details = report.lock_check().unwrap();
        assert!(details.lock_found);
        assert!(details.lock_removed);
        assert_eq!(details.verification, Verification::RemovedAndVerified);
        assert_eq!(report.window_open, Some(true));
        assert!(report.is_success());

        let names: Vec<_> = cloud.all_locks().into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["other"]);
    }

    #[tokio::test]
    async fn scheduled_lock_check_outside_window_is_skipped() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        cloud.add_lock(
            &cloud.subscription_scope(),
            "Prevent-Spending-BudgetControl",
            LockLevel::ReadOnly,
        );
        let engine = engine(&cloud, false);

        let at = Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).unwrap();
        let report = engine
            .run_lock_check(WorkflowTrigger::Scheduled { at }, &ctx().at(at))
            .await;
        assert!(matches!(report.status, RunStatus::Skipped { .. }));
        assert_eq!(report.window_open, Some(false));
        assert_eq!(cloud.delete_lock_calls(), 0);

        // A manual trigger is the forced path
        let report = engine
            .run_lock_check(WorkflowTrigger::Manual, &ctx().at(at))
            .await;
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.window_open, Some(false));
        assert!(report.lock_check().unwrap().lock_removed);
    }

    #[tokio::test]
    async fn lock_check_ignores_guard_name_below_subscription() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        let rg = cloud.add_resource_group("rg-a");
        cloud.add_lock(&rg, "Prevent-Spending-BudgetControl", LockLevel::ReadOnly);
        let engine = engine(&cloud, false);

        let report = engine.run_lock_check(WorkflowTrigger::Manual, &ctx()).await;
        assert!(!report.lock_check().unwrap().lock_found);
        assert_eq!(cloud.delete_lock_calls(), 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn lock_check_delete_failure_is_reported() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        cloud.add_lock(
            &cloud.subscription_scope(),
            "Prevent-Spending-BudgetControl",
            LockLevel::ReadOnly,
        );
        cloud.fail_delete_lock("Prevent-Spending-BudgetControl");
        let engine = engine(&cloud, false);

        let report = engine.run_lock_check(WorkflowTrigger::Manual, &ctx()).await;
        let details = report.lock_check().unwrap();
        assert!(details.lock_found);
        assert!(!details.lock_removed);
        assert_eq!(report.errors.len(), 1);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn budget_unlock_respects_markers_and_applies_guard() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        let prod = cloud.add_resource_group("rg-prod");
        let dev = cloud.add_resource_group("rg-dev");
        cloud.add_lock(&prod, "HoldLock", LockLevel::CanNotDelete);
        cloud.add_lock(&prod, "prod-lock", LockLevel::CanNotDelete);
        cloud.add_lock(&disk("rg-prod", "d1"), "disk-lock", LockLevel::CanNotDelete);
        cloud.add_lock(&dev, "dev-lock", LockLevel::CanNotDelete);
        cloud.add_lock(&cloud.subscription_scope(), "sub-lock", LockLevel::ReadOnly);
        let engine = engine(&cloud, false);

        let allowed = AllowedSet::new();
        let report = engine
            .run_budget_unlock(
                BudgetUnlockParams::default(),
                &allowed,
                WorkflowTrigger::Manual,
                &ctx(),
            )
            .await;

        let details = report.budget_unlock().unwrap();
        assert_eq!(details.holdlocks_found, 1);
        assert_eq!(details.allowed_rgs_added, vec![ResourceGroupName::new("rg-prod")]);
        assert!(details.allowed_resource_groups_final.contains(&ResourceGroupName::new("rg-prod")));
        assert!(details.guard_lock.as_ref().unwrap().applied);
        assert!(details.ready_for_resource_deletion);

        let mut left: Vec<_> = cloud.all_locks().into_iter().map(|l| l.name).collect();
        left.sort();
        assert_eq!(
            left,
            vec!["HoldLock", "Prevent-Spending-BudgetControl", "disk-lock", "prod-lock"]
        );
        let guards = cloud.locks_exactly_at(&cloud.subscription_scope());
        assert_eq!(guards.len(), 1);
        assert_eq!(guards[0].level, LockLevel::ReadOnly);
        assert_eq!(report.counts.removed, 2);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn budget_unlock_twice_keeps_one_guard() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        let engine = engine(&cloud, false);
        let allowed = AllowedSet::new();

        for _ in 0..2 {
            engine
                .run_budget_unlock(
                    BudgetUnlockParams::default(),
                    &allowed,
                    WorkflowTrigger::Manual,
                    &ctx(),
                )
                .await;
        }
        assert_eq!(cloud.locks_exactly_at(&cloud.subscription_scope()).len(), 1);
        assert!(allowed.is_empty());
    }

    #[tokio::test]
    async fn budget_unlock_continues_past_item_failures() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        let a = cloud.add_resource_group("rg-a");
        cloud.add_lock(&a, "stuck", LockLevel::CanNotDelete);
        cloud.add_lock(&a, "free", LockLevel::CanNotDelete);
        cloud.add_raw_lock("not-a-scope", "HoldLock", LockLevel::CanNotDelete);
        cloud.fail_delete_lock("stuck");
        let engine = engine(&cloud, false);

        let report = engine
            .run_budget_unlock(
                BudgetUnlockParams::default(),
                &AllowedSet::new(),
                WorkflowTrigger::Manual,
                &ctx(),
            )
            .await;

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.counts.removed, 1);
        let details = report.budget_unlock().unwrap();
        assert!(details.guard_lock.as_ref().unwrap().applied);
        assert!(!details.ready_for_resource_deletion);
        assert!(!report.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_unlock_keeps_partial_report_and_guard() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        let a = cloud.add_resource_group("rg-a");
        for i in 0..6 {
            cloud.add_lock(&a, &format!("lock-{}", i), LockLevel::CanNotDelete);
        }
        let engine = engine(&cloud, false);

        let (tx, rx) = tokio::sync::watch::channel(false);
        let ctx = RunContext::new(rx, Duration::from_secs(3600));
        cloud.set_latency(Some(Duration::from_millis(100)));

        let allowed = AllowedSet::new();
        let run = engine.run_budget_unlock(
            BudgetUnlockParams::default(),
            &allowed,
            WorkflowTrigger::Manual,
            &ctx,
        );
        let stop = async {
            // Listing takes three calls; stop during deletions
            tokio::time::sleep(Duration::from_millis(350)).await;
            tx.send(true).unwrap();
        };
        let (report, _) = tokio::join!(run, stop);

        assert_eq!(
            report.status,
            RunStatus::Cancelled {
                phase: RunPhase::Acting
            }
        );
        assert!(!report.is_success());
        assert!(report.counts.removed < 6);
        assert!(report.budget_unlock().unwrap().guard_lock.as_ref().unwrap().applied);
    }

    #[tokio::test]
    async fn manual_tag_cleanup_never_deletes() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        for i in 0..4 {
            let d = cloud.add_resource(disk("rg-a", &format!("d{}", i)), &[]);
            cloud.set_disk_state(&d, DiskState::Unattached);
        }
        let engine = engine(&cloud, false);

        let report = engine
            .run_tag_cleanup(false, &AllowedSet::new(), WorkflowTrigger::Manual, &ctx())
            .await;
        let details = report.tag_cleanup().unwrap();
        assert_eq!(details.orphaned_resources, 4);
        assert_eq!(details.resources_deleted, 0);
        assert!(!details.auto_delete);
        assert_eq!(cloud.delete_resource_calls(), 0);
        assert_eq!(cloud.resource_count(), 4);
    }

    #[tokio::test]
    async fn automatic_tag_cleanup_deletes_only_unprotected_orphans() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        let held = cloud.add_resource_group("rg-held");
        cloud.add_lock(&held, "HoldLock", LockLevel::CanNotDelete);

        let orphan = cloud.add_resource(disk("rg-a", "orphan"), &[]);
        cloud.set_disk_state(&orphan, DiskState::Unattached);
        let attached = cloud.add_resource(disk("rg-a", "attached"), &[]);
        cloud.set_disk_state(&attached, DiskState::Attached);
        let in_held = cloud.add_resource(disk("rg-held", "kept"), &[]);
        cloud.set_disk_state(&in_held, DiskState::Unattached);
        let marked = cloud.add_resource(disk("rg-a", "marked"), &[("HoldLock", "true")]);
        cloud.set_disk_state(&marked, DiskState::Unattached);
        let nic = cloud.add_resource(
            Scope::resource(SUB, "rg-a", "Microsoft.Network", "networkInterfaces", "nic"),
            &[],
        );
        cloud.set_nic_association(&nic, NicAssociation::default());
        let st = cloud.add_resource(
            Scope::resource(SUB, "rg-a", "Microsoft.Storage", "storageAccounts", "st"),
            &[],
        );
        cloud.set_storage_emptiness(&st, StorageEmptiness::NonEmpty { containers: 1 });
        cloud.add_resource(
            disk("rg-a", "tagged"),
            &[("Environment", "dev"), ("Owner", "me"), ("Project", "x")],
        );
        let engine = engine(&cloud, true);

        let allowed = AllowedSet::new();
        let report = engine
            .run_tag_cleanup(false, &allowed, WorkflowTrigger::Manual, &ctx())
            .await;
        let details = report.tag_cleanup().unwrap();

        assert_eq!(details.total_resources, 7);
        assert_eq!(details.resources_without_tags, 6);
        assert_eq!(details.protected_resources, 2);
        assert_eq!(details.orphaned_resources, 2);
        assert_eq!(details.resources_deleted, 2);
        assert_eq!(cloud.delete_resource_calls(), 2);
        assert!(allowed.contains(&ResourceGroupName::new("rg-held")));
        // Markers are never removed by tag cleanup
        assert_eq!(cloud.all_locks().len(), 1);

        // dry_run forces report-only even when auto_delete is on
        let report = engine
            .run_tag_cleanup(true, &allowed, WorkflowTrigger::Manual, &ctx())
            .await;
        assert_eq!(report.tag_cleanup().unwrap().resources_deleted, 0);
        assert_eq!(cloud.delete_resource_calls(), 2);
    }

    #[tokio::test]
    async fn probe_failures_never_delete() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        let d = cloud.add_resource(disk("rg-a", "d1"), &[]);
        cloud.set_disk_state(&d, DiskState::Unattached);
        *cloud.fail_probes.lock().unwrap() = true;
        let engine = engine(&cloud, true);

        let report = engine
            .run_tag_cleanup(false, &AllowedSet::new(), WorkflowTrigger::Manual, &ctx())
            .await;
        let details = report.tag_cleanup().unwrap();
        assert_eq!(details.orphaned_resources, 0);
        assert_eq!(
            details.findings[0].disposition,
            ResourceDisposition::NonOrphanNonCompliant
        );
        assert_eq!(cloud.delete_resource_calls(), 0);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn lock_cleanup_categories_and_destructive_mode() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let old = Some(now - chrono::Duration::days(200));

        let a = cloud.add_resource_group("rg-a");
        let held = cloud.add_resource_group("rg-held");
        let vault = Scope::resource(SUB, "rg-a", "Microsoft.KeyVault", "vaults", "kv");
        cloud.add_resource(vault.clone(), &[]);
        cloud.add_lock_created(&a, "old-lock", LockLevel::CanNotDelete, old);
        cloud.add_lock_created(&a, "new-lock", LockLevel::CanNotDelete, Some(now));
        cloud.add_lock_created(&vault, "vault-lock", LockLevel::CanNotDelete, old);
        cloud.add_lock(&held, "HoldLock", LockLevel::CanNotDelete);
        cloud.add_lock_created(&held, "held-old", LockLevel::CanNotDelete, old);
        cloud.add_lock(&disk("rg-a", "gone"), "ghost", LockLevel::CanNotDelete);
        cloud.add_lock(
            &cloud.subscription_scope(),
            "Prevent-Spending-BudgetControl",
            LockLevel::ReadOnly,
        );
        let engine = engine(&cloud, true);

        let allowed = AllowedSet::new();
        let report = engine
            .run_lock_cleanup(true, None, &allowed, WorkflowTrigger::Manual, &ctx().at(now))
            .await;
        let details = report.lock_cleanup().unwrap();
        assert!(!details.destructive);
        assert_eq!(details.expired, 1);
        assert_eq!(details.orphaned, 1);
        assert_eq!(details.critical, 1);
        assert_eq!(details.retained, 4);
        assert_eq!(cloud.delete_lock_calls(), 0);

        let report = engine
            .run_lock_cleanup(false, None, &allowed, WorkflowTrigger::Manual, &ctx().at(now))
            .await;
        let details = report.lock_cleanup().unwrap();
        assert!(details.destructive);
        assert_eq!(report.counts.removed, 2);
        let removed: Vec<_> = details
            .findings
            .iter()
            .filter(|f| f.removed)
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&"old-lock"));
        assert!(removed.contains(&"ghost"));
        assert_eq!(cloud.all_locks().len(), 5);
    }

    #[tokio::test]
    async fn lock_cleanup_age_override() {
        let cloud = Arc::new(MemoryCloud::new(SUB));
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let a = cloud.add_resource_group("rg-a");
        cloud.add_lock_created(
            &a,
            "weekish",
            LockLevel::ReadOnly,
            Some(now - chrono::Duration::days(10)),
        );
        let engine = engine(&cloud, false);

        let report = engine
            .run_lock_cleanup(false, Some(7), &AllowedSet::new(), WorkflowTrigger::Manual, &ctx().at(now))
            .await;
        let details = report.lock_cleanup().unwrap();
        assert_eq!(details.max_age_days, 7);
        assert_eq!(details.expired, 1);
        assert!(!details.destructive);
    }
}
