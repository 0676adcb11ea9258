//! Run reports
//!
//! A `RunReport` is assembled by the workflow orchestrator and handed back
//! whole. It is the sole externally observable artifact of a run: failure is
//! communicated through `errors` and `summary.operation_successful`, never by
//! withholding the report.

use chrono::{DateTime, Utc};
use lockwarden_util::{ErrorKind, GovernanceError, ResourceGroupName, RunId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::LockLevel;

/// The automations lockwarden runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    LockCheck,
    BudgetUnlock,
    TagCleanup,
    LockCleanup,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 4] = [
        WorkflowKind::LockCheck,
        WorkflowKind::BudgetUnlock,
        WorkflowKind::TagCleanup,
        WorkflowKind::LockCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::LockCheck => "lock_check",
            WorkflowKind::BudgetUnlock => "budget_unlock",
            WorkflowKind::TagCleanup => "tag_cleanup",
            WorkflowKind::LockCleanup => "lock_cleanup",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowTrigger {
    /// Periodic tick; gated by the workflow's schedule window
    Scheduled { at: DateTime<Utc> },
    /// Forced execution over HTTP
    Manual,
    /// Budget alert crossing its threshold
    BudgetAlert { budget_name: String },
}

impl WorkflowTrigger {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, WorkflowTrigger::Scheduled { .. })
    }
}

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Listing,
    Classifying,
    Acting,
    Reporting,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Listing => "listing",
            RunPhase::Classifying => "classifying",
            RunPhase::Acting => "acting",
            RunPhase::Reporting => "reporting",
        };
        f.write_str(s)
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Scheduled trigger outside the window; nothing was listed or changed
    Skipped { reason: String },
    /// Deadline exceeded or explicit stop; the report holds what was done so far
    Cancelled { phase: RunPhase },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub analyzed: usize,
    pub removed: usize,
    pub preserved: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    LockDeleted,
    /// Delete attempted on a lock that was already gone
    LockAlreadyAbsent,
    LockUpserted,
    LockPreserved,
    ResourceDeleted,
    ResourceGroupAllowed,
}

/// One action the run took
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub kind: ActionKind,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One per-item failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub target: String,
    pub message: String,
}

impl ErrorRecord {
    pub fn from_error(target: impl Into<String>, err: &GovernanceError) -> Self {
        Self {
            kind: err.kind(),
            target: target.into(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub operation_successful: bool,
    pub message: String,
}

/// Result of the targeted lock check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verification {
    NotAttempted,
    RemovedAndVerified,
    StillPresent,
    Unverifiable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockCheckDetails {
    pub target_lock_name: String,
    pub scope: String,
    pub lock_found: bool,
    pub lock_removed: bool,
    pub verification: Verification,
}

/// What happened to a discovered exemption marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerOutcome {
    AddedToAllowedList,
    AlreadyInAllowedList,
    ScopeNotResourceGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerFinding {
    pub scope: String,
    pub resource_group: Option<ResourceGroupName>,
    pub outcome: MarkerOutcome,
}

/// The subscription-level guard lock applied after an unlock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardLockOutcome {
    pub name: String,
    pub scope: String,
    pub level: LockLevel,
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetUnlockDetails {
    pub budget_limit: Option<f64>,
    pub current_cost: Option<f64>,
    pub total_locks_processed: usize,
    pub holdlocks_found: usize,
    pub markers: Vec<MarkerFinding>,
    pub allowed_resource_groups_initial: Vec<ResourceGroupName>,
    pub allowed_resource_groups_final: Vec<ResourceGroupName>,
    pub allowed_rgs_added: Vec<ResourceGroupName>,
    pub guard_lock: Option<GuardLockOutcome>,
    pub ready_for_resource_deletion: bool,
}

/// Final disposition of a resource missing required tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceDisposition {
    Protected,
    Orphaned,
    NonOrphanNonCompliant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFinding {
    pub id: String,
    pub resource_type: String,
    pub resource_group: Option<ResourceGroupName>,
    pub missing_tags: Vec<String>,
    pub disposition: ResourceDisposition,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCleanupDetails {
    pub required_tags: Vec<String>,
    pub auto_delete: bool,
    pub total_resources: usize,
    pub resources_without_tags: usize,
    pub protected_resources: usize,
    pub orphaned_resources: usize,
    pub resources_deleted: usize,
    pub findings: Vec<ResourceFinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockCategory {
    Expired,
    Orphaned,
    Critical,
    Retained,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFinding {
    pub name: String,
    pub scope: String,
    pub level: LockLevel,
    pub category: LockCategory,
    pub reason: String,
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockCleanupDetails {
    pub max_age_days: u32,
    pub destructive: bool,
    pub expired: usize,
    pub orphaned: usize,
    pub critical: usize,
    pub retained: usize,
    pub findings: Vec<LockFinding>,
}

/// Workflow-specific part of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowDetails {
    LockCheck(LockCheckDetails),
    BudgetUnlock(BudgetUnlockDetails),
    TagCleanup(TagCleanupDetails),
    LockCleanup(LockCleanupDetails),
}

/// Structured summary of one workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub report_version: u32,
    pub run_id: RunId,
    pub workflow: WorkflowKind,
    pub trigger: WorkflowTrigger,
    pub status: RunStatus,
    /// Whether the schedule window was open when the run started, for workflows that have one
    pub window_open: Option<bool>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: RunCounts,
    pub actions: Vec<ActionRecord>,
    pub errors: Vec<ErrorRecord>,
    pub summary: RunSummary,
    pub details: WorkflowDetails,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.summary.operation_successful
    }

    pub fn actions_of(&self, kind: ActionKind) -> impl Iterator<Item = &ActionRecord> {
        self.actions.iter().filter(move |a| a.kind == kind)
    }

    pub fn lock_check(&self) -> Option<&LockCheckDetails> {
        match &self.details {
            WorkflowDetails::LockCheck(d) => Some(d),
            _ => None,
        }
    }

    pub fn budget_unlock(&self) -> Option<&BudgetUnlockDetails> {
        match &self.details {
            WorkflowDetails::BudgetUnlock(d) => Some(d),
            _ => None,
        }
    }

    pub fn tag_cleanup(&self) -> Option<&TagCleanupDetails> {
        match &self.details {
            WorkflowDetails::TagCleanup(d) => Some(d),
            _ => None,
        }
    }

    pub fn lock_cleanup(&self) -> Option<&LockCleanupDetails> {
        match &self.details {
            WorkflowDetails::LockCleanup(d) => Some(d),
            _ => None,
        }
    }
}
