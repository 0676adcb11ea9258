//! Audit event types

use chrono::{DateTime, Utc};
use lockwarden_api::{RunReport, RunStatus, WorkflowKind};
use lockwarden_util::{ResourceGroupName, RunId};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Configuration loaded at startup
    ConfigLoaded {
        subscription_id: String,
        auto_delete: bool,
    },

    /// Budget alert received on the webhook
    BudgetAlertReceived {
        budget_name: String,
        threshold_percent: f64,
        actual_spend: f64,
        triggered: bool,
    },

    /// A workflow run finished (in any status)
    RunCompleted {
        run_id: RunId,
        workflow: WorkflowKind,
        status: RunStatus,
        analyzed: usize,
        removed: usize,
        preserved: usize,
        errored: usize,
        operation_successful: bool,
    },

    /// Exemption markers added resource groups to the AllowedSet
    AllowedSetGrew { added: Vec<ResourceGroupName> },
}

impl AuditEventType {
    pub fn run_completed(report: &RunReport) -> Self {
        AuditEventType::RunCompleted {
            run_id: report.run_id.clone(),
            workflow: report.workflow,
            status: report.status.clone(),
            analyzed: report.counts.analyzed,
            removed: report.counts.removed,
            preserved: report.counts.preserved,
            errored: report.counts.errored,
            operation_successful: report.summary.operation_successful,
        }
    }
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: lockwarden_util::now(),
            event,
        }
    }
}
