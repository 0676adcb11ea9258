//! Run context and report assembly

use chrono::{DateTime, Utc};
use lockwarden_api::{
    ActionKind, ActionRecord, ErrorRecord, RunCounts, RunPhase, RunReport, RunStatus, RunSummary,
    WorkflowDetails, WorkflowKind, WorkflowTrigger, REPORT_VERSION,
};
use lockwarden_util::{GovernanceError, RunId};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-run deadline, stop signal and evaluation time.
///
/// `now` is the wall-clock instant the run evaluates windows and ages
/// against; it is fixed when the run starts.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: watch::Receiver<bool>,
    deadline: Instant,
    now: DateTime<Utc>,
}

impl RunContext {
    pub fn new(cancel: watch::Receiver<bool>, run_timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + run_timeout,
            now: lockwarden_util::now(),
        }
    }

    /// A context that can only end by deadline
    pub fn detached(run_timeout: Duration) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(rx, run_timeout)
    }

    /// Evaluate the run as if it started at `now`
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || Instant::now() >= self.deadline
    }

    /// Resolves once the deadline passes or a stop is signalled
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        let stopped = async move {
            // A dropped sender can never signal a stop
            if cancel.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = tokio::time::sleep_until(self.deadline) => {}
            _ = stopped => {}
        }
    }

    /// Drive `work` unless the run is cancelled first
    pub async fn until_cancelled<F: Future>(&self, work: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = work => Some(out),
        }
    }
}

/// Accumulates a run's actions and errors and produces the final report
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: RunId,
    workflow: WorkflowKind,
    trigger: WorkflowTrigger,
    started_at: DateTime<Utc>,
    phase: RunPhase,
    window_open: Option<bool>,
    counts: RunCounts,
    actions: Vec<ActionRecord>,
    errors: Vec<ErrorRecord>,
}

impl ReportBuilder {
    pub fn new(workflow: WorkflowKind, trigger: WorkflowTrigger) -> Self {
        let run_id = RunId::new();
        debug!(run_id = %run_id, workflow = %workflow, "Run started");
        Self {
            run_id,
            workflow,
            trigger,
            started_at: lockwarden_util::now(),
            phase: RunPhase::Idle,
            window_open: None,
            counts: RunCounts::default(),
            actions: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn set_window_open(&mut self, open: Option<bool>) {
        self.window_open = open;
    }

    pub fn enter(&mut self, phase: RunPhase) {
        debug!(run_id = %self.run_id, from = %self.phase, to = %phase, "Run phase");
        self.phase = phase;
    }

    /// Status for a run stopped in the current phase
    pub fn cancelled_status(&self) -> RunStatus {
        RunStatus::Cancelled { phase: self.phase }
    }

    pub fn analyzed(&mut self, n: usize) {
        self.counts.analyzed += n;
    }

    pub fn add_preserved(&mut self, n: usize) {
        self.counts.preserved += n;
    }

    /// Record an action; deletions and preservations are counted
    pub fn action(&mut self, kind: ActionKind, target: impl Into<String>, detail: Option<String>) {
        match kind {
            ActionKind::LockDeleted | ActionKind::ResourceDeleted => self.counts.removed += 1,
            ActionKind::LockPreserved => self.counts.preserved += 1,
            _ => {}
        }
        self.actions.push(ActionRecord {
            kind,
            target: target.into(),
            detail,
        });
    }

    /// Record a per-item failure; the run carries on
    pub fn error(&mut self, target: impl Into<String>, err: &GovernanceError) {
        let target = target.into();
        warn!(
            run_id = %self.run_id,
            phase = %self.phase,
            target = %target,
            error = %err,
            "Item failed"
        );
        self.counts.errored += 1;
        self.errors.push(ErrorRecord::from_error(target, err));
    }

    pub fn removed(&self) -> usize {
        self.counts.removed
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn finish(
        mut self,
        status: RunStatus,
        details: WorkflowDetails,
        message: impl Into<String>,
    ) -> RunReport {
        self.enter(RunPhase::Reporting);
        let operation_successful =
            self.errors.is_empty() && !matches!(status, RunStatus::Cancelled { .. });
        let message = message.into();

        info!(
            run_id = %self.run_id,
            workflow = %self.workflow,
            status = ?status,
            analyzed = self.counts.analyzed,
            removed = self.counts.removed,
            preserved = self.counts.preserved,
            errored = self.counts.errored,
            "Run finished"
        );

        RunReport {
            report_version: REPORT_VERSION,
            run_id: self.run_id,
            workflow: self.workflow,
            trigger: self.trigger,
            status,
            window_open: self.window_open,
            started_at: self.started_at,
            finished_at: lockwarden_util::now(),
            counts: self.counts,
            actions: self.actions,
            errors: self.errors,
            summary: RunSummary {
                operation_successful,
                message,
            },
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockwarden_api::{LockCheckDetails, Verification};

    fn details() -> WorkflowDetails {
        WorkflowDetails::LockCheck(LockCheckDetails {
            target_lock_name: "guard".into(),
            scope: "/subscriptions/s".into(),
            lock_found: false,
            lock_removed: false,
            verification: Verification::NotAttempted,
        })
    }

    #[test]
    fn counts_follow_actions_and_errors() {
        let mut builder = ReportBuilder::new(WorkflowKind::LockCheck, WorkflowTrigger::Manual);
        builder.analyzed(3);
        builder.action(ActionKind::LockDeleted, "a", None);
        builder.action(ActionKind::LockPreserved, "b", Some("exemption".into()));
        builder.action(ActionKind::LockAlreadyAbsent, "c", None);
        builder.error("d", &GovernanceError::remote("boom"));

        let report = builder.finish(RunStatus::Completed, details(), "done");
        assert_eq!(
            report.counts,
            RunCounts {
                analyzed: 3,
                removed: 1,
                preserved: 1,
                errored: 1
            }
        );
        assert_eq!(report.actions.len(), 3);
        assert!(!report.summary.operation_successful);
    }

    #[test]
    fn cancelled_run_is_not_successful() {
        let mut builder = ReportBuilder::new(WorkflowKind::LockCheck, WorkflowTrigger::Manual);
        builder.enter(RunPhase::Acting);
        let status = builder.cancelled_status();
        let report = builder.finish(status, details(), "stopped");
        assert_eq!(
            report.status,
            RunStatus::Cancelled {
                phase: RunPhase::Acting
            }
        );
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn context_cancels_on_signal() {
        let (tx, rx) = watch::channel(false);
        let ctx = RunContext::new(rx, Duration::from_secs(3600));
        assert!(!ctx.is_cancelled());

        tx.send(true).unwrap();
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn context_cancels_on_deadline() {
        let ctx = RunContext::detached(Duration::from_secs(5));
        assert!(!ctx.is_cancelled());
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }
}
