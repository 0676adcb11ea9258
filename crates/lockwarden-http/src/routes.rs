//! Request handlers

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::Uri;
use axum::Json;
use lockwarden_api::{
    BudgetEvent, BudgetUnlockParams, HealthStatus, RunReport, WorkflowKind, WorkflowTrigger,
    BUDGET_UNLOCK_ACTION,
};
use lockwarden_config::ConfigSummary;
use lockwarden_core::{parse_budget_event, should_trigger_unlock, unlock_params, WorkflowRequest};
use lockwarden_store::AuditEventType;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{ApiError, AppState};

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run on a detached task so a dropped connection or a request timeout
/// cannot abort the run between its acting steps
async fn run(
    runner: &AppState,
    request: WorkflowRequest,
    trigger: WorkflowTrigger,
) -> Result<RunReport, ApiError> {
    let kind = request.kind();
    runner.run_detached(request, trigger).await.map_err(|e| {
        error!(workflow = %kind, error = %e, "Workflow task failed");
        ApiError::Internal(format!("{} run failed: {}", kind, e))
    })
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|rejection| ApiError::InvalidQuery(rejection.body_text()))
}

pub(crate) async fn health(State(runner): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        live: true,
        store_ok: runner.store().is_healthy(),
        cloud_ok: runner.engine().cloud_healthy(),
        subscription_id: runner.config().azure.subscription_id.clone(),
        workflows: WorkflowKind::ALL.to_vec(),
    })
}

pub(crate) async fn config(State(runner): State<AppState>) -> Json<ConfigSummary> {
    Json(runner.config().summary())
}

pub(crate) async fn lock_check(State(runner): State<AppState>) -> ApiResult<RunReport> {
    let report = run(&runner, WorkflowRequest::LockCheck, WorkflowTrigger::Manual).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub(crate) struct BudgetUnlockQuery {
    budget_limit: Option<f64>,
    current_cost: Option<f64>,
    action: Option<String>,
}

pub(crate) async fn budget_unlock(
    State(runner): State<AppState>,
    params: Result<Query<BudgetUnlockQuery>, QueryRejection>,
) -> ApiResult<RunReport> {
    let params = query(params)?;
    if let Some(action) = params.action
        && action != BUDGET_UNLOCK_ACTION
    {
        return Err(ApiError::InvalidAction(action));
    }

    let request = WorkflowRequest::BudgetUnlock(BudgetUnlockParams {
        budget_limit: params.budget_limit,
        current_cost: params.current_cost,
    });
    Ok(Json(run(&runner, request, WorkflowTrigger::Manual).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagCleanupQuery {
    #[serde(default)]
    dry_run: bool,
}

pub(crate) async fn tag_cleanup(
    State(runner): State<AppState>,
    params: Result<Query<TagCleanupQuery>, QueryRejection>,
) -> ApiResult<RunReport> {
    let params = query(params)?;
    let request = WorkflowRequest::TagCleanup {
        dry_run: params.dry_run,
    };
    Ok(Json(run(&runner, request, WorkflowTrigger::Manual).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct LockCleanupQuery {
    #[serde(default)]
    dry_run: bool,
    max_age_days: Option<u32>,
}

pub(crate) async fn lock_cleanup(
    State(runner): State<AppState>,
    params: Result<Query<LockCleanupQuery>, QueryRejection>,
) -> ApiResult<RunReport> {
    let params = query(params)?;
    if params.max_age_days == Some(0) {
        return Err(ApiError::InvalidQuery("max_age_days must be at least 1".into()));
    }

    let request = WorkflowRequest::LockCleanup {
        dry_run: params.dry_run,
        max_age_days: params.max_age_days,
    };
    Ok(Json(run(&runner, request, WorkflowTrigger::Manual).await?))
}

#[derive(Debug, Serialize)]
pub(crate) struct WebhookResponse {
    status: &'static str,
    triggered: bool,
    event: BudgetEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<RunReport>,
}

pub(crate) async fn budget_webhook(
    State(runner): State<AppState>,
    body: Bytes,
) -> ApiResult<WebhookResponse> {
    let event = parse_budget_event(&body).map_err(|e| {
        warn!(error = %e, "Rejected budget alert");
        ApiError::InvalidPayload(e.to_string())
    })?;
    let triggered = should_trigger_unlock(&event);

    runner.audit(AuditEventType::BudgetAlertReceived {
        budget_name: event.budget_name.clone(),
        threshold_percent: event.threshold_percent,
        actual_spend: event.actual_spend,
        triggered,
    });

    let report = if triggered {
        error!(
            budget = %event.budget_name,
            threshold_percent = event.threshold_percent,
            actual_spend = event.actual_spend,
            "Budget exceeded"
        );
        let trigger = WorkflowTrigger::BudgetAlert {
            budget_name: event.budget_name.clone(),
        };
        let request = WorkflowRequest::BudgetUnlock(unlock_params(&event));
        Some(run(&runner, request, trigger).await?)
    } else {
        info!(
            budget = %event.budget_name,
            threshold_percent = event.threshold_percent,
            "Budget alert below unlock threshold"
        );
        None
    };

    Ok(Json(WebhookResponse {
        status: "webhook_processed",
        triggered,
        event,
        report,
    }))
}

pub(crate) async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

#[cfg(test)]
mod tests {
    use crate::{router, HttpSettings, WorkflowRunner};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use lockwarden_api::LockLevel;
    use lockwarden_cloud_api::MemoryCloud;
    use lockwarden_config::{config_from_overrides, EnvOverrides};
    use lockwarden_core::GovernanceEngine;
    use lockwarden_store::{AuditEventType, SqliteStore, Store};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        cloud: Arc<MemoryCloud>,
        store: Arc<SqliteStore>,
        _stop: watch::Sender<bool>,
    }

    fn app() -> TestApp {
        let cloud = Arc::new(MemoryCloud::new("sub-1"));
        let config = config_from_overrides(&EnvOverrides {
            subscription_id: Some("sub-1".into()),
            ..Default::default()
        })
        .unwrap();
        let engine = Arc::new(GovernanceEngine::new(Arc::new(config), cloud.clone()));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (tx, rx) = watch::channel(false);
        let runner = Arc::new(WorkflowRunner::new(engine, store.clone(), rx));
        let settings = HttpSettings {
            request_timeout: Duration::from_secs(30),
            concurrency_limit: 8,
        };

        TestApp {
            app: router(runner, settings),
            cloud,
            store,
            _stop: tx,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_and_config() {
        let t = app();
        let (status, body) = call(&t.app, "GET", "/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store_ok"], true);
        assert_eq!(body["cloud_ok"], true);
        assert_eq!(body["workflows"].as_array().unwrap().len(), 4);

        *t.cloud.healthy.lock().unwrap() = false;
        let (status, body) = call(&t.app, "GET", "/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["live"], true);
        assert_eq!(body["cloud_ok"], false);

        let (status, body) = call(&t.app, "GET", "/config", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscription_id"], "sub-1");
        assert_eq!(body["budget_lock_name"], "Prevent-Spending-BudgetControl");
    }

    #[tokio::test]
    async fn budget_webhook_triggers_unlock() {
        let t = app();
        let rg = t.cloud.add_resource_group("rg-a");
        t.cloud.add_lock(&rg, "rg-lock", LockLevel::CanNotDelete);

        let payload = json!({ "data": { "budgetName": "B1", "threshold": 105, "actualSpend": 500 } });
        let (status, body) = call(
            &t.app,
            "POST",
            "/webhooks/budget",
            Body::from(payload.to_string()),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "webhook_processed");
        assert_eq!(body["triggered"], true);
        assert_eq!(body["event"]["budget_name"], "B1");
        assert_eq!(body["report"]["summary"]["operation_successful"], true);
        assert_eq!(body["report"]["details"]["current_cost"], 500.0);
        let limit = body["report"]["details"]["budget_limit"].as_f64().unwrap();
        assert!((limit - 500.0 / 1.05).abs() < 1e-9);

        let guards = t.cloud.locks_exactly_at(&t.cloud.subscription_scope());
        assert_eq!(guards.len(), 1);
        assert_eq!(guards[0].level, LockLevel::ReadOnly);
        assert!(!t.cloud.all_locks().iter().any(|l| l.name == "rg-lock"));

        let audits = t.store.get_recent_audits(10).unwrap();
        assert!(audits.iter().any(|a| matches!(
            a.event,
            AuditEventType::BudgetAlertReceived { triggered: true, .. }
        )));
    }

    #[tokio::test]
    async fn dropped_webhook_request_still_applies_guard() {
        let t = app();
        t.cloud.set_latency(Some(Duration::from_millis(100)));
        for name in ["rg-a", "rg-b", "rg-c", "rg-d"] {
            let rg = t.cloud.add_resource_group(name);
            t.cloud.add_lock(&rg, &format!("{}-lock", name), LockLevel::CanNotDelete);
        }

        let payload = json!({ "data": { "budgetName": "B1", "threshold": 110, "actualSpend": 900 } });
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/budget")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();

        // The client gives up while locks are being removed
        let response =
            tokio::time::timeout(Duration::from_millis(150), t.app.clone().oneshot(request)).await;
        assert!(response.is_err());

        let mut completed = false;
        for _ in 0..50 {
            let audits = t.store.get_recent_audits(10).unwrap();
            if audits
                .iter()
                .any(|a| matches!(a.event, AuditEventType::RunCompleted { .. }))
            {
                completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(completed, "unlock run never completed");

        let guards = t.cloud.locks_exactly_at(&t.cloud.subscription_scope());
        assert_eq!(guards.len(), 1);
        assert_eq!(guards[0].level, LockLevel::ReadOnly);
        assert_eq!(t.cloud.all_locks().len(), 1);
    }

    #[tokio::test]
    async fn budget_webhook_below_threshold_does_nothing() {
        let t = app();
        let rg = t.cloud.add_resource_group("rg-a");
        t.cloud.add_lock(&rg, "rg-lock", LockLevel::CanNotDelete);

        let payload = json!({ "data": { "budgetName": "B1", "threshold": 99.99, "actualSpend": 10 } });
        let (status, body) = call(
            &t.app,
            "POST",
            "/webhooks/budget",
            Body::from(payload.to_string()),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["triggered"], false);
        assert!(body.get("report").is_none());
        assert_eq!(t.cloud.delete_lock_calls(), 0);
    }

    #[tokio::test]
    async fn malformed_webhook_is_rejected() {
        let t = app();
        let (status, body) =
            call(&t.app, "POST", "/webhooks/budget", Body::from("not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_payload");

        let (status, _) = call(
            &t.app,
            "POST",
            "/webhooks/budget",
            Body::from(json!({ "budgetName": "B1" }).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(t.cloud.delete_lock_calls(), 0);
    }

    #[tokio::test]
    async fn budget_unlock_validates_action() {
        let t = app();
        let (status, body) = call(
            &t.app,
            "POST",
            "/workflows/budget-unlock?action=Enable",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["valid_actions"], json!(["Disable"]));

        let (status, body) = call(
            &t.app,
            "POST",
            "/workflows/budget-unlock?budget_limit=1000&current_cost=1200&action=Disable",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["details"]["budget_limit"], 1000.0);
        assert_eq!(body["details"]["guard_lock"]["applied"], true);
    }

    #[tokio::test]
    async fn bad_queries_are_rejected() {
        let t = app();
        let (status, body) = call(
            &t.app,
            "POST",
            "/workflows/lock-cleanup?max_age_days=0",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_query");

        let (status, _) = call(
            &t.app,
            "POST",
            "/workflows/tag-cleanup?dry_run=maybe",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn workflow_failures_still_return_ok() {
        let t = app();
        t.cloud.fail_list_locks_at(&t.cloud.subscription_scope());

        let (status, body) =
            call(&t.app, "POST", "/workflows/lock-check", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["operation_successful"], false);
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn manual_runs_report_their_window() {
        let t = app();
        let (status, body) = call(
            &t.app,
            "POST",
            "/workflows/tag-cleanup?dry_run=true",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["workflow"], "tag_cleanup");
        assert!(body["window_open"].is_boolean());
        assert_eq!(body["details"]["auto_delete"], false);

        let (status, body) = call(
            &t.app,
            "POST",
            "/workflows/lock-cleanup?dry_run=true&max_age_days=30",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["details"]["max_age_days"], 30);
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let t = app();
        let (status, body) = call(&t.app, "GET", "/nope", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }
}
