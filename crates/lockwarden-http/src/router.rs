//! Router setup

use axum::error_handling::HandleErrorLayer;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::{ApiError, WorkflowRunner};

/// Extra time a request gets beyond the run deadline, so a run that hits
/// its deadline can still deliver its partial report
const RESPONSE_GRACE: Duration = Duration::from_secs(30);

/// Limits applied to the HTTP surface
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub request_timeout: Duration,
    pub concurrency_limit: usize,
}

impl HttpSettings {
    pub fn for_runner(runner: &WorkflowRunner) -> Self {
        Self {
            request_timeout: runner.config().limits.run_timeout + RESPONSE_GRACE,
            concurrency_limit: 64,
        }
    }
}

pub type AppState = Arc<WorkflowRunner>;

pub fn router(runner: Arc<WorkflowRunner>, settings: HttpSettings) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/config", get(routes::config))
        .route("/workflows/lock-check", post(routes::lock_check))
        .route("/workflows/budget-unlock", post(routes::budget_unlock))
        .route("/workflows/tag-cleanup", post(routes::tag_cleanup))
        .route("/workflows/lock-cleanup", post(routes::lock_cleanup))
        .route("/webhooks/budget", post(routes::budget_webhook))
        .fallback(routes::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(settings.concurrency_limit))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TimeoutLayer::new(settings.request_timeout)),
        )
        .with_state(runner)
}

async fn handle_timeout_error(_err: tower::BoxError) -> ApiError {
    ApiError::Timeout
}
