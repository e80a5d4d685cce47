//! HTTP router for formsync
//!
//! This module defines the axum router that handles all HTTP requests.
//! It provides routes for:
//! - Liveness (`GET /`)
//! - Sync trigger (`POST /update_sheets[?sheet=<group>]`)

use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::middleware::{logging_middleware, tracing_middleware, trigger_guard};
use crate::auth::{RateLimiter, TriggerAuth};
use crate::models::FormCatalog;
use crate::otel::SyncMetrics;
use crate::sync::SyncOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator shared with the scheduler
    pub orchestrator: Arc<SyncOrchestrator>,

    /// Configured sheet groups
    pub catalog: Arc<FormCatalog>,

    /// Trigger token guard
    pub auth: Arc<TriggerAuth>,

    /// Trigger rate limiter
    pub limiter: Arc<RateLimiter>,

    /// Sync metrics
    pub metrics: Option<Arc<SyncMetrics>>,

    /// Cancelled on server shutdown
    pub shutdown: CancellationToken,
}

/// Liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Trigger query parameters
#[derive(Debug, Default, Deserialize)]
pub struct UpdateSheetsQuery {
    /// Sheet group to sync; every group when absent or empty
    pub sheet: Option<String>,
}

/// Build the main application router
///
/// # Arguments
///
/// * `state` - Application state containing the orchestrator and guards
///
/// # Returns
///
/// An axum Router configured with all endpoints
pub fn build_router(state: AppState) -> Router {
    let trigger = Router::new()
        .route("/update_sheets", post(update_sheets_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), trigger_guard));

    Router::new()
        .route("/", get(status_handler))
        .merge(trigger)
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn(tracing_middleware))
        .with_state(state)
}

/// Liveness endpoint handler
async fn status_handler() -> impl IntoResponse {
    Json(StatusResponse {
        status: "running".to_string(),
    })
}

/// Sync trigger handler
///
/// The run is spawned as its own task. Dropping this handler, which happens
/// when the client disconnects, cancels the run before its next form.
async fn update_sheets_handler(
    State(state): State<AppState>,
    Query(query): Query<UpdateSheetsQuery>,
) -> Response {
    let sheet = query.sheet.as_deref().filter(|s| !s.is_empty());

    let forms = match state.catalog.select(sheet) {
        Ok(forms) => forms,
        Err(e) => {
            tracing::warn!(error = %e, "Trigger for unknown sheet group");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    tracing::info!(sheet = sheet.unwrap_or("*"), forms = forms.len(), "Sync triggered");

    let cancel = state.shutdown.child_token();
    let disconnect_guard = cancel.clone().drop_guard();
    let orchestrator = Arc::clone(&state.orchestrator);

    let task = tokio::spawn(async move { orchestrator.run(forms, cancel).await });
    let result = task.await;
    disconnect_guard.disarm();

    match result {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Sync run task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Sync run failed" })),
            )
                .into_response()
        }
    }
}
