//! HTTP control surface.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /state` | `{ "currentState": name }` |
//! | `POST /transition` `{ "to", "delayMs"? }` | `{ "success": true, "scheduled": bool }` |
//! | `POST /rollback` | `{ "success": true, "currentState": name }`, 409 if nothing to roll back |
//! | `GET /timers` | pending delayed transitions |
//! | `DELETE /timers/{target}` | `{ "cancelled": bool }` |
//! | `GET /visualize` | text graph |
//! | `GET /version` | `{ "version": v }` |
//! | `GET /history` | applied transitions, oldest first |

use crate::app::AppState;
use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use waypoint_workflow::{PendingTimer, TransitionRecord};

/// Builds the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/state", get(current_state))
        .route("/transition", post(transition))
        .route("/rollback", post(rollback))
        .route("/timers", get(pending_timers))
        .route("/timers/{target}", delete(cancel_timer))
        .route("/visualize", get(visualize))
        .route("/version", get(version))
        .route("/history", get(history))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StateResponse {
    current_state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransitionRequest {
    to: String,
    #[serde(default)]
    delay_ms: u64,
}

#[derive(Debug, Serialize)]
struct TransitionResponse {
    success: bool,
    scheduled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RollbackResponse {
    success: bool,
    current_state: String,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    version: String,
}

async fn current_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    Json(StateResponse {
        current_state: state.manager.current_state(),
    })
}

async fn transition(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let delay = Duration::from_millis(request.delay_ms);
    match state.manager.transition_to(&request.to, delay).await {
        Ok(outcome) => Ok(Json(TransitionResponse {
            success: true,
            scheduled: outcome.is_scheduled(),
        })),
        Err(report) => {
            let locale = state.catalog.locale_for(&headers);
            Err(ApiError::from_transition(
                report.current_context(),
                &state.catalog,
                &locale,
            ))
        }
    }
}

async fn rollback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RollbackResponse>, ApiError> {
    match state.manager.rollback().await {
        Ok(change) => Ok(Json(RollbackResponse {
            success: true,
            current_state: change.to,
        })),
        Err(report) => {
            let locale = state.catalog.locale_for(&headers);
            Err(ApiError::from_transition(
                report.current_context(),
                &state.catalog,
                &locale,
            ))
        }
    }
}

async fn pending_timers(State(state): State<Arc<AppState>>) -> Json<Vec<PendingTimer>> {
    Json(state.manager.pending_timers())
}

async fn cancel_timer(
    State(state): State<Arc<AppState>>,
    Path(target): Path<String>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.manager.cancel_delayed(&target),
    })
}

async fn visualize(State(state): State<Arc<AppState>>) -> String {
    state.manager.visualize()
}

async fn version(State(state): State<Arc<AppState>>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: state.manager.version().to_string(),
    })
}

async fn history(State(state): State<Arc<AppState>>) -> Json<Vec<TransitionRecord>> {
    Json(state.monitor.transitions())
}
