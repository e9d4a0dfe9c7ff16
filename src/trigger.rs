//! HTTP surface that starts a drain: `POST /` or `POST /drain`, plus `GET /health`.
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::backend::{FollowService, QueueService};
use crate::drain::{self, DrainSettings};
use crate::model::{DrainResponse, TriggerKind};

/// Set to `true` by the external scheduler; informational only.
pub const SCHEDULED_HEADER: &str = "x-scheduled";

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn QueueService>,
    pub follow: Arc<dyn FollowService>,
    pub settings: DrainSettings,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn QueueService>,
        follow: Arc<dyn FollowService>,
        settings: DrainSettings,
    ) -> Self {
        Self {
            queue,
            follow,
            settings,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(drain_handler))
        .route("/drain", post(drain_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn trigger_kind(headers: &HeaderMap) -> TriggerKind {
    let scheduled = headers
        .get(SCHEDULED_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if scheduled {
        TriggerKind::Scheduled
    } else {
        TriggerKind::Manual
    }
}

async fn drain_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<DrainResponse>) {
    let trigger = trigger_kind(&headers);
    info!(trigger = trigger.as_str(), "drain requested");

    // Own task: a panicking drain must still answer with a 500 body.
    let task = tokio::spawn(async move {
        drain::drain_batch(
            state.queue.as_ref(),
            state.follow.as_ref(),
            &state.settings,
            trigger,
        )
        .await
    });

    match task.await {
        Ok(report) => (StatusCode::OK, Json(DrainResponse::completed(&report))),
        Err(err) => {
            let description = if err.is_panic() {
                let payload = err.into_panic();
                payload
                    .downcast_ref::<&str>()
                    .map(|msg| msg.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .map(|msg| format!("drain task panicked: {msg}"))
                    .unwrap_or_else(|| "drain task panicked".to_string())
            } else {
                err.to_string()
            };
            error!(%description, "drain invocation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DrainResponse::failed(description)),
            )
        }
    }
}
