use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use booth_proto::GenerateSessionResponse;
use metrics::gauge;
use serde_json::json;
use tracing::error;

use crate::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "sessions": state.hub.session_count() }))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn generate_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.hub.issue_session() {
        Ok(issued) => {
            gauge!("booth_relay_sessions_active", state.hub.session_count() as f64);
            (
                StatusCode::OK,
                Json(GenerateSessionResponse::success(
                    issued.session_id,
                    issued.pairing_url.to_string(),
                )),
            )
        }
        Err(err) => {
            error!(error = %err, "failed to issue session");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GenerateSessionResponse::error(err.to_string())),
            )
        }
    }
}

pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.hub.describe(&session_id) {
        Some(status) => (
            StatusCode::OK,
            Json(json!({
                "exists": true,
                "session_id": status.session_id,
                "lifecycle": status.lifecycle,
                "station_attached": status.station_attached,
                "remote_attached": status.remote_attached,
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "exists": false, "session_id": session_id })),
        ),
    }
}
