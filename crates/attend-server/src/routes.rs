//! Route handlers.

use attend_core::zoom::{self, Normalized};
use attend_core::{AttendanceEvent, SegmentState, SessionId};
use attend_db::Database;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_SESSION_LIMIT: u32 = 20;
const MAX_SESSION_LIMIT: u32 = 500;

/// Zoom webhook endpoint.
pub async fn zoom_webhook(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let event = match zoom::normalize(body, Utc::now())? {
        Normalized::Event(event) => event,
        Normalized::Ignored { event } => {
            return Ok(Json(json!({ "ok": true, "ignored": true, "event": event })));
        }
    };
    reconcile(&state, event).await
}

/// Normalized event endpoint.
pub async fn post_event(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let event: AttendanceEvent =
        serde_json::from_value(body).map_err(attend_core::EventError::from)?;
    reconcile(&state, event).await
}

async fn reconcile(state: &AppState, event: AttendanceEvent) -> Result<Json<Value>, ApiError> {
    tracing::debug!(
        kind = %event.kind,
        session_id = %event.session_id,
        user_id = %event.user_id,
        timestamp = %event.timestamp,
        "reconciling event"
    );
    let outcome = state
        .with_db(move |db| db.apply(&event).map_err(ApiError::from))
        .await?;
    Ok(Json(acknowledgement(&outcome)))
}

/// Response body for an applied event.
pub fn acknowledgement(state: &SegmentState) -> Value {
    let mut body = json!({ "ok": true, "action": state.action() });
    if let Some(segment) = state.segment() {
        body["segment"] = json!(segment);
    }
    if let SegmentState::Closed(segment) = state {
        body["duration_sec"] = json!(segment.duration_sec);
    }
    body
}

#[derive(Debug, Deserialize)]
pub struct SessionListParams {
    limit: Option<u32>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<SessionListParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SESSION_LIMIT)
        .clamp(1, MAX_SESSION_LIMIT);
    let sessions = state
        .with_db(move |db| db.list_sessions(limit).map_err(ApiError::from))
        .await?;
    let body: Vec<Value> = sessions
        .into_iter()
        .map(|session_id| json!({ "session_id": session_id }))
        .collect();
    Ok(Json(Value::Array(body)))
}

pub async fn session_segments(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session_id = SessionId::new(session_id).map_err(attend_core::EventError::from)?;
    let segments = {
        let session_id = session_id.clone();
        state
            .with_db(move |db| db.list_segments(&session_id).map_err(ApiError::from))
            .await?
    };
    Ok(Json(json!({
        "session_id": session_id,
        "segments": segments,
    })))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.with_db(|db: &mut Database| db.ping().map_err(ApiError::from)).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
