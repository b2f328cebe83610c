//! HTTP error mapping.

use attend_core::EventError;
use attend_db::{DbError, ReconcileError};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors returned by route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("malformed payload: {0}")]
    Payload(#[from] JsonRejection),
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] EventError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("database worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Payload(_)
            | Self::InvalidEvent(_)
            | Self::Reconcile(ReconcileError::Unstorable { .. }) => StatusCode::BAD_REQUEST,
            Self::Reconcile(ReconcileError::InvalidInterval { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Reconcile(ReconcileError::Conflict { .. }) => StatusCode::CONFLICT,
            Self::Reconcile(err) if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Db(DbError::Sqlite(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Reconcile(_) | Self::Db(_) | Self::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "ok": false, "error": self.to_string() }))).into_response()
    }
}
