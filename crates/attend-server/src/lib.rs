//! HTTP transport for attendance reconciliation.
//!
//! Each request that touches the store runs on tokio's blocking pool with its
//! own `SQLite` connection. The store's write transaction is the only
//! synchronization between concurrent requests.

mod error;
mod routes;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use attend_db::{Database, DbError};
use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    database_path: Arc<PathBuf>,
    busy_timeout: Duration,
}

impl AppState {
    /// Opens the database once to create the schema, then returns the state.
    pub fn initialize(database_path: &Path, busy_timeout: Duration) -> Result<Self, DbError> {
        Database::open_with_timeout(database_path, busy_timeout)?;
        Ok(Self {
            database_path: Arc::new(database_path.to_path_buf()),
            busy_timeout,
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Runs `f` against a fresh connection on the blocking pool.
    ///
    /// The schema was created by [`AppState::initialize`], so request
    /// connections skip it.
    pub(crate) async fn with_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Database) -> Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        let path = Arc::clone(&self.database_path);
        let busy_timeout = self.busy_timeout;
        tokio::task::spawn_blocking(move || {
            let mut db = Database::connect(&path, busy_timeout)?;
            f(&mut db)
        })
        .await?
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/zoom", post(routes::zoom_webhook))
        .route("/events", post(routes::post_event))
        .route("/sessions", get(routes::list_sessions))
        .route("/sessions/{session_id}/segments", get(routes::session_segments))
        .route("/health", get(routes::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        database = %state.database_path().display(),
        "attendance server listening"
    );
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
