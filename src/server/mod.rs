//! HTTP API over the comparison engine.

mod handlers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::EngineSettingsResolved;
use crate::db::manager::{ConnectionHandle, ConnectionManager};
use crate::engine::jobs::JobRegistry;
use crate::error::{ComparisonError, ErrorKind, classify_error};
use crate::output::json::error_json;

/// Shared by every request.
pub struct AppState {
    pub manager: ConnectionManager,
    pub jobs: JobRegistry,
    pub engine: EngineSettingsResolved,
    /// Keeps each session opened through `/api/connect` alive until it is
    /// released through `DELETE /api/connections/:id`.
    connected: Mutex<HashMap<String, ConnectionHandle>>,
}

impl AppState {
    pub fn new(manager: ConnectionManager, engine: EngineSettingsResolved) -> Self {
        Self {
            manager,
            jobs: JobRegistry::with_retention(engine.max_retained_jobs),
            engine,
            connected: Mutex::new(HashMap::new()),
        }
    }

    fn connected(&self) -> MutexGuard<'_, HashMap<String, ConnectionHandle>> {
        self.connected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn hold(&self, handle: ConnectionHandle) {
        self.connected().insert(handle.id().to_string(), handle);
    }

    pub fn release(&self, id: &str) -> bool {
        match self.connected().remove(id) {
            Some(handle) => {
                self.manager.release(handle);
                true
            }
            None => false,
        }
    }

    /// Finds a live session by connection id, falling back to database name.
    pub fn resolve(&self, reference: &str) -> Result<ConnectionHandle, ComparisonError> {
        self.manager
            .get(reference)
            .or_else(|| self.manager.find_by_database(reference))
            .ok_or_else(|| ComparisonError::ConnectionNotFound(reference.to_string()))
    }

    /// Splits `database.table` when the prefix names a live database.
    pub fn resolve_qualified(&self, table: &str) -> Option<(ConnectionHandle, String)> {
        let (database, rest) = table.split_once('.')?;
        let handle = self.manager.find_by_database(database)?;
        Some((handle, rest.to_string()))
    }

    /// The single live session, when exactly one exists.
    pub fn only_connection(&self) -> Option<ConnectionHandle> {
        match self.manager.connection_ids().as_slice() {
            [only] => self.manager.get(only),
            _ => None,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/api/connect", post(handlers::connect))
        .route("/api/connections", get(handlers::list_connections))
        .route("/api/connections/:id", delete(handlers::disconnect))
        .route("/api/tables/:connection", get(handlers::tables))
        .route("/api/columns/:table", get(handlers::columns))
        .route("/api/compare", post(handlers::compare))
        .route("/api/jobs", post(handlers::submit_job).get(handlers::list_jobs))
        .route("/api/jobs/:id", get(handlers::job_status).delete(handlers::delete_job))
        .route("/api/jobs/:id/results", get(handlers::job_results))
        .route("/api/jobs/:id/export", get(handlers::job_export))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until SIGINT or SIGTERM.
pub async fn serve(bind: &str, state: Arc<AppState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(address = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let sigint = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = sigint => (),
        _ = sigterm => (),
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Config => StatusCode::BAD_REQUEST,
        ErrorKind::Connection => StatusCode::BAD_GATEWAY,
        ErrorKind::Mapping => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Cancelled | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Query | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Any handler failure, rendered as `{"error": {"message", "kind"}}`.
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = classify_error(&self.0);
        let status = status_for(kind);
        if status.is_server_error() {
            warn!(kind = kind.as_str(), error = %self.0, "request failed");
        }
        (status, Json(error_json(&self.0.to_string(), kind.as_str()))).into_response()
    }
}
