//! HTTP + WebSocket surface for operators.
//!
//! REST endpoints drive the scheduler (register, select, approve, signal,
//! cancel, reset). `/ws` streams notification events.

pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use crate::error::{DatabaseError, Error, WorkloadError};
use crate::events::BroadcastNotifier;
use crate::store::RecordStore;
use crate::worker::Scheduler;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<dyn RecordStore>,
    /// Source of live events for WebSocket clients.
    pub events: Arc<BroadcastNotifier>,
}

/// Build the Axum router with REST and WebSocket routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/workloads",
            get(routes::list_workloads).post(routes::register_workload),
        )
        .route("/api/workloads/{id}", get(routes::get_workload))
        .route("/api/workloads/{id}/people", get(routes::list_people))
        .route("/api/workloads/{id}/selection", post(routes::submit_selection))
        .route("/api/workloads/{id}/drafts", post(routes::submit_drafts))
        .route("/api/workloads/{id}/signal", post(routes::signal_input))
        .route("/api/workloads/{id}/cancel", post(routes::cancel_workload))
        .route("/api/workloads/{id}/reset", post(routes::reset_workload))
        .route("/api/people", get(routes::find_person))
        .route("/api/queue", get(routes::queue_snapshot))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error response with a JSON `{"error": ...}` body.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Workload(WorkloadError::NotFound { .. })
            | Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Workload(
                WorkloadError::InvalidStage { .. }
                | WorkloadError::InvalidSelection { .. }
                | WorkloadError::UnknownPerson { .. },
            ) => StatusCode::CONFLICT,
            Error::Workload(WorkloadError::InvalidIdentity(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        Error::from(err).into()
    }
}

impl From<WorkloadError> for ApiError {
    fn from(err: WorkloadError) -> Self {
        Error::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "API request failed");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
