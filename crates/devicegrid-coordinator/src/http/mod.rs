//! HTTP server for the coordinator.
//!
//! Provides endpoints for:
//! - Device registration and heartbeats (`/register-device`, `/heartbeat`)
//! - Work polling and result submission (`/get-task/:device_id`, `/submit-result`)
//! - Device views (`/devices`, `/device-status/:device_id`)
//! - Task creation and views (`/tasks`, `/all-tasks`, `/task/:id`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::coordinator::Coordinator;

mod error;
mod handlers;

pub use error::ApiError;

/// Create the HTTP router.
pub fn create_router(coordinator: Arc<Coordinator>) -> Router {
    // Devices and dashboards call from anywhere
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Device routes
        .route("/register-device", post(handlers::register_device))
        .route("/heartbeat", post(handlers::heartbeat))
        .route("/get-task/:device_id", get(handlers::request_assignment))
        .route("/submit-result", post(handlers::submit_result))
        .route("/devices", get(handlers::list_devices))
        .route("/device-status/:device_id", get(handlers::device_status))
        // Task routes
        .route("/tasks", post(handlers::create_task))
        .route("/all-tasks", get(handlers::list_tasks))
        .route("/task/:id", get(handlers::get_task))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(coordinator)
}
