//! Device handlers: registration, heartbeats, polling, and results.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use devicegrid_core::wire::{
    AssignmentResponse, DeviceRequest, DeviceResponse, DeviceStatusResponse, HeartbeatResponse,
    MessageResponse, RegisterResponse, SubmitRequest, SubmitResponse,
};
use devicegrid_core::{Assignment, CoreError, DeviceId, SubmitResult};

use crate::coordinator::Coordinator;
use crate::http::ApiError;

/// Register a device. 201 for a new device, 200 if it was already known.
pub async fn register_device(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<DeviceRequest>,
) -> Result<Response, ApiError> {
    let device_id = req.device_id()?;
    let registration = coordinator.register_device(&device_id).await?;

    let (status, message) = if registration.created {
        (StatusCode::CREATED, "Device registered")
    } else {
        (StatusCode::OK, "Device already registered")
    };
    let body = RegisterResponse {
        message: message.to_string(),
        device: registration.device.into(),
    };
    Ok((status, Json(body)).into_response())
}

pub async fn heartbeat(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<DeviceRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let device_id = req.device_id()?;
    let device = coordinator.heartbeat(&device_id).await?;
    Ok(Json(HeartbeatResponse {
        message: "Heartbeat received".to_string(),
        status: device.status.to_string(),
    }))
}

/// Poll for work. A busy device or an empty queue is answered with a
/// message, not an error.
pub async fn request_assignment(
    State(coordinator): State<Arc<Coordinator>>,
    Path(device_id): Path<String>,
) -> Result<Response, ApiError> {
    let device_id = DeviceId::new(device_id);
    match coordinator.request_assignment(&device_id).await {
        Ok(Assignment::Granted(lease)) => {
            let code_url = coordinator.config().code_url(&lease.code_ref);
            Ok(Json(AssignmentResponse::new(lease, code_url)).into_response())
        }
        Ok(Assignment::NoWork) => {
            Ok(Json(MessageResponse::new("No task available")).into_response())
        }
        Err(CoreError::AlreadyBusy(_)) => {
            Ok(Json(MessageResponse::new("Device is still busy")).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn submit_result(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let submission = SubmitResult::try_from(req)?;
    let accepted = coordinator.submit_result(submission).await?;
    Ok(Json(SubmitResponse {
        message: "Result saved".to_string(),
        result_count: accepted.result_count,
        completed: accepted.completed,
    }))
}

/// List devices as JSON, sorted by id.
pub async fn list_devices(
    State(coordinator): State<Arc<Coordinator>>,
) -> Result<Json<Vec<DeviceResponse>>, ApiError> {
    let devices = coordinator.list_devices().await?;
    Ok(Json(devices.into_iter().map(Into::into).collect()))
}

pub async fn device_status(
    State(coordinator): State<Arc<Coordinator>>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceStatusResponse>, ApiError> {
    let status = coordinator.device_status(&DeviceId::new(device_id)).await?;
    Ok(Json(DeviceStatusResponse {
        status: status.to_string(),
    }))
}
