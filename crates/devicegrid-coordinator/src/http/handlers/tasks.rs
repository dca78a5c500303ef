//! Task handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use devicegrid_core::wire::{CreateTaskRequest, TaskResponse};
use devicegrid_core::{NewTask, TaskId};

use crate::coordinator::Coordinator;
use crate::http::ApiError;

pub async fn create_task(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let new = NewTask::try_from(req)?;
    let task = coordinator.create_task(new).await?;
    Ok((StatusCode::CREATED, Json(task.into())))
}

/// All tasks, newest first.
pub async fn list_tasks(
    State(coordinator): State<Arc<Coordinator>>,
) -> Result<Json<Vec<TaskResponse>>, ApiError> {
    let tasks = coordinator.list_tasks().await?;
    Ok(Json(tasks.into_iter().map(Into::into).collect()))
}

pub async fn get_task(
    State(coordinator): State<Arc<Coordinator>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = coordinator.get_task(&TaskId::new(id)).await?;
    Ok(Json(task.into()))
}
