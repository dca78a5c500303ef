//! Core domain errors.

use thiserror::Error;

use crate::{DeviceId, TaskId};

/// Caller-facing errors for DeviceGrid operations.
///
/// Every variant is a distinct outcome a device or operator can act on, so
/// "nothing to do" and "conflict" never collapse into one generic failure.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Device has never registered.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// Task does not exist.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Missing or malformed field.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Result submitted for a slot the device does not hold.
    #[error("Input '{input}' of task {task_id} is not assigned to device {device_id}")]
    NotAssigned {
        task_id: TaskId,
        device_id: DeviceId,
        input: String,
    },

    /// Same (device, input) result submitted twice.
    #[error("Result already submitted by device {device_id} for input '{input}' of task {task_id}")]
    DuplicateResult {
        task_id: TaskId,
        device_id: DeviceId,
        input: String,
    },

    /// Device already holds a lease.
    #[error("Device {0} is still busy")]
    AlreadyBusy(DeviceId),

    /// Task is done and accepts no further results.
    #[error("Task {0} is already done")]
    TaskClosed(TaskId),

    /// Conditional updates kept losing to concurrent writers.
    #[error("Record contended: {0}")]
    Contended(String),

    /// Transient infrastructure failure.
    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CoreError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DeviceNotFound(_) | Self::TaskNotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::NotAssigned { .. } => "not_assigned",
            Self::DuplicateResult { .. } => "duplicate_result",
            Self::AlreadyBusy(_) => "already_busy",
            Self::TaskClosed(_) => "task_closed",
            Self::Contended(_) => "contended",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_) | Self::TaskNotFound(_))
    }

    /// Transient failures are worth retrying; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Contended(_) | Self::StoreUnavailable(_))
    }
}
