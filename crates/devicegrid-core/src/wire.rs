//! JSON wire types shared by the coordinator's HTTP adapter and its
//! clients.
//!
//! Field names are camelCase on the wire. Request fields are optional so a
//! missing one surfaces as an `invalid_input` error rather than a generic
//! body rejection.

use serde::{Deserialize, Serialize};

use crate::{
    CoreError, Device, DeviceId, InputSlot, Lease, NewTask, ResultEntry, SubmitResult, Task,
    TaskId,
};

fn required(value: Option<String>, field: &str) -> Result<String, CoreError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CoreError::InvalidInput(format!("{field} is required")))
}

// ============================================================================
// Device types
// ============================================================================

/// Request body naming a device (`/register-device`, `/heartbeat`).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    #[serde(default)]
    pub device_id: Option<String>,
}

impl DeviceRequest {
    pub fn device_id(self) -> Result<DeviceId, CoreError> {
        required(self.device_id, "deviceId").map(DeviceId::new)
    }
}

/// A device's current lease.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRefResponse {
    pub task_id: String,
    pub slot: usize,
}

/// Response for a single device.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub device_id: String,
    pub status: String,
    pub last_heartbeat: String,
    pub lease: Option<LeaseRefResponse>,
}

impl From<Device> for DeviceResponse {
    fn from(device: Device) -> Self {
        Self {
            device_id: device.id.into_inner(),
            status: device.status.to_string(),
            last_heartbeat: device.last_heartbeat.to_rfc3339(),
            lease: device.lease.map(|lease| LeaseRefResponse {
                task_id: lease.task_id.into_inner(),
                slot: lease.slot,
            }),
        }
    }
}

/// Response body for `/register-device`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: String,
    pub device: DeviceResponse,
}

/// Response body for `/heartbeat`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub message: String,
    pub status: String,
}

/// Response body for `/device-status/:device_id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceStatusResponse {
    pub status: String,
}

// ============================================================================
// Assignment and result types
// ============================================================================

/// A granted lease, as handed to a polling device.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResponse {
    pub task_id: String,
    pub code_ref: String,
    pub input: String,
    pub slot: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_url: Option<String>,
}

impl AssignmentResponse {
    pub fn new(lease: Lease, code_url: Option<String>) -> Self {
        Self {
            task_id: lease.task_id.into_inner(),
            code_ref: lease.code_ref,
            input: lease.input,
            slot: lease.slot,
            code_url,
        }
    }
}

/// Plain acknowledgement or "nothing for you" reply.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Request body for `/submit-result`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

impl TryFrom<SubmitRequest> for SubmitResult {
    type Error = CoreError;

    fn try_from(req: SubmitRequest) -> Result<Self, Self::Error> {
        let task_id = required(req.task_id, "taskId")?;
        let device_id = required(req.device_id, "deviceId")?;
        let input = req
            .input
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::InvalidInput("input is required".into()))?;
        // An empty output is a legitimate result.
        let output = req
            .output
            .ok_or_else(|| CoreError::InvalidInput("output is required".into()))?;
        Ok(SubmitResult::new(
            TaskId::new(task_id),
            DeviceId::new(device_id),
            input,
            output,
        ))
    }
}

/// Response body for `/submit-result`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub message: String,
    pub result_count: usize,
    pub completed: bool,
}

// ============================================================================
// Task types
// ============================================================================

/// Request body for `/tasks`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default, alias = "codeFileName")]
    pub code_ref: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub required_device_count: Option<u32>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TryFrom<CreateTaskRequest> for NewTask {
    type Error = CoreError;

    fn try_from(req: CreateTaskRequest) -> Result<Self, Self::Error> {
        let code_ref = required(req.code_ref, "codeRef")?;
        let mut task = NewTask::new(code_ref, req.inputs);
        if let Some(count) = req.required_device_count {
            task = task.with_required_devices(count);
        }
        if let Some(priority) = req.priority {
            task = task.with_priority(priority);
        }
        for dependency in req.dependencies {
            task = task.with_dependency(TaskId::new(dependency));
        }
        Ok(task)
    }
}

/// One input slot of a task.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSlotResponse {
    pub input: String,
    pub device_id: Option<String>,
    pub assigned_at: Option<String>,
}

impl From<InputSlot> for InputSlotResponse {
    fn from(slot: InputSlot) -> Self {
        Self {
            input: slot.value,
            device_id: slot.lease_holder.map(DeviceId::into_inner),
            assigned_at: slot.leased_at.map(|at| at.to_rfc3339()),
        }
    }
}

/// One reported result.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultResponse {
    pub device_id: String,
    pub input: String,
    pub output: String,
}

impl From<ResultEntry> for ResultResponse {
    fn from(entry: ResultEntry) -> Self {
        Self {
            device_id: entry.device_id.into_inner(),
            input: entry.input,
            output: entry.output,
        }
    }
}

/// Response for a single task.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: String,
    pub code_ref: String,
    pub status: String,
    pub inputs: Vec<InputSlotResponse>,
    pub results: Vec<ResultResponse>,
    pub required_device_count: u32,
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub created_at: String,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id.into_inner(),
            code_ref: task.code_ref,
            status: task.status.to_string(),
            inputs: task.inputs.into_iter().map(Into::into).collect(),
            results: task.results.into_iter().map(Into::into).collect(),
            required_device_count: task.required_device_count,
            priority: task.priority,
            dependencies: task.dependencies.into_iter().map(TaskId::into_inner).collect(),
            created_at: task.created_at.to_rfc3339(),
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
