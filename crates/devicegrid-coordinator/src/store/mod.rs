//! Record store contract.
//!
//! The coordinator never assumes transactions. Every record carries a
//! `revision`; an update is applied only if the caller's copy still has the
//! stored revision, otherwise it fails with [`StoreError::Conflict`] and the
//! caller re-reads. [`edit_task`] and [`edit_device`] wrap that loop so a
//! mutation's preconditions are re-checked against fresh state on every
//! attempt, which turns a read-modify-write into a conditional update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use devicegrid_core::{
    CoreError, Device, DeviceId, DeviceStatus, NewTask, Task, TaskId, TaskStatus,
};

mod memory;

pub use memory::MemoryStore;

/// Attempts a conditional edit makes before giving up as contended.
pub const MAX_EDIT_ATTEMPTS: usize = 16;

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Device not found: {0}")]
    DeviceMissing(DeviceId),

    #[error("Task not found: {0}")]
    TaskMissing(TaskId),

    /// The record changed since it was read.
    #[error("{kind} {id} revision conflict: expected {expected}, found {actual}")]
    Conflict {
        kind: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    /// Retries exhausted.
    #[error("{kind} {id} still contended after {attempts} attempts")]
    Contended {
        kind: &'static str,
        id: String,
        attempts: usize,
    },

    /// Transient backend failure.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DeviceMissing(id) => CoreError::DeviceNotFound(id),
            StoreError::TaskMissing(id) => CoreError::TaskNotFound(id),
            e @ (StoreError::Conflict { .. } | StoreError::Contended { .. }) => {
                CoreError::Contended(e.to_string())
            }
            StoreError::Unavailable(msg) => CoreError::StoreUnavailable(msg),
        }
    }
}

/// Filter for device queries. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub statuses: Option<Vec<DeviceStatus>>,
    pub heartbeat_before: Option<DateTime<Utc>>,
}

impl DeviceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Devices the liveness sweep still watches.
    pub fn live() -> Self {
        Self {
            statuses: Some(vec![DeviceStatus::Idle, DeviceStatus::Busy]),
            ..Self::default()
        }
    }

    /// Devices written off by the liveness sweep.
    pub fn disconnected() -> Self {
        Self {
            statuses: Some(vec![DeviceStatus::Disconnected]),
            ..Self::default()
        }
    }

    pub fn heartbeat_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.heartbeat_before = Some(cutoff);
        self
    }

    pub fn matches(&self, device: &Device) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&device.status) {
                return false;
            }
        }
        if let Some(cutoff) = self.heartbeat_before {
            if device.last_heartbeat >= cutoff {
                return false;
            }
        }
        true
    }
}

/// Filter for task queries. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub statuses: Option<Vec<TaskStatus>>,
    pub has_unassigned_slot: bool,
    pub leased_to: Option<DeviceId>,
    pub leased_before: Option<DateTime<Utc>>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Pending tasks with at least one free slot.
    pub fn assignable() -> Self {
        Self {
            statuses: Some(vec![TaskStatus::Pending]),
            has_unassigned_slot: true,
            ..Self::default()
        }
    }

    /// Tasks that still take part in leasing and reclamation.
    pub fn active() -> Self {
        Self {
            statuses: Some(vec![TaskStatus::Pending, TaskStatus::Running]),
            ..Self::default()
        }
    }

    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            statuses: Some(vec![status]),
            ..Self::default()
        }
    }

    pub fn leased_to(mut self, device_id: DeviceId) -> Self {
        self.leased_to = Some(device_id);
        self
    }

    pub fn leased_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.leased_before = Some(cutoff);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        if self.has_unassigned_slot && !task.has_unassigned() {
            return false;
        }
        if let Some(device_id) = &self.leased_to {
            if !task.inputs.iter().any(|slot| slot.is_held_by(device_id)) {
                return false;
            }
        }
        if let Some(cutoff) = self.leased_before {
            if !task.inputs.iter().any(|slot| slot.leased_before(cutoff)) {
                return false;
            }
        }
        true
    }
}

/// Persistent home of device and task records.
///
/// `find_*` results come back in insertion order. `update_*` is conditional
/// on the record's `revision` and returns the stored copy with its new
/// revision.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, StoreError>;

    async fn find_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError>;

    /// Insert `device` unless one with the same id exists. Returns the stored
    /// record and whether it was created.
    async fn insert_device(&self, device: Device) -> Result<(Device, bool), StoreError>;

    async fn update_device(&self, device: Device) -> Result<Device, StoreError>;

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;

    async fn find_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// Create a task; the store assigns its id.
    async fn insert_task(&self, task: NewTask, created_at: DateTime<Utc>)
        -> Result<Task, StoreError>;

    async fn update_task(&self, task: Task) -> Result<Task, StoreError>;
}

/// What an edit closure decided to do with the record it was handed.
#[derive(Debug)]
pub enum Edit<T> {
    /// Persist the modified record.
    Commit(T),
    /// Leave the stored record untouched.
    Keep(T),
}

/// Result of a conditional edit.
#[derive(Debug)]
pub struct Edited<R, T> {
    /// The record as stored (or as read, when nothing was written).
    pub record: R,
    pub outcome: T,
    pub written: bool,
}

/// Read a task, let `edit` decide against that exact revision, and write it
/// back only if nobody else wrote in between. Retries with fresh state on
/// conflict.
pub async fn edit_task<S, T, E, F>(store: &S, id: &TaskId, mut edit: F) -> Result<Edited<Task, T>, E>
where
    S: RecordStore + ?Sized,
    E: From<StoreError>,
    F: FnMut(&mut Task) -> Result<Edit<T>, E>,
{
    for attempt in 1..=MAX_EDIT_ATTEMPTS {
        let mut task = store
            .get_task(id)
            .await?
            .ok_or_else(|| StoreError::TaskMissing(id.clone()))?;

        match edit(&mut task)? {
            Edit::Keep(outcome) => {
                return Ok(Edited {
                    record: task,
                    outcome,
                    written: false,
                })
            }
            Edit::Commit(outcome) => match store.update_task(task).await {
                Ok(record) => {
                    return Ok(Edited {
                        record,
                        outcome,
                        written: true,
                    })
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(task_id = %id, attempt, "Task changed underneath edit, retrying");
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    Err(StoreError::Contended {
        kind: "task",
        id: id.to_string(),
        attempts: MAX_EDIT_ATTEMPTS,
    }
    .into())
}

/// Device counterpart of [`edit_task`].
pub async fn edit_device<S, T, E, F>(
    store: &S,
    id: &DeviceId,
    mut edit: F,
) -> Result<Edited<Device, T>, E>
where
    S: RecordStore + ?Sized,
    E: From<StoreError>,
    F: FnMut(&mut Device) -> Result<Edit<T>, E>,
{
    for attempt in 1..=MAX_EDIT_ATTEMPTS {
        let mut device = store
            .get_device(id)
            .await?
            .ok_or_else(|| StoreError::DeviceMissing(id.clone()))?;

        match edit(&mut device)? {
            Edit::Keep(outcome) => {
                return Ok(Edited {
                    record: device,
                    outcome,
                    written: false,
                })
            }
            Edit::Commit(outcome) => match store.update_device(device).await {
                Ok(record) => {
                    return Ok(Edited {
                        record,
                        outcome,
                        written: true,
                    })
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(device_id = %id, attempt, "Device changed underneath edit, retrying");
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    Err(StoreError::Contended {
        kind: "device",
        id: id.to_string(),
        attempts: MAX_EDIT_ATTEMPTS,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use devicegrid_core::StatusChange;

    #[test]
    fn device_filter_matches_live_and_stale() {
        let now = Utc::now();
        let mut device = Device::new(DeviceId::new("d-1"), now);
        let filter = DeviceFilter::live().heartbeat_before(now + TimeDelta::seconds(1));
        assert!(filter.matches(&device));
        assert!(!DeviceFilter::live().heartbeat_before(now).matches(&device));

        device.apply(StatusChange::Disconnected, now);
        assert!(!filter.matches(&device));
        assert!(DeviceFilter::all().matches(&device));
    }

    #[test]
    fn task_filter_assignable_and_leased() {
        let now = Utc::now();
        let mut task = Task::from_new(TaskId::new("t-1"), NewTask::new("c", ["1"]), now);
        assert!(TaskFilter::assignable().matches(&task));
        assert!(!TaskFilter::active().leased_to(DeviceId::new("a")).matches(&task));

        task.lease_slot(0, DeviceId::new("a"), now);
        assert!(!TaskFilter::assignable().matches(&task));
        assert!(TaskFilter::active().leased_to(DeviceId::new("a")).matches(&task));
        assert!(TaskFilter::active()
            .leased_before(now + TimeDelta::seconds(1))
            .matches(&task));
        assert!(!TaskFilter::active().leased_before(now).matches(&task));
    }

    #[test]
    fn store_errors_map_to_core_errors() {
        let err: CoreError = StoreError::TaskMissing(TaskId::new("t")).into();
        assert!(matches!(err, CoreError::TaskNotFound(_)));

        let err: CoreError = StoreError::Unavailable("down".into()).into();
        assert!(matches!(err, CoreError::StoreUnavailable(_)));
        assert!(err.is_transient());
    }
}
