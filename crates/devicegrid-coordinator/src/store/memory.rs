//! In-memory record store.
//!
//! Records live in append-only arenas addressed by stable index; the id maps
//! only point into them. Nothing is ever removed, which matches the
//! lifecycle of devices and tasks.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use devicegrid_core::{Device, DeviceId, NewTask, Task, TaskId};

use super::{DeviceFilter, RecordStore, StoreError, TaskFilter};

#[derive(Default)]
struct Arenas {
    devices: Vec<Device>,
    device_index: HashMap<DeviceId, usize>,
    tasks: Vec<Task>,
    task_index: HashMap<TaskId, usize>,
}

/// Record store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    arenas: RwLock<Arenas>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn device_count(&self) -> usize {
        self.arenas.read().await.devices.len()
    }

    #[cfg(test)]
    pub(crate) async fn task_count(&self) -> usize {
        self.arenas.read().await.tasks.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, StoreError> {
        let arenas = self.arenas.read().await;
        Ok(arenas
            .device_index
            .get(id)
            .map(|&idx| arenas.devices[idx].clone()))
    }

    async fn find_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError> {
        let arenas = self.arenas.read().await;
        Ok(arenas
            .devices
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    async fn insert_device(&self, device: Device) -> Result<(Device, bool), StoreError> {
        let mut arenas = self.arenas.write().await;
        if let Some(&idx) = arenas.device_index.get(&device.id) {
            return Ok((arenas.devices[idx].clone(), false));
        }

        let idx = arenas.devices.len();
        arenas.device_index.insert(device.id.clone(), idx);
        arenas.devices.push(device.clone());
        Ok((device, true))
    }

    async fn update_device(&self, mut device: Device) -> Result<Device, StoreError> {
        let mut arenas = self.arenas.write().await;
        let idx = *arenas
            .device_index
            .get(&device.id)
            .ok_or_else(|| StoreError::DeviceMissing(device.id.clone()))?;

        let stored = &mut arenas.devices[idx];
        if stored.revision != device.revision {
            return Err(StoreError::Conflict {
                kind: "device",
                id: device.id.to_string(),
                expected: device.revision,
                actual: stored.revision,
            });
        }

        device.revision += 1;
        *stored = device.clone();
        Ok(device)
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let arenas = self.arenas.read().await;
        Ok(arenas
            .task_index
            .get(id)
            .map(|&idx| arenas.tasks[idx].clone()))
    }

    async fn find_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let arenas = self.arenas.read().await;
        Ok(arenas
            .tasks
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn insert_task(
        &self,
        task: NewTask,
        created_at: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let mut arenas = self.arenas.write().await;
        let task = Task::from_new(TaskId::generate(), task, created_at);

        let idx = arenas.tasks.len();
        arenas.task_index.insert(task.id.clone(), idx);
        arenas.tasks.push(task.clone());
        Ok(task)
    }

    async fn update_task(&self, mut task: Task) -> Result<Task, StoreError> {
        let mut arenas = self.arenas.write().await;
        let idx = *arenas
            .task_index
            .get(&task.id)
            .ok_or_else(|| StoreError::TaskMissing(task.id.clone()))?;

        let stored = &mut arenas.tasks[idx];
        if stored.revision != task.revision {
            return Err(StoreError::Conflict {
                kind: "task",
                id: task.id.to_string(),
                expected: task.revision,
                actual: stored.revision,
            });
        }

        task.revision += 1;
        *stored = task.clone();
        Ok(task)
    }
}
