//! Shared harness for coordinator integration tests.
//!
//! Builds coordinators over a manual clock so heartbeats and leases can be
//! aged without sleeping, and a store wrapper that fails chosen writes.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use devicegrid_coordinator::store::{DeviceFilter, TaskFilter};
use devicegrid_coordinator::{
    AppState, Config, Coordinator, ManualClock, MemoryStore, RecordStore, StoreError,
};
use devicegrid_core::{Assignment, Device, DeviceId, Lease, NewTask, Task, TaskId};

/// A coordinator plus the clock that drives it.
pub struct TestCoordinator {
    pub coordinator: Coordinator,
    pub clock: Arc<ManualClock>,
}

impl TestCoordinator {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(config: Config, store: Arc<dyn RecordStore>) -> Self {
        let clock = Arc::new(ManualClock::default());
        let state = AppState::new(config, store, clock.clone());
        Self {
            coordinator: Coordinator::new(state),
            clock,
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(TimeDelta::seconds(secs));
    }

    pub async fn register(&self, ids: &[&str]) {
        for id in ids {
            self.coordinator
                .register_device(&DeviceId::new(*id))
                .await
                .expect("register device");
        }
    }

    pub async fn create(&self, code_ref: &str, inputs: &[&str]) -> Task {
        self.create_task(NewTask::new(code_ref, inputs.iter().copied())).await
    }

    pub async fn create_task(&self, new: NewTask) -> Task {
        self.coordinator.create_task(new).await.expect("create task")
    }

    /// Request work and insist on a lease.
    pub async fn lease(&self, device: &str) -> Lease {
        match self
            .coordinator
            .request_assignment(&DeviceId::new(device))
            .await
            .expect("request assignment")
        {
            Assignment::Granted(lease) => lease,
            Assignment::NoWork => panic!("expected a lease for {device}, got no work"),
        }
    }

    pub async fn task(&self, id: &TaskId) -> Task {
        self.coordinator.get_task(id).await.expect("get task")
    }

    pub async fn device(&self, id: &str) -> Device {
        self.coordinator
            .get_device(&DeviceId::new(id))
            .await
            .expect("get device")
    }

    /// Slots leased to `device` across all tasks.
    pub async fn held_slots(&self, device: &str) -> usize {
        let id = DeviceId::new(device);
        self.coordinator
            .list_tasks()
            .await
            .expect("list tasks")
            .iter()
            .flat_map(|task| task.inputs.iter())
            .filter(|slot| slot.is_held_by(&id))
            .count()
    }

    /// Every busy device's lease names a slot it holds in an active task.
    pub async fn assert_lease_index_consistent(&self) {
        for device in self.coordinator.list_devices().await.expect("list devices") {
            let Some(lease) = &device.lease else {
                continue;
            };
            let task = self.task(&lease.task_id).await;
            assert!(
                task.inputs[lease.slot].is_held_by(&device.id),
                "device {} points at slot {} of task {} which it does not hold",
                device.id,
                lease.slot,
                task.id
            );
        }
    }
}

/// A store that delegates to [`MemoryStore`] but fails updates of chosen
/// tasks, or every operation once switched off.
pub struct FaultyStore {
    inner: MemoryStore,
    failing_tasks: Mutex<HashSet<TaskId>>,
    offline: Mutex<bool>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing_tasks: Mutex::new(HashSet::new()),
            offline: Mutex::new(false),
        }
    }

    pub fn fail_updates_of(&self, task_id: &TaskId) {
        self.failing_tasks.lock().unwrap().insert(task_id.clone());
    }

    pub fn heal(&self) {
        self.failing_tasks.lock().unwrap().clear();
        *self.offline.lock().unwrap() = false;
    }

    pub fn go_offline(&self) {
        *self.offline.lock().unwrap() = true;
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if *self.offline.lock().unwrap() {
            return Err(StoreError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, StoreError> {
        self.check_online()?;
        self.inner.get_device(id).await
    }

    async fn find_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError> {
        self.check_online()?;
        self.inner.find_devices(filter).await
    }

    async fn insert_device(&self, device: Device) -> Result<(Device, bool), StoreError> {
        self.check_online()?;
        self.inner.insert_device(device).await
    }

    async fn update_device(&self, device: Device) -> Result<Device, StoreError> {
        self.check_online()?;
        self.inner.update_device(device).await
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        self.check_online()?;
        self.inner.get_task(id).await
    }

    async fn find_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.check_online()?;
        self.inner.find_tasks(filter).await
    }

    async fn insert_task(
        &self,
        task: NewTask,
        created_at: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        self.check_online()?;
        self.inner.insert_task(task, created_at).await
    }

    async fn update_task(&self, task: Task) -> Result<Task, StoreError> {
        self.check_online()?;
        if self.failing_tasks.lock().unwrap().contains(&task.id) {
            return Err(StoreError::Unavailable(format!("injected failure for {}", task.id)));
        }
        self.inner.update_task(task).await
    }
}
