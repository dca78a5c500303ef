//! Coordinator facade over the registry, engine, aggregator, catalog, and
//! monitor. Every adapter (HTTP, tests) talks to this type.

use std::sync::Arc;

use devicegrid_core::{
    Assignment, CoreError, Device, DeviceId, DeviceStatus, NewTask, SubmitResult, Task, TaskId,
};

use crate::catalog::TaskCatalog;
use crate::config::Config;
use crate::engine::AssignmentEngine;
use crate::monitor::{LivenessMonitor, SweepReport};
use crate::registry::{DeviceRegistry, Registration};
use crate::results::{Accepted, ResultAggregator};
use crate::state::AppState;

/// Coordinator.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<AppState>,
    registry: DeviceRegistry,
    engine: AssignmentEngine,
    results: ResultAggregator,
    catalog: TaskCatalog,
    monitor: LivenessMonitor,
}

impl Coordinator {
    /// Create a new Coordinator over shared state.
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            registry: DeviceRegistry::new(state.clone()),
            engine: AssignmentEngine::new(state.clone()),
            results: ResultAggregator::new(state.clone()),
            catalog: TaskCatalog::new(state.clone()),
            monitor: LivenessMonitor::new(state.clone()),
            state,
        }
    }

    /// Coordinator over a fresh in-memory store and the system clock.
    pub fn in_memory(config: Config) -> Self {
        Self::new(AppState::in_memory(config))
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// The liveness monitor, for spawning in the background.
    pub fn monitor(&self) -> LivenessMonitor {
        self.monitor.clone()
    }

    pub async fn register_device(&self, device_id: &DeviceId) -> Result<Registration, CoreError> {
        self.registry.register(device_id).await
    }

    pub async fn heartbeat(&self, device_id: &DeviceId) -> Result<Device, CoreError> {
        self.registry.heartbeat(device_id).await
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>, CoreError> {
        self.registry.list().await
    }

    pub async fn get_device(&self, device_id: &DeviceId) -> Result<Device, CoreError> {
        self.registry.get(device_id).await
    }

    pub async fn device_status(&self, device_id: &DeviceId) -> Result<DeviceStatus, CoreError> {
        self.registry.status(device_id).await
    }

    pub async fn request_assignment(&self, device_id: &DeviceId) -> Result<Assignment, CoreError> {
        self.engine.request(device_id).await
    }

    pub async fn submit_result(&self, submission: SubmitResult) -> Result<Accepted, CoreError> {
        self.results.submit(submission).await
    }

    pub async fn create_task(&self, new: NewTask) -> Result<Task, CoreError> {
        self.catalog.create(new).await
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task, CoreError> {
        self.catalog.get(task_id).await
    }

    /// All tasks, newest first.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, CoreError> {
        self.catalog.list().await
    }

    /// Run one liveness sweep now.
    pub async fn sweep_once(&self) -> SweepReport {
        self.monitor.sweep().await
    }
}
