//! Task catalog - creation and lookup of tasks.

use std::sync::Arc;

use tracing::info;

use devicegrid_core::{CoreError, NewTask, Task, TaskId};

use crate::state::AppState;
use crate::store::TaskFilter;

/// Task catalog.
#[derive(Clone)]
pub struct TaskCatalog {
    state: Arc<AppState>,
}

impl TaskCatalog {
    /// Create a new TaskCatalog.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Validate and store a new pending task.
    pub async fn create(&self, new: NewTask) -> Result<Task, CoreError> {
        new.validate()?;

        let task = self.state.store.insert_task(new, self.state.now()).await?;
        info!(
            task_id = %task.id,
            code_ref = %task.code_ref,
            inputs = task.inputs.len(),
            required = task.required_device_count,
            priority = task.priority,
            "Task created"
        );
        Ok(task)
    }

    pub async fn get(&self, task_id: &TaskId) -> Result<Task, CoreError> {
        self.state
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| CoreError::TaskNotFound(task_id.clone()))
    }

    /// All tasks, newest first. Tasks created at the same instant list the
    /// later insert first.
    pub async fn list(&self) -> Result<Vec<Task>, CoreError> {
        let mut tasks = self.state.store.find_tasks(&TaskFilter::all()).await?;
        tasks.reverse();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }
}
