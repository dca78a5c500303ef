//! Result aggregator - validates submissions and decides task completion.

use std::sync::Arc;

use tracing::{info, warn};

use devicegrid_core::{CoreError, SubmitResult, TaskStatus};

use crate::registry::DeviceRegistry;
use crate::state::AppState;
use crate::store::{edit_task, Edit};

/// Outcome of an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// Results recorded on the task, including this one.
    pub result_count: usize,
    /// True if this submission completed the task.
    pub completed: bool,
}

/// Result aggregator.
#[derive(Clone)]
pub struct ResultAggregator {
    state: Arc<AppState>,
    registry: DeviceRegistry,
}

impl ResultAggregator {
    /// Create a new ResultAggregator.
    pub fn new(state: Arc<AppState>) -> Self {
        let registry = DeviceRegistry::new(state.clone());
        Self { state, registry }
    }

    /// Record a device's result for one input.
    ///
    /// Checks run in order against a single task revision: the task must
    /// exist, the device must hold a slot with this input value, the
    /// `(device, input)` pair must be new, and the task must not be done.
    /// The append is written conditionally on that revision, so a slot
    /// reclaimed by the liveness sweep in the meantime fails `NotAssigned`
    /// on the retry instead of being accepted.
    pub async fn submit(&self, submission: SubmitResult) -> Result<Accepted, CoreError> {
        submission.validate()?;

        let policy = self.state.config.completion_policy;
        let SubmitResult {
            task_id,
            device_id,
            input,
            output,
        } = submission;

        let edited = edit_task(&*self.state.store, &task_id, |task| {
            let Some(slot) = task.held_slot(&device_id, &input) else {
                return Err(CoreError::NotAssigned {
                    task_id: task_id.clone(),
                    device_id: device_id.clone(),
                    input: input.clone(),
                });
            };
            if task.has_result(&device_id, &input) {
                return Err(CoreError::DuplicateResult {
                    task_id: task_id.clone(),
                    device_id: device_id.clone(),
                    input: input.clone(),
                });
            }
            if task.is_terminal() {
                return Err(CoreError::TaskClosed(task_id.clone()));
            }

            task.record_result(
                SubmitResult::new(task_id.clone(), device_id.clone(), &input, &output).into_entry(),
            );
            let completed = policy.is_satisfied(task);
            if completed {
                task.status = TaskStatus::Done;
            }
            Ok(Edit::Commit((slot, completed)))
        })
        .await?;

        let (slot, completed) = edited.outcome;
        let task = edited.record;
        info!(
            task_id = %task_id,
            device_id = %device_id,
            slot,
            results = task.results.len(),
            required = task.required_device_count,
            "Result recorded"
        );

        self.registry.release(&device_id, &task.slot_ref(slot)).await?;

        if completed {
            info!(task_id = %task_id, results = task.results.len(), "Task done");

            // Devices still working on other inputs of this task will never
            // have their results accepted; free them now.
            for (other, holder) in task.outstanding_leases() {
                if let Err(e) = self.registry.release(&holder, &task.slot_ref(other)).await {
                    warn!(
                        task_id = %task_id,
                        device_id = %holder,
                        slot = other,
                        error = %e,
                        "Failed to release device from finished task"
                    );
                }
            }
        }

        Ok(Accepted {
            result_count: task.results.len(),
            completed,
        })
    }
}
