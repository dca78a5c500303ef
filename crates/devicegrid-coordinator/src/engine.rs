//! Assignment engine - hands the next free input slot to a polling device.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use devicegrid_core::{
    Assignment, CoreError, DependencyPolicy, Device, DeviceId, Lease, StatusChange, TaskId,
    TaskStatus,
};

use crate::registry::DeviceRegistry;
use crate::state::AppState;
use crate::store::{edit_task, Edit, TaskFilter};

/// Times the candidate list is re-queried when every candidate filled up
/// between the query and the claim.
const MAX_CLAIM_ROUNDS: usize = 4;

/// Assignment engine.
#[derive(Clone)]
pub struct AssignmentEngine {
    state: Arc<AppState>,
    registry: DeviceRegistry,
}

impl AssignmentEngine {
    /// Create a new AssignmentEngine.
    pub fn new(state: Arc<AppState>) -> Self {
        let registry = DeviceRegistry::new(state.clone());
        Self { state, registry }
    }

    /// Lease the next free input to `device_id`.
    ///
    /// Tasks are tried in `(priority, created_at)` order and within a task
    /// the first unassigned slot wins. The slot claim is a conditional write
    /// against the task revision, so two devices racing for the same slot
    /// cannot both get it: the loser re-reads and moves on.
    pub async fn request(&self, device_id: &DeviceId) -> Result<Assignment, CoreError> {
        let device = self.registry.get(device_id).await?;
        if device.is_busy() && self.lease_is_live(&device).await? {
            return Err(CoreError::AlreadyBusy(device_id.clone()));
        }

        for round in 1..=MAX_CLAIM_ROUNDS {
            let candidates = self.candidates().await?;
            if candidates.is_empty() {
                self.registry.settle_idle(device_id).await?;
                debug!(device_id = %device_id, "No work available");
                return Ok(Assignment::NoWork);
            }

            let now = self.state.now();
            for task_id in &candidates {
                if let Some(lease) = self.claim_slot(task_id, device_id, now).await? {
                    return self.bind(device_id, lease).await;
                }
            }

            debug!(
                device_id = %device_id,
                round,
                candidates = candidates.len(),
                "Candidates filled up before a slot could be claimed"
            );
        }

        Err(CoreError::Contended(format!(
            "no slot could be claimed for device {device_id}"
        )))
    }

    /// Assignable task ids in scheduling order.
    async fn candidates(&self) -> Result<Vec<TaskId>, CoreError> {
        let store = &self.state.store;
        let mut tasks = store.find_tasks(&TaskFilter::assignable()).await?;

        let policy = self.state.config.dependency_policy;
        if policy == DependencyPolicy::RequireDone {
            let done: HashSet<TaskId> = store
                .find_tasks(&TaskFilter::with_status(TaskStatus::Done))
                .await?
                .into_iter()
                .map(|t| t.id)
                .collect();
            tasks.retain(|task| policy.allows(task, |id| done.contains(id)));
        }

        // Stable sort: store insertion order breaks remaining ties.
        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        Ok(tasks.into_iter().map(|t| t.id).collect())
    }

    /// Conditionally lease the first free slot of `task_id`. `None` if the
    /// task is no longer pending or has no free slot left.
    async fn claim_slot(
        &self,
        task_id: &TaskId,
        device_id: &DeviceId,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, CoreError> {
        let result = edit_task(&*self.state.store, task_id, |task| {
            if task.status != TaskStatus::Pending {
                return Ok::<_, CoreError>(Edit::Keep(None));
            }
            let Some(slot) = task.first_unassigned() else {
                return Ok(Edit::Keep(None));
            };
            task.lease_slot(slot, device_id.clone(), now);
            Ok(Edit::Commit(Some(Lease {
                task_id: task.id.clone(),
                code_ref: task.code_ref.clone(),
                input: task.inputs[slot].value.clone(),
                slot,
            })))
        })
        .await;

        match result {
            Ok(edited) => {
                if let Some(lease) = &edited.outcome {
                    info!(
                        device_id = %device_id,
                        task_id = %task_id,
                        slot = lease.slot,
                        input = %lease.input,
                        "Input leased to device"
                    );
                    if edited.record.status == TaskStatus::Running {
                        info!(task_id = %task_id, "All inputs leased, task running");
                    }
                }
                Ok(edited.outcome)
            }
            Err(CoreError::TaskNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Point the device's lease index at the claimed slot. Undoes the claim
    /// if the device picked up another lease concurrently.
    async fn bind(&self, device_id: &DeviceId, lease: Lease) -> Result<Assignment, CoreError> {
        let slot_ref = lease.slot_ref();

        if let Err(e) = self.registry.occupy(device_id, &slot_ref).await {
            warn!(
                device_id = %device_id,
                task_id = %lease.task_id,
                slot = lease.slot,
                error = %e,
                "Could not mark device busy, returning slot"
            );
            self.unclaim(device_id, &lease).await;
            return Err(e);
        }

        // The liveness sweep may have reclaimed the slot between the claim
        // and the device update.
        let still_held = self
            .state
            .store
            .get_task(&lease.task_id)
            .await?
            .and_then(|task| task.inputs.get(lease.slot).map(|s| s.is_held_by(device_id)))
            .unwrap_or(false);
        if !still_held {
            warn!(
                device_id = %device_id,
                task_id = %lease.task_id,
                slot = lease.slot,
                "Lease reclaimed before it was handed out"
            );
            self.registry.release(device_id, &slot_ref).await?;
            return Ok(Assignment::NoWork);
        }

        Ok(Assignment::Granted(lease))
    }

    /// Give a claimed slot back if this device still holds it.
    async fn unclaim(&self, device_id: &DeviceId, lease: &Lease) {
        let result = edit_task(&*self.state.store, &lease.task_id, |task| {
            let held = task
                .inputs
                .get(lease.slot)
                .is_some_and(|slot| slot.is_held_by(device_id));
            if !held || task.has_result(device_id, &lease.input) {
                return Ok::<_, CoreError>(Edit::Keep(()));
            }
            task.release_slot(lease.slot);
            task.demote();
            Ok(Edit::Commit(()))
        })
        .await;

        if let Err(e) = result {
            // Left for the lease timeout to reclaim.
            warn!(
                device_id = %device_id,
                task_id = %lease.task_id,
                slot = lease.slot,
                error = %e,
                "Failed to return claimed slot"
            );
        }
    }

    /// True if the device's lease index names a slot it still holds in an
    /// active task and has not reported on yet. A busy device whose lease is
    /// not backed by its task is released so it can work again.
    async fn lease_is_live(&self, device: &Device) -> Result<bool, CoreError> {
        if let Some(slot_ref) = &device.lease {
            if let Some(task) = self.state.store.get_task(&slot_ref.task_id).await? {
                let backed = task.inputs.get(slot_ref.slot).is_some_and(|slot| {
                    slot.is_held_by(&device.id) && !task.has_result(&device.id, &slot.value)
                });
                if backed && task.status.is_active() {
                    return Ok(true);
                }
            }
        }

        warn!(
            device_id = %device.id,
            lease = ?device.lease,
            "Busy device holds no live lease, releasing it"
        );
        let expected = device.lease.clone();
        let (record, moved) = self
            .registry
            .set_status_if(&device.id, StatusChange::Idle, |fresh| {
                fresh.is_busy() && fresh.lease == expected
            })
            .await?;

        // Somebody else moved the device first; trust the fresh record.
        Ok(!moved && record.is_busy())
    }
}
