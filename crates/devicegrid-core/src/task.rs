//! Task, input slot, and result types.

use crate::{CoreError, DeviceId, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable address of one input slot: the owning task plus the slot's index
/// in that task's input sequence. Slots are never removed, so the index
/// stays valid for the life of the task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    pub task_id: TaskId,
    pub slot: usize,
}

impl SlotRef {
    pub fn new(task_id: TaskId, slot: usize) -> Self {
        Self { task_id, slot }
    }
}

/// One unit of work inside a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
    /// Input value handed to the device.
    pub value: String,

    /// Device currently (or last, once resulted) leasing this slot.
    pub lease_holder: Option<DeviceId>,

    /// When the current lease was granted.
    pub leased_at: Option<DateTime<Utc>>,
}

impl InputSlot {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            lease_holder: None,
            leased_at: None,
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.lease_holder.is_none()
    }

    pub fn is_held_by(&self, device_id: &DeviceId) -> bool {
        self.lease_holder.as_ref() == Some(device_id)
    }

    /// Lease granted before `cutoff`.
    pub fn leased_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.lease_holder.is_some() && self.leased_at.is_some_and(|at| at < cutoff)
    }

    fn lease(&mut self, device_id: DeviceId, now: DateTime<Utc>) {
        self.lease_holder = Some(device_id);
        self.leased_at = Some(now);
    }

    fn release(&mut self) -> Option<DeviceId> {
        self.leased_at = None;
        self.lease_holder.take()
    }
}

/// A result reported by a device for one input value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub device_id: DeviceId,
    pub input: String,
    pub output: String,
}

/// Parameters for creating a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Opaque reference to the executable payload.
    pub code_ref: String,

    /// Input values, one slot each, in order.
    pub inputs: Vec<String>,

    /// Result count at which the task is done.
    pub required_device_count: u32,

    /// Lower runs first.
    pub priority: i32,

    /// Tasks that should finish first (see `DependencyPolicy`).
    pub dependencies: Vec<TaskId>,
}

impl NewTask {
    /// A task with the default `required_device_count` and `priority` of 1.
    pub fn new<I, S>(code_ref: impl Into<String>, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code_ref: code_ref.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            required_device_count: 1,
            priority: 1,
            dependencies: Vec::new(),
        }
    }

    pub fn with_required_devices(mut self, count: u32) -> Self {
        self.required_device_count = count;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, task_id: TaskId) -> Self {
        self.dependencies.push(task_id);
        self
    }

    /// Reject tasks that could never be scheduled or completed.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.code_ref.trim().is_empty() {
            return Err(CoreError::InvalidInput("codeRef is required".into()));
        }
        if self.inputs.is_empty() {
            return Err(CoreError::InvalidInput("inputs must not be empty".into()));
        }
        if self.inputs.iter().any(|i| i.is_empty()) {
            return Err(CoreError::InvalidInput("input values must not be empty".into()));
        }
        if self.required_device_count == 0 {
            return Err(CoreError::InvalidInput(
                "requiredDeviceCount must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A batch job whose inputs are leased out to devices one slot at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier.
    pub id: TaskId,

    /// Opaque reference to the executable payload.
    pub code_ref: String,

    /// Current task status.
    pub status: TaskStatus,

    /// Input slots, addressed by index.
    pub inputs: Vec<InputSlot>,

    /// Results, append-only.
    pub results: Vec<ResultEntry>,

    pub required_device_count: u32,

    pub priority: i32,

    pub dependencies: Vec<TaskId>,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// Store-managed revision used for conditional updates.
    pub revision: u64,
}

impl Task {
    /// Build a pending task from creation parameters.
    pub fn from_new(id: TaskId, new: NewTask, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            code_ref: new.code_ref,
            status: TaskStatus::Pending,
            inputs: new.inputs.into_iter().map(InputSlot::new).collect(),
            results: Vec::new(),
            required_device_count: new.required_device_count,
            priority: new.priority,
            dependencies: new.dependencies,
            created_at,
            revision: 0,
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn slot_ref(&self, slot: usize) -> SlotRef {
        SlotRef::new(self.id.clone(), slot)
    }

    /// Index of the first unassigned slot in sequence order.
    pub fn first_unassigned(&self) -> Option<usize> {
        self.inputs.iter().position(InputSlot::is_unassigned)
    }

    pub fn has_unassigned(&self) -> bool {
        self.first_unassigned().is_some()
    }

    pub fn all_leased(&self) -> bool {
        !self.has_unassigned()
    }

    /// Lease `slot` to `device_id`. Flips the task to running once every slot
    /// is leased. Returns false, changing nothing, if the slot is taken.
    pub fn lease_slot(&mut self, slot: usize, device_id: DeviceId, now: DateTime<Utc>) -> bool {
        match self.inputs.get_mut(slot) {
            Some(input) if input.is_unassigned() => input.lease(device_id, now),
            _ => return false,
        }
        if self.all_leased() {
            self.status = TaskStatus::Running;
        }
        true
    }

    /// Clear the lease on `slot`, returning the former holder.
    pub fn release_slot(&mut self, slot: usize) -> Option<DeviceId> {
        self.inputs.get_mut(slot).and_then(InputSlot::release)
    }

    /// A task with a freed slot can never stay running.
    pub fn demote(&mut self) {
        if self.status == TaskStatus::Running {
            self.status = TaskStatus::Pending;
        }
    }

    /// Index of the slot holding `input` that is leased to `device_id`.
    pub fn held_slot(&self, device_id: &DeviceId, input: &str) -> Option<usize> {
        self.inputs
            .iter()
            .position(|slot| slot.is_held_by(device_id) && slot.value == input)
    }

    pub fn has_result(&self, device_id: &DeviceId, input: &str) -> bool {
        self.results
            .iter()
            .any(|r| &r.device_id == device_id && r.input == input)
    }

    /// True if the slot's current holder already reported a result for it.
    pub fn slot_resulted(&self, slot: &InputSlot) -> bool {
        slot.lease_holder
            .as_ref()
            .is_some_and(|holder| self.has_result(holder, &slot.value))
    }

    pub fn record_result(&mut self, entry: ResultEntry) {
        self.results.push(entry);
    }

    /// Slot indexes leased to `device_id`.
    pub fn slots_leased_to(&self, device_id: &DeviceId) -> Vec<usize> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_held_by(device_id))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Release every slot leased to `device_id`. Returns how many were freed.
    pub fn release_device(&mut self, device_id: &DeviceId) -> usize {
        let slots = self.slots_leased_to(device_id);
        for &slot in &slots {
            self.release_slot(slot);
        }
        if !slots.is_empty() {
            self.demote();
        }
        slots.len()
    }

    /// Release every lease granted before `cutoff` that has no matching
    /// result. Slots whose holder already reported are left alone.
    pub fn release_stuck(&mut self, cutoff: DateTime<Utc>) -> Vec<(usize, DeviceId)> {
        let stuck: Vec<usize> = self
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.leased_before(cutoff) && !self.slot_resulted(slot))
            .map(|(idx, _)| idx)
            .collect();

        let released: Vec<(usize, DeviceId)> = stuck
            .into_iter()
            .filter_map(|slot| self.release_slot(slot).map(|holder| (slot, holder)))
            .collect();
        if !released.is_empty() {
            self.demote();
        }
        released
    }

    /// Slots that are leased but still waiting for their holder's result.
    pub fn outstanding_leases(&self) -> Vec<(usize, DeviceId)> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, slot)| !self.slot_resulted(slot))
            .filter_map(|(idx, slot)| slot.lease_holder.clone().map(|holder| (idx, holder)))
            .collect()
    }
}

/// A granted lease, as returned to the requesting device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub task_id: TaskId,
    pub code_ref: String,
    pub input: String,
    pub slot: usize,
}

impl Lease {
    pub fn slot_ref(&self) -> SlotRef {
        SlotRef::new(self.task_id.clone(), self.slot)
    }
}

/// Outcome of a work request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Granted(Lease),
    NoWork,
}

/// A device's report for one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub task_id: TaskId,
    pub device_id: DeviceId,
    pub input: String,
    pub output: String,
}

impl SubmitResult {
    pub fn new(
        task_id: TaskId,
        device_id: DeviceId,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            device_id,
            input: input.into(),
            output: output.into(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.task_id.as_str().is_empty() {
            return Err(CoreError::InvalidInput("taskId is required".into()));
        }
        if self.device_id.is_blank() {
            return Err(CoreError::InvalidInput("deviceId is required".into()));
        }
        if self.input.is_empty() {
            return Err(CoreError::InvalidInput("input is required".into()));
        }
        Ok(())
    }

    pub fn into_entry(self) -> ResultEntry {
        ResultEntry {
            device_id: self.device_id,
            input: self.input,
            output: self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn task(inputs: &[&str]) -> Task {
        Task::from_new(
            TaskId::new("t-1"),
            NewTask::new("prime.js", inputs.iter().copied()),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_task_defaults() {
        let new = NewTask::new("prime.js", ["1", "2"]);
        assert_eq!(new.required_device_count, 1);
        assert_eq!(new.priority, 1);
        assert!(new.dependencies.is_empty());
        assert!(new.validate().is_ok());
    }

    #[test]
    fn test_new_task_validation() {
        let empty: [&str; 0] = [];
        assert!(NewTask::new("", ["1"]).validate().is_err());
        assert!(NewTask::new("prime.js", empty).validate().is_err());
        assert!(NewTask::new("prime.js", [""]).validate().is_err());
        assert!(NewTask::new("prime.js", ["1"])
            .with_required_devices(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_lease_slots_in_order_and_flip_to_running() {
        let now = Utc::now();
        let mut task = task(&["1", "2"]);

        assert_eq!(task.first_unassigned(), Some(0));
        assert!(task.lease_slot(0, DeviceId::new("a"), now));
        assert_eq!(task.status, TaskStatus::Pending);

        assert_eq!(task.first_unassigned(), Some(1));
        assert!(task.lease_slot(1, DeviceId::new("b"), now));
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.first_unassigned().is_none());
    }

    #[test]
    fn test_lease_taken_slot_is_refused() {
        let now = Utc::now();
        let mut task = task(&["1"]);
        assert!(task.lease_slot(0, DeviceId::new("a"), now));
        assert!(!task.lease_slot(0, DeviceId::new("b"), now));
        assert!(task.inputs[0].is_held_by(&DeviceId::new("a")));
        assert!(!task.lease_slot(7, DeviceId::new("b"), now));
    }

    #[test]
    fn test_release_device_demotes_running_task() {
        let now = Utc::now();
        let mut task = task(&["1", "2"]);
        task.lease_slot(0, DeviceId::new("a"), now);
        task.lease_slot(1, DeviceId::new("b"), now);

        assert_eq!(task.release_device(&DeviceId::new("a")), 1);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.inputs[0].is_unassigned());
        assert!(task.inputs[0].leased_at.is_none());
        assert_eq!(task.first_unassigned(), Some(0));
    }

    #[test]
    fn test_release_stuck_skips_resulted_slots() {
        let start = Utc::now();
        let mut task = task(&["1", "2"]);
        task.lease_slot(0, DeviceId::new("a"), start);
        task.lease_slot(1, DeviceId::new("b"), start);
        task.record_result(ResultEntry {
            device_id: DeviceId::new("a"),
            input: "1".into(),
            output: "prime".into(),
        });

        let released = task.release_stuck(start + TimeDelta::seconds(1));
        assert_eq!(released, vec![(1, DeviceId::new("b"))]);
        assert!(task.inputs[0].is_held_by(&DeviceId::new("a")));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_release_stuck_respects_cutoff() {
        let start = Utc::now();
        let mut task = task(&["1"]);
        task.lease_slot(0, DeviceId::new("a"), start);
        assert!(task.release_stuck(start).is_empty());
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn test_held_slot_matches_device_and_value() {
        let now = Utc::now();
        let mut task = task(&["7", "7"]);
        task.lease_slot(0, DeviceId::new("a"), now);
        task.lease_slot(1, DeviceId::new("b"), now);

        assert_eq!(task.held_slot(&DeviceId::new("b"), "7"), Some(1));
        assert_eq!(task.held_slot(&DeviceId::new("c"), "7"), None);
        assert_eq!(task.held_slot(&DeviceId::new("a"), "8"), None);
    }

    #[test]
    fn test_outstanding_leases() {
        let now = Utc::now();
        let mut task = task(&["1", "2", "3"]);
        task.lease_slot(0, DeviceId::new("a"), now);
        task.lease_slot(1, DeviceId::new("b"), now);
        task.record_result(ResultEntry {
            device_id: DeviceId::new("a"),
            input: "1".into(),
            output: "x".into(),
        });
        assert_eq!(task.outstanding_leases(), vec![(1, DeviceId::new("b"))]);
    }

    #[test]
    fn test_submit_result_validation() {
        let ok = SubmitResult::new(TaskId::new("t"), DeviceId::new("d"), "1", "");
        assert!(ok.validate().is_ok());

        let no_input = SubmitResult::new(TaskId::new("t"), DeviceId::new("d"), "", "x");
        assert!(matches!(no_input.validate(), Err(CoreError::InvalidInput(_))));

        let no_device = SubmitResult::new(TaskId::new("t"), DeviceId::new(""), "1", "x");
        assert!(no_device.validate().is_err());
    }
}
