//! Device records and their status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeviceId, DeviceStatus, SlotRef};

/// A worker device known to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Client-chosen identifier.
    pub id: DeviceId,

    /// Current status.
    pub status: DeviceStatus,

    /// Last time the device was heard from (or moved idle/busy by the engine).
    pub last_heartbeat: DateTime<Utc>,

    /// The slot this device currently leases. `Some` exactly when busy.
    pub lease: Option<SlotRef>,

    /// Store-managed revision used for conditional updates.
    pub revision: u64,
}

/// Status transition requested by the engine or the liveness monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    Idle,
    Busy(SlotRef),
    Disconnected,
}

impl Device {
    /// Create a freshly registered, idle device.
    pub fn new(id: DeviceId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: DeviceStatus::Idle,
            last_heartbeat: now,
            lease: None,
            revision: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.status == DeviceStatus::Busy
    }

    /// True if the device's lease index points at `slot`.
    pub fn holds(&self, slot: &SlotRef) -> bool {
        self.lease.as_ref() == Some(slot)
    }

    /// Apply a status transition.
    ///
    /// Every transition except `Disconnected` also refreshes `last_heartbeat`,
    /// and the lease index always moves together with the status.
    pub fn apply(&mut self, change: StatusChange, now: DateTime<Utc>) {
        match change {
            StatusChange::Idle => {
                self.status = DeviceStatus::Idle;
                self.lease = None;
                self.last_heartbeat = now;
            }
            StatusChange::Busy(slot) => {
                self.status = DeviceStatus::Busy;
                self.lease = Some(slot);
                self.last_heartbeat = now;
            }
            StatusChange::Disconnected => {
                self.status = DeviceStatus::Disconnected;
                self.lease = None;
            }
        }
    }

    /// Record a heartbeat. Returns true if the device rejoined from
    /// `disconnected`.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> bool {
        self.last_heartbeat = now;
        if self.status == DeviceStatus::Disconnected {
            self.status = DeviceStatus::Idle;
            return true;
        }
        false
    }

    /// True if the device is still considered live but has been silent since
    /// before `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_live() && self.last_heartbeat < cutoff
    }
}
