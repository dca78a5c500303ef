//! Status enums for Devices and Tasks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Liveness/availability of a registered device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Device is alive and holds no lease.
    #[default]
    Idle,
    /// Device holds exactly one leased input slot.
    Busy,
    /// Device missed its liveness window; a heartbeat brings it back.
    Disconnected,
}

impl DeviceStatus {
    /// Returns true for statuses the liveness sweep still watches.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a Task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// At least one slot is free, or a reclaimed slot is waiting to be re-leased.
    #[default]
    Pending,
    /// Every slot is leased.
    Running,
    /// Enough results arrived. Terminal.
    Done,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if the task still takes part in leasing and reclamation.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
