//! DeviceGrid Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP frameworks (the [`wire`] types are plain serde shapes)
//! - Record store implementations
//! - Runtime specifics
//!
//! All types here represent the core business domain of DeviceGrid:
//! devices that poll for work, tasks made of input slots, the leases
//! that bind the two, and the results devices report back.

pub mod device;
pub mod error;
pub mod ids;
pub mod policy;
pub mod status;
pub mod task;
pub mod wire;

// Re-export commonly used types
pub use device::{Device, StatusChange};
pub use error::CoreError;
pub use ids::{DeviceId, TaskId};
pub use policy::{CompletionPolicy, DependencyPolicy};
pub use status::{DeviceStatus, TaskStatus};
pub use task::{Assignment, InputSlot, Lease, NewTask, ResultEntry, SlotRef, SubmitResult, Task};
