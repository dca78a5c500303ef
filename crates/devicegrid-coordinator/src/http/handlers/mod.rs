//! HTTP request handlers.

mod devices;
mod health;
mod tasks;

pub use devices::{
    device_status, heartbeat, list_devices, register_device, request_assignment, submit_result,
};
pub use health::{health_check, metrics_handler};
pub use tasks::{create_task, get_task, list_tasks};
