//! DeviceGrid Coordinator Library
//!
//! This crate provides the coordinator for DeviceGrid: the record store
//! contract, device registry, assignment engine, result aggregator,
//! liveness monitor, metrics, and the HTTP adapter over all of them.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod http;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod results;
pub mod state;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use coordinator::Coordinator;
pub use monitor::{LivenessMonitor, SweepReport};
pub use registry::Registration;
pub use results::Accepted;
pub use state::AppState;
pub use store::{MemoryStore, RecordStore, StoreError};
