//! Coordinator configuration.

use std::time::Duration;

use chrono::TimeDelta;

use devicegrid_core::{CompletionPolicy, DependencyPolicy};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub bind_addr: String,

    /// How often the liveness monitor sweeps (seconds).
    pub sweep_interval_secs: u64,

    /// Silence after which a device is presumed disconnected (seconds).
    pub liveness_timeout_secs: u64,

    /// Age after which an unresulted lease is reclaimed (seconds).
    pub lease_timeout_secs: u64,

    /// Whether task dependencies gate assignment.
    pub dependency_policy: DependencyPolicy,

    /// How `required_device_count` completes a task.
    pub completion_policy: CompletionPolicy,

    /// Base URL under which code references are served, if any. When set,
    /// assignments carry `{base}/{codeRef}` as a download URL.
    pub code_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            sweep_interval_secs: 60,
            liveness_timeout_secs: 60,
            lease_timeout_secs: 120,
            dependency_policy: DependencyPolicy::default(),
            completion_policy: CompletionPolicy::default(),
            code_base_url: None,
        }
    }
}

impl Config {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn liveness_timeout(&self) -> TimeDelta {
        seconds(self.liveness_timeout_secs)
    }

    pub fn lease_timeout(&self) -> TimeDelta {
        seconds(self.lease_timeout_secs)
    }

    /// Download URL for a code reference, if a base URL is configured.
    pub fn code_url(&self, code_ref: &str) -> Option<String> {
        self.code_base_url
            .as_deref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), code_ref))
    }
}

fn seconds(secs: u64) -> TimeDelta {
    TimeDelta::seconds(i64::from(u32::try_from(secs).unwrap_or(u32::MAX)))
}
