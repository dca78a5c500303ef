//! Shared application state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::monitor::SweepReport;
use crate::store::{MemoryStore, RecordStore};

/// Running totals of liveness sweep activity, exported as metrics.
#[derive(Debug, Default)]
pub struct SweepCounters {
    pub sweeps: AtomicU64,
    pub devices_disconnected: AtomicU64,
    pub dead_device_reclaims: AtomicU64,
    pub lease_timeout_reclaims: AtomicU64,
    pub failures: AtomicU64,
}

impl SweepCounters {
    pub fn record(&self, report: &SweepReport) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.devices_disconnected
            .fetch_add(report.devices_disconnected, Ordering::Relaxed);
        self.dead_device_reclaims
            .fetch_add(report.dead_device_reclaims, Ordering::Relaxed);
        self.lease_timeout_reclaims
            .fetch_add(report.lease_timeout_reclaims, Ordering::Relaxed);
        self.failures.fetch_add(report.failures, Ordering::Relaxed);
    }
}

/// Shared application state.
pub struct AppState {
    /// Device and task records.
    pub store: Arc<dyn RecordStore>,

    /// Time source for heartbeats, leases, and task creation.
    pub clock: Arc<dyn Clock>,

    pub config: Config,

    /// Liveness sweep totals.
    pub counters: SweepCounters,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(config: Config, store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            store,
            clock,
            config,
            counters: SweepCounters::default(),
        })
    }

    /// AppState over a fresh in-memory store and the system clock.
    pub fn in_memory(config: Config) -> Arc<Self> {
        Self::new(config, Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
