//! Liveness monitor - periodic reclamation of dead devices and stuck leases.
//!
//! Each sweep runs two passes over the active tasks:
//!
//! - **Dead devices**: every slot leased to a live device silent for longer
//!   than the liveness timeout is freed, then the device is disconnected.
//!   Slots still leased to an already disconnected device are freed too.
//! - **Stuck leases**: a slot leased for longer than the lease timeout with
//!   no result from its holder is freed and the holder reset to idle,
//!   whether or not the holder is still alive.
//!
//! Every record is updated on its own. A failed update is logged, counted,
//! and left for the next tick; it never stops the rest of the sweep.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use devicegrid_core::{CoreError, DeviceId, DeviceStatus, SlotRef, TaskId};

use crate::registry::DeviceRegistry;
use crate::state::AppState;
use crate::store::{edit_task, DeviceFilter, Edit, TaskFilter};

/// Delay before restarting a monitor loop that panicked.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Devices moved to disconnected.
    pub devices_disconnected: u64,
    /// Slots freed because their holder was disconnected.
    pub dead_device_reclaims: u64,
    /// Slots freed because their lease expired without a result.
    pub lease_timeout_reclaims: u64,
    /// Record reads or updates that failed and were skipped.
    pub failures: u64,
}

impl SweepReport {
    pub fn reclaimed(&self) -> u64 {
        self.dead_device_reclaims + self.lease_timeout_reclaims
    }

    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

/// Liveness and lease-timeout monitor.
#[derive(Clone)]
pub struct LivenessMonitor {
    state: Arc<AppState>,
    registry: DeviceRegistry,
}

impl LivenessMonitor {
    /// Create a new LivenessMonitor.
    pub fn new(state: Arc<AppState>) -> Self {
        let registry = DeviceRegistry::new(state.clone());
        Self { state, registry }
    }

    /// Run both reclamation passes once.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.state.now();
        let mut report = SweepReport::default();

        self.reclaim_dead_devices(now, &mut report).await;
        self.reclaim_stuck_leases(now, &mut report).await;

        self.state.counters.record(&report);
        if report.is_quiet() {
            debug!("Liveness sweep found nothing to reclaim");
        } else {
            info!(
                devices_disconnected = report.devices_disconnected,
                dead_device_reclaims = report.dead_device_reclaims,
                lease_timeout_reclaims = report.lease_timeout_reclaims,
                failures = report.failures,
                "Liveness sweep finished"
            );
        }
        report
    }

    async fn reclaim_dead_devices(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let cutoff = now - self.state.config.liveness_timeout();
        let filter = DeviceFilter::live().heartbeat_before(cutoff);
        let stale = match self.state.store.find_devices(&filter).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "Failed to query stale devices");
                report.failures += 1;
                return;
            }
        };

        for device in stale {
            // A device keeps its live status until its slots are free, so a
            // failed reclaim is picked up again next tick.
            if !self.free_device_slots(&device.id, report).await {
                continue;
            }

            match self.registry.disconnect_if_stale(&device.id, cutoff).await {
                Ok(Some(previous)) => {
                    report.devices_disconnected += 1;
                    warn!(
                        device_id = %device.id,
                        last_heartbeat = %previous.last_heartbeat,
                        was = %previous.status,
                        "Device missed liveness window, disconnected"
                    );
                }
                // Heartbeat landed after the query.
                Ok(None) => {}
                Err(e) => {
                    warn!(device_id = %device.id, error = %e, "Failed to disconnect device");
                    report.failures += 1;
                }
            }
        }

        self.reclaim_orphaned_slots(report).await;
    }

    /// Free slots that are still leased to disconnected devices, such as a
    /// grant that landed between a reclaim and the disconnect.
    async fn reclaim_orphaned_slots(&self, report: &mut SweepReport) {
        let disconnected: HashSet<DeviceId> = match self
            .state
            .store
            .find_devices(&DeviceFilter::disconnected())
            .await
        {
            Ok(devices) => devices.into_iter().map(|device| device.id).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to query disconnected devices");
                report.failures += 1;
                return;
            }
        };
        if disconnected.is_empty() {
            return;
        }

        let tasks = match self.state.store.find_tasks(&TaskFilter::active()).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Failed to query active tasks");
                report.failures += 1;
                return;
            }
        };

        let orphaned: BTreeSet<DeviceId> = tasks
            .iter()
            .flat_map(|task| task.inputs.iter())
            .filter_map(|slot| slot.lease_holder.as_ref())
            .filter(|holder| disconnected.contains(*holder))
            .cloned()
            .collect();

        for device_id in orphaned {
            // Rejoined since the query; its slots may be fresh grants.
            match self.registry.status(&device_id).await {
                Ok(DeviceStatus::Disconnected) => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "Failed to read device");
                    report.failures += 1;
                    continue;
                }
            }
            warn!(device_id = %device_id, "Disconnected device still holds leases");
            self.free_device_slots(&device_id, report).await;
        }
    }

    /// Free every active-task slot leased to `device_id`. Returns false if
    /// any of them could not be freed.
    async fn free_device_slots(&self, device_id: &DeviceId, report: &mut SweepReport) -> bool {
        let filter = TaskFilter::active().leased_to(device_id.clone());
        let tasks = match self.state.store.find_tasks(&filter).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to query tasks leased to device");
                report.failures += 1;
                return false;
            }
        };

        let mut freed_all = true;
        for task in tasks {
            let result = edit_task(&*self.state.store, &task.id, |fresh| {
                if fresh.is_terminal() {
                    return Ok::<_, CoreError>(Edit::Keep(0));
                }
                match fresh.release_device(device_id) {
                    0 => Ok(Edit::Keep(0)),
                    freed => Ok(Edit::Commit(freed)),
                }
            })
            .await;

            match result {
                Ok(edited) if edited.written => {
                    report.dead_device_reclaims += edited.outcome as u64;
                    warn!(
                        device_id = %device_id,
                        task_id = %task.id,
                        slots = edited.outcome,
                        status = %edited.record.status,
                        "Reclaimed leases of dead device"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(device_id = %device_id, task_id = %task.id, error = %e, "Failed to reclaim leases");
                    report.failures += 1;
                    freed_all = false;
                }
            }
        }
        freed_all
    }

    async fn reclaim_stuck_leases(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let cutoff = now - self.state.config.lease_timeout();
        let filter = TaskFilter::active().leased_before(cutoff);
        let tasks = match self.state.store.find_tasks(&filter).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Failed to query tasks with expired leases");
                report.failures += 1;
                return;
            }
        };

        for task in tasks {
            let result = edit_task(&*self.state.store, &task.id, |fresh| {
                if fresh.is_terminal() {
                    return Ok::<_, CoreError>(Edit::Keep(Vec::new()));
                }
                let released = fresh.release_stuck(cutoff);
                if released.is_empty() {
                    Ok(Edit::Keep(released))
                } else {
                    Ok(Edit::Commit(released))
                }
            })
            .await;

            let released = match result {
                Ok(edited) if edited.written => edited.outcome,
                Ok(_) => continue,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Failed to reclaim expired leases");
                    report.failures += 1;
                    continue;
                }
            };

            for (slot, holder) in released {
                report.lease_timeout_reclaims += 1;
                warn!(
                    task_id = %task.id,
                    device_id = %holder,
                    slot,
                    "Lease expired without a result, reclaimed"
                );
                self.reset_holder(&task.id, slot, &holder, report).await;
            }
        }
    }

    async fn reset_holder(
        &self,
        task_id: &TaskId,
        slot: usize,
        holder: &DeviceId,
        report: &mut SweepReport,
    ) {
        let slot_ref = SlotRef::new(task_id.clone(), slot);
        if let Err(e) = self.registry.release(holder, &slot_ref).await {
            warn!(device_id = %holder, task_id = %task_id, slot, error = %e, "Failed to reset device");
            report.failures += 1;
        }
    }

    /// Sweep on the configured interval until `shutdown` fires. The first
    /// sweep happens one full interval after start.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.state.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            interval_secs = self.state.config.sweep_interval().as_secs(),
            liveness_timeout_secs = self.state.config.liveness_timeout_secs,
            lease_timeout_secs = self.state.config.lease_timeout_secs,
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Liveness monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Spawn the monitor under a supervisor that restarts it if a sweep
    /// panics, until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let monitor = self.clone();
                let token = shutdown.clone();
                let handle = tokio::spawn(async move { monitor.run(token).await });

                match handle.await {
                    Ok(()) => break,
                    Err(e) if e.is_panic() => {
                        error!(error = %e, "Liveness monitor panicked, restarting");
                    }
                    Err(e) => {
                        error!(error = %e, "Liveness monitor aborted");
                        break;
                    }
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RESTART_DELAY) => {}
                }
            }
        })
    }
}
