//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use devicegrid_core::{DeviceStatus, TaskStatus};

use crate::state::AppState;
use crate::store::{DeviceFilter, TaskFilter};

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_device_metrics(state, &mut output).await;
    collect_task_metrics(state, &mut output).await;
    collect_sweep_metrics(state, &mut output);

    output
}

/// Collect device metrics by status.
async fn collect_device_metrics(state: &Arc<AppState>, output: &mut String) {
    // A store error leaves the gauges at zero rather than failing the scrape.
    let devices = state
        .store
        .find_devices(&DeviceFilter::all())
        .await
        .unwrap_or_default();

    let mut idle = 0u64;
    let mut busy = 0u64;
    let mut disconnected = 0u64;

    for device in &devices {
        match device.status {
            DeviceStatus::Idle => idle += 1,
            DeviceStatus::Busy => busy += 1,
            DeviceStatus::Disconnected => disconnected += 1,
        }
    }

    writeln!(
        output,
        "# HELP devicegrid_devices Number of registered devices by status"
    )
    .ok();
    writeln!(output, "# TYPE devicegrid_devices gauge").ok();
    writeln!(output, "devicegrid_devices{{status=\"idle\"}} {idle}").ok();
    writeln!(output, "devicegrid_devices{{status=\"busy\"}} {busy}").ok();
    writeln!(
        output,
        "devicegrid_devices{{status=\"disconnected\"}} {disconnected}"
    )
    .ok();
}

/// Collect task metrics by status, plus outstanding leases.
async fn collect_task_metrics(state: &Arc<AppState>, output: &mut String) {
    let tasks = state
        .store
        .find_tasks(&TaskFilter::all())
        .await
        .unwrap_or_default();

    let mut pending = 0u64;
    let mut running = 0u64;
    let mut done = 0u64;
    let mut leases = 0u64;

    for task in &tasks {
        match task.status {
            TaskStatus::Pending => pending += 1,
            TaskStatus::Running => running += 1,
            TaskStatus::Done => done += 1,
        }
        if task.status.is_active() {
            leases += task.outstanding_leases().len() as u64;
        }
    }

    writeln!(output).ok();
    writeln!(output, "# HELP devicegrid_tasks Number of tasks by status").ok();
    writeln!(output, "# TYPE devicegrid_tasks gauge").ok();
    writeln!(output, "devicegrid_tasks{{status=\"pending\"}} {pending}").ok();
    writeln!(output, "devicegrid_tasks{{status=\"running\"}} {running}").ok();
    writeln!(output, "devicegrid_tasks{{status=\"done\"}} {done}").ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP devicegrid_active_leases Input slots leased without a result"
    )
    .ok();
    writeln!(output, "# TYPE devicegrid_active_leases gauge").ok();
    writeln!(output, "devicegrid_active_leases {leases}").ok();
}

/// Liveness sweep totals since start.
fn collect_sweep_metrics(state: &Arc<AppState>, output: &mut String) {
    let counters = &state.counters;
    let totals = [
        (
            "devicegrid_sweeps_total",
            "Liveness sweeps run",
            counters.sweeps.load(Ordering::Relaxed),
        ),
        (
            "devicegrid_devices_disconnected_total",
            "Devices disconnected for missing the liveness window",
            counters.devices_disconnected.load(Ordering::Relaxed),
        ),
        (
            "devicegrid_dead_device_reclaims_total",
            "Slots reclaimed from disconnected devices",
            counters.dead_device_reclaims.load(Ordering::Relaxed),
        ),
        (
            "devicegrid_lease_timeout_reclaims_total",
            "Slots reclaimed after the lease timeout",
            counters.lease_timeout_reclaims.load(Ordering::Relaxed),
        ),
        (
            "devicegrid_sweep_failures_total",
            "Record updates skipped by a sweep after an error",
            counters.failures.load(Ordering::Relaxed),
        ),
    ];

    for (name, help, value) in totals {
        writeln!(output).ok();
        writeln!(output, "# HELP {name} {help}").ok();
        writeln!(output, "# TYPE {name} counter").ok();
        writeln!(output, "{name} {value}").ok();
    }
}
