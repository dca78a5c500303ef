//! Device registry - registration, heartbeats, and status transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use devicegrid_core::{CoreError, Device, DeviceId, DeviceStatus, SlotRef, StatusChange};

use crate::state::AppState;
use crate::store::{edit_device, DeviceFilter, Edit};

/// Outcome of a registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// False if the device was already known.
    pub created: bool,
    pub device: Device,
}

/// Device registry.
#[derive(Clone)]
pub struct DeviceRegistry {
    state: Arc<AppState>,
}

impl DeviceRegistry {
    /// Create a new DeviceRegistry.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Register a device. Re-registering returns the stored record untouched,
    /// so an in-progress lease survives a device restart.
    pub async fn register(&self, device_id: &DeviceId) -> Result<Registration, CoreError> {
        if device_id.is_blank() {
            return Err(CoreError::InvalidInput("deviceId is required".into()));
        }

        let device = Device::new(device_id.clone(), self.state.now());
        let (device, created) = self.state.store.insert_device(device).await?;

        if created {
            info!(device_id = %device_id, "Device registered");
        } else {
            debug!(device_id = %device_id, status = %device.status, "Device already registered");
        }

        Ok(Registration { created, device })
    }

    /// Record a heartbeat. A disconnected device rejoins as idle; a busy one
    /// stays busy.
    pub async fn heartbeat(&self, device_id: &DeviceId) -> Result<Device, CoreError> {
        let now = self.state.now();
        let edited = edit_device(&*self.state.store, device_id, |device| {
            let rejoined = device.heartbeat(now);
            Ok::<_, CoreError>(Edit::Commit(rejoined))
        })
        .await?;

        if edited.outcome {
            info!(device_id = %device_id, "Disconnected device rejoined");
        } else {
            debug!(device_id = %device_id, status = %edited.record.status, "Heartbeat received");
        }

        Ok(edited.record)
    }

    pub async fn get(&self, device_id: &DeviceId) -> Result<Device, CoreError> {
        self.state
            .store
            .get_device(device_id)
            .await?
            .ok_or_else(|| CoreError::DeviceNotFound(device_id.clone()))
    }

    pub async fn status(&self, device_id: &DeviceId) -> Result<DeviceStatus, CoreError> {
        Ok(self.get(device_id).await?.status)
    }

    /// All devices, sorted by id.
    pub async fn list(&self) -> Result<Vec<Device>, CoreError> {
        let mut devices = self.state.store.find_devices(&DeviceFilter::all()).await?;
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    /// Apply `change` if `guard` accepts the fresh record. Every transition
    /// except `disconnected` refreshes the heartbeat. Returns the stored
    /// device and whether it moved.
    pub async fn set_status_if<G>(
        &self,
        device_id: &DeviceId,
        change: StatusChange,
        guard: G,
    ) -> Result<(Device, bool), CoreError>
    where
        G: Fn(&Device) -> bool,
    {
        let now = self.state.now();
        let edited = edit_device(&*self.state.store, device_id, |device| {
            if guard(device) {
                device.apply(change.clone(), now);
                Ok::<_, CoreError>(Edit::Commit(()))
            } else {
                Ok(Edit::Keep(()))
            }
        })
        .await?;
        Ok((edited.record, edited.written))
    }

    /// Mark the device busy with `slot` as its lease. Fails with
    /// `AlreadyBusy` if the device holds a different lease by now.
    pub async fn occupy(&self, device_id: &DeviceId, slot: &SlotRef) -> Result<Device, CoreError> {
        let now = self.state.now();
        let edited = edit_device(&*self.state.store, device_id, |device| {
            match &device.lease {
                Some(held) if held != slot => Err(CoreError::AlreadyBusy(device_id.clone())),
                _ => {
                    device.apply(StatusChange::Busy(slot.clone()), now);
                    Ok(Edit::Commit(()))
                }
            }
        })
        .await?;
        Ok(edited.record)
    }

    /// Move the device to idle if its lease still points at `slot`.
    /// Returns whether the device was released.
    pub async fn release(&self, device_id: &DeviceId, slot: &SlotRef) -> Result<bool, CoreError> {
        let (_, moved) = self
            .set_status_if(device_id, StatusChange::Idle, |device| device.holds(slot))
            .await?;

        if moved {
            debug!(device_id = %device_id, task_id = %slot.task_id, slot = slot.slot, "Device released to idle");
        }
        Ok(moved)
    }

    /// Move the device to idle unless it holds a lease. Used when a request
    /// finds no work, so a concurrent grant to the same device is not undone.
    pub async fn settle_idle(&self, device_id: &DeviceId) -> Result<Device, CoreError> {
        let (device, _) = self
            .set_status_if(device_id, StatusChange::Idle, |device| device.lease.is_none())
            .await?;
        Ok(device)
    }

    /// Disconnect the device if it is live and silent since before `cutoff`.
    /// Re-checked on the fresh record, so a heartbeat that lands first wins.
    pub async fn disconnect_if_stale(
        &self,
        device_id: &DeviceId,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Device>, CoreError> {
        let now = self.state.now();
        let edited = edit_device(&*self.state.store, device_id, |device| {
            if device.is_stale(cutoff) {
                let previous = device.clone();
                device.apply(StatusChange::Disconnected, now);
                Ok::<_, CoreError>(Edit::Commit(Some(previous)))
            } else {
                Ok(Edit::Keep(None))
            }
        })
        .await?;
        Ok(edited.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::Config;
    use crate::store::MemoryStore;
    use chrono::TimeDelta;
    use devicegrid_core::TaskId;

    fn registry() -> (DeviceRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let state = AppState::new(Config::default(), Arc::new(MemoryStore::new()), clock.clone());
        (DeviceRegistry::new(state), clock)
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let (registry, _) = registry();
        let id = DeviceId::new("device-001");

        let first = registry.register(&id).await.unwrap();
        assert!(first.created);
        assert_eq!(first.device.status, DeviceStatus::Idle);

        registry
            .occupy(&id, &SlotRef::new(TaskId::new("t"), 0))
            .await
            .unwrap();

        let second = registry.register(&id).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.device.status, DeviceStatus::Busy);
    }

    #[tokio::test]
    async fn register_rejects_blank_id() {
        let (registry, _) = registry();
        let err = registry.register(&DeviceId::new("")).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn heartbeat_unknown_device_is_not_found() {
        let (registry, _) = registry();
        let err = registry.heartbeat(&DeviceId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, CoreError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn heartbeat_refreshes_and_rejoins() {
        let (registry, clock) = registry();
        let id = DeviceId::new("device-001");
        registry.register(&id).await.unwrap();
        registry
            .set_status_if(&id, StatusChange::Disconnected, |_| true)
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(30));
        let device = registry.heartbeat(&id).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Idle);
        assert_eq!(device.last_heartbeat, clock.now());
    }

    #[tokio::test]
    async fn occupy_refuses_second_lease() {
        let (registry, _) = registry();
        let id = DeviceId::new("device-001");
        registry.register(&id).await.unwrap();

        let first = SlotRef::new(TaskId::new("t"), 0);
        registry.occupy(&id, &first).await.unwrap();
        registry.occupy(&id, &first).await.unwrap();

        let err = registry
            .occupy(&id, &SlotRef::new(TaskId::new("t"), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyBusy(_)));
    }

    #[tokio::test]
    async fn release_only_matching_lease() {
        let (registry, _) = registry();
        let id = DeviceId::new("device-001");
        registry.register(&id).await.unwrap();
        let slot = SlotRef::new(TaskId::new("t"), 0);
        registry.occupy(&id, &slot).await.unwrap();

        assert!(!registry
            .release(&id, &SlotRef::new(TaskId::new("t"), 1))
            .await
            .unwrap());
        assert_eq!(registry.status(&id).await.unwrap(), DeviceStatus::Busy);

        assert!(registry.release(&id, &slot).await.unwrap());
        assert_eq!(registry.status(&id).await.unwrap(), DeviceStatus::Idle);
    }

    #[tokio::test]
    async fn set_status_if_respects_guard() {
        let (registry, clock) = registry();
        let id = DeviceId::new("device-001");
        let registered = registry.register(&id).await.unwrap().device;

        clock.advance(TimeDelta::seconds(10));
        let (device, moved) = registry
            .set_status_if(&id, StatusChange::Disconnected, |d| d.is_busy())
            .await
            .unwrap();
        assert!(!moved);
        assert_eq!(device.status, DeviceStatus::Idle);

        let (device, moved) = registry
            .set_status_if(&id, StatusChange::Disconnected, |_| true)
            .await
            .unwrap();
        assert!(moved);
        assert_eq!(device.status, DeviceStatus::Disconnected);
        assert_eq!(device.last_heartbeat, registered.last_heartbeat);

        let (device, _) = registry
            .set_status_if(&id, StatusChange::Idle, |_| true)
            .await
            .unwrap();
        assert_eq!(device.last_heartbeat, clock.now());
    }

    #[tokio::test]
    async fn list_is_sorted_by_id() {
        let (registry, _) = registry();
        for id in ["c", "a", "b"] {
            registry.register(&DeviceId::new(id)).await.unwrap();
        }
        let ids: Vec<String> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id.into_inner())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn disconnect_only_when_stale() {
        let (registry, clock) = registry();
        let id = DeviceId::new("device-001");
        registry.register(&id).await.unwrap();

        let cutoff = clock.now();
        assert!(registry.disconnect_if_stale(&id, cutoff).await.unwrap().is_none());

        clock.advance(TimeDelta::seconds(61));
        let cutoff = clock.now() - TimeDelta::seconds(60);
        let previous = registry.disconnect_if_stale(&id, cutoff).await.unwrap();
        assert_eq!(previous.map(|d| d.status), Some(DeviceStatus::Idle));
        assert_eq!(registry.status(&id).await.unwrap(), DeviceStatus::Disconnected);
    }
}
