//! Device registry (spec §4.3). Owns the device set and mediates
//! request/response over each device's `DeviceLink`. Per spec §5 "Shared
//! resources": protected by its own readers-writer lock, with per-device
//! status updates additionally serialized in `device_id` ascending order
//! wherever more than one device is touched together, to forbid deadlocks
//! (spec §4.2 "Concurrency guarantees").

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::device::{Device, DeviceStatus};
use crate::domain::models::event::EventPayload;
use crate::domain::ports::device_link::DeviceLink;
use crate::services::event_bus::EventBus;

struct DeviceEntry {
    device: Device,
    link: Option<Arc<dyn DeviceLink>>,
}

/// Tracks every known device and its live transport connection.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceEntry>>,
    event_bus: Arc<EventBus>,
    heartbeat_grace: ChronoDuration,
}

impl DeviceRegistry {
    pub fn new(event_bus: Arc<EventBus>, heartbeat_grace: ChronoDuration) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            event_bus,
            heartbeat_grace,
        }
    }

    /// Registration handshake (spec §4.3): validates and stores the
    /// device record at CONNECTED→IDLE, publishes `device.registered`.
    /// Re-registration under the same `device_id` replaces the stale
    /// connection and clears any quarantine.
    pub async fn register(&self, mut device: Device, link: Arc<dyn DeviceLink>) {
        device.register();
        let device_id = device.device_id.clone();
        let mut devices = self.devices.write().await;
        devices.insert(device_id.clone(), DeviceEntry { device, link: Some(link) });
        drop(devices);
        info!(device_id = %device_id, "device registered");
        self.event_bus.publish(EventPayload::DeviceRegistered { device_id });
    }

    pub async fn heartbeat(&self, device_id: &str) {
        let mut devices = self.devices.write().await;
        if let Some(entry) = devices.get_mut(device_id) {
            entry.device.heartbeat();
        }
    }

    /// Sweeps every device for a lapsed heartbeat (spec §4.3 "Liveness").
    /// Returns the task id that was RUNNING on any device just marked
    /// DISCONNECTED, so the caller (orchestrator) can fail it via the
    /// transport-error path.
    pub async fn sweep_heartbeats(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<(String, Option<String>)> {
        let mut devices = self.devices.write().await;
        let mut ids: Vec<String> = devices.keys().cloned().collect();
        ids.sort();
        let mut disconnected = Vec::new();
        for id in ids {
            let entry = devices.get_mut(&id).expect("just listed");
            if matches!(entry.device.status, DeviceStatus::Idle | DeviceStatus::Busy | DeviceStatus::Connected)
                && entry.device.heartbeat_lapsed(now, self.heartbeat_grace)
            {
                let running_task = entry.device.current_task_id.clone();
                entry.device.mark_disconnected();
                warn!(device_id = %id, "device heartbeat lapsed, marking disconnected");
                self.event_bus.publish(EventPayload::DeviceDisconnected { device_id: id.clone() });
                disconnected.push((id, running_task));
            }
        }
        disconnected
    }

    /// Capability matching + dispatch-time validation (spec §4.3): the
    /// planner already chose `device_id`; this confirms it still exists
    /// and is IDLE, then atomically marks it BUSY for `task_id`.
    pub async fn try_assign(&self, device_id: &str, task_id: &str) -> CoreResult<Arc<dyn DeviceLink>> {
        let mut devices = self.devices.write().await;
        let entry = devices.get_mut(device_id).ok_or_else(|| CoreError::DeviceUnavailable {
            device_id: device_id.to_string(),
            reason: "unknown device".to_string(),
        })?;
        if !entry.device.is_dispatch_eligible() {
            return Err(CoreError::DeviceUnavailable {
                device_id: device_id.to_string(),
                reason: format!("device status is {}", entry.device.status.as_str()),
            });
        }
        let link = entry.link.clone().ok_or_else(|| CoreError::DeviceUnavailable {
            device_id: device_id.to_string(),
            reason: "no active connection".to_string(),
        })?;
        entry.device.assign(task_id);
        self.event_bus.publish(EventPayload::DeviceStatusChanged {
            device_id: device_id.to_string(),
            status: entry.device.status.as_str().to_string(),
        });
        Ok(link)
    }

    /// Fetches a device's current link without touching its status —
    /// used for best-effort abort delivery during cancellation, which must
    /// not perturb dispatch bookkeeping (spec §5 "Cancellation semantics").
    pub async fn link_for(&self, device_id: &str) -> Option<Arc<dyn DeviceLink>> {
        self.devices.read().await.get(device_id).and_then(|e| e.link.clone())
    }

    pub async fn release(&self, device_id: &str) {
        let mut devices = self.devices.write().await;
        if let Some(entry) = devices.get_mut(device_id) {
            entry.device.release();
        }
    }

    pub async fn record_failure(&self, device_id: &str) {
        let mut devices = self.devices.write().await;
        if let Some(entry) = devices.get_mut(device_id) {
            entry.device.record_failure();
            self.event_bus.publish(EventPayload::DeviceStatusChanged {
                device_id: device_id.to_string(),
                status: entry.device.status.as_str().to_string(),
            });
        }
    }

    /// Marks a device FAILED outright, bypassing the rolling quarantine
    /// counter (spec §7 "`timeout`... device marked FAILED").
    pub async fn mark_failed(&self, device_id: &str) {
        let mut devices = self.devices.write().await;
        if let Some(entry) = devices.get_mut(device_id) {
            entry.device.mark_failed();
            self.event_bus.publish(EventPayload::DeviceStatusChanged {
                device_id: device_id.to_string(),
                status: entry.device.status.as_str().to_string(),
            });
        }
    }

    pub async fn device_snapshot(&self, device_id: &str) -> Option<Device> {
        self.devices.read().await.get(device_id).map(|e| e.device.clone())
    }

    pub async fn snapshot(&self) -> Vec<Device> {
        let devices = self.devices.read().await;
        let mut out: Vec<Device> = devices.values().map(|e| e.device.clone()).collect();
        out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        out
    }

    pub async fn idle_count(&self) -> usize {
        self.devices.read().await.values().filter(|e| e.device.is_dispatch_eligible()).count()
    }
}
