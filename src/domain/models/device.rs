//! Device domain model — a remote device agent reachable over a
//! `DeviceLink` (spec §3 "Device", §4.3).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection/assignment status of a device (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Unknown,
    Connecting,
    Connected,
    Idle,
    Busy,
    Disconnected,
    Failed,
    Offline,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Offline => "offline",
        }
    }

    /// Whether the orchestrator may dispatch a task to a device in this
    /// status (spec §4.2/§4.3: the registry validates IDLE at dispatch time).
    pub fn is_dispatch_eligible(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// A registered remote execution device (spec §3 "Device").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub os: String,
    pub capabilities: HashSet<String>,
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
    pub status: DeviceStatus,
    pub current_task_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub connection_attempts: u32,
    pub max_retries: u32,
    /// Rolling dispatch/heartbeat failure count since the last fresh
    /// `register` frame (grounded on a reduced circuit-breaker scope, spec
    /// §4.2/§8 S6). Once it reaches `quarantine_threshold` the device is
    /// held at FAILED and is not handed back to the orchestrator as
    /// dispatch-eligible until a fresh register frame clears it — matching
    /// S6's "does not attempt to reuse it until a fresh register frame
    /// arrives."
    failure_count: u32,
    quarantine_threshold: u32,
}

impl Device {
    pub fn new(device_id: impl Into<String>, os: impl Into<String>, capabilities: HashSet<String>) -> Self {
        let now = Utc::now();
        Self {
            device_id: device_id.into(),
            os: os.into(),
            capabilities,
            metadata: std::collections::HashMap::new(),
            status: DeviceStatus::Connecting,
            current_task_id: None,
            last_heartbeat: now,
            registered_at: now,
            connection_attempts: 0,
            max_retries: 3,
            failure_count: 0,
            quarantine_threshold: 3,
        }
    }

    pub fn with_quarantine_threshold(mut self, threshold: u32) -> Self {
        self.quarantine_threshold = threshold;
        self
    }

    pub fn with_metadata(mut self, metadata: std::collections::HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// A fresh `register` frame supersedes any prior connection (spec
    /// §4.3 "re-registration ... replaces the stale connection"): clears
    /// the quarantine counter and moves the device to CONNECTED, then IDLE.
    pub fn register(&mut self) {
        self.status = DeviceStatus::Idle;
        self.current_task_id = None;
        self.failure_count = 0;
        self.connection_attempts = 0;
        self.last_heartbeat = Utc::now();
    }

    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// Whether the device's heartbeat has lapsed past `timeout` (spec §4.3
    /// liveness, §8 property 12). Caller supplies `now` so this stays pure
    /// and unit-testable without wall-clock reliance.
    pub fn heartbeat_lapsed(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) > timeout
    }

    pub fn assign(&mut self, task_id: impl Into<String>) {
        self.status = DeviceStatus::Busy;
        self.current_task_id = Some(task_id.into());
    }

    /// Dispatch completed cleanly: the device returns to IDLE, unless it
    /// was pushed to FAILED in the interim (e.g. a racing heartbeat lapse).
    pub fn release(&mut self) {
        self.current_task_id = None;
        if self.status == DeviceStatus::Busy {
            self.status = DeviceStatus::Idle;
        }
    }

    /// A heartbeat grace period elapsed while the device was connected
    /// (spec §4.3 "marks a device DISCONNECTED after a grace period").
    /// Any task RUNNING on it is the caller's responsibility to fail.
    pub fn mark_disconnected(&mut self) {
        self.current_task_id = None;
        self.status = DeviceStatus::Disconnected;
    }

    /// Record a dispatch failure or a mid-task disconnect. Once the
    /// rolling count reaches the threshold the device is held at FAILED
    /// and stops being dispatch-eligible until `register` runs again.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.current_task_id = None;
        self.status = if self.failure_count >= self.quarantine_threshold {
            DeviceStatus::Failed
        } else {
            DeviceStatus::Disconnected
        };
    }

    /// A task on this device hit its timeout (spec §7 "`timeout`... device
    /// marked FAILED"): unlike `record_failure`, this is not gated behind
    /// `quarantine_threshold` — a single timeout is enough.
    pub fn mark_failed(&mut self) {
        self.failure_count = self.failure_count.max(self.quarantine_threshold);
        self.current_task_id = None;
        self.status = DeviceStatus::Failed;
    }

    pub fn is_quarantined(&self) -> bool {
        self.status == DeviceStatus::Failed
    }

    pub fn is_dispatch_eligible(&self) -> bool {
        self.status.is_dispatch_eligible()
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::new("dev-a", "linux", HashSet::from(["shell".to_string()])).with_quarantine_threshold(2)
    }

    #[test]
    fn new_device_starts_connecting() {
        let d = device();
        assert_eq!(d.status, DeviceStatus::Connecting);
        assert!(!d.is_dispatch_eligible());
    }

    #[test]
    fn register_makes_device_idle_and_eligible() {
        let mut d = device();
        d.register();
        assert_eq!(d.status, DeviceStatus::Idle);
        assert!(d.is_dispatch_eligible());
    }

    #[test]
    fn repeated_failures_eventually_hold_device_at_failed() {
        let mut d = device();
        d.register();
        d.record_failure();
        assert_eq!(d.status, DeviceStatus::Disconnected);
        assert!(!d.is_dispatch_eligible());
        d.record_failure();
        assert!(d.is_quarantined());
        assert_eq!(d.status, DeviceStatus::Failed);
        assert!(!d.is_dispatch_eligible());
    }

    #[test]
    fn fresh_register_clears_quarantine() {
        let mut d = device();
        d.register();
        d.record_failure();
        d.record_failure();
        assert!(d.is_quarantined());
        d.register();
        assert!(d.is_dispatch_eligible());
        assert_eq!(d.failure_count(), 0);
    }

    #[test]
    fn heartbeat_lapse_detected_relative_to_supplied_now() {
        let mut d = device();
        d.register();
        let later = d.last_heartbeat + chrono::Duration::seconds(30);
        assert!(d.heartbeat_lapsed(later, chrono::Duration::seconds(10)));
        assert!(!d.heartbeat_lapsed(later, chrono::Duration::seconds(60)));
        d.heartbeat();
    }

    #[test]
    fn assign_then_release_round_trips_to_idle() {
        let mut d = device();
        d.register();
        d.assign("t1");
        assert_eq!(d.status, DeviceStatus::Busy);
        assert_eq!(d.current_task_id.as_deref(), Some("t1"));
        d.release();
        assert_eq!(d.status, DeviceStatus::Idle);
        assert!(d.current_task_id.is_none());
    }

    #[test]
    fn mark_disconnected_frees_current_task() {
        let mut d = device();
        d.register();
        d.assign("t1");
        d.mark_disconnected();
        assert_eq!(d.status, DeviceStatus::Disconnected);
        assert!(d.current_task_id.is_none());
    }
}
