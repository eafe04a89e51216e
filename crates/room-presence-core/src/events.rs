//! Concrete event types carried over the [`crate::event_bus::EventBus`].

use room_presence_shared::{Device, DeviceId, Heartbeat, RawScan, Room, RoomId, RoomOccupancy};

/// A raw BLE observation, decoded off MQTT, not yet attributed to a tracker.
#[derive(Debug, Clone)]
pub struct RawScanEvent(pub RawScan);

/// A single accepted raw scan for a device, after Kalman filtering.
#[derive(Debug, Clone)]
pub struct DeviceSignalEvent {
    pub device_id: DeviceId,
    pub scanner_uuid: String,
    pub rssi: f64,
    pub when: u64,
}

/// At most one per heartbeat period per device, only on change.
#[derive(Debug, Clone)]
pub struct HeartbeatEvent(pub Heartbeat);

/// Per-room probabilities produced from one heartbeat, or an empty vector
/// when the device has dropped out of range of every scanner.
#[derive(Debug, Clone)]
pub struct OccupancyEvent {
    pub device_id: DeviceId,
    pub room_occupancy: Vec<RoomOccupancy>,
}

/// A room's committed occupancy changed (or a reconnect forced a republish).
#[derive(Debug, Clone)]
pub struct RoomStateChangeEvent {
    pub room_id: RoomId,
    pub occupied: bool,
    pub active_device_ids: Vec<DeviceId>,
}

#[derive(Debug, Clone)]
pub struct DeviceAddedEvent(pub Device);

#[derive(Debug, Clone)]
pub struct DeviceRemovedEvent(pub Device);

#[derive(Debug, Clone)]
pub struct RoomAddedEvent(pub Room);

#[derive(Debug, Clone)]
pub struct RoomRemovedEvent(pub Room);

#[derive(Debug, Clone)]
pub struct MqttConnectedEvent;

#[derive(Debug, Clone)]
pub struct MqttDisconnectedEvent;

#[derive(Debug, Clone)]
pub struct StartRecordingSignalsEvent {
    pub device_id: DeviceId,
    pub room_id: RoomId,
}

#[derive(Debug, Clone)]
pub struct StopRecordingSignalsEvent {
    pub device_id: DeviceId,
}

/// Notifies UIs whether enough labelled samples have been collected for the
/// active learning session.
#[derive(Debug, Clone)]
pub struct LearntDeviceSignalEvent {
    pub device_id: DeviceId,
    pub is_enough: bool,
}
