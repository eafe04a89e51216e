//! Shared Data Models for the Room Presence system
//!
//! Core data structures for the BLE room-occupancy fusion pipeline. These
//! types are shared between the core event-driven pipeline, the engine
//! binary that wires it to MQTT, and the model-training/inference surface.

mod config;
mod error;
mod hash;

pub mod topics;

pub use config::Config;
pub use error::RoomPresenceError;
pub use hash::inputs_hash;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

pub type DeviceId = i64;
pub type RoomId = i64;
pub type ScannerId = i64;

/// A tracked mobile device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub uuid: String,
    pub use_name_as_id: bool,
    pub display_name: String,
    pub prediction_model_id: Option<i64>,
}

impl Device {
    /// The identifier scanners publish measurements under.
    pub fn identifier(&self) -> &str {
        if self.use_name_as_id {
            &self.name
        } else {
            &self.uuid
        }
    }
}

/// A room that can be occupied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
}

/// A fixed BLE scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scanner {
    pub id: ScannerId,
    pub uuid: String,
    pub display_name: String,
    pub room_ids: Vec<RoomId>,
}

/// A trained per-device room classifier, persisted as an opaque blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionModel {
    pub id: i64,
    pub accuracy: f64,
    pub inputs_hash: String,
    pub model: Vec<u8>,
    pub device_ids: Vec<DeviceId>,
}

/// One Start/Stop recording cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSession {
    pub id: i64,
    pub device_id: DeviceId,
    pub room_id: RoomId,
    pub created_at: u64,
}

/// A persisted, labelled RSSI observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSignal {
    pub learning_session_id: Option<i64>,
    pub device_id: DeviceId,
    pub room_id: RoomId,
    pub scanner_id: ScannerId,
    pub rssi: f64,
    pub created_at: u64,
    pub updated_at: u64,
}

// ============================================================================
// TRANSIENT ENTITIES (never persisted)
// ============================================================================

/// A single BLE observation forwarded by a scanner, as decoded off MQTT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScan {
    pub scanner_uuid: String,
    pub device_key: String,
    pub rssi: f64,
    pub when: u64,
}

/// A periodic per-device vector of filtered RSSI values, one slot per known
/// scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub device_id: DeviceId,
    pub values: Option<HashMap<String, f64>>,
    pub timestamp: u64,
}

/// Per-room occupancy probability produced by a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomOccupancy {
    pub room_id: RoomId,
    pub state: bool,
    pub proba: f64,
}

// ============================================================================
// HELPERS
// ============================================================================

/// Current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lowercase a scanner/device UUID and strip colons, producing the
/// canonical device_key used by trackers.
pub fn normalize_uuid(raw: &str) -> String {
    raw.to_lowercase().replace(':', "")
}
