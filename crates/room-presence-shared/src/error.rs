//! Domain error types for the room-presence pipeline.
//!
//! Handlers catch these at the event-bus boundary and log them against the
//! event kind; they are never propagated to other subscribers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoomPresenceError {
    /// Broker unreachable, DB write failed, etc. The MQTT reconnect loop or
    /// the caller's own retry handles it; no event is emitted on failure.
    #[error("transient infrastructure error: {0}")]
    TransientInfra(String),

    /// Unknown scanner uuid in a scan, or an empty Scanner set on heartbeat.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A model's `inputs_hash` no longer matches the ambient room/scanner set.
    #[error("prediction model is stale (inputs_hash mismatch) for device {device_id}")]
    ModelMismatch { device_id: i64 },

    /// Inference failed inside the worker boundary.
    #[error("inference error: {0}")]
    Inference(String),

    /// Duplicate name/uuid on create.
    #[error("integrity error: {0}")]
    Integrity(String),
}
