//! The abstract publish surface the core depends on. The engine binary
//! provides the real implementation over `rumqttc`; the core never sees the
//! transport.

use async_trait::async_trait;
use room_presence_shared::RoomPresenceError;

#[async_trait]
pub trait MqttPublisher: Send + Sync {
    /// Publish `payload` to `topic`. When `retain` is set, the broker must
    /// keep delivering it to new subscribers until it is replaced or
    /// cleared with an empty payload.
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), RoomPresenceError>;
}
