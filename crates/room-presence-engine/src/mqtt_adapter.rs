//! The `rumqttc`-backed [`MqttPublisher`] implementation and raw scan
//! decoder. The core never sees `rumqttc` directly; this module is the
//! only place that does.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Deserialize;

use room_presence_core::mqtt::MqttPublisher;
use room_presence_shared::{normalize_uuid, topics, Config, RawScan, RoomPresenceError};

/// Raw wire payload a scanner publishes under `room_presence/<scanner_uuid>`.
#[derive(Debug, Deserialize)]
struct ScanPayload {
    uuid: String,
    name: Option<String>,
    rssi: Option<f64>,
    when: Option<f64>,
}

/// Decode one inbound publish on the scans topic into a [`RawScan`], or
/// `None` if the topic doesn't match the scan convention or the payload is
/// malformed (logged, not propagated: one bad message must not take down
/// the ingestion loop).
pub fn decode_raw_scan(topic: &str, payload: &[u8]) -> Option<RawScan> {
    let scanner_uuid = topic.strip_prefix(topics::SCANS_PREFIX)?;

    let parsed: ScanPayload = match serde_json::from_slice(payload) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(topic, error = %err, "dropping malformed scan payload");
            return None;
        }
    };

    // A friendly configured name takes precedence over the device's MAC,
    // matching how `Device::identifier()` favours `use_name_as_id`.
    let device_key = parsed.name.unwrap_or_else(|| normalize_uuid(&parsed.uuid));
    let when = parsed
        .when
        .map(|w| (w * 1000.0) as u64)
        .unwrap_or_else(room_presence_shared::current_timestamp_ms);

    Some(RawScan {
        scanner_uuid: scanner_uuid.to_string(),
        device_key,
        rssi: parsed.rssi.unwrap_or(-100.0),
        when,
    })
}

/// Thin wrapper over `rumqttc::AsyncClient` satisfying [`MqttPublisher`].
pub struct RumqttcPublisher {
    client: AsyncClient,
}

impl RumqttcPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MqttPublisher for RumqttcPublisher {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), RoomPresenceError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload.to_string())
            .await
            .map_err(|err| RoomPresenceError::TransientInfra(err.to_string()))
    }
}

/// Build the `rumqttc` client/eventloop pair from process configuration.
pub fn build_client(config: &Config) -> (AsyncClient, rumqttc::EventLoop) {
    let client_id = format!("room-presence-engine-{}", uuid::Uuid::new_v4());
    let mut opts = MqttOptions::new(client_id, &config.mqtt_broker_url, config.mqtt_broker_port);
    opts.set_keep_alive(Duration::from_secs(30));
    opts.set_clean_session(true);
    if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
        opts.set_credentials(username, password);
    }
    AsyncClient::new(opts, 100)
}
