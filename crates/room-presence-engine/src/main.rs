//! Room Presence Engine — wires the real-time fusion core to an MQTT
//! broker and runs the process.

mod mqtt_adapter;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{Event, Packet};
use tracing::{debug, error, info, warn};

use room_presence_brain::LinearModel;
use room_presence_core::bootstrap::bootstrap;
use room_presence_core::events::{MqttConnectedEvent, MqttDisconnectedEvent, RawScanEvent};
use room_presence_core::repository::InMemoryRepository;
use room_presence_shared::{topics, Config};

use mqtt_adapter::{build_client, decode_raw_scan, RumqttcPublisher};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("room_presence_engine=debug".parse()?)
                .add_directive("room_presence_core=debug".parse()?)
                .add_directive("rumqttc=warn".parse()?),
        )
        .init();

    info!("room-presence engine starting");

    let config = Config::from_env();
    info!(
        broker = %config.mqtt_broker_url,
        port = config.mqtt_broker_port,
        "connecting to MQTT broker"
    );

    let (client, mut eventloop) = build_client(&config);
    let publisher = Arc::new(RumqttcPublisher::new(client.clone()));

    // The in-memory repository stands in for the production database
    // adapter; the core only ever depends on the `Repository` trait. It
    // shares the bootstrap bus so admin mutations made through it after
    // startup still reach every subscribed component.
    let bus = room_presence_core::event_bus::EventBus::new();
    let repository = InMemoryRepository::new(bus.clone());

    let system = bootstrap::<LinearModel>(bus, repository.clone(), publisher, &config)
        .await
        .context("failed to bootstrap the room-presence pipeline")?;

    info!("room-presence engine running, press Ctrl+C to stop");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker");
                if let Err(err) = client.subscribe(topics::SCANS_ALL, rumqttc::QoS::AtLeastOnce).await {
                    error!(error = %err, "failed to subscribe to scan topics");
                }
                // Harmless to publish on the very first connect too: every
                // RoomTracker's republish is an idempotent retained publish.
                system.bus.publish(MqttConnectedEvent).await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Some(scan) = decode_raw_scan(&publish.topic, &publish.payload) {
                    system.bus.publish(RawScanEvent(scan)).await;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("scan subscription acknowledged");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "MQTT connection error, retrying");
                system.bus.publish(MqttDisconnectedEvent).await;
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}
