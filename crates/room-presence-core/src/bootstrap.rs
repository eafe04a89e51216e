//! Wires every component to a shared [`EventBus`] and replays the
//! repository's existing devices/rooms so trackers and room state exist
//! before the first MQTT message arrives.

use std::sync::Arc;

use room_presence_shared::{Config, RoomPresenceError};

use crate::event_bus::EventBus;
use crate::events::{DeviceAddedEvent, RoomAddedEvent};
use crate::heartbeat::HeartbeatEngine;
use crate::learning_recorder::LearningRecorder;
use crate::mqtt::MqttPublisher;
use crate::occupancy_sensor::OccupancySensor;
use crate::predictor::{Predictor, RoomClassifier};
use crate::repository::Repository;

/// Every long-lived component, kept alive for the process lifetime. Drop
/// order doesn't matter: each component holds its own `Arc<EventBus>` and
/// deregisters its subscriptions when dropped.
pub struct System<M: RoomClassifier> {
    pub bus: Arc<EventBus>,
    pub heartbeat_engine: Arc<HeartbeatEngine>,
    pub learning_recorder: Arc<LearningRecorder>,
    pub predictor: Arc<Predictor<M>>,
    pub occupancy_sensor: Arc<OccupancySensor>,
}

/// Build the full component graph on `bus` and replay the repository's
/// current devices and rooms onto it so every tracker/room-tracker exists
/// before live traffic starts. `bus` must be the same bus the repository
/// was constructed with, so mutations made through it after startup (a
/// device added via an admin API, say) keep reaching these components —
/// a bus built fresh here would only ever see the one-time replay.
pub async fn bootstrap<M: RoomClassifier>(
    bus: Arc<EventBus>,
    repository: Arc<dyn Repository>,
    publisher: Arc<dyn MqttPublisher>,
    config: &Config,
) -> Result<System<M>, RoomPresenceError> {
    let heartbeat_engine = HeartbeatEngine::new(bus.clone(), config);
    let learning_recorder = LearningRecorder::new(bus.clone(), repository.clone());
    let predictor = Predictor::<M>::new(bus.clone(), repository.clone());
    let occupancy_sensor = OccupancySensor::new(bus.clone(), publisher, config);

    for device in repository.list_devices().await? {
        bus.publish(DeviceAddedEvent(device)).await;
    }
    for room in repository.list_rooms().await? {
        bus.publish(RoomAddedEvent(room)).await;
    }

    Ok(System {
        bus,
        heartbeat_engine,
        learning_recorder,
        predictor,
        occupancy_sensor,
    })
}
