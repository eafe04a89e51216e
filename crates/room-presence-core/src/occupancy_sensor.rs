//! Debounces per-device occupancy predictions into per-room ON/OFF state
//! and publishes Home-Assistant MQTT discovery/state payloads.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use room_presence_shared::{topics, Config, DeviceId, Room, RoomId};

use crate::event_bus::EventBus;
use crate::events::{MqttConnectedEvent, OccupancyEvent, RoomAddedEvent, RoomRemovedEvent, RoomStateChangeEvent};
use crate::mqtt::MqttPublisher;

#[derive(Debug, Clone, Copy)]
struct Pending {
    last_state: bool,
    appeared_at: Instant,
    appeared_times: u32,
}

impl Pending {
    fn fresh(last_state: bool, now: Instant) -> Self {
        Self {
            last_state,
            appeared_at: now,
            appeared_times: 0,
        }
    }
}

/// Per-device debouncer over its predicted room occupancies.
struct DeviceState {
    in_rooms: HashMap<RoomId, bool>,
    pending: HashMap<RoomId, Pending>,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            in_rooms: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Apply one occupancy event; returns the set of rooms whose committed
    /// state changed.
    fn apply(&mut self, observed_rooms: &HashSet<RoomId>, config: &Config, now: Instant) -> HashSet<RoomId> {
        if observed_rooms.is_empty() {
            let changed: HashSet<RoomId> = self.in_rooms.keys().copied().collect();
            self.in_rooms.clear();
            self.pending.clear();
            return changed;
        }

        let mut merged: HashSet<RoomId> = self.in_rooms.keys().copied().collect();
        merged.extend(self.pending.keys().copied());
        merged.extend(observed_rooms.iter().copied());

        let mut changed = HashSet::new();

        for room_id in merged {
            let observed = observed_rooms.contains(&room_id);
            let entry = self
                .pending
                .entry(room_id)
                .or_insert_with(|| Pending::fresh(observed, now));
            entry.appeared_times += 1;

            if !observed && entry.last_state != observed {
                *entry = Pending::fresh(false, now);
            }

            let should_commit = observed
                || (entry.last_state == observed
                    && now.duration_since(entry.appeared_at) >= config.device_change_state_seconds
                    && entry.appeared_times >= config.device_change_state_beats);

            if should_commit {
                let previous = self.in_rooms.insert(room_id, observed);
                if previous != Some(observed) {
                    changed.insert(room_id);
                }
                entry.appeared_at = now;
                entry.appeared_times = 0;
            }
        }

        changed
    }
}

/// Aggregated state for one room: which devices currently have it
/// committed `true`.
struct RoomTracker {
    state: bool,
    active_devices: HashSet<DeviceId>,
}

impl RoomTracker {
    fn new() -> Self {
        Self {
            state: false,
            active_devices: HashSet::new(),
        }
    }
}

#[derive(Serialize)]
struct DiscoveryPayload {
    name: String,
    device_class: &'static str,
    state_topic: String,
    unique_id: String,
}

/// Wires room-occupancy debouncing and MQTT publication to the event bus.
pub struct OccupancySensor {
    bus: Arc<EventBus>,
    publisher: Arc<dyn MqttPublisher>,
    config: Config,
    devices: Mutex<HashMap<DeviceId, DeviceState>>,
    rooms: Mutex<HashMap<RoomId, RoomTracker>>,
    room_names: Mutex<HashMap<RoomId, String>>,
    subscriptions: Mutex<Vec<crate::event_bus::SubscriptionGuard>>,
}

impl OccupancySensor {
    pub fn new(bus: Arc<EventBus>, publisher: Arc<dyn MqttPublisher>, config: &Config) -> Arc<Self> {
        let sensor = Arc::new(Self {
            bus: bus.clone(),
            publisher,
            config: config.clone(),
            devices: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            room_names: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
        });

        let mut subscriptions = Vec::new();

        let on_occupancy = sensor.clone();
        subscriptions.push(bus.subscribe::<OccupancyEvent, _, _>(move |event| {
            let sensor = on_occupancy.clone();
            async move {
                sensor.handle_occupancy(event).await;
                Ok(())
            }
        }));

        let on_room_added = sensor.clone();
        subscriptions.push(bus.subscribe::<RoomAddedEvent, _, _>(move |event| {
            let sensor = on_room_added.clone();
            async move {
                sensor.handle_room_added(event.0).await;
                Ok(())
            }
        }));

        let on_room_removed = sensor.clone();
        subscriptions.push(bus.subscribe::<RoomRemovedEvent, _, _>(move |event| {
            let sensor = on_room_removed.clone();
            async move {
                sensor.handle_room_removed(event.0).await;
                Ok(())
            }
        }));

        let on_reconnect = sensor.clone();
        subscriptions.push(bus.subscribe::<MqttConnectedEvent, _, _>(move |_event| {
            let sensor = on_reconnect.clone();
            async move {
                sensor.republish_all().await;
                Ok(())
            }
        }));

        *sensor.subscriptions.lock().unwrap() = subscriptions;
        sensor
    }

    async fn handle_room_added(&self, room: Room) {
        self.room_names.lock().unwrap().insert(room.id, room.name.clone());
        self.publish_discovery(&room).await;
    }

    async fn handle_room_removed(&self, room: Room) {
        self.room_names.lock().unwrap().remove(&room.id);
        self.rooms.lock().unwrap().remove(&room.id);
        if let Err(err) = self.publisher.publish(&topics::room_config(room.id), "", true).await {
            tracing::error!(error = %err, room_id = room.id, "failed to clear room discovery config");
        }
    }

    async fn publish_discovery(&self, room: &Room) {
        let payload = DiscoveryPayload {
            name: format!("{} Room Occupancy", room.name),
            device_class: "occupancy",
            state_topic: topics::room_state(room.id),
            unique_id: topics::room_unique_id(room.id, &room.name),
        };
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(error = %err, room_id = room.id, "failed to serialize discovery payload");
                return;
            }
        };
        if let Err(err) = self
            .publisher
            .publish(&topics::room_config(room.id), &body, true)
            .await
        {
            tracing::error!(error = %err, room_id = room.id, "failed to publish room discovery config");
        }
    }

    async fn publish_state(&self, room_id: RoomId, occupied: bool) {
        let body = if occupied { "ON" } else { "OFF" };
        if let Err(err) = self.publisher.publish(&topics::room_state(room_id), body, true).await {
            tracing::error!(error = %err, room_id, "failed to publish room state");
        }
    }

    async fn handle_occupancy(&self, event: OccupancyEvent) {
        let observed_rooms: HashSet<RoomId> = event
            .room_occupancy
            .iter()
            .filter(|r| r.state)
            .map(|r| r.room_id)
            .collect();
        let now = Instant::now();

        let changed_rooms = {
            let mut devices = self.devices.lock().unwrap();
            let state = devices.entry(event.device_id).or_insert_with(DeviceState::new);
            state.apply(&observed_rooms, &self.config, now)
        };

        for room_id in changed_rooms {
            self.recompute_room(room_id, event.device_id, false).await;
        }
    }

    /// Recompute a room's aggregate state from every device's committed
    /// membership and publish if it (or the active-device set) changed.
    async fn recompute_room(&self, room_id: RoomId, device_id: DeviceId, force_publish: bool) {
        let devices = self.devices.lock().unwrap();
        let is_in_room = devices
            .get(&device_id)
            .and_then(|state| state.in_rooms.get(&room_id))
            .copied()
            .unwrap_or(false);
        drop(devices);

        let (state_changed, devices_changed, occupied, active_devices) = {
            let mut rooms = self.rooms.lock().unwrap();
            let tracker = rooms.entry(room_id).or_insert_with(RoomTracker::new);

            let devices_changed = if is_in_room {
                tracker.active_devices.insert(device_id)
            } else {
                tracker.active_devices.remove(&device_id)
            };

            let occupied = !tracker.active_devices.is_empty();
            let state_changed = occupied != tracker.state;
            tracker.state = occupied;

            (
                state_changed,
                devices_changed,
                occupied,
                tracker.active_devices.iter().copied().collect::<Vec<_>>(),
            )
        };

        if state_changed || devices_changed || force_publish {
            self.bus
                .publish(RoomStateChangeEvent {
                    room_id,
                    occupied,
                    active_device_ids: active_devices,
                })
                .await;
        }
        if state_changed || force_publish {
            self.publish_state(room_id, occupied).await;
        }
    }

    /// On MQTT reconnect, republish every known room's discovery config and
    /// current state so Home Assistant picks the sensor back up.
    async fn republish_all(&self) {
        let rooms: Vec<(RoomId, String, bool)> = {
            let names = self.room_names.lock().unwrap();
            let trackers = self.rooms.lock().unwrap();
            names
                .iter()
                .map(|(id, name)| {
                    let occupied = trackers.get(id).map(|t| t.state).unwrap_or(false);
                    (*id, name.clone(), occupied)
                })
                .collect()
        };

        for (room_id, name, occupied) in rooms {
            self.publish_discovery(&Room { id: room_id, name }).await;
            self.publish_state(room_id, occupied).await;
        }
    }
}
