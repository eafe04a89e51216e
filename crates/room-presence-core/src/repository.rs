//! Abstract access to Devices / Rooms / Scanners / Models, plus an
//! in-memory implementation used by tests. A production implementation
//! backs this trait with a real database and fires the `*Added`/`*Removed`
//! events from post-commit hooks; the in-memory implementation does the
//! same from its own mutation methods so the bus behaviour matches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use room_presence_shared::{
    current_timestamp_ms, Device, DeviceId, DeviceSignal, LearningSession, PredictionModel, Room,
    RoomId, RoomPresenceError, Scanner, ScannerId,
};

use crate::event_bus::EventBus;
use crate::events::{DeviceAddedEvent, DeviceRemovedEvent, RoomAddedEvent, RoomRemovedEvent};

/// Optional filter for [`Repository::list_signals`]; `None` fields match
/// anything.
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub device_id: Option<DeviceId>,
    pub room_id: Option<RoomId>,
    pub scanner_id: Option<ScannerId>,
    pub learning_session_id: Option<i64>,
}

impl SignalFilter {
    fn matches(&self, signal: &DeviceSignal) -> bool {
        self.device_id.map_or(true, |d| d == signal.device_id)
            && self.room_id.map_or(true, |r| r == signal.room_id)
            && self.scanner_id.map_or(true, |s| s == signal.scanner_id)
            && self
                .learning_session_id
                .map_or(true, |s| signal.learning_session_id == Some(s))
    }
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, RoomPresenceError>;
    async fn list_rooms(&self) -> Result<Vec<Room>, RoomPresenceError>;
    async fn list_scanners(&self) -> Result<Vec<Scanner>, RoomPresenceError>;
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, RoomPresenceError>;
    async fn get_scanner_by_uuid(&self, uuid: &str) -> Result<Option<Scanner>, RoomPresenceError>;
    async fn get_prediction_model(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<PredictionModel>, RoomPresenceError>;
    async fn create_signal(&self, signal: DeviceSignal) -> Result<(), RoomPresenceError>;
    async fn create_learning_session(
        &self,
        device_id: DeviceId,
        room_id: RoomId,
    ) -> Result<LearningSession, RoomPresenceError>;
    async fn bulk_create_heartbeats(
        &self,
        heartbeats: Vec<room_presence_shared::Heartbeat>,
    ) -> Result<(), RoomPresenceError>;
    async fn list_signals(
        &self,
        filter: SignalFilter,
    ) -> Result<Vec<DeviceSignal>, RoomPresenceError>;
}

#[derive(Default)]
struct State {
    devices: HashMap<DeviceId, Device>,
    rooms: HashMap<RoomId, Room>,
    scanners: HashMap<ScannerId, Scanner>,
    models: HashMap<DeviceId, PredictionModel>,
    signals: Vec<DeviceSignal>,
    sessions: Vec<LearningSession>,
    next_session_id: i64,
    /// Memoised `list_rooms`/`list_scanners`; cleared on any mutation.
    rooms_cache: Option<Vec<Room>>,
    scanners_cache: Option<Vec<Scanner>>,
}

/// In-memory `Repository` used by tests and by [`crate::bootstrap`] demos.
/// Mutations go through `add_device`/`remove_device`/`add_room`/
/// `remove_room`, which publish the corresponding admin event — modelling
/// the post-commit hooks a real database-backed implementation would fire.
pub struct InMemoryRepository {
    state: Mutex<State>,
    bus: Arc<EventBus>,
}

impl InMemoryRepository {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            bus,
        })
    }

    pub async fn add_device(&self, device: Device) {
        self.state.lock().unwrap().devices.insert(device.id, device.clone());
        self.bus.publish(DeviceAddedEvent(device)).await;
    }

    pub async fn remove_device(&self, id: DeviceId) {
        let removed = self.state.lock().unwrap().devices.remove(&id);
        if let Some(device) = removed {
            self.bus.publish(DeviceRemovedEvent(device)).await;
        }
    }

    pub async fn add_room(&self, room: Room) {
        {
            let mut state = self.state.lock().unwrap();
            state.rooms.insert(room.id, room.clone());
            state.rooms_cache = None;
        }
        self.bus.publish(RoomAddedEvent(room)).await;
    }

    pub async fn remove_room(&self, id: RoomId) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let removed = state.rooms.remove(&id);
            state.rooms_cache = None;
            removed
        };
        if let Some(room) = removed {
            self.bus.publish(RoomRemovedEvent(room)).await;
        }
    }

    pub fn add_scanner(&self, scanner: Scanner) {
        let mut state = self.state.lock().unwrap();
        state.scanners.insert(scanner.id, scanner);
        state.scanners_cache = None;
    }

    pub fn remove_scanner(&self, id: ScannerId) {
        let mut state = self.state.lock().unwrap();
        state.scanners.remove(&id);
        state.scanners_cache = None;
    }

    pub fn set_prediction_model(&self, device_id: DeviceId, model: PredictionModel) {
        self.state.lock().unwrap().models.insert(device_id, model);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_devices(&self) -> Result<Vec<Device>, RoomPresenceError> {
        Ok(self.state.lock().unwrap().devices.values().cloned().collect())
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, RoomPresenceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(cached) = &state.rooms_cache {
            return Ok(cached.clone());
        }
        let rooms: Vec<Room> = state.rooms.values().cloned().collect();
        state.rooms_cache = Some(rooms.clone());
        Ok(rooms)
    }

    async fn list_scanners(&self) -> Result<Vec<Scanner>, RoomPresenceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(cached) = &state.scanners_cache {
            return Ok(cached.clone());
        }
        let scanners: Vec<Scanner> = state.scanners.values().cloned().collect();
        state.scanners_cache = Some(scanners.clone());
        Ok(scanners)
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, RoomPresenceError> {
        Ok(self.state.lock().unwrap().devices.get(&id).cloned())
    }

    async fn get_scanner_by_uuid(&self, uuid: &str) -> Result<Option<Scanner>, RoomPresenceError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .scanners
            .values()
            .find(|s| s.uuid == uuid)
            .cloned())
    }

    async fn get_prediction_model(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<PredictionModel>, RoomPresenceError> {
        Ok(self.state.lock().unwrap().models.get(&device_id).cloned())
    }

    async fn create_signal(&self, signal: DeviceSignal) -> Result<(), RoomPresenceError> {
        self.state.lock().unwrap().signals.push(signal);
        Ok(())
    }

    async fn create_learning_session(
        &self,
        device_id: DeviceId,
        room_id: RoomId,
    ) -> Result<LearningSession, RoomPresenceError> {
        let mut state = self.state.lock().unwrap();
        state.next_session_id += 1;
        let session = LearningSession {
            id: state.next_session_id,
            device_id,
            room_id,
            created_at: current_timestamp_ms(),
        };
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn bulk_create_heartbeats(
        &self,
        _heartbeats: Vec<room_presence_shared::Heartbeat>,
    ) -> Result<(), RoomPresenceError> {
        // Heartbeats are transient by contract (see the data model); a real
        // backing store may archive them for analytics, the in-memory
        // implementation used by tests has nothing useful to keep.
        Ok(())
    }

    async fn list_signals(
        &self,
        filter: SignalFilter,
    ) -> Result<Vec<DeviceSignal>, RoomPresenceError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .signals
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: RoomId, name: &str) -> Room {
        Room { id, name: name.into() }
    }

    #[tokio::test]
    async fn list_rooms_cache_is_cleared_on_mutation() {
        let bus = EventBus::new();
        let repo = InMemoryRepository::new(bus);

        repo.add_room(room(1, "Kitchen")).await;
        let first = repo.list_rooms().await.unwrap();
        assert_eq!(first.len(), 1);

        repo.add_room(room(2, "Office")).await;
        let second = repo.list_rooms().await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn removing_a_device_emits_device_removed() {
        let bus = EventBus::new();
        let repo = InMemoryRepository::new(bus.clone());
        let mut queue = bus.subscribe_queue::<DeviceRemovedEvent>(8);

        let device = Device {
            id: 1,
            name: "phone".into(),
            uuid: "abc".into(),
            use_name_as_id: false,
            display_name: "Phone".into(),
            prediction_model_id: None,
        };
        repo.add_device(device.clone()).await;
        repo.remove_device(1).await;

        let event = queue.next().await.expect("event published");
        assert_eq!(event.0.id, 1);
    }
}
