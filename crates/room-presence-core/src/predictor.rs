//! Runs a device's cached [`PredictionModel`] against its latest
//! [`Heartbeat`], turning a filtered RSSI vector into per-room occupancy
//! probabilities.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use room_presence_shared::{inputs_hash, DeviceId, PredictionModel, RoomOccupancy};

use crate::event_bus::EventBus;
use crate::events::{DeviceAddedEvent, DeviceRemovedEvent, HeartbeatEvent, OccupancyEvent};
use crate::repository::Repository;

/// The opaque per-device classifier a [`PredictionModel`]'s bytes
/// deserialize into. The production model is trained offline; this trait
/// is the seam [`room_presence_brain`] implements it through.
pub trait RoomClassifier: Send + Sync + 'static {
    /// Deserialize a trained model from its persisted bytes.
    fn load(bytes: &[u8]) -> Result<Self, room_presence_shared::RoomPresenceError>
    where
        Self: Sized;

    /// Score a dense feature row (one slot per scanner, in the same order
    /// `scanner_order` was built with) into per-room probabilities.
    fn predict(&self, features: &[f64], scanner_order: &[room_presence_shared::ScannerId]) -> Vec<RoomOccupancy>;
}

struct CachedModel<M> {
    model: Arc<M>,
    inputs_hash: String,
}

/// Wires the predictor to the event bus: one cached model per device with a
/// `PredictionModel`, re-scored on every [`HeartbeatEvent`].
pub struct Predictor<M: RoomClassifier> {
    bus: Arc<EventBus>,
    repository: Arc<dyn Repository>,
    models: Mutex<HashMap<DeviceId, CachedModel<M>>>,
    subscriptions: Mutex<Vec<crate::event_bus::SubscriptionGuard>>,
}

impl<M: RoomClassifier> Predictor<M> {
    pub fn new(bus: Arc<EventBus>, repository: Arc<dyn Repository>) -> Arc<Self> {
        let predictor = Arc::new(Self {
            bus: bus.clone(),
            repository,
            models: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
        });

        let mut subscriptions = Vec::new();

        let on_added = predictor.clone();
        subscriptions.push(bus.subscribe::<DeviceAddedEvent, _, _>(move |event| {
            let predictor = on_added.clone();
            async move {
                predictor.handle_device_added(event.0.id).await;
                Ok(())
            }
        }));

        let on_removed = predictor.clone();
        subscriptions.push(bus.subscribe::<DeviceRemovedEvent, _, _>(move |event| {
            let predictor = on_removed.clone();
            async move {
                predictor.models.lock().unwrap().remove(&event.0.id);
                Ok(())
            }
        }));

        let on_heartbeat = predictor.clone();
        subscriptions.push(bus.subscribe::<HeartbeatEvent, _, _>(move |event| {
            let predictor = on_heartbeat.clone();
            async move {
                predictor.handle_heartbeat(event.0).await;
                Ok(())
            }
        }));

        *predictor.subscriptions.lock().unwrap() = subscriptions;
        predictor
    }

    async fn handle_device_added(&self, device_id: DeviceId) {
        let model = match self.repository.get_prediction_model(device_id).await {
            Ok(Some(model)) => model,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(error = %err, device_id, "failed to load prediction model");
                return;
            }
        };

        match self.load_model(&model) {
            Ok(cached) => {
                self.models.lock().unwrap().insert(device_id, cached);
            }
            Err(err) => {
                tracing::error!(error = %err, device_id, "failed to deserialize prediction model");
            }
        }
    }

    fn load_model(&self, model: &PredictionModel) -> Result<CachedModel<M>, room_presence_shared::RoomPresenceError> {
        Ok(CachedModel {
            model: Arc::new(M::load(&model.model)?),
            inputs_hash: model.inputs_hash.clone(),
        })
    }

    async fn current_inputs_hash(&self) -> Result<String, room_presence_shared::RoomPresenceError> {
        let rooms = self.repository.list_rooms().await?;
        let scanners = self.repository.list_scanners().await?;
        let room_ids: Vec<i64> = rooms.iter().map(|r| r.id).collect();
        let scanner_ids: Vec<i64> = scanners.iter().map(|s| s.id).collect();
        Ok(inputs_hash(&room_ids, &scanner_ids))
    }

    async fn handle_heartbeat(&self, heartbeat: room_presence_shared::Heartbeat) {
        let cached = {
            let models = self.models.lock().unwrap();
            match models.get(&heartbeat.device_id) {
                Some(cached) => Some((cached.model.clone(), cached.inputs_hash.clone())),
                None => None,
            }
        };
        let Some((model, cached_hash)) = cached else {
            return;
        };

        let Some(values) = heartbeat.values else {
            self.bus
                .publish(OccupancyEvent {
                    device_id: heartbeat.device_id,
                    room_occupancy: Vec::new(),
                })
                .await;
            return;
        };

        let current_hash = match self.current_inputs_hash().await {
            Ok(hash) => hash,
            Err(err) => {
                tracing::error!(error = %err, "failed to compute current inputs hash");
                return;
            }
        };
        if current_hash != cached_hash {
            tracing::warn!(
                device_id = heartbeat.device_id,
                "prediction model is stale (room/scanner set changed since training), skipping"
            );
            return;
        }

        let mut scanners = match self.repository.list_scanners().await {
            Ok(scanners) => scanners,
            Err(err) => {
                tracing::error!(error = %err, "failed to list scanners for feature row");
                return;
            }
        };
        // `list_scanners` has no ordering guarantee; sort once so `features`
        // and `scanner_order` are derived from the same stable sequence —
        // a model's weights are positionally aligned to it.
        scanners.sort_unstable_by_key(|s| s.id);

        let scanner_order: Vec<room_presence_shared::ScannerId> =
            scanners.iter().map(|s| s.id).collect();

        let features: Vec<f64> = scanners
            .iter()
            .map(|scanner| values.get(&scanner.uuid).copied().unwrap_or(-100.0))
            .collect();

        let device_id = heartbeat.device_id;
        let prediction = tokio::task::spawn_blocking(move || model.predict(&features, &scanner_order)).await;

        match prediction {
            Ok(room_occupancy) => {
                self.bus
                    .publish(OccupancyEvent {
                        device_id,
                        room_occupancy,
                    })
                    .await;
            }
            Err(err) => {
                tracing::error!(error = %err, device_id, "prediction worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use room_presence_shared::{Device, Room, Scanner};

    struct AlwaysOffice;

    impl RoomClassifier for AlwaysOffice {
        fn load(_bytes: &[u8]) -> Result<Self, room_presence_shared::RoomPresenceError> {
            Ok(Self)
        }

        fn predict(&self, features: &[f64], scanner_order: &[room_presence_shared::ScannerId]) -> Vec<RoomOccupancy> {
            let _ = scanner_order;
            let strongest = features.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            vec![RoomOccupancy {
                room_id: 1,
                state: true,
                proba: if strongest > -70.0 { 0.9 } else { 0.1 },
            }]
        }
    }

    async fn seeded_repo() -> Arc<crate::repository::InMemoryRepository> {
        let bus = EventBus::new();
        let repo = crate::repository::InMemoryRepository::new(bus);
        repo.add_room(Room { id: 1, name: "Office".into() }).await;
        repo.add_scanner(Scanner {
            id: 1,
            uuid: "office".into(),
            display_name: "Office".into(),
            room_ids: vec![1],
        });
        repo
    }

    #[tokio::test]
    async fn predicts_on_heartbeat_when_model_matches_current_inputs() {
        let bus = EventBus::new();
        let repo = seeded_repo().await;
        let hash = inputs_hash(&[1], &[1]);
        repo.set_prediction_model(
            1,
            PredictionModel {
                id: 1,
                accuracy: 0.9,
                inputs_hash: hash,
                model: Vec::new(),
                device_ids: vec![1],
            },
        );

        let predictor = Predictor::<AlwaysOffice>::new(bus.clone(), repo.clone());
        let mut occupancy = bus.subscribe_queue::<OccupancyEvent>(8);

        bus.publish(DeviceAddedEvent(Device {
            id: 1,
            name: "dev".into(),
            uuid: "dev".into(),
            use_name_as_id: false,
            display_name: "dev".into(),
            prediction_model_id: Some(1),
        }))
        .await;

        let mut values = HashMap::new();
        values.insert("office".to_string(), -50.0);
        bus.publish(HeartbeatEvent(room_presence_shared::Heartbeat {
            device_id: 1,
            values: Some(values),
            timestamp: 0,
        }))
        .await;

        let event = occupancy.next().await.expect("occupancy published");
        assert_eq!(event.room_occupancy.len(), 1);
        assert!(event.room_occupancy[0].proba > 0.5);

        drop(predictor);
    }

    #[tokio::test]
    async fn stale_model_is_skipped() {
        let bus = EventBus::new();
        let repo = seeded_repo().await;
        repo.set_prediction_model(
            1,
            PredictionModel {
                id: 1,
                accuracy: 0.9,
                inputs_hash: "stale".into(),
                model: Vec::new(),
                device_ids: vec![1],
            },
        );

        let predictor = Predictor::<AlwaysOffice>::new(bus.clone(), repo.clone());
        let mut occupancy = bus.subscribe_queue::<OccupancyEvent>(8);

        bus.publish(DeviceAddedEvent(Device {
            id: 1,
            name: "dev".into(),
            uuid: "dev".into(),
            use_name_as_id: false,
            display_name: "dev".into(),
            prediction_model_id: Some(1),
        }))
        .await;

        let mut values = HashMap::new();
        values.insert("office".to_string(), -50.0);
        bus.publish(HeartbeatEvent(room_presence_shared::Heartbeat {
            device_id: 1,
            values: Some(values),
            timestamp: 0,
        }))
        .await;

        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), occupancy.next())
            .await
            .is_err());

        drop(predictor);
    }

    #[tokio::test]
    async fn no_signals_emits_empty_room_occupancy() {
        let bus = EventBus::new();
        let repo = seeded_repo().await;
        let hash = inputs_hash(&[1], &[1]);
        repo.set_prediction_model(
            1,
            PredictionModel {
                id: 1,
                accuracy: 0.9,
                inputs_hash: hash,
                model: Vec::new(),
                device_ids: vec![1],
            },
        );

        let predictor = Predictor::<AlwaysOffice>::new(bus.clone(), repo.clone());
        let mut occupancy = bus.subscribe_queue::<OccupancyEvent>(8);

        bus.publish(DeviceAddedEvent(Device {
            id: 1,
            name: "dev".into(),
            uuid: "dev".into(),
            use_name_as_id: false,
            display_name: "dev".into(),
            prediction_model_id: Some(1),
        }))
        .await;

        bus.publish(HeartbeatEvent(room_presence_shared::Heartbeat {
            device_id: 1,
            values: None,
            timestamp: 0,
        }))
        .await;

        let event = occupancy.next().await.expect("occupancy published");
        assert!(event.room_occupancy.is_empty());

        drop(predictor);
    }
}
