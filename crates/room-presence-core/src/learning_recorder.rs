//! Persists labelled `DeviceSignal`s for an operator-initiated recording
//! session: "stand in the kitchen, start recording, walk around" turns into
//! rows a [`crate::predictor::Predictor`] can later train against.

use std::collections::HashMap;
use std::sync::Arc;

use room_presence_shared::{DeviceId, DeviceSignal, RoomId};

use crate::event_bus::EventBus;
use crate::events::{
    DeviceRemovedEvent, DeviceSignalEvent, LearntDeviceSignalEvent, RoomRemovedEvent,
    StartRecordingSignalsEvent, StopRecordingSignalsEvent,
};
use crate::repository::Repository;

/// A scanner needs this many samples to count toward "enough" coverage.
const SAMPLES_PER_SCANNER: u32 = 20;
/// ...or a single scanner with this many samples is enough on its own.
const SINGLE_SCANNER_SAMPLES: u32 = 100;
/// At most this many well-sampled scanners are required, even if the
/// device has more in range.
const MAX_REQUIRED_SCANNERS: usize = 3;

struct ActiveSession {
    device_id: DeviceId,
    room_id: RoomId,
    session_id: i64,
    counts: HashMap<String, u32>,
}

/// Wires a single active `(device, room, session)` recording to the bus.
pub struct LearningRecorder {
    bus: Arc<EventBus>,
    repository: Arc<dyn Repository>,
    active: std::sync::Mutex<Option<ActiveSession>>,
    subscriptions: std::sync::Mutex<Vec<crate::event_bus::SubscriptionGuard>>,
}

impl LearningRecorder {
    pub fn new(bus: Arc<EventBus>, repository: Arc<dyn Repository>) -> Arc<Self> {
        let recorder = Arc::new(Self {
            bus: bus.clone(),
            repository,
            active: std::sync::Mutex::new(None),
            subscriptions: std::sync::Mutex::new(Vec::new()),
        });

        let mut subscriptions = Vec::new();

        let on_start = recorder.clone();
        subscriptions.push(bus.subscribe::<StartRecordingSignalsEvent, _, _>(move |event| {
            let recorder = on_start.clone();
            async move {
                recorder.handle_start_recording(event).await;
                Ok(())
            }
        }));

        let on_stop = recorder.clone();
        subscriptions.push(bus.subscribe::<StopRecordingSignalsEvent, _, _>(move |event| {
            let recorder = on_stop.clone();
            async move {
                recorder.handle_stop_recording(event.device_id).await;
                Ok(())
            }
        }));

        let on_device_removed = recorder.clone();
        subscriptions.push(bus.subscribe::<DeviceRemovedEvent, _, _>(move |event| {
            let recorder = on_device_removed.clone();
            async move {
                recorder.handle_device_removed(event.0.id).await;
                Ok(())
            }
        }));

        let on_room_removed = recorder.clone();
        subscriptions.push(bus.subscribe::<RoomRemovedEvent, _, _>(move |event| {
            let recorder = on_room_removed.clone();
            async move {
                recorder.handle_room_removed(event.0.id).await;
                Ok(())
            }
        }));

        let on_signal = recorder.clone();
        subscriptions.push(bus.subscribe::<DeviceSignalEvent, _, _>(move |event| {
            let recorder = on_signal.clone();
            async move {
                recorder.handle_device_signal(event).await;
                Ok(())
            }
        }));

        *recorder.subscriptions.lock().unwrap() = subscriptions;
        recorder
    }

    async fn handle_start_recording(&self, event: StartRecordingSignalsEvent) {
        let session = match self
            .repository
            .create_learning_session(event.device_id, event.room_id)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                tracing::error!(error = %err, "failed to create learning session");
                return;
            }
        };

        *self.active.lock().unwrap() = Some(ActiveSession {
            device_id: event.device_id,
            room_id: event.room_id,
            session_id: session.id,
            counts: HashMap::new(),
        });
    }

    async fn handle_stop_recording(&self, device_id: DeviceId) {
        let mut active = self.active.lock().unwrap();
        if active.as_ref().is_some_and(|a| a.device_id == device_id) {
            *active = None;
        }
    }

    async fn handle_device_removed(&self, device_id: DeviceId) {
        let cleared = {
            let mut active = self.active.lock().unwrap();
            if active.as_ref().is_some_and(|a| a.device_id == device_id) {
                *active = None;
                true
            } else {
                false
            }
        };
        if cleared {
            self.bus
                .publish(StopRecordingSignalsEvent { device_id })
                .await;
        }
    }

    async fn handle_room_removed(&self, room_id: RoomId) {
        let cleared = {
            let mut active = self.active.lock().unwrap();
            if active.as_ref().is_some_and(|a| a.room_id == room_id) {
                active.take()
            } else {
                None
            }
        };
        if let Some(session) = cleared {
            self.bus
                .publish(StopRecordingSignalsEvent {
                    device_id: session.device_id,
                })
                .await;
        }
    }

    async fn handle_device_signal(&self, event: DeviceSignalEvent) {
        let (room_id, session_id) = {
            let active = self.active.lock().unwrap();
            match active.as_ref() {
                Some(session) if session.device_id == event.device_id => {
                    (session.room_id, session.session_id)
                }
                _ => return,
            }
        };

        let scanner = match self.repository.get_scanner_by_uuid(&event.scanner_uuid).await {
            Ok(Some(scanner)) => scanner,
            Ok(None) => {
                tracing::warn!(scanner_uuid = %event.scanner_uuid, "signal from unknown scanner, dropping");
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to resolve scanner");
                return;
            }
        };

        let signal = DeviceSignal {
            learning_session_id: Some(session_id),
            device_id: event.device_id,
            room_id,
            scanner_id: scanner.id,
            rssi: event.rssi,
            created_at: event.when,
            updated_at: event.when,
        };
        if let Err(err) = self.repository.create_signal(signal).await {
            tracing::error!(error = %err, "failed to persist device signal");
            return;
        }

        let total_scanners = match self.repository.list_scanners().await {
            Ok(scanners) => scanners.len(),
            Err(_) => 1,
        };

        let is_enough = {
            let mut active = self.active.lock().unwrap();
            let Some(session) = active.as_mut() else {
                return;
            };
            let count = session.counts.entry(event.scanner_uuid.clone()).or_insert(0);
            *count += 1;

            let well_sampled = session
                .counts
                .values()
                .filter(|&&c| c >= SAMPLES_PER_SCANNER)
                .count();
            let any_saturated = session.counts.values().any(|&c| c >= SINGLE_SCANNER_SAMPLES);

            well_sampled >= total_scanners.min(MAX_REQUIRED_SCANNERS) || any_saturated
        };

        self.bus
            .publish(LearntDeviceSignalEvent {
                device_id: event.device_id,
                is_enough,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use room_presence_shared::Scanner;

    fn scanner(id: i64, uuid: &str) -> Scanner {
        Scanner {
            id,
            uuid: uuid.into(),
            display_name: uuid.into(),
            room_ids: vec![1],
        }
    }

    #[tokio::test]
    async fn persists_signals_only_while_a_session_is_active() {
        let bus = EventBus::new();
        let repo = crate::repository::InMemoryRepository::new(bus.clone());
        repo.add_scanner(scanner(1, "office"));
        let _recorder = LearningRecorder::new(bus.clone(), repo.clone());

        bus.publish(DeviceSignalEvent {
            device_id: 1,
            scanner_uuid: "office".into(),
            rssi: -60.0,
            when: 0,
        })
        .await;
        assert!(repo
            .list_signals(crate::repository::SignalFilter::default())
            .await
            .unwrap()
            .is_empty());

        bus.publish(StartRecordingSignalsEvent {
            device_id: 1,
            room_id: 10,
        })
        .await;
        bus.publish(DeviceSignalEvent {
            device_id: 1,
            scanner_uuid: "office".into(),
            rssi: -60.0,
            when: 0,
        })
        .await;
        let signals = repo
            .list_signals(crate::repository::SignalFilter::default())
            .await
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].room_id, 10);

        bus.publish(StopRecordingSignalsEvent { device_id: 1 }).await;
        bus.publish(DeviceSignalEvent {
            device_id: 1,
            scanner_uuid: "office".into(),
            rssi: -60.0,
            when: 0,
        })
        .await;
        assert_eq!(
            repo.list_signals(crate::repository::SignalFilter::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn is_enough_once_a_single_scanner_saturates() {
        let bus = EventBus::new();
        let repo = crate::repository::InMemoryRepository::new(bus.clone());
        repo.add_scanner(scanner(1, "office"));
        let _recorder = LearningRecorder::new(bus.clone(), repo.clone());
        let mut learnt = bus.subscribe_queue::<LearntDeviceSignalEvent>(256);

        bus.publish(StartRecordingSignalsEvent {
            device_id: 1,
            room_id: 10,
        })
        .await;

        for _ in 0..SINGLE_SCANNER_SAMPLES {
            bus.publish(DeviceSignalEvent {
                device_id: 1,
                scanner_uuid: "office".into(),
                rssi: -60.0,
                when: 0,
            })
            .await;
        }

        let mut last = None;
        while let Some(event) = learnt.next().await {
            last = Some(event.is_enough);
            if last == Some(true) {
                break;
            }
        }
        assert_eq!(last, Some(true));
    }

    #[tokio::test]
    async fn is_enough_once_enough_scanners_are_individually_well_sampled() {
        let bus = EventBus::new();
        let repo = crate::repository::InMemoryRepository::new(bus.clone());
        repo.add_scanner(scanner(1, "office"));
        repo.add_scanner(scanner(2, "kitchen"));
        repo.add_scanner(scanner(3, "bedroom"));
        let _recorder = LearningRecorder::new(bus.clone(), repo.clone());
        let mut learnt = bus.subscribe_queue::<LearntDeviceSignalEvent>(256);

        bus.publish(StartRecordingSignalsEvent {
            device_id: 1,
            room_id: 10,
        })
        .await;

        // 20 samples each on office and kitchen, 19 on bedroom: two
        // scanners clear SAMPLES_PER_SCANNER but the third doesn't, and
        // total_scanners.min(MAX_REQUIRED_SCANNERS) == 3, so this must
        // stay "not enough" until bedroom's 20th sample.
        for round in 0..SAMPLES_PER_SCANNER {
            bus.publish(DeviceSignalEvent {
                device_id: 1,
                scanner_uuid: "office".into(),
                rssi: -60.0,
                when: 0,
            })
            .await;
            bus.publish(DeviceSignalEvent {
                device_id: 1,
                scanner_uuid: "kitchen".into(),
                rssi: -65.0,
                when: 0,
            })
            .await;
            if round < SAMPLES_PER_SCANNER - 1 {
                bus.publish(DeviceSignalEvent {
                    device_id: 1,
                    scanner_uuid: "bedroom".into(),
                    rssi: -70.0,
                    when: 0,
                })
                .await;
            }
        }

        for _ in 0..(3 * SAMPLES_PER_SCANNER as usize - 1) {
            let event = learnt.next().await.expect("event published per signal");
            assert!(!event.is_enough, "must not be enough before bedroom's 20th sample");
        }

        bus.publish(DeviceSignalEvent {
            device_id: 1,
            scanner_uuid: "bedroom".into(),
            rssi: -70.0,
            when: 0,
        })
        .await;
        let final_event = learnt.next().await.expect("final event published");
        assert!(final_event.is_enough);
    }

    #[tokio::test]
    async fn device_removed_cascades_to_stop_recording() {
        let bus = EventBus::new();
        let repo = crate::repository::InMemoryRepository::new(bus.clone());
        let _recorder = LearningRecorder::new(bus.clone(), repo.clone());
        let mut stopped = bus.subscribe_queue::<StopRecordingSignalsEvent>(8);

        bus.publish(StartRecordingSignalsEvent {
            device_id: 1,
            room_id: 10,
        })
        .await;
        repo.add_device(room_presence_shared::Device {
            id: 1,
            name: "dev".into(),
            uuid: "dev".into(),
            use_name_as_id: false,
            display_name: "dev".into(),
            prediction_model_id: None,
        })
        .await;
        repo.remove_device(1).await;

        let event = stopped.next().await.expect("stop published");
        assert_eq!(event.device_id, 1);
    }
}
