//! One [`DeviceTracker`] per known device, each owning a fixed-cadence
//! cooperative loop that turns buffered raw scans into a smoothed
//! per-scanner RSSI vector and publishes a [`HeartbeatEvent`] at most once
//! per period, only on change.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;

use room_presence_shared::{current_timestamp_ms, Config, Device, DeviceId};

use crate::event_bus::EventBus;
use crate::events::{
    DeviceAddedEvent, DeviceRemovedEvent, DeviceSignalEvent, HeartbeatEvent, RawScanEvent,
    StartRecordingSignalsEvent,
};
use crate::rssi_filter::RssiFilter;

/// Below this, a heartbeat is considered "nothing heard" and reported with
/// `signals: None` rather than an all-`-100` vector.
const SILENCE_THRESHOLD: f64 = -99.0;
const FLOOR_RSSI: f64 = -100.0;

#[derive(Debug, Clone, Copy)]
struct TrackerConfig {
    period: Duration,
    turn_off: Duration,
    long_delay: Duration,
    silent_penalty: Option<f64>,
    kalman_q: f64,
    kalman_r: f64,
}

impl From<&Config> for TrackerConfig {
    fn from(config: &Config) -> Self {
        Self {
            period: config.heartbeat_period,
            turn_off: config.turn_off_device,
            long_delay: config.long_delay_penalty,
            silent_penalty: config.silent_penalty,
            kalman_q: config.kalman_q,
            kalman_r: config.kalman_r,
        }
    }
}

enum TrackerCommand {
    RawScan { scanner_uuid: String, rssi: f64 },
    ResetSignals,
}

struct TrackerHandle {
    device_id: DeviceId,
    commands: mpsc::UnboundedSender<TrackerCommand>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    fn stop(self) {
        self.task.abort();
    }
}

/// Per-device cadence state, owned exclusively by its tracker task.
struct TrackerState {
    device_id: DeviceId,
    config: TrackerConfig,
    bus: Arc<EventBus>,
    filters: HashMap<String, RssiFilter>,
    values: HashMap<String, f64>,
    last_signal: HashMap<String, Instant>,
    last_change: HashMap<String, Instant>,
    pending: Vec<(String, f64)>,
    previous_heartbeat: Option<HashMap<String, f64>>,
}

impl TrackerState {
    fn new(device_id: DeviceId, config: TrackerConfig, bus: Arc<EventBus>) -> Self {
        Self {
            device_id,
            config,
            bus,
            filters: HashMap::new(),
            values: HashMap::new(),
            last_signal: HashMap::new(),
            last_change: HashMap::new(),
            pending: Vec::new(),
            previous_heartbeat: None,
        }
    }

    fn reset_signals(&mut self) {
        self.filters.clear();
        self.values.clear();
        self.last_signal.clear();
        self.last_change.clear();
        self.pending.clear();
        self.previous_heartbeat = None;
    }

    fn buffer_scan(&mut self, scanner_uuid: String, rssi: f64) {
        self.pending.push((scanner_uuid, rssi));
    }

    /// Run one cadence tick: drain the pending buffer, apply staleness
    /// penalties to scanners not seen this tick, and publish a heartbeat
    /// if the resulting vector changed.
    async fn tick(&mut self) {
        let now = Instant::now();
        let mut seen = HashSet::new();

        let pending = std::mem::take(&mut self.pending);
        for (scanner_uuid, rssi) in pending {
            let filter = self
                .filters
                .entry(scanner_uuid.clone())
                .or_insert_with(|| RssiFilter::new(self.config.kalman_q, self.config.kalman_r));
            let filtered = filter.filter(rssi);
            self.values.insert(scanner_uuid.clone(), filtered);
            self.last_signal.insert(scanner_uuid.clone(), now);
            self.last_change.insert(scanner_uuid.clone(), now);
            seen.insert(scanner_uuid);
        }

        let known_scanners: Vec<String> = self.filters.keys().cloned().collect();
        for scanner_uuid in known_scanners {
            if seen.contains(&scanner_uuid) {
                continue;
            }

            let last_signal = self.last_signal.get(&scanner_uuid).copied().unwrap_or(now);
            let last_change = self.last_change.get(&scanner_uuid).copied().unwrap_or(now);

            if now.duration_since(last_signal) >= self.config.turn_off {
                // Turn-off: the scanner has heard nothing in a long time.
                // Hard-reset the filter so transient noise doesn't linger.
                if let Some(filter) = self.filters.get_mut(&scanner_uuid) {
                    let reset_value = filter.reset(FLOOR_RSSI);
                    self.values.insert(scanner_uuid.clone(), reset_value);
                }
                self.last_signal.insert(scanner_uuid.clone(), now);
                self.last_change.insert(scanner_uuid.clone(), now);
            } else if now.duration_since(last_change) >= self.config.long_delay {
                // Long-delay: smoothly decay toward the floor instead of
                // snapping there.
                if let Some(filter) = self.filters.get_mut(&scanner_uuid) {
                    let decayed = filter.filter(FLOOR_RSSI);
                    self.values.insert(scanner_uuid.clone(), decayed);
                }
                self.last_change.insert(scanner_uuid.clone(), now);
            } else if let Some(penalty) = self.config.silent_penalty {
                if let Some(value) = self.values.get_mut(&scanner_uuid) {
                    *value = (*value - penalty).max(FLOOR_RSSI);
                }
            }
        }

        let heartbeat = self.values.clone();
        if heartbeat.is_empty() || Some(&heartbeat) == self.previous_heartbeat.as_ref() {
            return;
        }
        self.previous_heartbeat = Some(heartbeat.clone());

        let max_value = heartbeat
            .values()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let signals = if max_value > SILENCE_THRESHOLD {
            Some(heartbeat)
        } else {
            None
        };

        self.bus
            .publish(HeartbeatEvent(room_presence_shared::Heartbeat {
                device_id: self.device_id,
                values: signals,
                timestamp: current_timestamp_ms(),
            }))
            .await;
    }
}

fn spawn_tracker(device_id: DeviceId, config: TrackerConfig, bus: Arc<EventBus>) -> TrackerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<TrackerCommand>();
    let period = config.period;

    let task = tokio::spawn(async move {
        let mut state = TrackerState::new(device_id, config, bus);
        let mut ticker = interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    state.tick().await;
                }
                command = rx.recv() => {
                    match command {
                        Some(TrackerCommand::RawScan { scanner_uuid, rssi }) => {
                            state.buffer_scan(scanner_uuid, rssi);
                        }
                        Some(TrackerCommand::ResetSignals) => {
                            state.reset_signals();
                        }
                        None => return,
                    }
                }
            }
        }
    });

    TrackerHandle {
        device_id,
        commands: tx,
        task,
    }
}

/// Wires device trackers to the event bus: one per known device, created on
/// `DeviceAdded` and torn down (cadence cancelled, filters dropped) on
/// `DeviceRemoved`.
pub struct HeartbeatEngine {
    bus: Arc<EventBus>,
    config: TrackerConfig,
    trackers: Mutex<HashMap<String, TrackerHandle>>,
    subscriptions: Mutex<Vec<crate::event_bus::SubscriptionGuard>>,
}

impl HeartbeatEngine {
    pub fn new(bus: Arc<EventBus>, config: &Config) -> Arc<Self> {
        let engine = Arc::new(Self {
            bus: bus.clone(),
            config: TrackerConfig::from(config),
            trackers: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
        });

        let mut subscriptions = Vec::new();

        let on_added = engine.clone();
        subscriptions.push(bus.subscribe::<DeviceAddedEvent, _, _>(move |event| {
            let engine = on_added.clone();
            async move {
                engine.handle_device_added(event.0).await;
                Ok(())
            }
        }));

        let on_removed = engine.clone();
        subscriptions.push(bus.subscribe::<DeviceRemovedEvent, _, _>(move |event| {
            let engine = on_removed.clone();
            async move {
                engine.handle_device_removed(event.0).await;
                Ok(())
            }
        }));

        let on_scan = engine.clone();
        subscriptions.push(bus.subscribe::<RawScanEvent, _, _>(move |event| {
            let engine = on_scan.clone();
            async move {
                engine.handle_raw_scan(event.0).await;
                Ok(())
            }
        }));

        let on_start_recording = engine.clone();
        subscriptions.push(bus.subscribe::<StartRecordingSignalsEvent, _, _>(move |event| {
            let engine = on_start_recording.clone();
            async move {
                engine.handle_start_recording(event).await;
                Ok(())
            }
        }));

        *engine.subscriptions.lock().unwrap() = subscriptions;
        engine
    }

    async fn handle_device_added(&self, device: Device) {
        let key = device.identifier().to_string();

        let previous = {
            let mut trackers = self.trackers.lock().unwrap();
            trackers.remove(&key)
        };
        if let Some(previous) = previous {
            previous.stop();
        }

        let handle = spawn_tracker(device.id, self.config, self.bus.clone());
        self.trackers.lock().unwrap().insert(key, handle);
    }

    async fn handle_device_removed(&self, device: Device) {
        let key = device.identifier().to_string();
        let removed = self.trackers.lock().unwrap().remove(&key);
        if let Some(handle) = removed {
            handle.stop();
        }
    }

    async fn handle_raw_scan(&self, scan: room_presence_shared::RawScan) {
        let device_id = {
            let trackers = self.trackers.lock().unwrap();
            trackers.get(&scan.device_key).map(|h| (h.device_id, h.commands.clone()))
        };

        let Some((device_id, commands)) = device_id else {
            return;
        };

        let _ = commands.send(TrackerCommand::RawScan {
            scanner_uuid: scan.scanner_uuid.clone(),
            rssi: scan.rssi,
        });

        self.bus
            .publish(DeviceSignalEvent {
                device_id,
                scanner_uuid: scan.scanner_uuid,
                rssi: scan.rssi,
                when: scan.when,
            })
            .await;
    }

    async fn handle_start_recording(&self, event: StartRecordingSignalsEvent) {
        let commands = {
            let trackers = self.trackers.lock().unwrap();
            trackers
                .values()
                .find(|handle| handle.device_id == event.device_id)
                .map(|handle| handle.commands.clone())
        };
        if let Some(commands) = commands {
            let _ = commands.send(TrackerCommand::ResetSignals);
        }
    }
}
