//! Real-time ingestion/fusion pipeline and occupancy state machine.
//!
//! Ties raw BLE scans arriving over MQTT to Home-Assistant occupancy
//! sensors: [`event_bus`] is the in-process backbone; [`heartbeat`] turns
//! scans into smoothed per-device signal vectors on a fixed cadence;
//! [`learning_recorder`] and [`predictor`] train and run the per-device
//! room classifier; [`occupancy_sensor`] debounces predictions into
//! published ON/OFF state. [`bootstrap`] wires all of it together.

pub mod bootstrap;
pub mod event_bus;
pub mod events;
pub mod heartbeat;
pub mod learning_recorder;
pub mod mqtt;
pub mod occupancy_sensor;
pub mod predictor;
pub mod repository;
pub mod rssi_filter;
