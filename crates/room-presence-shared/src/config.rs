//! Process configuration, loaded from the environment.
//!
//! Mirrors the shape of `aetheris-engine`'s `MqttConfig::default()`, extended
//! with an `from_env()` loader since a long-running service reads its
//! tunables from the environment rather than hardcoding them.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_broker_url: String,
    pub mqtt_broker_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub database_uri: String,

    pub heartbeat_period: Duration,
    pub turn_off_device: Duration,
    pub long_delay_penalty: Duration,
    pub device_change_state_seconds: Duration,
    pub device_change_state_beats: u32,
    pub kalman_r: f64,
    pub kalman_q: f64,
    pub silent_penalty: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_broker_url: "localhost".into(),
            mqtt_broker_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            database_uri: "sqlite://data.sqlite3".into(),

            heartbeat_period: Duration::from_millis(500),
            turn_off_device: Duration::from_secs(60),
            long_delay_penalty: Duration::from_secs(30),
            device_change_state_seconds: Duration::from_secs(10),
            device_change_state_beats: 3,
            kalman_r: 0.08,
            kalman_q: 15.0,
            silent_penalty: None,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to
    /// [`Config::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            mqtt_broker_url: env_or("MQTT_BROKER_URL", defaults.mqtt_broker_url),
            mqtt_broker_port: env_parsed("MQTT_BROKER_PORT", defaults.mqtt_broker_port),
            mqtt_username: std::env::var("MQTT_USERNAME").ok(),
            mqtt_password: std::env::var("MQTT_PASSWORD").ok(),
            database_uri: env_or("DATABASE_URI", defaults.database_uri),

            heartbeat_period: env_secs_f64("HEARTBEAT_PERIOD", defaults.heartbeat_period),
            turn_off_device: env_secs_f64("TURN_OFF_DEVICE", defaults.turn_off_device),
            long_delay_penalty: env_secs_f64("LONG_DELAY_PENALTY", defaults.long_delay_penalty),
            device_change_state_seconds: env_secs_f64(
                "DEVICE_CHANGE_STATE_SECONDS",
                defaults.device_change_state_seconds,
            ),
            device_change_state_beats: env_parsed(
                "DEVICE_CHANGE_STATE_BEATS",
                defaults.device_change_state_beats,
            ),
            kalman_r: env_parsed("KALMAN_R", defaults.kalman_r),
            kalman_q: env_parsed("KALMAN_Q", defaults.kalman_q),
            silent_penalty: std::env::var("SILENT_PENALTY")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs_f64(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_tunables() {
        let config = Config::default();
        assert_eq!(config.mqtt_broker_port, 1883);
        assert_eq!(config.heartbeat_period, Duration::from_millis(500));
        assert_eq!(config.turn_off_device, Duration::from_secs(60));
        assert_eq!(config.long_delay_penalty, Duration::from_secs(30));
        assert_eq!(config.device_change_state_beats, 3);
        assert!((config.kalman_r - 0.08).abs() < f64::EPSILON);
        assert!((config.kalman_q - 15.0).abs() < f64::EPSILON);
    }
}
