//! MQTT topic conventions for the room-presence system.

/// Inbound scan subscription wildcard: `room_presence/#`.
pub const SCANS_ALL: &str = "room_presence/#";

/// Inbound scan topic prefix a publish must start with to be routed.
pub const SCANS_PREFIX: &str = "room_presence/";

/// Topic a scanner with the given uuid publishes raw scans on.
pub fn scan(scanner_uuid: &str) -> String {
    format!("room_presence/{scanner_uuid}")
}

fn room_base(room_id: i64) -> String {
    format!("homeassistant/binary_sensor/room_{room_id}_occupancy/config")
}

/// Home-Assistant discovery config topic for a room (retained).
pub fn room_config(room_id: i64) -> String {
    format!("{}/config", room_base(room_id))
}

/// Home-Assistant state topic for a room (retained, body `"ON"`/`"OFF"`).
pub fn room_state(room_id: i64) -> String {
    format!("{}/state", room_base(room_id))
}

/// Unique id Home Assistant uses to deduplicate the discovered entity.
pub fn room_unique_id(room_id: i64, room_name: &str) -> String {
    let slug = room_name.to_lowercase().replace(' ', "_");
    format!("room_occupancy.{room_id}.{slug}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_topic_matches_inbound_prefix() {
        let topic = scan("office");
        assert!(topic.starts_with(SCANS_PREFIX));
        assert_eq!(topic, "room_presence/office");
    }

    #[test]
    fn room_topics_are_scoped_under_the_config_topic() {
        assert_eq!(
            room_config(7),
            "homeassistant/binary_sensor/room_7_occupancy/config/config"
        );
        assert_eq!(
            room_state(7),
            "homeassistant/binary_sensor/room_7_occupancy/config/state"
        );
    }

    #[test]
    fn room_unique_id_is_lowercased_and_underscored() {
        assert_eq!(room_unique_id(3, "Living Room"), "room_occupancy.3.living_room");
    }
}
