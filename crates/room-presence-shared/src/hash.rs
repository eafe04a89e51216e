//! Canonical `inputs_hash` fingerprint of the ambient Room/Scanner id sets.

/// Canonical ordering fingerprint of the Room and Scanner id sets. A
/// `PredictionModel` is valid only while this matches the model's stored
/// `inputs_hash`. Invariant under reordering of either input.
pub fn inputs_hash(room_ids: &[i64], scanner_ids: &[i64]) -> String {
    let mut rooms = room_ids.to_vec();
    rooms.sort_unstable();
    let mut scanners = scanner_ids.to_vec();
    scanners.sort_unstable();

    let rooms_part = rooms
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(".");
    let scanners_part = scanners
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(".");

    format!("{rooms_part}.|.{scanners_part}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_invariant_under_reordering() {
        let a = inputs_hash(&[2, 1], &[20, 10]);
        let b = inputs_hash(&[1, 2], &[10, 20]);
        assert_eq!(a, b);
    }

    #[test]
    fn differs_when_a_scanner_is_added() {
        let before = inputs_hash(&[1, 2], &[10, 20]);
        let after = inputs_hash(&[1, 2], &[10, 20, 30]);
        assert_ne!(before, after);
    }

    #[test]
    fn matches_canonical_format() {
        assert_eq!(inputs_hash(&[1, 2], &[10, 20]), "1.2.|.10.20");
    }
}
