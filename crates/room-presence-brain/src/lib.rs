//! The `RoomClassifier` model surface.
//!
//! The training numerics are out of scope for the core (see its
//! `predictor` module): this crate only fixes the persistence format a
//! `PredictionModel.model` blob must follow and ships one trivial,
//! dependency-free implementation of it so the pipeline has something to
//! run inference against in tests and demos. A production deployment
//! trains a real classifier offline and persists it in the same format.

use serde::{Deserialize, Serialize};

use room_presence_core::predictor::RoomClassifier;
use room_presence_shared::{RoomId, RoomOccupancy, RoomPresenceError, ScannerId};

/// Independent logistic weights per room: each room is scored against the
/// full scanner feature row with its own weight vector and bias, so a
/// device can plausibly be "in" more than one room at once (adjoining
/// rooms, open floor plans) rather than forcing a single-label choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    /// Weight vector per room, aligned with the scanner order the model
    /// was trained against (not the order at inference time — the
    /// predictor's `inputs_hash` check is what guards this).
    pub rooms: Vec<RoomWeights>,
    /// A room's probability must clear this to be reported as "observed"
    /// at all; below it, the room is simply omitted.
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomWeights {
    pub room_id: RoomId,
    pub weights: Vec<f64>,
    pub bias: f64,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl RoomClassifier for LinearModel {
    fn load(bytes: &[u8]) -> Result<Self, RoomPresenceError> {
        serde_json::from_slice(bytes)
            .map_err(|err| RoomPresenceError::Inference(format!("invalid linear model blob: {err}")))
    }

    fn predict(&self, features: &[f64], _scanner_order: &[ScannerId]) -> Vec<RoomOccupancy> {
        self.rooms
            .iter()
            .filter_map(|room| {
                let score: f64 = room
                    .weights
                    .iter()
                    .zip(features.iter())
                    .map(|(w, f)| w * f)
                    .sum::<f64>()
                    + room.bias;
                let proba = sigmoid(score);
                (proba >= self.threshold).then_some(RoomOccupancy {
                    room_id: room.room_id,
                    state: true,
                    proba,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> LinearModel {
        LinearModel {
            rooms: vec![
                RoomWeights {
                    room_id: 1,
                    // Strongly favours a high first-scanner reading.
                    weights: vec![0.2, 0.0],
                    bias: 10.0,
                },
                RoomWeights {
                    room_id: 2,
                    weights: vec![0.0, 0.0],
                    bias: -10.0,
                },
            ],
            threshold: 0.5,
        }
    }

    #[test]
    fn reports_only_rooms_above_threshold() {
        let model = model();
        let result = model.predict(&[-50.0, -100.0], &[1, 2]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].room_id, 1);
        assert!(result[0].proba > 0.5);
    }

    #[test]
    fn round_trips_through_json_persistence() {
        let model = model();
        let bytes = serde_json::to_vec(&model).unwrap();
        let loaded = LinearModel::load(&bytes).unwrap();
        assert_eq!(loaded.rooms.len(), 2);
        assert_eq!(loaded.threshold, 0.5);
    }

    #[test]
    fn rejects_malformed_bytes() {
        assert!(LinearModel::load(b"not json").is_err());
    }
}
