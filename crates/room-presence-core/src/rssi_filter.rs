//! A univariate Kalman-style filter over RSSI samples.
//!
//! Mirrors the reduced form of the original `KalmanRSSI` (state transition
//! `A=1`, control `B=0`, observation `C=1`): `predict()` is the identity and
//! `uncertainty()` collapses to `cov + R`, leaving the textbook scalar
//! Kalman update below.

/// Measurement noise `Q` and process noise `R` default to the values the
/// original heartbeat generator used for BLE RSSI.
pub const DEFAULT_Q: f64 = 15.0;
pub const DEFAULT_R: f64 = 0.08;

#[derive(Debug, Clone, Copy)]
pub struct RssiFilter {
    q: f64,
    r: f64,
    x: Option<f64>,
    cov: f64,
}

impl Default for RssiFilter {
    fn default() -> Self {
        Self::new(DEFAULT_Q, DEFAULT_R)
    }
}

impl RssiFilter {
    pub fn new(q: f64, r: f64) -> Self {
        Self {
            q,
            r,
            x: None,
            cov: q,
        }
    }

    /// Apply a new measurement `z`, returning the filtered estimate. The
    /// first call for a fresh filter behaves like [`RssiFilter::reset`].
    pub fn filter(&mut self, z: f64) -> f64 {
        let Some(x) = self.x else {
            return self.reset(z);
        };

        let k = self.cov / (self.cov + self.q);
        let new_x = x + k * (z - x);
        self.cov = (1.0 - k) * self.cov + self.r;
        self.x = Some(new_x);
        new_x
    }

    /// Discard any running estimate and reinitialise at `z`.
    pub fn reset(&mut self, z: f64) -> f64 {
        self.x = Some(z);
        self.cov = self.q;
        z
    }

    /// The last filtered value, or `None` if never fed a measurement.
    pub fn last(&self) -> Option<f64> {
        self.x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_measurement_initialises_state() {
        let mut filter = RssiFilter::default();
        assert_eq!(filter.filter(-60.0), -60.0);
        assert_eq!(filter.last(), Some(-60.0));
    }

    #[test]
    fn converges_toward_a_steady_signal() {
        let mut filter = RssiFilter::default();
        filter.filter(-60.0);
        let mut last = -60.0;
        for _ in 0..50 {
            last = filter.filter(-60.0);
        }
        assert!((last - (-60.0)).abs() < 0.5);
    }

    #[test]
    fn reset_discards_prior_state() {
        let mut filter = RssiFilter::default();
        filter.filter(-40.0);
        filter.filter(-42.0);
        let reset_value = filter.reset(-100.0);
        assert_eq!(reset_value, -100.0);
        assert_eq!(filter.last(), Some(-100.0));
    }

    #[test]
    fn covariance_stays_positive_across_many_updates() {
        // cov = (1-K)*cov + R with K in [0,1) and R > 0 keeps cov > 0.
        let mut filter = RssiFilter::new(15.0, 0.08);
        filter.filter(-70.0);
        for i in 0..1000 {
            let z = -70.0 + (i % 7) as f64;
            filter.filter(z);
        }
        assert!(filter.cov > 0.0);
    }
}
