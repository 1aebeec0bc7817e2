//! RSSI to distance estimation.
//!
//! Uses the log-distance path loss model:
//!
//! ```text
//! distance = 10 ^ ((reference_rssi - rssi) / (10 * n))
//! ```
//!
//! where `reference_rssi` is the signal measured at 1 m and `n` the path loss
//! exponent. Each instantaneous distance is rounded up to one decimal and kept
//! in a bounded FIFO window per beacon; the estimate is the window mean, again
//! rounded up to one decimal.

use std::collections::{HashMap, VecDeque};

use crate::config::ScannerConfig;

/// Distance reported for beacons with no usable samples.
pub const UNREACHABLE_DISTANCE: f64 = 100_000.0;

/// Tolerance absorbing binary representation error before rounding up, so
/// that e.g. a mean of exactly `1.0` computed as `1.0000000000000002` stays `1.0`.
const ROUNDING_TOLERANCE: f64 = 1e-9;

/// Instantaneous distance in meters for `rssi`.
#[must_use]
pub fn raw_distance(rssi: i16, reference_rssi: f64, path_loss_exponent: f64) -> f64 {
    10f64.powf((reference_rssi - f64::from(rssi)) / (10.0 * path_loss_exponent))
}

/// Round `value` up to one decimal place.
#[must_use]
pub fn ceil_to_tenth(value: f64) -> f64 {
    (value.mul_add(10.0, -ROUNDING_TOLERANCE)).ceil() / 10.0
}

/// Bounded FIFO of distance samples.
#[derive(Debug, Clone)]
pub struct DistanceWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl DistanceWindow {
    /// Create an empty window holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn push(&mut self, distance: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(distance);
    }

    /// Mean rounded up to one decimal, or [`UNREACHABLE_DISTANCE`] when the
    /// window is empty or holds non-finite values.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        if self.samples.is_empty() {
            return UNREACHABLE_DISTANCE;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        if mean.is_finite() {
            ceil_to_tenth(mean)
        } else {
            UNREACHABLE_DISTANCE
        }
    }

    /// Number of samples held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Per-beacon smoothed distance estimator, keyed by beacon address.
#[derive(Debug, Clone)]
pub struct SignalSampler {
    reference_rssi: f64,
    path_loss_exponent: f64,
    window_size: usize,
    windows: HashMap<String, DistanceWindow>,
}

impl Default for SignalSampler {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}

impl SignalSampler {
    /// Create a sampler from scanner configuration.
    #[must_use]
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            reference_rssi: config.reference_rssi,
            path_loss_exponent: config.path_loss_exponent,
            window_size: config.sample_window,
            windows: HashMap::new(),
        }
    }

    /// Record one RSSI reading and return the stored (rounded) distance.
    pub fn sample(&mut self, beacon_id: &str, rssi: i16) -> f64 {
        let distance = ceil_to_tenth(raw_distance(
            rssi,
            self.reference_rssi,
            self.path_loss_exponent,
        ));
        let window_size = self.window_size;
        self.windows
            .entry(beacon_id.to_string())
            .or_insert_with(|| DistanceWindow::new(window_size))
            .push(distance);
        distance
    }

    /// Smoothed distance for `beacon_id`; [`UNREACHABLE_DISTANCE`] if unknown.
    #[must_use]
    pub fn estimated_distance(&self, beacon_id: &str) -> f64 {
        self.windows
            .get(beacon_id)
            .map_or(UNREACHABLE_DISTANCE, DistanceWindow::estimate)
    }

    /// Samples currently held for `beacon_id`.
    #[must_use]
    pub fn sample_count(&self, beacon_id: &str) -> usize {
        self.windows.get(beacon_id).map_or(0, DistanceWindow::len)
    }

    /// Forget the history of one beacon.
    pub fn reset(&mut self, beacon_id: &str) {
        self.windows.remove(beacon_id);
    }

    /// Forget every history.
    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEACON: &str = "AA:BB:CC:DD:EE:01";

    #[test]
    fn test_reference_rssi_is_one_meter() {
        let mut sampler = SignalSampler::default();
        assert!((sampler.sample(BEACON, -59) - 1.0).abs() < f64::EPSILON);
        assert!((sampler.estimated_distance(BEACON) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stored_value_is_rounded_up() {
        let raw = raw_distance(-69, -59.0, 2.0);
        assert!((raw - 3.162).abs() < 1e-3);

        let mut sampler = SignalSampler::default();
        assert!((sampler.sample(BEACON, -69) - 3.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_window_is_unreachable() {
        let sampler = SignalSampler::default();
        let distance = sampler.estimated_distance(BEACON);
        assert!(!distance.is_nan());
        assert!((distance - UNREACHABLE_DISTANCE).abs() < f64::EPSILON);
        assert!((DistanceWindow::new(6).estimate() - UNREACHABLE_DISTANCE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_is_bounded_fifo() {
        let mut sampler = SignalSampler::default();
        for _ in 0..1000 {
            sampler.sample(BEACON, -80);
        }
        assert_eq!(sampler.sample_count(BEACON), 6);

        // Six strong readings push out every weak one.
        for _ in 0..6 {
            sampler.sample(BEACON, -59);
        }
        assert!((sampler.estimated_distance(BEACON) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_estimate_is_mean_rounded_up() {
        let mut window = DistanceWindow::new(6);
        window.push(1.0);
        window.push(1.1);
        // mean 1.05 rounds up to 1.1
        assert!((window.estimate() - 1.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_non_finite_window_is_unreachable() {
        let mut window = DistanceWindow::new(3);
        window.push(f64::INFINITY);
        assert!((window.estimate() - UNREACHABLE_DISTANCE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_drops_history() {
        let mut sampler = SignalSampler::default();
        sampler.sample(BEACON, -59);
        sampler.reset(BEACON);
        assert_eq!(sampler.sample_count(BEACON), 0);
        sampler.sample(BEACON, -59);
        sampler.clear();
        assert_eq!(sampler.sample_count(BEACON), 0);
    }

    #[test]
    fn test_ceil_to_tenth_keeps_exact_tenths() {
        assert!((ceil_to_tenth(1.0) - 1.0).abs() < f64::EPSILON);
        assert!((ceil_to_tenth(2.5) - 2.5).abs() < f64::EPSILON);
        assert!((ceil_to_tenth(2.51) - 2.6).abs() < f64::EPSILON);
    }
}
