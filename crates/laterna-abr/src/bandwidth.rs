use std::time::Duration;

#[cfg(test)]
use unimock::unimock;

use crate::ewma::Ewma;

/// Rolling network-throughput estimation from completed-request samples.
///
/// The trait exists so the estimator pipeline can be exercised against a
/// scripted bandwidth source in tests; production code uses
/// [`EwmaBandwidthEstimator`].
#[cfg_attr(test, unimock(api = BandwidthEstimatorMock))]
pub trait BandwidthEstimator {
    /// Record one completed request: how long it took and how many bytes it
    /// carried. Zero-duration samples are ignored.
    fn add_sample(&mut self, duration: Duration, size: u64);

    /// Current throughput estimate in bits per second, or `None` while not
    /// enough data has been sampled.
    fn estimate(&self) -> Option<f64>;

    /// Forget everything sampled so far.
    fn reset(&mut self);
}

/// Dual-EWMA bandwidth estimator.
///
/// Two averages run in parallel: a fast one reacting to the latest samples
/// and a slow one smoothing out noise. The exposed estimate is the lower of
/// the two, so a sudden drop is reflected quickly while a lucky fast segment
/// does not inflate the estimate.
#[derive(Clone, Debug)]
pub struct EwmaBandwidthEstimator {
    fast: Ewma,
    slow: Ewma,
    bytes_sampled: u64,
}

impl EwmaBandwidthEstimator {
    const FAST_HALF_LIFE_SECS: f64 = 2.0;
    const SLOW_HALF_LIFE_SECS: f64 = 10.0;

    /// Below this many sampled bytes the estimate is considered meaningless.
    /// One ordinary media segment is enough to clear it.
    const MIN_SAMPLED_BYTES: u64 = 100_000;

    pub fn new() -> Self {
        Self {
            fast: Ewma::new(Self::FAST_HALF_LIFE_SECS),
            slow: Ewma::new(Self::SLOW_HALF_LIFE_SECS),
            bytes_sampled: 0,
        }
    }
}

impl Default for EwmaBandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl BandwidthEstimator for EwmaBandwidthEstimator {
    fn add_sample(&mut self, duration: Duration, size: u64) {
        if duration.is_zero() {
            return;
        }
        let duration_secs = duration.as_secs_f64();
        let bps = size as f64 * 8.0 / duration_secs;
        self.fast.add_sample(duration_secs, bps);
        self.slow.add_sample(duration_secs, bps);
        self.bytes_sampled = self.bytes_sampled.saturating_add(size);
    }

    fn estimate(&self) -> Option<f64> {
        if self.bytes_sampled < Self::MIN_SAMPLED_BYTES {
            return None;
        }
        Some(self.fast.estimate().min(self.slow.estimate()))
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn no_estimate_without_samples() {
        let est = EwmaBandwidthEstimator::new();
        assert_eq!(est.estimate(), None);
    }

    #[test]
    fn no_estimate_below_minimum_bytes() {
        let mut est = EwmaBandwidthEstimator::new();
        est.add_sample(Duration::from_millis(500), 50_000);
        assert_eq!(est.estimate(), None, "50 kB is below the sampling floor");
    }

    #[test]
    fn single_segment_seeds_the_estimate() {
        // 125 000 bytes over 1 s is exactly 1 Mb/s.
        let mut est = EwmaBandwidthEstimator::new();
        est.add_sample(Duration::from_millis(1000), 125_000);
        let bps = est.estimate().expect("one full segment should be enough");
        assert!((bps - 1_000_000.0).abs() < 1.0, "got {bps}");
    }

    #[test]
    fn zero_duration_samples_are_ignored() {
        let mut est = EwmaBandwidthEstimator::new();
        est.add_sample(Duration::ZERO, 10_000_000);
        assert_eq!(est.estimate(), None);
    }

    #[rstest]
    #[case::throughput_drop(4_000_000.0, 400_000.0)]
    #[case::throughput_rise(400_000.0, 4_000_000.0)]
    fn estimate_is_the_conservative_of_fast_and_slow(
        #[case] old_bps: f64,
        #[case] new_bps: f64,
    ) {
        let mut est = EwmaBandwidthEstimator::new();
        for _ in 0..20 {
            est.add_sample(Duration::from_secs(1), (old_bps / 8.0) as u64);
        }
        for _ in 0..4 {
            est.add_sample(Duration::from_secs(1), (new_bps / 8.0) as u64);
        }
        let bps = est.estimate().unwrap();
        let lo = old_bps.min(new_bps);
        let hi = old_bps.max(new_bps);
        assert!(
            bps < (lo + hi) / 2.0,
            "estimate {bps} should stay close to the lower of {lo}/{hi}"
        );
    }

    #[test]
    fn reset_discards_history() {
        let mut est = EwmaBandwidthEstimator::new();
        est.add_sample(Duration::from_secs(1), 500_000);
        assert!(est.estimate().is_some());
        est.reset();
        assert_eq!(est.estimate(), None);
    }
}
