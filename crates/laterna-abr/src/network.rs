use web_time::Instant;

use laterna_core::Representation;

use crate::bandwidth::BandwidthEstimator;
use crate::ewma::Ewma;
use crate::pending_requests::{PendingRequest, ProgressSnapshot};
use crate::types::Observation;

/// Output of [`NetworkAnalyzer::get_bandwidth_estimate`].
#[derive(Clone, Copy, Debug)]
pub struct BandwidthChoice {
    /// Raw bandwidth estimate the choice is based on, when one exists.
    pub bandwidth_estimate: Option<f64>,
    /// Bitrate ceiling to select a Representation under, bits per second.
    pub bitrate_chosen: f64,
}

#[derive(Clone, Copy, Debug)]
struct GapThresholds {
    /// Buffer gap at or under which playback is about to starve.
    starvation: f64,
    /// Buffer gap at or above which starvation is over.
    out_of_starvation: f64,
}

/// Turns the rolling bandwidth estimate plus live request progress into a
/// conservative bitrate ceiling, and judges when a switch is urgent enough to
/// abort in-flight requests.
#[derive(Debug)]
pub struct NetworkAnalyzer {
    initial_bitrate: f64,
    low_latency_mode: bool,
    in_starvation_mode: bool,
}

impl NetworkAnalyzer {
    const DEFAULT_GAPS: GapThresholds = GapThresholds {
        starvation: 5.0,
        out_of_starvation: 7.0,
    };
    const LOW_LATENCY_GAPS: GapThresholds = GapThresholds {
        starvation: 0.5,
        out_of_starvation: 1.0,
    };

    /// Share of the raw estimate actually requested from the ladder.
    const STARVATION_FACTOR: f64 = 0.72;
    const REGULAR_FACTOR: f64 = 0.90;

    /// A small gap right before the content ends is drainage, not starvation.
    const END_OF_CONTENT_GUARD_SECS: f64 = 0.1;

    /// A request slower than `chunk × 1.5 + 2 s` of wall time (at speed 1)
    /// with no usable progress is treated as stalled.
    const STALLED_CHUNK_FACTOR: f64 = 1.5;
    const STALLED_GRACE_SECS: f64 = 2.0;

    /// Cap on the emergency bitrate relative to the current Representation.
    const EMERGENCY_MAX_RATIO: f64 = 0.7;

    /// Progress-based predictions are only trusted while new progress keeps
    /// arriving within this factor of the predicted remaining time.
    const LATE_DELIVERY_FACTOR: f64 = 1.2;

    /// Predicted rebuffering above which the emergency path fires.
    const EMERGENCY_REBUFFER_TOLERANCE_SECS: f64 = 2.5;

    /// Downgrades are urgent unless the in-flight request beats the buffer
    /// deadline by at least this margin (seconds).
    const URGENT_REBUFFER_MARGIN_SECS: f64 = -1.5;

    /// Upgrades jump the queue only when at least this much better.
    const UPGRADE_URGENCY_RATIO: f64 = 2.0;

    pub fn new(initial_bitrate: u64, low_latency_mode: bool) -> Self {
        Self {
            initial_bitrate: initial_bitrate as f64,
            low_latency_mode,
            in_starvation_mode: false,
        }
    }

    fn gaps(&self) -> GapThresholds {
        if self.low_latency_mode {
            Self::LOW_LATENCY_GAPS
        } else {
            Self::DEFAULT_GAPS
        }
    }

    /// Produce the conservative bitrate ceiling for this tick.
    ///
    /// `prev_bandwidth_hint` is the bandwidth stored with the previous
    /// estimate; it bridges the gap while the rolling estimator has no data.
    pub fn get_bandwidth_estimate<B: BandwidthEstimator>(
        &mut self,
        observation: &Observation,
        estimator: &mut B,
        current: Option<&Representation>,
        requests: &[PendingRequest],
        prev_bandwidth_hint: Option<f64>,
        now: Instant,
    ) -> BandwidthChoice {
        let gaps = self.gaps();
        let buffer_gap = observation.buffer_gap;
        let real_gap = if buffer_gap.is_finite() { buffer_gap } else { 0.0 };
        let content_left = observation.duration - (observation.position + real_gap);

        if !self.in_starvation_mode {
            if buffer_gap <= gaps.starvation && content_left > Self::END_OF_CONTENT_GUARD_SECS {
                tracing::info!(buffer_gap, "entering starvation mode");
                self.in_starvation_mode = true;
            }
        } else if buffer_gap >= gaps.out_of_starvation
            || content_left <= Self::END_OF_CONTENT_GUARD_SECS
        {
            tracing::info!(buffer_gap, "leaving starvation mode");
            self.in_starvation_mode = false;
        }

        if self.in_starvation_mode {
            if let Some(emergency) =
                self.estimate_starvation_bitrate(observation, current, requests, prev_bandwidth_hint, now)
            {
                tracing::info!(emergency, "emergency bitrate from in-flight progress");
                // The rolling average is stale by definition here; reseed it
                // from scratch with whatever comes next.
                estimator.reset();
                let ceil = current.map_or(emergency, |c| emergency.min(c.bitrate as f64));
                return BandwidthChoice {
                    bandwidth_estimate: Some(emergency),
                    bitrate_chosen: scale_for_speed(ceil, observation.speed),
                };
            }
        }

        let bandwidth_estimate = estimator.estimate();
        let factor = if self.in_starvation_mode {
            Self::STARVATION_FACTOR
        } else {
            Self::REGULAR_FACTOR
        };
        let chosen = match bandwidth_estimate {
            Some(bandwidth) => bandwidth * factor,
            None => prev_bandwidth_hint.map_or(self.initial_bitrate, |prev| prev * factor),
        };
        tracing::debug!(
            bandwidth_estimate,
            chosen,
            starvation = self.in_starvation_mode,
            "bandwidth ceiling"
        );
        BandwidthChoice {
            bandwidth_estimate,
            bitrate_chosen: scale_for_speed(chosen, observation.speed),
        }
    }

    /// `true` when switching to `bitrate` should abort in-flight requests.
    pub fn is_urgent(
        &self,
        bitrate: u64,
        current: Option<&Representation>,
        requests: &[PendingRequest],
        observation: &Observation,
        now: Instant,
    ) -> bool {
        let Some(current) = current else {
            // Nothing is being loaded yet; apply immediately.
            return true;
        };
        if bitrate == current.bitrate {
            return false;
        }
        if bitrate > current.bitrate {
            return observation.buffer_gap.is_finite()
                && observation.buffer_gap > self.gaps().out_of_starvation
                && bitrate as f64 >= current.bitrate as f64 * Self::UPGRADE_URGENCY_RATIO;
        }
        should_directly_switch_to_low_bitrate(observation, requests, now)
    }

    /// Emergency bitrate while starving, from the in-flight request covering
    /// the next needed position. `None` when nothing conclusive can be read
    /// from the request state.
    fn estimate_starvation_bitrate(
        &self,
        observation: &Observation,
        current: Option<&Representation>,
        requests: &[PendingRequest],
        prev_bandwidth_hint: Option<f64>,
        now: Instant,
    ) -> Option<f64> {
        if self.low_latency_mode {
            // The tight low-latency gaps already keep the regular path
            // reactive; emergency cuts would overshoot.
            return None;
        }
        let current = current?;
        let real_gap = if observation.buffer_gap.is_finite() {
            observation.buffer_gap
        } else {
            0.0
        };
        let needed_position = observation.position + real_gap;
        let request = concerned_request(requests, needed_position)?;
        let chunk_duration = request.content.segment.duration;
        let speed = normalized_speed(observation.speed);

        if let (Some(last), Some(bandwidth)) =
            (request.progress.last(), estimate_request_bandwidth(request))
        {
            let remaining = estimate_remaining_time(request, last, bandwidth);
            let since_last_progress = now.duration_since(last.at).as_secs_f64();
            if since_last_progress <= remaining * Self::LATE_DELIVERY_FACTOR {
                let expected_rebuffering = remaining - real_gap / speed;
                if expected_rebuffering > Self::EMERGENCY_REBUFFER_TOLERANCE_SECS {
                    return Some(bandwidth);
                }
                // The request is on track; no emergency.
                return None;
            }
            // Progress went stale; fall back to the wall-time check.
        }

        // No usable progress: judge by elapsed wall time alone.
        let elapsed = now.duration_since(request.requested_at).as_secs_f64();
        let reasonable_elapsed =
            elapsed <= (chunk_duration * Self::STALLED_CHUNK_FACTOR + Self::STALLED_GRACE_SECS) / speed;
        if chunk_duration <= 0.0 || reasonable_elapsed {
            return None;
        }
        let reduced =
            current.bitrate as f64 * (chunk_duration / elapsed).min(Self::EMERGENCY_MAX_RATIO);
        prev_bandwidth_hint
            .is_none_or(|prev| reduced < prev)
            .then_some(reduced)
    }
}

fn normalized_speed(speed: f64) -> f64 {
    if speed <= 0.0 {
        1.0
    } else {
        speed
    }
}

fn scale_for_speed(bitrate: f64, speed: f64) -> f64 {
    if speed > 1.0 {
        bitrate / speed
    } else {
        bitrate
    }
}

/// The in-flight request whose segment covers `position`, skipping init
/// segments and segments of unknown duration.
fn concerned_request(requests: &[PendingRequest], position: f64) -> Option<&PendingRequest> {
    requests.iter().find(|r| {
        let segment = &r.content.segment;
        !segment.is_init
            && segment.duration > 0.0
            && segment.time <= position
            && position < segment.time + segment.duration
    })
}

/// Observed bandwidth of one in-flight request from its progress reports,
/// bits per second. Needs at least two reports.
fn estimate_request_bandwidth(request: &PendingRequest) -> Option<f64> {
    if request.progress.len() < 2 {
        return None;
    }
    let mut ewma = Ewma::new(2.0);
    for pair in request.progress.windows(2) {
        let elapsed = pair[1].at.duration_since(pair[0].at).as_secs_f64();
        if elapsed <= 0.0 {
            continue;
        }
        let bytes = pair[1].size.saturating_sub(pair[0].size);
        ewma.add_sample(elapsed, bytes as f64 * 8.0 / elapsed);
    }
    (ewma.total_weight() > 0.0).then(|| ewma.estimate())
}

/// Predicted seconds until the request completes, assuming the segment's
/// nominal size (`bitrate × duration`) and the observed request bandwidth.
fn estimate_remaining_time(
    request: &PendingRequest,
    last_progress: &ProgressSnapshot,
    bandwidth_bps: f64,
) -> f64 {
    let segment = &request.content.segment;
    let expected_bytes = request.content.representation.bitrate as f64 / 8.0 * segment.duration;
    let remaining_bytes = (expected_bytes - last_progress.size as f64).max(0.0);
    if bandwidth_bps <= 0.0 {
        return f64::INFINITY;
    }
    remaining_bytes * 8.0 / bandwidth_bps
}

/// Whether a downgrade should abort the in-flight request covering the next
/// needed position instead of letting it finish.
fn should_directly_switch_to_low_bitrate(
    observation: &Observation,
    requests: &[PendingRequest],
    now: Instant,
) -> bool {
    let real_gap = if observation.buffer_gap.is_finite() {
        observation.buffer_gap
    } else {
        0.0
    };
    let needed_position = observation.position + real_gap;
    let Some(request) = concerned_request(requests, needed_position) else {
        return true;
    };
    let Some(last) = request.progress.last() else {
        return true;
    };
    let Some(bandwidth) = estimate_request_bandwidth(request) else {
        return true;
    };
    let remaining = estimate_remaining_time(request, last, bandwidth);
    if now.duration_since(last.at).as_secs_f64() > remaining * NetworkAnalyzer::LATE_DELIVERY_FACTOR {
        // Progress reports dried up; the prediction is stale.
        return true;
    }
    let expected_rebuffering = remaining - real_gap / normalized_speed(observation.speed);
    expected_rebuffering > NetworkAnalyzer::URGENT_REBUFFER_MARGIN_SECS
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::bandwidth::EwmaBandwidthEstimator;
    use crate::types::{RequestId, SegmentContent, SegmentInfo};

    fn observation(buffer_gap: f64, position: f64) -> Observation {
        Observation {
            buffer_gap,
            position,
            speed: 1.0,
            duration: 600.0,
            maximum_position: 600.0,
        }
    }

    fn rep(bitrate: u64) -> Arc<Representation> {
        Arc::new(Representation::from_bitrate(format!("r{bitrate}"), bitrate))
    }

    fn request(
        id: u64,
        requested_at: Instant,
        representation: &Arc<Representation>,
        time: f64,
        duration: f64,
        progress: Vec<ProgressSnapshot>,
    ) -> PendingRequest {
        PendingRequest {
            id: RequestId(id),
            requested_at,
            content: SegmentContent {
                representation: Arc::clone(representation),
                segment: SegmentInfo {
                    time,
                    duration,
                    is_init: false,
                },
            },
            progress,
        }
    }

    fn seeded_estimator(bps: f64) -> EwmaBandwidthEstimator {
        let mut estimator = EwmaBandwidthEstimator::new();
        estimator.add_sample(Duration::from_secs(1), (bps / 8.0) as u64);
        estimator
    }

    #[test]
    fn regular_factor_is_applied() {
        let mut analyzer = NetworkAnalyzer::new(0, false);
        let mut estimator = seeded_estimator(1_000_000.0);
        let choice = analyzer.get_bandwidth_estimate(
            &observation(20.0, 0.0),
            &mut estimator,
            None,
            &[],
            None,
            Instant::now(),
        );
        let bandwidth = choice.bandwidth_estimate.unwrap();
        assert!((bandwidth - 1_000_000.0).abs() < 1.0);
        assert!((choice.bitrate_chosen - 900_000.0).abs() < 1.0);
    }

    #[test]
    fn initial_bitrate_bridges_missing_estimates() {
        let mut analyzer = NetworkAnalyzer::new(700_000, false);
        let mut estimator = EwmaBandwidthEstimator::new();
        let choice = analyzer.get_bandwidth_estimate(
            &observation(20.0, 0.0),
            &mut estimator,
            None,
            &[],
            None,
            Instant::now(),
        );
        assert_eq!(choice.bandwidth_estimate, None);
        assert_eq!(choice.bitrate_chosen, 700_000.0);
    }

    #[test]
    fn previous_estimate_hint_beats_initial_bitrate() {
        let mut analyzer = NetworkAnalyzer::new(700_000, false);
        let mut estimator = EwmaBandwidthEstimator::new();
        let choice = analyzer.get_bandwidth_estimate(
            &observation(20.0, 0.0),
            &mut estimator,
            None,
            &[],
            Some(2_000_000.0),
            Instant::now(),
        );
        assert!((choice.bitrate_chosen - 1_800_000.0).abs() < 1.0);
    }

    #[test]
    fn starvation_mode_tightens_the_factor() {
        let mut analyzer = NetworkAnalyzer::new(0, false);
        let mut estimator = seeded_estimator(1_000_000.0);
        let choice = analyzer.get_bandwidth_estimate(
            &observation(2.0, 0.0),
            &mut estimator,
            None,
            &[],
            None,
            Instant::now(),
        );
        assert!((choice.bitrate_chosen - 720_000.0).abs() < 1.0);

        // Recovering past the exit gap restores the regular factor.
        let recovered = analyzer.get_bandwidth_estimate(
            &observation(8.0, 0.0),
            &mut estimator,
            None,
            &[],
            None,
            Instant::now(),
        );
        assert!(recovered.bitrate_chosen > 850_000.0);
    }

    #[test]
    fn no_starvation_right_before_content_end() {
        let mut analyzer = NetworkAnalyzer::new(0, false);
        let mut estimator = seeded_estimator(1_000_000.0);
        let mut obs = observation(2.0, 597.95);
        obs.duration = 600.0;
        let choice = analyzer.get_bandwidth_estimate(
            &obs,
            &mut estimator,
            None,
            &[],
            None,
            Instant::now(),
        );
        // 2 s left to play of 2.05 s of content: drainage, not starvation.
        assert!((choice.bitrate_chosen - 900_000.0).abs() < 1.0);
    }

    #[test]
    fn stalled_request_triggers_emergency_cut() {
        let mut analyzer = NetworkAnalyzer::new(0, false);
        let mut estimator = seeded_estimator(4_000_000.0);
        let current = rep(4_000_000);
        let now = Instant::now();
        // Requested 10 s ago, 4 s segment, zero progress reports.
        let requests = vec![request(
            1,
            now - Duration::from_secs(10),
            &current,
            0.0,
            4.0,
            Vec::new(),
        )];
        let choice = analyzer.get_bandwidth_estimate(
            &observation(3.0, 0.0),
            &mut estimator,
            Some(&current),
            &requests,
            None,
            now,
        );
        // 4 s / 10 s elapsed = 0.4 of the current bitrate.
        let expected = 4_000_000.0 * 0.4;
        assert_eq!(choice.bandwidth_estimate, Some(expected));
        assert!((choice.bitrate_chosen - expected).abs() < 1.0);
        // The rolling estimator was reseeded.
        assert_eq!(estimator.estimate(), None);
    }

    #[test]
    fn healthy_request_produces_no_emergency() {
        let mut analyzer = NetworkAnalyzer::new(0, false);
        let mut estimator = seeded_estimator(4_000_000.0);
        let current = rep(1_000_000);
        let now = Instant::now();
        // 1 Mb/s segment of 4 s = 500 kB expected; 400 kB arrived in 1 s.
        let requests = vec![request(
            1,
            now - Duration::from_secs(1),
            &current,
            0.0,
            4.0,
            vec![
                ProgressSnapshot {
                    at: now - Duration::from_millis(900),
                    size: 40_000,
                },
                ProgressSnapshot {
                    at: now,
                    size: 400_000,
                },
            ],
        )];
        let choice = analyzer.get_bandwidth_estimate(
            &observation(3.0, 0.0),
            &mut estimator,
            Some(&current),
            &requests,
            None,
            now,
        );
        // Starvation factor applies, but no emergency reset happened.
        assert!((choice.bitrate_chosen - 4_000_000.0 * 0.72).abs() < 1.0);
        assert!(estimator.estimate().is_some());
    }

    #[test]
    fn urgent_without_current_representation() {
        let analyzer = NetworkAnalyzer::new(0, false);
        assert!(analyzer.is_urgent(500_000, None, &[], &observation(10.0, 0.0), Instant::now()));
    }

    #[test]
    fn equal_bitrate_is_never_urgent() {
        let analyzer = NetworkAnalyzer::new(0, false);
        let current = rep(500_000);
        assert!(!analyzer.is_urgent(
            500_000,
            Some(&current),
            &[],
            &observation(10.0, 0.0),
            Instant::now()
        ));
    }

    #[test]
    fn big_upgrade_with_comfortable_buffer_is_urgent() {
        let analyzer = NetworkAnalyzer::new(0, false);
        let current = rep(500_000);
        let obs = observation(20.0, 0.0);
        assert!(analyzer.is_urgent(2_000_000, Some(&current), &[], &obs, Instant::now()));
        // Same target with a thin buffer: wait for the natural switch.
        let thin = observation(4.0, 0.0);
        assert!(!analyzer.is_urgent(2_000_000, Some(&current), &[], &thin, Instant::now()));
        // Small upgrade: never urgent.
        assert!(!analyzer.is_urgent(600_000, Some(&current), &[], &obs, Instant::now()));
    }

    #[test]
    fn downgrade_with_no_covering_request_is_urgent() {
        let analyzer = NetworkAnalyzer::new(0, false);
        let current = rep(2_000_000);
        assert!(analyzer.is_urgent(
            500_000,
            Some(&current),
            &[],
            &observation(5.0, 0.0),
            Instant::now()
        ));
    }

    #[test]
    fn downgrade_with_fast_covering_request_is_not_urgent() {
        let analyzer = NetworkAnalyzer::new(0, false);
        let current = rep(1_000_000);
        let now = Instant::now();
        // Almost the whole 500 kB segment arrived at high speed: it will
        // finish long before the 5 s buffer deadline.
        let requests = vec![request(
            1,
            now - Duration::from_secs(1),
            &current,
            5.0,
            4.0,
            vec![
                ProgressSnapshot {
                    at: now - Duration::from_millis(500),
                    size: 200_000,
                },
                ProgressSnapshot {
                    at: now,
                    size: 480_000,
                },
            ],
        )];
        assert!(!analyzer.is_urgent(
            300_000,
            Some(&current),
            &requests,
            &observation(5.0, 0.0),
            now
        ));
    }
}
