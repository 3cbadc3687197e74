use std::sync::Arc;
use std::time::Duration;

use web_time::Instant;

use laterna_core::Representation;

use crate::last_estimate::LastEstimateStorage;
use crate::pending_requests::PendingRequest;
use crate::score::{RepresentationScoreCalculator, ScoreConfidence};
use crate::types::{EstimateAlgorithm, Observation};

/// Aggressive quality escalator for low-latency playback near the live edge.
///
/// Regular bandwidth estimation is starved of samples at the live edge:
/// segments are tiny and the buffer never grows, so the conservative
/// estimate plateaus below what the network could actually sustain. This
/// chooser instead probes one Representation above the regular choice and
/// watches whether it holds, backing off with an exponential block when a
/// probe fails.
#[derive(Debug, Default)]
pub struct GuessBasedChooser {
    consecutive_wrong_guesses: u32,
    blocked_until: Option<Instant>,
    /// Highest bitrate a guess has proven sustainable, while guessing.
    last_maintainable_bitrate: Option<u64>,
}

impl GuessBasedChooser {
    /// Minimum buffer gap before probing above the regular estimate.
    const MIN_BUFFER_GAP_SECS: f64 = 2.5;

    /// Speed-scaled score required to start or continue climbing.
    const ESCALATION_SCORE: f64 = 1.01;

    /// A score under this aborts the running guess outright.
    const ABORT_SCORE: f64 = 1.01;

    /// With a thin buffer, even a mediocre score aborts the guess.
    const RISKY_SCORE: f64 = 1.2;
    const ABORT_BUFFER_GAP_SECS: f64 = 0.6;

    /// An in-flight request on the guessed Representation is "late" past
    /// `segment duration × 1.3 + 1 s`.
    const LATE_REQUEST_FACTOR: f64 = 1.3;
    const LATE_REQUEST_GRACE_SECS: f64 = 1.0;

    /// A guessed Representation counts as proven once its high-confidence
    /// score clears this.
    const VALIDATION_SCORE: f64 = 1.5;

    const BLOCK_STEP: Duration = Duration::from_secs(15);
    const BLOCK_MAX: Duration = Duration::from_secs(120);

    pub fn new() -> Self {
        Self::default()
    }

    /// Propose a Representation above `incoming_best_bitrate`, or `None`
    /// when no escalation is warranted.
    ///
    /// `representations` is the filtered, bitrate-ascending candidate list;
    /// `current` the Representation currently being loaded; `prev_estimate`
    /// the previous winning pick, whose strategy tag says whether a guess is
    /// already running.
    #[expect(
        clippy::too_many_arguments,
        reason = "the guess samples every pipeline input at once"
    )]
    pub fn get_guess(
        &mut self,
        representations: &[Arc<Representation>],
        observation: &Observation,
        current: &Arc<Representation>,
        incoming_best_bitrate: u64,
        requests: &[PendingRequest],
        scores: &RepresentationScoreCalculator,
        prev_estimate: &LastEstimateStorage,
        now: Instant,
    ) -> Option<Arc<Representation>> {
        let last_chosen = prev_estimate.representation.as_ref()?;

        if incoming_best_bitrate > last_chosen.bitrate {
            // The regular algorithms caught up on their own; guessing has
            // nothing to add and its bookkeeping restarts clean.
            self.consecutive_wrong_guesses = 0;
            self.blocked_until = None;
            self.last_maintainable_bitrate = None;
            return None;
        }

        let score = scores.estimate(current);

        if prev_estimate.algorithm != EstimateAlgorithm::GuessBased {
            // Not guessing yet; only start from solid score history.
            let score = score?;
            if self.can_guess_higher(observation, score, now) {
                if let Some(next) = next_higher(representations, current.bitrate) {
                    return Some(next);
                }
            }
            return None;
        }

        if self.is_guess_validated(last_chosen, incoming_best_bitrate, score) {
            tracing::debug!(bitrate = last_chosen.bitrate, "guess validated");
            self.last_maintainable_bitrate = Some(last_chosen.bitrate);
            self.consecutive_wrong_guesses = 0;
        }

        if current.id != last_chosen.id {
            // Still switching into the guessed Representation; hold it.
            return Some(Arc::clone(last_chosen));
        }

        if self.should_stop_guess(current, score, observation, requests, now) {
            self.consecutive_wrong_guesses = self.consecutive_wrong_guesses.saturating_add(1);
            let block = (Self::BLOCK_STEP * self.consecutive_wrong_guesses).min(Self::BLOCK_MAX);
            self.blocked_until = Some(now + block);
            tracing::debug!(
                bitrate = current.bitrate,
                wrong_guesses = self.consecutive_wrong_guesses,
                block_secs = block.as_secs(),
                "aborting guess"
            );
            return next_lower(representations, current.bitrate);
        }

        let Some(score) = score else {
            // No fresh score since the switch; sustain the guess.
            return Some(Arc::clone(current));
        };
        if self.can_guess_higher(observation, score, now) {
            if let Some(next) = next_higher(representations, current.bitrate) {
                return Some(next);
            }
        }
        Some(Arc::clone(current))
    }

    fn can_guess_higher(
        &self,
        observation: &Observation,
        (score, confidence): (f64, ScoreConfidence),
        now: Instant,
    ) -> bool {
        let speed = if observation.speed <= 0.0 {
            1.0
        } else {
            observation.speed
        };
        observation.buffer_gap.is_finite()
            && observation.buffer_gap >= Self::MIN_BUFFER_GAP_SECS
            && self.blocked_until.is_none_or(|until| now >= until)
            && confidence == ScoreConfidence::High
            && score / speed > Self::ESCALATION_SCORE
    }

    fn should_stop_guess(
        &self,
        current: &Arc<Representation>,
        score: Option<(f64, ScoreConfidence)>,
        observation: &Observation,
        requests: &[PendingRequest],
        now: Instant,
    ) -> bool {
        if let Some((score, _)) = score {
            if score < Self::ABORT_SCORE {
                return true;
            }
        }
        let risky = score.is_none_or(|(score, _)| score < Self::RISKY_SCORE);
        if risky && observation.buffer_gap < Self::ABORT_BUFFER_GAP_SECS {
            return true;
        }

        requests
            .iter()
            .filter(|r| r.content.representation.id == current.id)
            .filter(|r| !r.content.segment.is_init && r.content.segment.duration > 0.0)
            .any(|r| {
                let elapsed = now.duration_since(r.requested_at).as_secs_f64();
                elapsed
                    > r.content.segment.duration * Self::LATE_REQUEST_FACTOR
                        + Self::LATE_REQUEST_GRACE_SECS
            })
    }

    fn is_guess_validated(
        &self,
        last_chosen: &Arc<Representation>,
        incoming_best_bitrate: u64,
        score: Option<(f64, ScoreConfidence)>,
    ) -> bool {
        if let Some((score, ScoreConfidence::High)) = score {
            if score > Self::VALIDATION_SCORE {
                return true;
            }
        }
        incoming_best_bitrate >= last_chosen.bitrate
            && self
                .last_maintainable_bitrate
                .is_none_or(|bitrate| bitrate < last_chosen.bitrate)
    }
}

/// First Representation strictly above `bitrate` in an ascending list.
fn next_higher(
    representations: &[Arc<Representation>],
    bitrate: u64,
) -> Option<Arc<Representation>> {
    representations
        .iter()
        .find(|r| r.bitrate > bitrate)
        .cloned()
}

/// Last Representation strictly below `bitrate` in an ascending list.
fn next_lower(
    representations: &[Arc<Representation>],
    bitrate: u64,
) -> Option<Arc<Representation>> {
    representations
        .iter()
        .rev()
        .find(|r| r.bitrate < bitrate)
        .cloned()
}
