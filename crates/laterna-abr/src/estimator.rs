use std::sync::Arc;

use thiserror::Error;
use web_time::Instant;

use laterna_core::{Adaptation, Manifest, Period, Representation};

use crate::bandwidth::{BandwidthEstimator, EwmaBandwidthEstimator};
use crate::buffer_based::{BufferBasedChooser, BufferBasedObservation};
use crate::guess_based::GuessBasedChooser;
use crate::last_estimate::LastEstimateStorage;
use crate::network::NetworkAnalyzer;
use crate::pending_requests::PendingRequestsStore;
use crate::score::RepresentationScoreCalculator;
use crate::selection::{filter_by_bitrate, filter_by_width, select_optimal_representation};
use crate::types::{
    BitrateMode, Estimate, EstimateAlgorithm, EstimatorOptions, Observation,
    RepresentationFilters, StreamEvent,
};

/// Estimation errors.
#[derive(Debug, Error)]
pub enum AbrError {
    #[error("no Representation to estimate from")]
    NoRepresentation,
}

pub type AbrResult<T> = Result<T, AbrError>;

/// What the estimator is estimating for: one media type of one Period of one
/// Manifest. Read-only.
#[derive(Clone, Debug)]
pub struct StreamContext {
    pub manifest: Arc<Manifest>,
    pub period: Arc<Period>,
    pub adaptation: Arc<Adaptation>,
}

/// State rebuilt every time automatic estimation (re)starts.
///
/// Leaving Auto mode for Manual mode and coming back must not inherit stale
/// hysteresis or guessing bookkeeping from the previous session.
#[derive(Debug)]
struct AutoSession {
    /// Buffer-based estimates are suspended while the buffer is too thin for
    /// occupancy to mean anything.
    allow_buffer_based: bool,
    last_estimate: LastEstimateStorage,
    guess_chooser: GuessBasedChooser,
}

impl AutoSession {
    fn new() -> Self {
        Self {
            allow_buffer_based: true,
            last_estimate: LastEstimateStorage::new(),
            guess_chooser: GuessBasedChooser::new(),
        }
    }
}

#[derive(Debug)]
enum Mode {
    /// Only one Representation exists; it is emitted once and never
    /// reconsidered.
    Single,
    /// The user pinned a bitrate ceiling.
    Manual(u64),
    Auto(Box<AutoSession>),
}

/// Continuously decides which Representation to download next.
///
/// One instance per (media type, Period) pair. Inputs arrive through the
/// `on_*`/`set_*` entry points; each call returns at most one new [`Estimate`].
/// Automatic estimation recomputes on every change of the observation, the
/// auto-bitrate bounds, the filters, or the buffer-based estimate, reading
/// the most recent value of everything else.
pub struct RepresentationEstimator<B> {
    context: StreamContext,
    /// Sorted by ascending bitrate.
    representations: Vec<Arc<Representation>>,
    low_latency_mode: bool,

    bandwidth_estimator: B,
    network_analyzer: NetworkAnalyzer,
    score_calculator: RepresentationScoreCalculator,
    pending_requests: PendingRequestsStore,
    buffer_based_chooser: BufferBasedChooser,

    // Latest value per input channel.
    last_observation: Option<Observation>,
    current_representation: Option<Arc<Representation>>,
    buffer_based_estimate: Option<u64>,
    min_auto_bitrate: u64,
    max_auto_bitrate: Option<u64>,
    filters: RepresentationFilters,

    mode: Mode,
    /// Single and Manual modes owe one emission for the subscription itself;
    /// it fires on the first input of any kind.
    initial_emit_done: bool,
}

/// Buffer-based estimates switch off when the gap shrinks to this.
const BUFFER_BASED_OFF_GAP_SECS: f64 = 5.0;
/// And back on once the gap has clearly recovered.
const BUFFER_BASED_ON_GAP_SECS: f64 = 10.0;

/// Guessing only makes sense this close to the live edge.
const GUESS_MAX_EDGE_DISTANCE_SECS: f64 = 40.0;

impl RepresentationEstimator<EwmaBandwidthEstimator> {
    pub fn new(
        context: StreamContext,
        representations: Vec<Arc<Representation>>,
        options: EstimatorOptions,
    ) -> AbrResult<Self> {
        Self::with_bandwidth_estimator(
            context,
            representations,
            options,
            EwmaBandwidthEstimator::new(),
        )
    }
}

impl<B: BandwidthEstimator> RepresentationEstimator<B> {
    /// `bandwidth_estimator` is injected so it can outlive one Period (the
    /// network does not reset at Period boundaries) and be scripted in tests.
    pub fn with_bandwidth_estimator(
        context: StreamContext,
        mut representations: Vec<Arc<Representation>>,
        options: EstimatorOptions,
        bandwidth_estimator: B,
    ) -> AbrResult<Self> {
        if representations.is_empty() {
            return Err(AbrError::NoRepresentation);
        }
        representations.sort_by_key(|r| r.bitrate);

        let mode = if representations.len() == 1 {
            Mode::Single
        } else {
            match options.mode {
                BitrateMode::Manual(bitrate) => Mode::Manual(bitrate),
                BitrateMode::Auto => Mode::Auto(Box::new(AutoSession::new())),
            }
        };
        let bitrates: Vec<u64> = representations.iter().map(|r| r.bitrate).collect();

        tracing::debug!(
            media_type = context.adaptation.media_type.as_str(),
            period = %context.period.id,
            representations = representations.len(),
            low_latency = options.low_latency_mode,
            "representation estimator created"
        );

        Ok(Self {
            network_analyzer: NetworkAnalyzer::new(
                options.initial_bitrate,
                options.low_latency_mode,
            ),
            buffer_based_chooser: BufferBasedChooser::new(bitrates),
            context,
            representations,
            low_latency_mode: options.low_latency_mode,
            bandwidth_estimator,
            score_calculator: RepresentationScoreCalculator::new(),
            pending_requests: PendingRequestsStore::new(),
            last_observation: None,
            current_representation: None,
            buffer_based_estimate: None,
            min_auto_bitrate: options.min_auto_bitrate,
            max_auto_bitrate: options.max_auto_bitrate,
            filters: options.filters,
            mode,
            initial_emit_done: false,
        })
    }

    /// Playback tick from the playback observer.
    pub fn on_playback_observation(
        &mut self,
        observation: Observation,
        now: Instant,
    ) -> Option<Estimate> {
        self.last_observation = Some(observation);
        self.recompute(now)
    }

    /// Request-lifecycle, metric, and buffer events from the fetch/buffer
    /// collaborators.
    pub fn on_stream_event(&mut self, event: StreamEvent, now: Instant) -> Option<Estimate> {
        match event {
            StreamEvent::Metrics(sample) => {
                self.bandwidth_estimator
                    .add_sample(sample.request_duration, sample.size);
                if !sample.content.segment.is_init {
                    if let Some(segment_duration) = sample.segment_duration {
                        self.score_calculator.add_sample(
                            &sample.content.representation,
                            sample.request_duration.as_secs_f64(),
                            segment_duration,
                        );
                    }
                }
                None
            }
            StreamEvent::RepresentationChange(representation) => {
                // Sampled by the next recomputation, never a trigger itself.
                self.current_representation = representation;
                None
            }
            StreamEvent::RequestBegin {
                id,
                timestamp,
                content,
            } => {
                self.pending_requests.add(id, timestamp, content);
                None
            }
            StreamEvent::Progress {
                id,
                size,
                timestamp,
            } => {
                self.pending_requests.add_progress(id, timestamp, size);
                None
            }
            StreamEvent::RequestEnd { id } => {
                self.pending_requests.remove(id);
                None
            }
            StreamEvent::AddedSegment { buffered, content } => {
                // Sub-pipeline sampling the latest observation.
                let observation = self.last_observation?;
                let buffer_gap = buffered.left_duration_at(observation.position);
                let current_score = self
                    .score_calculator
                    .estimate(&content.representation)
                    .map(|(score, _)| score);
                self.buffer_based_estimate =
                    self.buffer_based_chooser.get_estimate(&BufferBasedObservation {
                        buffer_gap,
                        current_bitrate: Some(content.representation.bitrate),
                        current_score,
                        speed: observation.speed,
                    });
                self.recompute(now)
            }
        }
    }

    /// Switch between automatic and pinned quality selection.
    pub fn set_bitrate_mode(&mut self, mode: BitrateMode, now: Instant) -> Option<Estimate> {
        if matches!(self.mode, Mode::Single) {
            return self.recompute(now);
        }
        match mode {
            BitrateMode::Manual(bitrate) => {
                self.mode = Mode::Manual(bitrate);
                self.initial_emit_done = true;
                Some(self.manual_estimate(bitrate))
            }
            BitrateMode::Auto => {
                if matches!(self.mode, Mode::Manual(_)) {
                    // Fresh hysteresis/guess bookkeeping per re-entry.
                    self.mode = Mode::Auto(Box::new(AutoSession::new()));
                }
                self.recompute(now)
            }
        }
    }

    pub fn set_min_auto_bitrate(&mut self, bitrate: u64, now: Instant) -> Option<Estimate> {
        self.min_auto_bitrate = bitrate;
        self.recompute(now)
    }

    /// `None` lifts the ceiling.
    pub fn set_max_auto_bitrate(
        &mut self,
        bitrate: Option<u64>,
        now: Instant,
    ) -> Option<Estimate> {
        self.max_auto_bitrate = bitrate;
        self.recompute(now)
    }

    pub fn set_filters(
        &mut self,
        filters: RepresentationFilters,
        now: Instant,
    ) -> Option<Estimate> {
        self.filters = filters;
        self.recompute(now)
    }

    fn recompute(&mut self, now: Instant) -> Option<Estimate> {
        match self.mode {
            Mode::Single => {
                if self.initial_emit_done {
                    return None;
                }
                self.initial_emit_done = true;
                tracing::debug!(
                    media_type = self.context.adaptation.media_type.as_str(),
                    "single representation, nothing to estimate"
                );
                Some(Estimate {
                    bitrate: None,
                    manual: false,
                    representation: Arc::clone(&self.representations[0]),
                    urgent: true,
                    known_stable_bitrate: None,
                })
            }
            Mode::Manual(bitrate) => {
                if self.initial_emit_done {
                    return None;
                }
                self.initial_emit_done = true;
                Some(self.manual_estimate(bitrate))
            }
            Mode::Auto(_) => {
                self.initial_emit_done = true;
                self.recompute_auto(now)
            }
        }
    }

    fn manual_estimate(&self, bitrate: u64) -> Estimate {
        let representation = Arc::clone(
            select_optimal_representation(&self.representations, bitrate as f64, 0.0, f64::INFINITY)
                .unwrap_or(&self.representations[0]),
        );
        tracing::debug!(
            media_type = self.context.adaptation.media_type.as_str(),
            wanted = bitrate,
            chosen = representation.bitrate,
            "manual estimate"
        );
        Estimate {
            bitrate: None,
            manual: true,
            representation,
            urgent: true,
            known_stable_bitrate: None,
        }
    }

    /// One pass of the automatic pipeline. `None` until the first
    /// observation arrived.
    fn recompute_auto(&mut self, now: Instant) -> Option<Estimate> {
        let observation = self.last_observation?;
        let Mode::Auto(session) = &mut self.mode else {
            return None;
        };

        let filtered = filtered_representations(&self.representations, &self.filters);
        let current = self.current_representation.clone();
        let requests = self.pending_requests.requests();

        let choice = self.network_analyzer.get_bandwidth_estimate(
            &observation,
            &mut self.bandwidth_estimator,
            current.as_deref(),
            requests,
            session.last_estimate.bandwidth,
            now,
        );

        let known_stable_bitrate = self
            .score_calculator
            .last_stable_representation()
            .map(|r| r.bitrate as f64 / observation.speed.max(1.0));

        if session.allow_buffer_based && observation.buffer_gap <= BUFFER_BASED_OFF_GAP_SECS {
            session.allow_buffer_based = false;
        } else if !session.allow_buffer_based
            && observation.buffer_gap.is_finite()
            && observation.buffer_gap > BUFFER_BASED_ON_GAP_SECS
        {
            session.allow_buffer_based = true;
        }

        let min = self.min_auto_bitrate as f64;
        let max = self.max_auto_bitrate.map_or(f64::INFINITY, |b| b as f64);

        let from_bandwidth = Arc::clone(
            select_optimal_representation(&filtered, choice.bitrate_chosen, min, max)
                .unwrap_or(&self.representations[0]),
        );
        let mut current_best_bitrate = from_bandwidth.bitrate;

        let mut from_buffer_size = None;
        if let Some(buffer_based_bitrate) = self.buffer_based_estimate {
            if session.allow_buffer_based && buffer_based_bitrate > current_best_bitrate {
                let pick = Arc::clone(
                    select_optimal_representation(&filtered, buffer_based_bitrate as f64, min, max)
                        .unwrap_or(&self.representations[0]),
                );
                current_best_bitrate = pick.bitrate;
                from_buffer_size = Some(pick);
            }
        }

        let mut from_guess = None;
        if self.low_latency_mode
            && self.context.manifest.is_dynamic
            && observation.maximum_position - observation.position < GUESS_MAX_EDGE_DISTANCE_SECS
        {
            if let Some(current) = current.as_ref() {
                from_guess = session.guess_chooser.get_guess(
                    &filtered,
                    &observation,
                    current,
                    current_best_bitrate,
                    requests,
                    &self.score_calculator,
                    &session.last_estimate,
                    now,
                );
            }
        }

        let (representation, algorithm, urgent) =
            match from_guess.filter(|guess| guess.bitrate > current_best_bitrate) {
                Some(guess) => {
                    let urgent = current.as_ref().is_none_or(|c| guess.bitrate < c.bitrate);
                    (guess, EstimateAlgorithm::GuessBased, urgent)
                }
                None => match from_buffer_size {
                    Some(pick) => {
                        let urgent = self.network_analyzer.is_urgent(
                            pick.bitrate,
                            current.as_deref(),
                            requests,
                            &observation,
                            now,
                        );
                        (pick, EstimateAlgorithm::BufferBased, urgent)
                    }
                    None => {
                        let urgent = self.network_analyzer.is_urgent(
                            from_bandwidth.bitrate,
                            current.as_deref(),
                            requests,
                            &observation,
                            now,
                        );
                        (from_bandwidth, EstimateAlgorithm::Bandwidth, urgent)
                    }
                },
            };

        session
            .last_estimate
            .update(Arc::clone(&representation), choice.bandwidth_estimate, algorithm);

        tracing::debug!(
            media_type = self.context.adaptation.media_type.as_str(),
            bitrate = representation.bitrate,
            ?algorithm,
            urgent,
            bandwidth = choice.bandwidth_estimate,
            "estimate"
        );

        Some(Estimate {
            bitrate: choice.bandwidth_estimate,
            manual: false,
            representation,
            urgent,
            known_stable_bitrate,
        })
    }
}

/// Operator filters: bitrate ceiling first, then width ceiling. Order is
/// preserved, so the result stays bitrate-ascending.
fn filtered_representations(
    representations: &[Arc<Representation>],
    filters: &RepresentationFilters,
) -> Vec<Arc<Representation>> {
    let kept = match filters.bitrate {
        Some(ceiling) => filter_by_bitrate(representations, ceiling),
        None => representations.to_vec(),
    };
    match filters.width {
        Some(width) => filter_by_width(&kept, width),
        None => kept,
    }
}
