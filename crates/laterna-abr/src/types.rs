use std::sync::Arc;
use std::time::Duration;

use laterna_core::Representation;
use web_time::Instant;

use crate::ranges::BufferedRanges;

/// Regular playback tick produced by the playback observer.
#[derive(Clone, Copy, Debug)]
pub struct Observation {
    /// Seconds of already-buffered media ahead of the playback position.
    /// `f64::INFINITY` when unknown.
    pub buffer_gap: f64,
    /// Current playback position in seconds.
    pub position: f64,
    /// Playback rate; 1.0 is normal speed, 0.0 is paused.
    pub speed: f64,
    /// Total content duration in seconds; may be infinite for live content.
    pub duration: f64,
    /// Last position that can currently be played (live edge for dynamic
    /// content).
    pub maximum_position: f64,
}

/// Identifier of one in-flight segment request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Position of a media segment on the playback timeline.
#[derive(Clone, Copy, Debug)]
pub struct SegmentInfo {
    /// Start position in seconds.
    pub time: f64,
    /// Duration in seconds; 0.0 when unknown.
    pub duration: f64,
    /// Initialization segments carry no media time.
    pub is_init: bool,
}

/// What a request or metric refers to.
#[derive(Clone, Debug)]
pub struct SegmentContent {
    pub representation: Arc<Representation>,
    pub segment: SegmentInfo,
}

/// Timing/size report for one finished non-init segment request.
#[derive(Clone, Debug)]
pub struct MetricsSample {
    /// Wall-clock time the request took.
    pub request_duration: Duration,
    /// Transferred size in bytes.
    pub size: u64,
    /// Media duration of the downloaded segment in seconds, when known.
    pub segment_duration: Option<f64>,
    pub content: SegmentContent,
}

/// Events produced by the segment-fetch and buffer-writing collaborators.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// A non-init segment request finished; feeds bandwidth and score
    /// estimation.
    Metrics(MetricsSample),
    /// The Representation actually being buffered changed (or became
    /// unknown).
    RepresentationChange(Option<Arc<Representation>>),
    /// A segment request was issued.
    RequestBegin {
        id: RequestId,
        timestamp: Instant,
        content: SegmentContent,
    },
    /// An in-flight request reported download progress.
    Progress {
        id: RequestId,
        /// Bytes received so far.
        size: u64,
        timestamp: Instant,
    },
    /// A request completed or was aborted.
    RequestEnd { id: RequestId },
    /// A segment was pushed to the media buffer.
    AddedSegment {
        buffered: BufferedRanges,
        content: SegmentContent,
    },
}

/// Operator-imposed ceilings on the Representations considered in Auto mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepresentationFilters {
    /// Keep Representations at or below this bitrate (bits per second).
    pub bitrate: Option<u64>,
    /// Keep Representations at or below this width (pixels).
    pub width: Option<u32>,
}

/// Whether quality selection is automatic or pinned by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitrateMode {
    /// Adaptive selection.
    Auto,
    /// Pin the selection to the best Representation at or under this bitrate.
    Manual(u64),
}

impl Default for BitrateMode {
    fn default() -> Self {
        Self::Auto
    }
}

/// Construction-time configuration of the estimator.
#[derive(Clone, Debug)]
pub struct EstimatorOptions {
    /// Bitrate assumed before any sample has been collected.
    pub initial_bitrate: u64,
    /// Low-latency streaming profile: tighter starvation gaps and the
    /// guess-based escalator near the live edge.
    pub low_latency_mode: bool,
    /// Initial quality-selection mode.
    pub mode: BitrateMode,
    /// Initial lower bound for automatic selection (bits per second).
    pub min_auto_bitrate: u64,
    /// Initial upper bound for automatic selection; `None` means no ceiling.
    pub max_auto_bitrate: Option<u64>,
    /// Initial Representation filters.
    pub filters: RepresentationFilters,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            initial_bitrate: 0,
            low_latency_mode: false,
            mode: BitrateMode::Auto,
            min_auto_bitrate: 0,
            max_auto_bitrate: None,
            filters: RepresentationFilters::default(),
        }
    }
}

/// Strategy that produced an estimate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EstimateAlgorithm {
    /// Conservative network-throughput choice.
    Bandwidth,
    /// Buffer-occupancy (BOLA-derived) choice.
    BufferBased,
    /// Aggressive live-edge guess.
    GuessBased,
}

/// One quality decision.
#[derive(Clone, Debug)]
pub struct Estimate {
    /// Bandwidth estimate the decision was based on, in bits per second.
    /// `None` when the decision did not involve one (manual mode, single
    /// Representation, or no sample yet).
    pub bitrate: Option<f64>,
    /// `true` when the user pinned the quality.
    pub manual: bool,
    /// The Representation to load next.
    pub representation: Arc<Representation>,
    /// `true` when in-flight requests for the previous choice should be
    /// aborted immediately rather than finished.
    pub urgent: bool,
    /// Highest bitrate historically proven sustainable, scaled by playback
    /// speed.
    pub known_stable_bitrate: Option<f64>,
}
