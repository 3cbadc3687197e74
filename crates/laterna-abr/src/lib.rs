//! Adaptive-bitrate Representation estimation.
//!
//! This crate decides, for one media type of one content Period, which
//! quality variant ([`Representation`](laterna_core::Representation)) should
//! be downloaded next. Three strategies run side by side:
//!
//! - **bandwidth-based**: a conservative ceiling derived from a rolling
//!   network-throughput estimate and live request progress;
//! - **buffer-based**: a BOLA-derived occupancy heuristic that can raise the
//!   bandwidth choice when the buffer proves more is sustainable;
//! - **guess-based**: an aggressive escalator probing one rung above the
//!   regular choice, only near the live edge in low-latency mode.
//!
//! [`RepresentationEstimator`] arbitrates between them with strict priority
//! rules and tracks per-Representation maintainability over time. It is
//! event-driven: feed it playback observations, request lifecycle events and
//! configuration changes, and it hands back at most one [`Estimate`] per
//! input.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use laterna_abr::{EstimatorOptions, Observation, RepresentationEstimator, StreamContext};
//! use laterna_core::{Adaptation, Manifest, MediaType, Period, Representation};
//! use web_time::Instant;
//!
//! let representations: Vec<_> = [300_000u64, 800_000, 1_600_000]
//!     .iter()
//!     .map(|&b| Arc::new(Representation::from_bitrate(format!("r{b}"), b)))
//!     .collect();
//! let context = StreamContext {
//!     manifest: Arc::new(Manifest { is_dynamic: false }),
//!     period: Arc::new(Period { id: "p1".into(), start: 0.0 }),
//!     adaptation: Arc::new(Adaptation::new(MediaType::Video, representations.clone())),
//! };
//! let mut estimator =
//!     RepresentationEstimator::new(context, representations, EstimatorOptions::default())
//!         .expect("at least one representation");
//!
//! let estimate = estimator.on_playback_observation(
//!     Observation {
//!         buffer_gap: 0.0,
//!         position: 0.0,
//!         speed: 1.0,
//!         duration: 600.0,
//!         maximum_position: 600.0,
//!     },
//!     Instant::now(),
//! );
//! assert!(estimate.is_some());
//! ```

#![forbid(unsafe_code)]

mod bandwidth;
mod buffer_based;
mod estimator;
mod ewma;
mod guess_based;
mod last_estimate;
mod network;
mod pending_requests;
mod ranges;
mod score;
mod selection;
mod types;

pub use bandwidth::{BandwidthEstimator, EwmaBandwidthEstimator};
pub use buffer_based::{
    BufferBasedChooser, BufferBasedObservation, get_buffer_levels,
    get_estimate_from_buffer_levels,
};
pub use estimator::{AbrError, AbrResult, RepresentationEstimator, StreamContext};
pub use guess_based::GuessBasedChooser;
pub use last_estimate::LastEstimateStorage;
pub use network::{BandwidthChoice, NetworkAnalyzer};
pub use pending_requests::{PendingRequest, PendingRequestsStore, ProgressSnapshot};
pub use ranges::BufferedRanges;
pub use score::{RepresentationScoreCalculator, ScoreConfidence};
pub use selection::{filter_by_bitrate, filter_by_width, select_optimal_representation};
pub use types::{
    BitrateMode, Estimate, EstimateAlgorithm, EstimatorOptions, MetricsSample, Observation,
    RepresentationFilters, RequestId, SegmentContent, SegmentInfo, StreamEvent,
};
