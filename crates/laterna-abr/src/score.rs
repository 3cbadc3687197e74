use std::sync::Arc;

use laterna_core::Representation;

use crate::ewma::Ewma;

/// How much a maintainability score can be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreConfidence {
    /// Enough samples over enough media time.
    High,
    /// Early data, use with care.
    Low,
}

#[derive(Debug)]
struct CurrentRepresentationData {
    representation: Arc<Representation>,
    ewma: Ewma,
    loaded_segments: u32,
    loaded_duration_secs: f64,
}

/// Tracks, per Representation, whether downloads keep up with playback.
///
/// Each completed segment request contributes the ratio
/// `segment_duration / request_duration`: above 1 the segment downloaded
/// faster than it plays, so the Representation is maintainable at current
/// network conditions. Samples only accumulate for the Representation
/// currently being loaded; switching starts a fresh history.
#[derive(Debug, Default)]
pub struct RepresentationScoreCalculator {
    current: Option<CurrentRepresentationData>,
    last_stable: Option<Arc<Representation>>,
}

impl RepresentationScoreCalculator {
    const EWMA_HALF_LIFE_SECS: f64 = 5.0;

    /// Confidence requires both enough requests and enough media time.
    const MIN_SAMPLES_FOR_CONFIDENCE: u32 = 5;
    const MIN_DURATION_FOR_CONFIDENCE_SECS: f64 = 10.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sample(
        &mut self,
        representation: &Arc<Representation>,
        request_duration_secs: f64,
        segment_duration_secs: f64,
    ) {
        if request_duration_secs <= 0.0 {
            return;
        }
        let ratio = segment_duration_secs / request_duration_secs;

        let tracked = self
            .current
            .as_ref()
            .is_some_and(|data| data.representation.id == representation.id);
        if !tracked {
            self.current = Some(CurrentRepresentationData {
                representation: Arc::clone(representation),
                ewma: Ewma::new(Self::EWMA_HALF_LIFE_SECS),
                loaded_segments: 0,
                loaded_duration_secs: 0.0,
            });
        }
        let Some(current) = self.current.as_mut() else {
            return;
        };
        current.ewma.add_sample(request_duration_secs, ratio);
        current.loaded_segments += 1;
        current.loaded_duration_secs += segment_duration_secs;

        if current.ewma.estimate() > 1.0
            && self.last_stable.as_ref() != Some(representation)
        {
            tracing::debug!(
                bitrate = representation.bitrate,
                "new last stable representation"
            );
            self.last_stable = Some(Arc::clone(representation));
        }
    }

    /// Maintainability score for `representation`, or `None` when no rolling
    /// data exists for it (it is not the one currently being loaded).
    pub fn estimate(&self, representation: &Representation) -> Option<(f64, ScoreConfidence)> {
        let data = self.current.as_ref()?;
        if data.representation.id != representation.id {
            return None;
        }
        let confidence = if data.loaded_segments >= Self::MIN_SAMPLES_FOR_CONFIDENCE
            && data.loaded_duration_secs >= Self::MIN_DURATION_FOR_CONFIDENCE_SECS
        {
            ScoreConfidence::High
        } else {
            ScoreConfidence::Low
        };
        Some((data.ewma.estimate(), confidence))
    }

    /// Last Representation whose rolling score proved sustainable (ratio
    /// above 1), or `None` if none did yet.
    pub fn last_stable_representation(&self) -> Option<&Arc<Representation>> {
        self.last_stable.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(id: &str, bitrate: u64) -> Arc<Representation> {
        Arc::new(Representation::from_bitrate(id, bitrate))
    }

    #[test]
    fn no_estimate_without_samples() {
        let calc = RepresentationScoreCalculator::new();
        assert!(calc.estimate(&rep("a", 1)).is_none());
        assert!(calc.last_stable_representation().is_none());
    }

    #[test]
    fn ratio_above_one_marks_stability() {
        let mut calc = RepresentationScoreCalculator::new();
        let a = rep("a", 500_000);

        // 4 s of media in 2 s of download: ratio 2.
        calc.add_sample(&a, 2.0, 4.0);

        let (score, confidence) = calc.estimate(&a).unwrap();
        assert!((score - 2.0).abs() < 1e-9);
        assert_eq!(confidence, ScoreConfidence::Low);
        assert_eq!(calc.last_stable_representation(), Some(&a));
    }

    #[test]
    fn unsustainable_ratio_never_promotes() {
        let mut calc = RepresentationScoreCalculator::new();
        let a = rep("a", 500_000);
        for _ in 0..10 {
            calc.add_sample(&a, 4.0, 2.0);
        }
        assert!(calc.last_stable_representation().is_none());
        let (score, confidence) = calc.estimate(&a).unwrap();
        assert!(score < 1.0);
        assert_eq!(confidence, ScoreConfidence::High);
    }

    #[test]
    fn confidence_needs_samples_and_duration() {
        let mut calc = RepresentationScoreCalculator::new();
        let a = rep("a", 500_000);

        // 5 samples but only 5 s of media: still low confidence.
        for _ in 0..5 {
            calc.add_sample(&a, 0.5, 1.0);
        }
        assert_eq!(calc.estimate(&a).unwrap().1, ScoreConfidence::Low);

        for _ in 0..5 {
            calc.add_sample(&a, 0.5, 1.0);
        }
        assert_eq!(calc.estimate(&a).unwrap().1, ScoreConfidence::High);
    }

    #[test]
    fn switching_representation_restarts_history() {
        let mut calc = RepresentationScoreCalculator::new();
        let a = rep("a", 500_000);
        let b = rep("b", 1_000_000);

        for _ in 0..6 {
            calc.add_sample(&a, 2.0, 4.0);
        }
        calc.add_sample(&b, 2.0, 4.0);

        assert!(calc.estimate(&a).is_none(), "history follows the active rep");
        let (_, confidence) = calc.estimate(&b).unwrap();
        assert_eq!(confidence, ScoreConfidence::Low);
        // The stable marker moved to b once b proved sustainable.
        assert_eq!(calc.last_stable_representation(), Some(&b));
    }

    #[test]
    fn zero_duration_requests_are_ignored() {
        let mut calc = RepresentationScoreCalculator::new();
        let a = rep("a", 500_000);
        calc.add_sample(&a, 0.0, 4.0);
        assert!(calc.estimate(&a).is_none());
    }
}
