use std::sync::Arc;

use laterna_core::Representation;

use crate::types::EstimateAlgorithm;

/// Remembers the last emitted choice: which Representation won, the
/// bandwidth it was based on, and which strategy produced it.
///
/// The stored bandwidth is fed back into the NetworkAnalyzer as the
/// previous-estimate hint; the strategy tag lets the guess-based chooser know
/// whether it is already in guessing mode.
#[derive(Debug)]
pub struct LastEstimateStorage {
    pub representation: Option<Arc<Representation>>,
    pub bandwidth: Option<f64>,
    pub algorithm: EstimateAlgorithm,
}

impl LastEstimateStorage {
    pub fn new() -> Self {
        Self {
            representation: None,
            bandwidth: None,
            algorithm: EstimateAlgorithm::Bandwidth,
        }
    }

    pub fn update(
        &mut self,
        representation: Arc<Representation>,
        bandwidth: Option<f64>,
        algorithm: EstimateAlgorithm,
    ) {
        self.representation = Some(representation);
        self.bandwidth = bandwidth;
        self.algorithm = algorithm;
    }
}

impl Default for LastEstimateStorage {
    fn default() -> Self {
        Self::new()
    }
}
