/// Duration-weighted exponentially weighted moving average.
///
/// Samples are weighted by how long they lasted, so a 4 s download influences
/// the average more than a 200 ms one. The estimate is corrected for the
/// zero-initialization bias: with little accumulated weight the raw EWMA is
/// pulled towards 0, so it is divided by `1 - alpha^total_weight`.
#[derive(Clone, Debug)]
pub(crate) struct Ewma {
    alpha: f64,
    last_estimate: f64,
    total_weight: f64,
}

impl Ewma {
    /// `half_life_secs` is the weight after which a sample's influence has
    /// decayed to one half.
    pub(crate) fn new(half_life_secs: f64) -> Self {
        Self {
            alpha: 0.5_f64.powf(1.0 / half_life_secs.max(0.001)),
            last_estimate: 0.0,
            total_weight: 0.0,
        }
    }

    pub(crate) fn add_sample(&mut self, weight_secs: f64, value: f64) {
        let weight = weight_secs.max(0.0);
        let decay = self.alpha.powf(weight);
        self.last_estimate = value * (1.0 - decay) + decay * self.last_estimate;
        self.total_weight += weight;
    }

    /// Bias-corrected estimate; 0.0 before any sample.
    pub(crate) fn estimate(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
        self.last_estimate / zero_factor.max(1e-9)
    }

    pub(crate) fn total_weight(&self) -> f64 {
        self.total_weight
    }
}
