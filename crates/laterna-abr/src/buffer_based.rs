//! Buffer-occupancy based bitrate selection, derived from the BOLA
//! heuristic: map each bitrate of the ladder to the minimum buffer level at
//! which playing it is worth the risk, then compare the current buffer gap
//! against those levels.

/// Inputs sampled when a segment lands in the media buffer.
#[derive(Clone, Copy, Debug)]
pub struct BufferBasedObservation {
    /// Seconds of buffered media ahead of the playback position.
    pub buffer_gap: f64,
    /// Bitrate of the Representation currently being buffered, if any.
    pub current_bitrate: Option<u64>,
    /// Maintainability score of that Representation, if known.
    pub current_score: Option<f64>,
    /// Playback rate.
    pub speed: f64,
}

/// Extra buffer demanded before any upswitch, in seconds.
const LEVEL_MARGIN_SECS: f64 = 4.0;

/// Score below which a downswitch is considered when the buffer runs under
/// the current level. Slightly above 1 so a barely-keeping-up Representation
/// still counts as at risk.
const DOWNGRADE_SCORE_CEILING: f64 = 1.15;

/// Map an ascending bitrate ladder to minimum buffer levels (seconds).
///
/// Uses the BOLA utility formulation: `u_i = ln(b_i / b_0)` normalized so the
/// first utility is 1, `gp = (u_last - 1) / (2N + 10)`, `Vp = 1 / gp`. The
/// level for the lowest bitrate is always 0 — it must stay playable with an
/// empty buffer.
pub fn get_buffer_levels(bitrates: &[u64]) -> Vec<f64> {
    if bitrates.is_empty() {
        return Vec::new();
    }
    let first = bitrates[0] as f64;
    let logs: Vec<f64> = bitrates.iter().map(|&b| (b as f64 / first).ln()).collect();
    let utilities: Vec<f64> = logs.iter().map(|l| l - logs[0] + 1.0).collect();
    let gp = (utilities[utilities.len() - 1] - 1.0) / (bitrates.len() as f64 * 2.0 + 10.0);
    if gp <= 0.0 || !gp.is_finite() {
        // Flat ladder (all bitrates equal): every level collapses to 0.
        return vec![0.0; bitrates.len()];
    }
    let vp = 1.0 / gp;

    let mut levels = Vec::with_capacity(bitrates.len());
    for index in 0..bitrates.len() {
        if index == 0 {
            levels.push(0.0);
            continue;
        }
        let i = index.clamp(1, bitrates.len() - 1);
        let (b, b_prev) = (bitrates[i] as f64, bitrates[i - 1] as f64);
        if b == b_prev {
            // Duplicate ladder entry: same threshold as its twin.
            levels.push(levels[index - 1]);
            continue;
        }
        let (u, u_prev) = (utilities[i], utilities[i - 1]);
        let level = vp * (gp + (b * u_prev - b_prev * u) / (b - b_prev)) + LEVEL_MARGIN_SECS;
        levels.push(level);
    }
    levels
}

/// Choose a bitrate from precomputed buffer levels.
///
/// Escalates one or more steps when the score says playback keeps up and the
/// buffer already covers the higher level; falls back below the current
/// bitrate when the buffer ran under the current level and the score gives no
/// comfort; keeps the current bitrate otherwise. Inconsistent inputs degrade
/// to the lowest bitrate with a single logged error.
pub fn get_estimate_from_buffer_levels(
    observation: &BufferBasedObservation,
    bitrates: &[u64],
    buffer_levels: &[f64],
) -> Option<u64> {
    let Some(current_bitrate) = observation.current_bitrate else {
        return bitrates.first().copied();
    };
    let current_index = match bitrates.iter().position(|&b| b == current_bitrate) {
        Some(index) if bitrates.len() == buffer_levels.len() => index,
        _ => {
            tracing::error!(
                current_bitrate,
                bitrates = bitrates.len(),
                levels = buffer_levels.len(),
                "current bitrate not found in the computed levels"
            );
            return bitrates.first().copied();
        }
    };

    let scaled_score = observation.current_score.map(|score| {
        if observation.speed == 0.0 {
            score
        } else {
            score / observation.speed
        }
    });

    if let Some(score) = scaled_score {
        if score > 1.0 {
            // Upswitch to the first level strictly above ours that the
            // buffer already covers.
            let current_level = buffer_levels[current_index];
            let next_index = (current_index + 1..buffer_levels.len())
                .find(|&i| buffer_levels[i] > current_level);
            if let Some(next_index) = next_index {
                if observation.buffer_gap >= buffer_levels[next_index] {
                    return Some(bitrates[next_index]);
                }
            }
            return Some(current_bitrate);
        }
    }

    if scaled_score.is_none_or(|score| score < DOWNGRADE_SCORE_CEILING)
        && observation.buffer_gap < buffer_levels[current_index]
    {
        // Highest bitrate strictly under the current one, if any.
        for i in (0..current_index).rev() {
            if bitrates[i] < current_bitrate {
                return Some(bitrates[i]);
            }
        }
        return Some(current_bitrate);
    }

    Some(current_bitrate)
}

/// Per-ladder wrapper precomputing the levels once.
#[derive(Clone, Debug)]
pub struct BufferBasedChooser {
    bitrates: Vec<u64>,
    levels: Vec<f64>,
}

impl BufferBasedChooser {
    /// `bitrates` must be sorted ascending.
    pub fn new(bitrates: Vec<u64>) -> Self {
        let levels = get_buffer_levels(&bitrates);
        tracing::debug!(?bitrates, ?levels, "buffer levels computed");
        Self { bitrates, levels }
    }

    pub fn get_estimate(&self, observation: &BufferBasedObservation) -> Option<u64> {
        get_estimate_from_buffer_levels(observation, &self.bitrates, &self.levels)
    }
}
