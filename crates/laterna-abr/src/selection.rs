//! Pure filtering and selection helpers over bitrate-ascending
//! Representation lists.

use std::sync::Arc;

use laterna_core::Representation;

/// Keep Representations at or under `bitrate`. When none qualifies the
/// single lowest-bitrate Representation is kept so playback always has a
/// candidate.
pub fn filter_by_bitrate(
    representations: &[Arc<Representation>],
    bitrate: u64,
) -> Vec<Arc<Representation>> {
    let kept: Vec<_> = representations
        .iter()
        .filter(|r| r.bitrate <= bitrate)
        .cloned()
        .collect();
    if !kept.is_empty() {
        return kept;
    }
    representations
        .iter()
        .min_by_key(|r| r.bitrate)
        .map(|lowest| vec![Arc::clone(lowest)])
        .unwrap_or_default()
}

/// Keep Representations whose width does not exceed `width`.
///
/// The ceiling is rounded up to the ladder's next width tier, so asking for
/// 720 px against a 480/1080 ladder keeps the 1080 tier rather than dropping
/// every sharp-enough option. Width-less Representations always pass; a
/// ladder with no tier at or above the ceiling is returned unfiltered.
pub fn filter_by_width(
    representations: &[Arc<Representation>],
    width: u32,
) -> Vec<Arc<Representation>> {
    let ceiling_tier = representations
        .iter()
        .filter_map(|r| r.width)
        .filter(|&w| w >= width)
        .min();
    let Some(ceiling_tier) = ceiling_tier else {
        return representations.to_vec();
    };
    representations
        .iter()
        .filter(|r| r.width.is_none_or(|w| w <= ceiling_tier))
        .cloned()
        .collect()
}

/// Highest-bitrate Representation under the target once the target is
/// clamped into `[min_bitrate, max_bitrate]`; the lowest-bitrate
/// Representation when nothing qualifies. `None` only for an empty list.
///
/// The two bounds come from independent configuration channels and may
/// momentarily cross; the ceiling wins in that case.
pub fn select_optimal_representation<'a>(
    representations: &'a [Arc<Representation>],
    target_bitrate: f64,
    min_bitrate: f64,
    max_bitrate: f64,
) -> Option<&'a Arc<Representation>> {
    let wanted = target_bitrate.max(min_bitrate).min(max_bitrate);
    representations
        .iter()
        .filter(|r| r.bitrate as f64 <= wanted)
        .max_by_key(|r| r.bitrate)
        .or_else(|| representations.iter().min_by_key(|r| r.bitrate))
}
