/// Buffered time ranges as reported by the media buffer, ordered and
/// non-overlapping.
#[derive(Clone, Debug, Default)]
pub struct BufferedRanges(Vec<(f64, f64)>);

impl BufferedRanges {
    /// `ranges` are `(start, end)` pairs in seconds. Callers are expected to
    /// hand over what the media buffer reports: ordered, non-overlapping.
    pub fn new(ranges: Vec<(f64, f64)>) -> Self {
        Self(ranges)
    }

    /// Seconds of buffered media ahead of `position`, taken from the range
    /// containing it. `INFINITY` when `position` is buffered in no range —
    /// the caller cannot tell how much is left, not zero.
    pub fn left_duration_at(&self, position: f64) -> f64 {
        self.0
            .iter()
            .find(|(start, end)| *start <= position && position < *end)
            .map_or(f64::INFINITY, |(_, end)| end - position)
    }
}
