use web_time::Instant;

use crate::types::{RequestId, SegmentContent};

/// One download-progress report of an in-flight request.
#[derive(Clone, Copy, Debug)]
pub struct ProgressSnapshot {
    pub at: Instant,
    /// Bytes received so far.
    pub size: u64,
}

/// An in-flight segment request and everything known about it so far.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    /// When the request was issued.
    pub requested_at: Instant,
    pub content: SegmentContent,
    /// Progress reports in arrival order.
    pub progress: Vec<ProgressSnapshot>,
}

/// Registry of in-flight segment requests.
///
/// The NetworkAnalyzer reads this to notice a request running slower than the
/// bandwidth estimate predicts, before the request even completes.
/// Inconsistent ids are logged and ignored; the fetch collaborator owns the
/// request lifecycle and the estimator must not die on its bookkeeping bugs.
#[derive(Debug, Default)]
pub struct PendingRequestsStore {
    requests: Vec<PendingRequest>,
}

impl PendingRequestsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: RequestId, requested_at: Instant, content: SegmentContent) {
        if self.requests.iter().any(|r| r.id == id) {
            tracing::warn!(?id, "request registered twice, ignoring the second begin");
            return;
        }
        self.requests.push(PendingRequest {
            id,
            requested_at,
            content,
            progress: Vec::new(),
        });
    }

    pub fn add_progress(&mut self, id: RequestId, at: Instant, size: u64) {
        match self.requests.iter_mut().find(|r| r.id == id) {
            Some(request) => request.progress.push(ProgressSnapshot { at, size }),
            None => tracing::warn!(?id, "progress for an unknown request"),
        }
    }

    pub fn remove(&mut self, id: RequestId) {
        let before = self.requests.len();
        self.requests.retain(|r| r.id != id);
        if self.requests.len() == before {
            tracing::warn!(?id, "end of an unknown request");
        }
    }

    /// Snapshot of the in-flight requests, in begin order.
    pub fn requests(&self) -> &[PendingRequest] {
        &self.requests
    }
}
