//! Pipeline statistics: monotonic atomic counters, snapshotted for egress
//! and the health monitor. Reads may be slightly stale by design.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters. One instance, shared by `Arc` into every stage.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub decode_errors: AtomicU64,
    pub detections_processed: AtomicU64,
    pub detections_rejected: AtomicU64,
    pub clusters_formed: AtomicU64,
    pub degenerate_updates: AtomicU64,
    pub degraded_predictions: AtomicU64,
    pub tracks_created: AtomicU64,
    pub tracks_confirmed: AtomicU64,
    pub tracks_terminated: AtomicU64,
    pub births_dropped: AtomicU64,
    pub evictions: AtomicU64,
    pub frames_published: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time copy for publication. `active_tracks` is supplied by
    /// the caller (it is a gauge owned by the track manager, not a
    /// counter).
    pub fn snapshot(&self, active_tracks: u32) -> StatsSnapshot {
        StatsSnapshot {
            active_tracks,
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            detections_processed: self.detections_processed.load(Ordering::Relaxed),
            detections_rejected: self.detections_rejected.load(Ordering::Relaxed),
            clusters_formed: self.clusters_formed.load(Ordering::Relaxed),
            degenerate_updates: self.degenerate_updates.load(Ordering::Relaxed),
            degraded_predictions: self.degraded_predictions.load(Ordering::Relaxed),
            tracks_created: self.tracks_created.load(Ordering::Relaxed),
            tracks_confirmed: self.tracks_confirmed.load(Ordering::Relaxed),
            tracks_terminated: self.tracks_terminated.load(Ordering::Relaxed),
            births_dropped: self.births_dropped.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
        }
    }
}

/// Serializable counter snapshot published with every track frame.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub active_tracks: u32,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_rejected: u64,
    pub decode_errors: u64,
    pub detections_processed: u64,
    pub detections_rejected: u64,
    pub clusters_formed: u64,
    pub degenerate_updates: u64,
    pub degraded_predictions: u64,
    pub tracks_created: u64,
    pub tracks_confirmed: u64,
    pub tracks_terminated: u64,
    pub births_dropped: u64,
    pub evictions: u64,
    pub frames_published: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = PipelineStats::new();
        PipelineStats::incr(&stats.frames_received);
        PipelineStats::add(&stats.detections_processed, 12);
        let snap = stats.snapshot(3);
        assert_eq!(snap.frames_received, 1);
        assert_eq!(snap.detections_processed, 12);
        assert_eq!(snap.active_tracks, 3);
    }
}
