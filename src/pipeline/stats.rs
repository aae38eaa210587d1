//! Per-frame outcome counters

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

/// Why a frame produced no prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Adaptation,
    Inference,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Adaptation => "adaptation",
            SkipReason::Inference => "inference",
        }
    }
}

#[derive(Default)]
struct Counters {
    frames_seen: AtomicU64,
    published: AtomicU64,
    skipped_adaptation: AtomicU64,
    skipped_inference: AtomicU64,
}

/// Lock-free counters updated from the capture thread.
#[derive(Default)]
pub struct PipelineStats {
    counters: CachePadded<Counters>,
}

/// A consistent-enough copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_seen: u64,
    pub published: u64,
    pub skipped_adaptation: u64,
    pub skipped_inference: u64,
}

impl PipelineStats {
    pub fn record_frame(&self) {
        self.counters.frames_seen.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sightline_frames_total").increment(1);
    }

    pub fn record_published(&self) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sightline_predictions_total").increment(1);
    }

    pub fn record_skip(&self, reason: SkipReason) {
        let counter = match reason {
            SkipReason::Adaptation => &self.counters.skipped_adaptation,
            SkipReason::Inference => &self.counters.skipped_inference,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sightline_frames_skipped_total", "reason" => reason.as_str())
            .increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_seen: self.counters.frames_seen.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            skipped_adaptation: self.counters.skipped_adaptation.load(Ordering::Relaxed),
            skipped_inference: self.counters.skipped_inference.load(Ordering::Relaxed),
        }
    }
}
