//! Rolling pipeline metrics.
//!
//! Throughput is derived from a rolling window of recent capture timestamps,
//! drop counts come straight from the frame buffer's counter, and queue depth
//! is read by direct inspection. Nothing is retained beyond the rolling
//! window; the snapshot is recomputed on demand.

use std::collections::VecDeque;
use std::time::Instant;

use crate::frame::epoch_ms;
use crate::source::NegotiatedParams;

/// Number of capture timestamps used for the fps estimate.
const FPS_WINDOW: usize = 30;

#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    /// Instantaneous capture rate over the rolling window.
    pub fps: f64,
    pub queue_depth: usize,
    pub dropped_frames: u64,
    pub total_frames: u64,
    pub analysis_cycles: u64,
    pub analysis_failures: u64,
    pub source_reconnects: u64,
    /// Wall-clock time of the most recent capture, ms since epoch.
    pub last_capture_ms: u64,
    pub source_id: String,
    /// Parameters the source actually negotiated, if one is open.
    pub negotiated: Option<NegotiatedParams>,
}

pub struct MetricsCollector {
    capture_times: VecDeque<Instant>,
    analysis_cycles: u64,
    analysis_failures: u64,
    source_reconnects: u64,
    last_capture_ms: u64,
    source_id: String,
    negotiated: Option<NegotiatedParams>,
}

impl MetricsCollector {
    pub fn new(source_id: &str) -> Self {
        Self {
            capture_times: VecDeque::with_capacity(FPS_WINDOW),
            analysis_cycles: 0,
            analysis_failures: 0,
            source_reconnects: 0,
            last_capture_ms: 0,
            source_id: source_id.to_string(),
            negotiated: None,
        }
    }

    pub fn record_capture(&mut self, now: Instant) {
        if self.capture_times.len() >= FPS_WINDOW {
            self.capture_times.pop_front();
        }
        self.capture_times.push_back(now);
        self.last_capture_ms = epoch_ms();
    }

    pub fn record_cycle(&mut self, failed: bool) {
        self.analysis_cycles += 1;
        if failed {
            self.analysis_failures += 1;
        }
    }

    pub fn record_reconnects(&mut self, total: u64) {
        self.source_reconnects = total;
    }

    pub fn set_source(&mut self, id: &str, negotiated: Option<NegotiatedParams>) {
        self.source_id = id.to_string();
        self.negotiated = negotiated;
    }

    /// Capture rate over the rolling window. Zero until at least two frames
    /// have been seen.
    pub fn fps(&self) -> f64 {
        let n = self.capture_times.len();
        let (Some(first), Some(last)) = (self.capture_times.front(), self.capture_times.back())
        else {
            return 0.0;
        };
        if n < 2 {
            return 0.0;
        }
        let span = last.duration_since(*first).as_secs_f64();
        if span <= 0.0 {
            return 0.0;
        }
        (n - 1) as f64 / span
    }

    /// Assemble a snapshot. Queue depth and drop/total counters are passed in
    /// from direct inspection of the frame buffer.
    pub fn snapshot(
        &self,
        queue_depth: usize,
        dropped_frames: u64,
        total_frames: u64,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            fps: self.fps(),
            queue_depth,
            dropped_frames,
            total_frames,
            analysis_cycles: self.analysis_cycles,
            analysis_failures: self.analysis_failures,
            source_reconnects: self.source_reconnects,
            last_capture_ms: self.last_capture_ms,
            source_id: self.source_id.clone(),
            negotiated: self.negotiated,
        }
    }
}
