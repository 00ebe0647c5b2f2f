//! Analysis scheduling: the sampling gate and the cycle engine.
//!
//! Sampling policy is CONJUNCTIVE: a frame is forwarded for analysis only if
//! its sequence id lands on the configured stride AND the minimum wall-clock
//! interval has elapsed since the previous sampled frame. Tightening either
//! condition lowers analysis load; this is the conservative, load-bounding
//! reading of the dual gate.
//!
//! At most one analysis cycle is ever in flight: a single worker drains the
//! bounded queue, and overload is absorbed by the queue's drop-oldest policy
//! rather than by spawning more workers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::analysis::model::Models;
use crate::analysis::types::{AnalysisResult, AuxLabel};
use crate::error::AnalysisError;
use crate::frame::{epoch_ms, Frame};

/// Decides which captured frames are worth the expensive model work.
pub struct SamplingGate {
    stride: u64,
    min_interval: Duration,
    last_sampled_at: Option<Instant>,
}

impl SamplingGate {
    pub fn new(stride: u64, min_interval: Duration) -> Self {
        Self {
            stride,
            min_interval,
            last_sampled_at: None,
        }
    }

    /// True when this frame should be forwarded for analysis. A true return
    /// claims the sampling slot, so the interval is measured from the last
    /// accepted frame.
    pub fn should_sample(&mut self, frame_seq: u64, now: Instant) -> bool {
        if self.stride == 0 || frame_seq % self.stride != 0 {
            return false;
        }
        if let Some(last) = self.last_sampled_at {
            if now.duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_sampled_at = Some(now);
        true
    }

    pub fn set_stride(&mut self, stride: u64) {
        self.stride = stride;
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn set_min_interval(&mut self, interval: Duration) {
        self.min_interval = interval;
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

/// Runtime toggles for the auxiliary classifier, shared lock-free between the
/// control surface and the analysis worker.
pub struct AuxControl {
    enabled: AtomicBool,
    stride: AtomicU64,
}

impl AuxControl {
    pub fn new(enabled: bool, stride: u64) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            stride: AtomicU64::new(stride),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn stride(&self) -> u64 {
        self.stride.load(Ordering::Relaxed).max(1)
    }

    pub fn set_stride(&self, stride: u64) {
        self.stride.store(stride, Ordering::Relaxed);
    }
}

/// Auxiliary labels remembered from the last successful classification,
/// tagged with the region count they were computed for. Region identity is
/// not tracked across frames, so any region-count mismatch invalidates the
/// cache rather than risking labels attached to the wrong faces.
struct StickyAux {
    region_count: usize,
    labels: Vec<AuxLabel>,
}

/// Runs one full analysis cycle: detect, recognize, classify.
///
/// Every model failure is caught per cycle and degrades the output instead of
/// halting the worker: detector failure means zero regions, recognizer
/// failure publishes an invalid empty result, classifier failure clears the
/// sticky cache.
pub struct AnalysisEngine {
    models: Models,
    sticky: Option<StickyAux>,
}

impl AnalysisEngine {
    pub fn new(models: Models) -> Self {
        Self {
            models,
            sticky: None,
        }
    }

    pub fn run_cycle(&mut self, frame: &Frame, aux: &AuxControl) -> AnalysisResult {
        let regions = match self.models.detector.detect(frame) {
            Ok(regions) => regions,
            Err(err) => {
                log::warn!(
                    "{}",
                    AnalysisError::Detector {
                        frame_seq: frame.seq,
                        reason: format!("{err:#}"),
                    }
                );
                Vec::new()
            }
        };

        let identities = if regions.is_empty() {
            Vec::new()
        } else {
            match self.models.recognizer.identify(frame, &regions) {
                Ok(identities) => identities,
                Err(err) => {
                    log::warn!(
                        "{}",
                        AnalysisError::Recognizer {
                            frame_seq: frame.seq,
                            reason: format!("{err:#}"),
                        }
                    );
                    self.sticky = None;
                    return AnalysisResult {
                        frame_seq: frame.seq,
                        ..AnalysisResult::empty()
                    };
                }
            }
        };

        // Sticky labels only survive while the region count still matches the
        // cycle they were computed for.
        if let Some(sticky) = &self.sticky {
            if sticky.region_count != regions.len() {
                self.sticky = None;
            }
        }

        let aux_due = aux.enabled() && !regions.is_empty() && frame.seq % aux.stride() == 0;
        if aux_due {
            match self.models.classifier.classify(frame, &regions) {
                Ok(labels) => {
                    self.sticky = Some(StickyAux {
                        region_count: regions.len(),
                        labels,
                    });
                }
                Err(err) => {
                    log::warn!(
                        "{}",
                        AnalysisError::Classifier {
                            frame_seq: frame.seq,
                            reason: format!("{err:#}"),
                        }
                    );
                    self.sticky = None;
                }
            }
        }

        let aux_labels = self
            .sticky
            .as_ref()
            .map(|s| s.labels.clone())
            .unwrap_or_default();

        AnalysisResult {
            regions,
            identities,
            aux_labels,
            frame_seq: frame.seq,
            wall_time_ms: epoch_ms(),
            valid: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stub::{ScriptedDetector, StubClassifier, StubRecognizer};
    use crate::analysis::types::Region;

    fn frame(seq: u64) -> Frame {
        Frame::new(vec![(seq % 251) as u8; 16 * 16 * 3], 16, 16, seq)
    }

    fn engine(detector: ScriptedDetector) -> AnalysisEngine {
        AnalysisEngine::new(Models {
            detector: Box::new(detector),
            recognizer: Box::new(StubRecognizer::always("alice")),
            classifier: Box::new(StubClassifier::new()),
        })
    }

    #[test]
    fn gate_requires_both_stride_and_interval() {
        // stride 15, min interval 500ms, capture at ~30fps: the 15th-frame
        // trigger arriving at ~480ms must be rejected even though the stride
        // matches.
        let mut gate = SamplingGate::new(15, Duration::from_millis(500));
        let t0 = Instant::now();
        assert!(gate.should_sample(15, t0));
        assert!(!gate.should_sample(16, t0 + Duration::from_millis(33)));
        assert!(!gate.should_sample(30, t0 + Duration::from_millis(480)));
        assert!(gate.should_sample(45, t0 + Duration::from_millis(990)));
    }

    #[test]
    fn gate_interval_measured_from_accepted_sample() {
        let mut gate = SamplingGate::new(1, Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(gate.should_sample(1, t0));
        // Rejected attempts do not reset the interval clock.
        assert!(!gate.should_sample(2, t0 + Duration::from_millis(60)));
        assert!(gate.should_sample(3, t0 + Duration::from_millis(110)));
    }

    #[test]
    fn sticky_labels_survive_skipped_aux_cycles() {
        let mut eng = engine(ScriptedDetector::repeating(vec![Region::face(
            0, 0, 4, 4, 0.9,
        )]));
        let aux = AuxControl::new(true, 10);

        // Frame 10 hits the aux stride and computes labels.
        let r = eng.run_cycle(&frame(10), &aux);
        assert_eq!(r.aux_labels.len(), 1);
        let labels = r.aux_labels.clone();

        // Frame 11 skips the classifier but reuses the labels verbatim.
        let r = eng.run_cycle(&frame(11), &aux);
        assert_eq!(r.aux_labels, labels);
    }

    #[test]
    fn region_count_change_clears_sticky_labels() {
        let two = vec![Region::face(0, 0, 4, 4, 0.9), Region::face(8, 8, 4, 4, 0.9)];
        let one = vec![Region::face(0, 0, 4, 4, 0.9)];
        let mut eng = engine(ScriptedDetector::new([Ok(two), Ok(one)]));
        let aux = AuxControl::new(true, 10);

        let r = eng.run_cycle(&frame(10), &aux);
        assert_eq!(r.aux_labels.len(), 2);

        // One region now: stale two-label memory must not be reattached.
        let r = eng.run_cycle(&frame(11), &aux);
        assert!(r.aux_labels.is_empty());
    }

    #[test]
    fn classifier_failure_clears_sticky_labels() {
        struct FailingClassifier;
        impl crate::analysis::model::AuxClassifier for FailingClassifier {
            fn classify(
                &mut self,
                _frame: &Frame,
                _regions: &[Region],
            ) -> anyhow::Result<Vec<AuxLabel>> {
                anyhow::bail!("classifier exploded")
            }
        }

        let mut eng = AnalysisEngine::new(Models {
            detector: Box::new(ScriptedDetector::repeating(vec![Region::face(
                0, 0, 4, 4, 0.9,
            )])),
            recognizer: Box::new(StubRecognizer::always("alice")),
            classifier: Box::new(FailingClassifier),
        });
        let aux = AuxControl::new(true, 10);

        let r = eng.run_cycle(&frame(10), &aux);
        assert!(r.valid);
        assert!(r.aux_labels.is_empty());
    }

    #[test]
    fn detector_failure_degrades_to_zero_regions() {
        let mut eng = engine(ScriptedDetector::new([Err("boom".to_string())]));
        let aux = AuxControl::new(false, 30);
        let r = eng.run_cycle(&frame(1), &aux);
        assert!(r.valid);
        assert!(r.regions.is_empty());
        assert!(r.identities.is_empty());
    }

    #[test]
    fn recognizer_failure_publishes_invalid_empty_result() {
        use crate::analysis::types::IdentityLabel;

        struct FailingRecognizer;
        impl crate::analysis::model::FaceRecognizer for FailingRecognizer {
            fn identify(
                &mut self,
                _frame: &Frame,
                _regions: &[Region],
            ) -> anyhow::Result<Vec<IdentityLabel>> {
                anyhow::bail!("recognizer exploded")
            }
        }

        let mut eng = AnalysisEngine::new(Models {
            detector: Box::new(ScriptedDetector::repeating(vec![Region::face(
                0, 0, 4, 4, 0.9,
            )])),
            recognizer: Box::new(FailingRecognizer),
            classifier: Box::new(StubClassifier::new()),
        });
        let aux = AuxControl::new(false, 30);
        let r = eng.run_cycle(&frame(1), &aux);
        assert!(!r.valid);
        assert!(r.regions.is_empty());
    }
}
