//! Stub models.
//!
//! Deterministic, dependency-free implementations of the model seams, driven
//! by pixel hashing. They make the full pipeline runnable in tests, demos and
//! CI without any inference backend.

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::analysis::model::{AuxClassifier, FaceDetector, FaceRecognizer};
use crate::analysis::types::{AuxLabel, IdentityLabel, Region};
use crate::frame::Frame;

/// Detects one "face" whose position is derived from a pixel hash, so the
/// same frame always yields the same region.
pub struct StubDetector;

impl FaceDetector for StubDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Region>> {
        let digest = Sha256::digest(frame.pixels());
        let w = (frame.width / 4).clamp(1, frame.width);
        let h = (frame.height / 4).clamp(1, frame.height);
        let x = (digest[0] as u32 * (frame.width - w)) / 255;
        let y = (digest[1] as u32 * (frame.height - h)) / 255;
        Ok(vec![Region::face(x as i32, y as i32, w, h, 0.9)])
    }
}

/// Picks identities from a fixed roster, keyed on region position. An empty
/// roster recognizes nobody.
pub struct StubRecognizer {
    roster: Vec<IdentityLabel>,
}

impl StubRecognizer {
    pub fn with_roster<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roster: names.into_iter().map(IdentityLabel::new).collect(),
        }
    }

    /// Recognizer that labels every region with the same identity. Handy for
    /// exercising the cooldown controller.
    pub fn always(name: &str) -> Self {
        Self::with_roster([name])
    }
}

impl FaceRecognizer for StubRecognizer {
    fn identify(&mut self, _frame: &Frame, regions: &[Region]) -> Result<Vec<IdentityLabel>> {
        Ok(regions
            .iter()
            .map(|r| {
                if self.roster.is_empty() {
                    IdentityLabel::unknown()
                } else {
                    let key = (r.x.unsigned_abs() as usize + r.y.unsigned_abs() as usize)
                        % self.roster.len();
                    self.roster[key].clone()
                }
            })
            .collect())
    }
}

/// Rotates through a fixed set of moods, one step per classification call.
pub struct StubClassifier {
    moods: Vec<AuxLabel>,
    calls: u64,
}

impl StubClassifier {
    pub fn new() -> Self {
        Self {
            moods: ["neutral", "happy", "surprised"]
                .into_iter()
                .map(AuxLabel::new)
                .collect(),
            calls: 0,
        }
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl AuxClassifier for StubClassifier {
    fn classify(&mut self, _frame: &Frame, regions: &[Region]) -> Result<Vec<AuxLabel>> {
        let mood = self.moods[(self.calls as usize) % self.moods.len()].clone();
        self.calls += 1;
        Ok(regions.iter().map(|_| mood.clone()).collect())
    }
}

/// Plays back a scripted sequence of detector outcomes, then repeats the last
/// entry. Lets tests drive exact region counts and failures.
pub struct ScriptedDetector {
    script: VecDeque<Result<Vec<Region>, String>>,
    last: Result<Vec<Region>, String>,
}

impl ScriptedDetector {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Result<Vec<Region>, String>>,
    {
        let script: VecDeque<_> = script.into_iter().collect();
        Self {
            last: Ok(Vec::new()),
            script,
        }
    }

    pub fn repeating(regions: Vec<Region>) -> Self {
        Self::new([Ok(regions)])
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Region>> {
        if let Some(step) = self.script.pop_front() {
            self.last = step;
        }
        match &self.last {
            Ok(regions) => Ok(regions.clone()),
            Err(reason) => Err(anyhow!("{reason}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seed: u8) -> Frame {
        Frame::new(vec![seed; 16 * 16 * 3], 16, 16, seed as u64)
    }

    #[test]
    fn detector_is_deterministic_per_frame() {
        let mut det = StubDetector;
        let a = det.detect(&frame(3)).unwrap();
        let b = det.detect(&frame(3)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn empty_roster_recognizes_nobody() {
        let mut rec = StubRecognizer::with_roster(Vec::<String>::new());
        let regions = vec![Region::face(0, 0, 4, 4, 0.9)];
        let ids = rec.identify(&frame(1), &regions).unwrap();
        assert!(ids[0].is_unknown());
    }

    #[test]
    fn always_recognizer_labels_every_region() {
        let mut rec = StubRecognizer::always("alice");
        let regions = vec![Region::face(0, 0, 4, 4, 0.9), Region::face(5, 5, 4, 4, 0.9)];
        let ids = rec.identify(&frame(1), &regions).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| id.as_str() == "alice"));
    }

    #[test]
    fn scripted_detector_replays_then_repeats() {
        let mut det = ScriptedDetector::new([
            Ok(vec![Region::face(0, 0, 2, 2, 0.5)]),
            Err("model exploded".to_string()),
        ]);
        assert_eq!(det.detect(&frame(1)).unwrap().len(), 1);
        assert!(det.detect(&frame(2)).is_err());
        assert!(det.detect(&frame(3)).is_err());
    }
}
