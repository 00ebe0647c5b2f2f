//! Fixed-field analysis records.
//!
//! Model output crosses the detector/recognizer boundary as explicit tagged
//! records, validated at construction, never as loosely shaped maps.

use std::fmt;

use crate::frame::epoch_ms;

/// A detected bounding area in pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
    /// Detector label for the region class.
    pub label: String,
    pub score: f32,
}

impl Region {
    pub fn face(x: i32, y: i32, w: u32, h: u32, score: f32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            label: "face".to_string(),
            score,
        }
    }
}

/// Recognized identity for a region. The recognizer returns the designated
/// unknown label when no confident match exists.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdentityLabel(String);

impl IdentityLabel {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityLabel {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Auxiliary per-region label (e.g. an emotion).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxLabel(String);

impl AuxLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuxLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output of one completed analysis cycle. Immutable once published; readers
/// always receive a clone, never a live reference.
///
/// `identities` is index-aligned with `regions`. `aux_labels` is either empty
/// or index-aligned with `regions` (sticky labels are only reused while the
/// region count matches the cycle they were computed for).
#[derive(Clone, Debug)]
pub struct AnalysisResult {
    pub regions: Vec<Region>,
    pub identities: Vec<IdentityLabel>,
    pub aux_labels: Vec<AuxLabel>,
    /// Sequence id of the frame this result was computed from.
    pub frame_seq: u64,
    pub wall_time_ms: u64,
    /// False for the degraded result published after a failed cycle.
    pub valid: bool,
}

impl AnalysisResult {
    pub fn empty() -> Self {
        Self {
            regions: Vec::new(),
            identities: Vec::new(),
            aux_labels: Vec::new(),
            frame_seq: 0,
            wall_time_ms: epoch_ms(),
            valid: false,
        }
    }
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self::empty()
    }
}
