//! Model seams.
//!
//! The concrete detection, recognition and classification models are external
//! collaborators. They are pure frame-to-output functions behind these traits
//! and may fail; the scheduler owns all failure recovery, so implementations
//! just return errors.

use anyhow::Result;

use crate::analysis::types::{AuxLabel, IdentityLabel, Region};
use crate::frame::Frame;

/// Entity localization: frame in, regions out. A failure is treated as
/// "zero regions" by the scheduler.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Region>>;
}

/// Identity matching over detected regions. The returned labels are aligned
/// by index to `regions`; unmatched regions get `IdentityLabel::unknown()`.
pub trait FaceRecognizer: Send {
    fn identify(&mut self, frame: &Frame, regions: &[Region]) -> Result<Vec<IdentityLabel>>;
}

/// Optional auxiliary classification (e.g. emotion). Markedly more expensive
/// than detection, so it runs on its own coarser cadence and is independently
/// toggleable.
pub trait AuxClassifier: Send {
    fn classify(&mut self, frame: &Frame, regions: &[Region]) -> Result<Vec<AuxLabel>>;
}

/// The model set one pipeline runs with.
pub struct Models {
    pub detector: Box<dyn FaceDetector>,
    pub recognizer: Box<dyn FaceRecognizer>,
    pub classifier: Box<dyn AuxClassifier>,
}
