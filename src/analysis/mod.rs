//! Frame analysis: typed results, model seams and the sampling scheduler.
//!
//! Analysis is decoupled from capture. A sampling gate decides which frames
//! are worth the expensive model work, a single worker runs the cycle
//! (detect, then recognize, then optionally classify), and the completed
//! result is published as an immutable snapshot that presentation and the
//! capture controller read independently.

mod model;
mod scheduler;
mod stub;
mod types;

pub use model::{AuxClassifier, FaceDetector, FaceRecognizer, Models};
pub use scheduler::{AnalysisEngine, AuxControl, SamplingGate};
pub use stub::{ScriptedDetector, StubClassifier, StubDetector, StubRecognizer};
pub use types::{AnalysisResult, AuxLabel, IdentityLabel, Region};
