//! Error taxonomy for the pipeline.
//!
//! Three failure families, three recovery policies:
//! - `SourceError`: open/read failures. Recovered by reconnect-with-backoff
//!   inside the capture loop; never surfaced to stream consumers.
//! - `AnalysisError`: a model failed mid-cycle. Recovered by degrading to an
//!   empty or sticky result; the scheduler keeps running.
//! - `ControlError`: an invalid control request. Returned synchronously to the
//!   caller with no state mutation.
//!
//! Queue overflow is deliberately NOT an error: the frame buffer resolves it
//! by dropping the oldest queued frame and counting the drop.

use std::time::Duration;

use thiserror::Error;

/// Frame source failures. Non-fatal; the capture loop reconnects.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open source '{id}': {reason}")]
    Open { id: String, reason: String },
    #[error("read failed on source '{id}': {reason}")]
    Read { id: String, reason: String },
    #[error("unsupported source id '{0}'")]
    Unsupported(String),
    #[error("source is closed")]
    Closed,
}

/// A model failed during an analysis cycle.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("detector failed on frame {frame_seq}: {reason}")]
    Detector { frame_seq: u64, reason: String },
    #[error("recognizer failed on frame {frame_seq}: {reason}")]
    Recognizer { frame_seq: u64, reason: String },
    #[error("classifier failed on frame {frame_seq}: {reason}")]
    Classifier { frame_seq: u64, reason: String },
}

/// Invalid or impossible control request.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("pipeline is already running")]
    AlreadyRunning,
    #[error("pipeline is not running")]
    NotRunning,
    #[error("identity '{0}' is not in the watch set")]
    UnknownIdentity(String),
    #[error("invalid analysis stride {0}: must be at least 1")]
    InvalidStride(u64),
    #[error("invalid minimum analysis interval {0:?}: must be non-zero")]
    InvalidInterval(Duration),
    #[error("invalid auxiliary stride {0}: must be between 10 and 60")]
    InvalidAuxStride(u64),
    #[error("source switch failed: {0}")]
    SourceSwitch(String),
    #[error("no frame captured yet")]
    NoFrame,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("{0} thread did not stop within the shutdown timeout")]
    ShutdownTimeout(&'static str),
}
