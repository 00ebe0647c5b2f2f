//! facewatch: a real-time face recognition pipeline.
//!
//! The crate decouples frame capture from analysis so presentation stays
//! smooth while recognition runs at its own sampled cadence:
//!
//! - [`source`]: frame sources, reconnect handling and runtime switching.
//! - [`frame`]: the frame type, the latest-frame slot and the bounded
//!   analysis queue (drop-oldest under pressure).
//! - [`analysis`]: model traits, the sampling gate and the analysis engine
//!   with sticky auxiliary labels.
//! - [`capture`]: cooldown-gated auto capture of watched identities.
//! - [`stream`]: annotated MJPEG presentation as a lazy iterator.
//! - [`metrics`]: rolling throughput and health counters.
//! - [`pipeline`]: the context object that wires it all together.
//!
//! The pipeline never panics on a bad frame, a failed model or a vanished
//! source; those degrade into logged, counted events while capture and
//! presentation keep running.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod analysis;
pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod pipeline;
pub mod source;
pub mod stream;

pub use analysis::{AnalysisResult, AuxLabel, IdentityLabel, Models, Region};
pub use capture::CaptureEvent;
pub use config::PipelineConfig;
pub use error::{AnalysisError, ControlError, SourceError};
pub use frame::Frame;
pub use metrics::MetricsSnapshot;
pub use pipeline::Pipeline;
pub use stream::MjpegStream;

/// Lock a mutex, recovering the guard if a holder panicked. Worker threads
/// only mutate counters and ring buffers under these locks, so a poisoned
/// guard is still structurally sound.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
