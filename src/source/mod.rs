//! Frame sources.
//!
//! A source owns the physical capture handle and produces `Frame`s at a
//! configured target rate. This module provides:
//! - the `FrameSource` trait every backend implements
//! - `SyntheticSource` for `stub://` ids (tests, demos, CI)
//! - `SourceManager` for reconnect-on-failure and exclusive source switching
//!
//! Real camera backends (V4L2, RTSP, ...) plug in behind `FrameSource`; the
//! core only depends on the trait. Requested capture parameters are hints:
//! the negotiated values must be read back from the source and reported via
//! metrics, never assumed.

mod manager;
mod synthetic;

pub use manager::SourceManager;
pub use synthetic::SyntheticSource;

use crate::config::SourceSettings;
use crate::error::SourceError;
use crate::frame::Frame;

/// Capture parameters actually negotiated with the device, which may differ
/// from the requested configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NegotiatedParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// An open capture source. Implementations own the device handle and release
/// it in `close`; `close` must be idempotent.
pub trait FrameSource: Send {
    /// Source id this handle was opened with.
    fn id(&self) -> &str;

    /// Read the next frame. A failure here means the handle is no longer
    /// usable and the caller should release it and reconnect.
    fn read_frame(&mut self) -> Result<Frame, SourceError>;

    /// Parameters the device actually negotiated.
    fn negotiated(&self) -> NegotiatedParams;

    /// Release the underlying handle.
    fn close(&mut self);
}

/// Open a source by id. `stub://` ids produce a deterministic synthetic
/// source; anything else is an external backend this build does not carry.
pub fn open_source(
    id: &str,
    settings: &SourceSettings,
) -> Result<Box<dyn FrameSource>, SourceError> {
    if id.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::open(id, settings)));
    }
    Err(SourceError::Unsupported(id.to_string()))
}
