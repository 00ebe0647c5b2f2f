//! Synthetic frame source for `stub://` ids.
//!
//! Generates a moving gradient so consecutive frames differ deterministically:
//! the same sequence id always produces the same pixels. Used by tests and by
//! `facewatchd` when no camera backend is compiled in.

use crate::config::SourceSettings;
use crate::error::SourceError;
use crate::frame::Frame;
use crate::source::{FrameSource, NegotiatedParams};

pub struct SyntheticSource {
    id: String,
    width: u32,
    height: u32,
    fps: u32,
    seq: u64,
    open: bool,
}

impl SyntheticSource {
    pub fn open(id: &str, settings: &SourceSettings) -> Self {
        Self {
            id: id.to_string(),
            width: settings.width,
            height: settings.height,
            fps: settings.target_fps,
            seq: 0,
            open: true,
        }
    }

    fn render(&self, seq: u64) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((self.width * self.height * 3) as usize);
        let shift = (seq * 3) as u32;
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(((x + shift) % 256) as u8);
                pixels.push(((y + shift / 2) % 256) as u8);
                pixels.push(((x + y) % 256) as u8);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if !self.open {
            return Err(SourceError::Closed);
        }
        self.seq += 1;
        Ok(Frame::new(
            self.render(self.seq),
            self.width,
            self.height,
            self.seq,
        ))
    }

    fn negotiated(&self) -> NegotiatedParams {
        NegotiatedParams {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }

    fn close(&mut self) {
        self.open = false;
    }
}
