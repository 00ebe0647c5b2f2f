//! Frames and the shared frame buffer.
//!
//! - `Frame`: one captured image plus timestamp and sequence id. Pixels are
//!   immutable after capture; cloning shares the buffer, so every consumer
//!   gets a read-only snapshot without copying.
//! - `FrameBuffer`: the synchronization point between capture, analysis and
//!   presentation. It holds the single most-recent frame (display path) and a
//!   small bounded queue (analysis path) with a drop-oldest overflow policy.
//!
//! The buffer never blocks: `latest()` replaces rather than queues, and the
//! analysis queue evicts its oldest entry to admit the newest so analysis
//! always works on the freshest available frames.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use image::RgbImage;

/// One captured frame: RGB8 pixels, capture timestamps and a monotonically
/// increasing sequence id assigned by the source.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub seq: u64,
    pub captured_at: Instant,
    /// Wall-clock capture time in milliseconds since the epoch.
    pub wall_time_ms: u64,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, seq: u64) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
            seq,
            captured_at: Instant::now(),
            wall_time_ms: epoch_ms(),
        }
    }

    /// Raw RGB8 pixel data, row-major, no padding.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Copy the pixel data into an owned `RgbImage` for drawing/encoding.
    /// Returns `None` when the pixel length does not match the dimensions.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.to_vec())
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Shared frame state: latest-frame slot plus a bounded analysis queue.
///
/// Overflow policy is drop-oldest: when the queue is full, the oldest queued
/// frame is evicted to admit the newest and the drop counter increments once
/// per evicted frame. This bounds memory under sustained overload.
pub struct FrameBuffer {
    latest: Option<Frame>,
    queue: VecDeque<Frame>,
    capacity: usize,
    dropped: u64,
    total: u64,
}

impl FrameBuffer {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            latest: None,
            queue: VecDeque::with_capacity(queue_capacity),
            capacity: queue_capacity,
            dropped: 0,
            total: 0,
        }
    }

    /// Replace the latest frame. The display path never queues.
    pub fn publish(&mut self, frame: Frame) {
        self.latest = Some(frame);
        self.total += 1;
    }

    /// Snapshot of the most recently published frame.
    pub fn latest(&self) -> Option<Frame> {
        self.latest.clone()
    }

    /// Queue a frame for analysis. Returns false when an older frame had to
    /// be evicted to make room.
    pub fn enqueue_for_analysis(&mut self, frame: Frame) -> bool {
        let mut admitted_cleanly = true;
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
            admitted_cleanly = false;
        }
        self.queue.push_back(frame);
        admitted_cleanly
    }

    pub fn dequeue_for_analysis(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    pub fn total_frames(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64) -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, seq)
    }

    #[test]
    fn latest_replaces_never_queues() {
        let mut buf = FrameBuffer::new(3);
        assert!(buf.latest().is_none());
        buf.publish(frame(1));
        buf.publish(frame(2));
        assert_eq!(buf.latest().unwrap().seq, 2);
        assert_eq!(buf.total_frames(), 2);
        assert_eq!(buf.queue_depth(), 0);
    }

    #[test]
    fn queue_never_exceeds_capacity_and_counts_drops() {
        let mut buf = FrameBuffer::new(3);
        for seq in 1..=10 {
            buf.enqueue_for_analysis(frame(seq));
            assert!(buf.queue_depth() <= 3);
        }
        // The three most recently submitted frames survive; 7 were evicted.
        assert_eq!(buf.dropped_frames(), 7);
        let remaining: Vec<u64> = std::iter::from_fn(|| buf.dequeue_for_analysis())
            .map(|f| f.seq)
            .collect();
        assert_eq!(remaining, vec![8, 9, 10]);
    }

    #[test]
    fn enqueue_reports_eviction() {
        let mut buf = FrameBuffer::new(2);
        assert!(buf.enqueue_for_analysis(frame(1)));
        assert!(buf.enqueue_for_analysis(frame(2)));
        assert!(!buf.enqueue_for_analysis(frame(3)));
        assert_eq!(buf.dropped_frames(), 1);
    }

    #[test]
    fn frame_pixels_round_trip_to_image() {
        let f = Frame::new(vec![7u8; 2 * 2 * 3], 2, 2, 1);
        let img = f.to_rgb_image().unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(1, 1).0, [7, 7, 7]);
    }
}
