//! Annotated stream presentation.
//!
//! The presenter composites the latest captured frame with the latest
//! analysis result at its own cadence. The two are read independently and may
//! correspond to different source frames; that skew is accepted by contract
//! so presentation never blocks on analysis.
//!
//! `MjpegStream` exposes the output as a lazy, infinite, restartable sequence
//! of boundary-delimited JPEG parts suitable for chunked delivery. The
//! transport protocol itself is out of scope.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::analysis::{AnalysisResult, IdentityLabel};
use crate::capture::CooldownCaptureController;
use crate::config::StreamSettings;
use crate::frame::{Frame, FrameBuffer};
use crate::lock;
use crate::pipeline::StopFlag;

/// Part boundary token for the multipart stream.
pub const MJPEG_BOUNDARY: &str = "frame";

const RECOGNIZED: Rgb<u8> = Rgb([0, 200, 0]);
const WATCHED: Rgb<u8> = Rgb([255, 165, 0]);
const UNRECOGNIZED: Rgb<u8> = Rgb([220, 40, 40]);
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

const BOX_THICKNESS: i32 = 3;

/// Renders one annotated, encoded frame. Encoding quality is fixed
/// configuration, never derived from content.
pub struct StreamPresenter {
    quality: u8,
}

impl StreamPresenter {
    pub fn new(settings: &StreamSettings) -> Self {
        Self {
            quality: settings.jpeg_quality,
        }
    }

    /// Composite `frame` with `result` and encode to JPEG. `targets` selects
    /// the highlight color for watched identities.
    pub fn render_frame(
        &self,
        frame: &Frame,
        result: &AnalysisResult,
        targets: &HashSet<IdentityLabel>,
    ) -> Result<Vec<u8>> {
        let mut img = frame
            .to_rgb_image()
            .context("frame pixel data does not match its dimensions")?;

        for (i, region) in result.regions.iter().enumerate() {
            let identity = result.identities.get(i);
            let watched = identity.map(|id| targets.contains(id)).unwrap_or(false);
            let color = match identity {
                Some(id) if id.is_unknown() => UNRECOGNIZED,
                Some(_) if watched => WATCHED,
                Some(_) => RECOGNIZED,
                None => UNRECOGNIZED,
            };

            draw_region_box(
                &mut img,
                region.x,
                region.y,
                region.w,
                region.h,
                color,
                BOX_THICKNESS,
            );

            let mut text = identity
                .map(|id| id.to_string())
                .unwrap_or_else(|| IdentityLabel::UNKNOWN.to_string());
            if let Some(aux) = result.aux_labels.get(i) {
                text.push_str(&format!(" ({aux})"));
            }
            if watched {
                text.push_str(" [AUTO]");
            }
            draw_label(
                &mut img,
                &text,
                region.x,
                region.y + region.h as i32 + 2,
                LABEL_TEXT,
                Some(color),
            );
        }

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        encoder.write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(jpeg)
    }
}

/// Wrap one encoded image as a multipart part:
/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`.
pub fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// Lazy, infinite sequence of encoded frames at a fixed presentation cadence.
///
/// Each `next()` reads the latest frame and latest result independently. The
/// iterator terminates when the pipeline's stop flag is raised; opening a new
/// stream afterwards is always allowed (restartable).
pub struct MjpegStream {
    buffer: Arc<Mutex<FrameBuffer>>,
    current: Arc<Mutex<AnalysisResult>>,
    capture: Arc<Mutex<CooldownCaptureController>>,
    stop: StopFlag,
    presenter: StreamPresenter,
    interval: Duration,
    last_yield: Option<Instant>,
}

impl MjpegStream {
    pub(crate) fn new(
        buffer: Arc<Mutex<FrameBuffer>>,
        current: Arc<Mutex<AnalysisResult>>,
        capture: Arc<Mutex<CooldownCaptureController>>,
        stop: StopFlag,
        settings: &StreamSettings,
    ) -> Self {
        Self {
            buffer,
            current,
            capture,
            stop,
            presenter: StreamPresenter::new(settings),
            interval: Duration::from_secs_f64(1.0 / settings.fps.max(1) as f64),
            last_yield: None,
        }
    }
}

impl Iterator for MjpegStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.stop.is_set() {
                return None;
            }
            if let Some(last) = self.last_yield {
                let due = last + self.interval;
                let now = Instant::now();
                if now < due {
                    std::thread::sleep(due - now);
                }
            }
            let frame = lock(&self.buffer).latest();
            let Some(frame) = frame else {
                // Nothing captured yet. Wait a tick rather than yielding an
                // empty payload.
                std::thread::sleep(self.interval.min(Duration::from_millis(20)));
                continue;
            };
            let result = lock(&self.current).clone();
            let targets = lock(&self.capture).targets();
            self.last_yield = Some(Instant::now());
            match self.presenter.render_frame(&frame, &result, &targets) {
                Ok(jpeg) => return Some(mjpeg_part(&jpeg)),
                Err(err) => {
                    log::warn!("render failed on frame {}: {err:#}", frame.seq);
                    continue;
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Overlay drawing
// ----------------------------------------------------------------------------

/// Thick hollow rectangle, drawn as stacked 1px rectangles expanding outward.
fn draw_region_box(
    img: &mut RgbImage,
    x: i32,
    y: i32,
    w: u32,
    h: u32,
    color: Rgb<u8>,
    thickness: i32,
) {
    if w == 0 || h == 0 {
        return;
    }
    for offset in 0..thickness {
        let rect = Rect::at(x - offset, y - offset)
            .of_size(w + (offset * 2) as u32, h + (offset * 2) as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}

const GLYPH_W: i32 = 6;
const GLYPH_H: i32 = 7;

/// Label text in a 5x7 bitmap font over an optional filled background.
/// All writes are bounds-checked, so labels at the image edge clip cleanly.
fn draw_label(
    img: &mut RgbImage,
    text: &str,
    x: i32,
    y: i32,
    color: Rgb<u8>,
    bg_color: Option<Rgb<u8>>,
) {
    if let Some(bg) = bg_color {
        // Glyphs are placed per char, so the background must be sized in
        // chars too; byte length overshoots on multi-byte identities.
        let bg_w = text.chars().count() as i32 * GLYPH_W + 2;
        let bg_h = GLYPH_H + 2;
        for dy in 0..bg_h {
            for dx in 0..bg_w {
                put_pixel_checked(img, x + dx, y + dy, bg);
            }
        }
    }

    for (i, ch) in text.to_uppercase().chars().enumerate() {
        let glyph_x = x + 1 + i as i32 * GLYPH_W;
        let glyph_y = y + 1;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..5 {
                if (bits >> (4 - col)) & 1 == 1 {
                    put_pixel_checked(img, glyph_x + col, glyph_y + row as i32, color);
                }
            }
        }
    }
}

fn put_pixel_checked(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// 5x7 glyph rows, one bit per column, MSB leftmost.
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '[' => [0b01110, 0b01000, 0b01000, 0b01000, 0b01000, 0b01000, 0b01110],
        ']' => [0b01110, 0b00010, 0b00010, 0b00010, 0b00010, 0b00010, 0b01110],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        ' ' => [0b00000; 7],
        // Box for anything outside the glyph set.
        _ => [0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AuxLabel, Region};
    use crate::config::StreamSettings;

    fn frame() -> Frame {
        Frame::new(vec![128u8; 64 * 48 * 3], 64, 48, 1)
    }

    fn settings() -> StreamSettings {
        StreamSettings {
            fps: 30,
            jpeg_quality: 90,
        }
    }

    fn result_one_face() -> AnalysisResult {
        AnalysisResult {
            regions: vec![Region::face(10, 10, 16, 16, 0.9)],
            identities: vec![IdentityLabel::new("alice")],
            aux_labels: vec![AuxLabel::new("happy")],
            frame_seq: 1,
            wall_time_ms: 1,
            valid: true,
        }
    }

    #[test]
    fn render_produces_jpeg() {
        let presenter = StreamPresenter::new(&settings());
        let jpeg = presenter
            .render_frame(&frame(), &result_one_face(), &HashSet::new())
            .unwrap();
        // JPEG start-of-image marker.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn overlay_clips_at_image_edges() {
        let presenter = StreamPresenter::new(&settings());
        let result = AnalysisResult {
            regions: vec![
                Region::face(-5, -5, 16, 16, 0.9),
                Region::face(60, 44, 16, 16, 0.9),
            ],
            identities: vec![IdentityLabel::unknown(), IdentityLabel::new("bob")],
            aux_labels: Vec::new(),
            frame_seq: 1,
            wall_time_ms: 1,
            valid: true,
        };
        // Must not panic on out-of-bounds regions or labels.
        presenter
            .render_frame(&frame(), &result, &HashSet::new())
            .unwrap();
    }

    #[test]
    fn part_framing_is_boundary_delimited() {
        let part = mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let text = String::from_utf8_lossy(&part[..40.min(part.len())]);
        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert_eq!(&part[part.len() - 2..], b"\r\n");
    }

    #[test]
    fn label_background_is_sized_in_chars_not_bytes() {
        // One char, two bytes: the background must span one glyph cell
        // (6px + 2px padding), not two.
        let mut img = RgbImage::new(64, 48);
        draw_label(&mut img, "é", 2, 2, LABEL_TEXT, Some(RECOGNIZED));
        // Top-left padding pixel is background; a byte-sized background
        // would also paint the column at x=12.
        assert_eq!(*img.get_pixel(2, 2), RECOGNIZED);
        assert_eq!(*img.get_pixel(12, 3), Rgb([0, 0, 0]));
    }

    #[test]
    fn watched_identity_gets_auto_suffix_color() {
        // Smoke test: rendering with a watched identity exercises the watched
        // color path without panicking.
        let presenter = StreamPresenter::new(&settings());
        let mut targets = HashSet::new();
        targets.insert(IdentityLabel::new("alice"));
        presenter
            .render_frame(&frame(), &result_one_face(), &targets)
            .unwrap();
    }
}
