//! Cooldown-gated auto capture.
//!
//! Watches analysis results for recognized identities in the watch set and
//! fires at most one capture per identity per cooldown interval. The cooldown
//! is per-identity: concurrently visible identities fire independently and
//! may all fire in the same cycle. Fired captures persist the analyzed frame
//! as a JPEG artifact and land in a bounded in-memory history ring (oldest
//! evicted first, evictions counted).

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::analysis::{AnalysisResult, AuxLabel, IdentityLabel};
use crate::config::CaptureSettings;
use crate::error::ControlError;
use crate::frame::Frame;

/// JPEG quality for persisted capture artifacts.
const ARTIFACT_JPEG_QUALITY: u8 = 95;

/// One recorded capture.
#[derive(Clone, Debug)]
pub struct CaptureEvent {
    pub identity: IdentityLabel,
    pub aux_label: Option<AuxLabel>,
    pub wall_time_ms: u64,
    pub artifact: PathBuf,
    pub manual: bool,
}

pub struct CooldownCaptureController {
    targets: HashSet<IdentityLabel>,
    last_fired: HashMap<IdentityLabel, Instant>,
    cooldown: Duration,
    history: VecDeque<CaptureEvent>,
    history_limit: usize,
    evicted: u64,
    directory: PathBuf,
}

impl CooldownCaptureController {
    pub fn new(settings: &CaptureSettings) -> Result<Self> {
        std::fs::create_dir_all(&settings.directory).with_context(|| {
            format!(
                "failed to create capture directory {}",
                settings.directory.display()
            )
        })?;
        Ok(Self {
            targets: HashSet::new(),
            last_fired: HashMap::new(),
            cooldown: settings.cooldown,
            history: VecDeque::with_capacity(settings.history_limit),
            history_limit: settings.history_limit,
            evicted: 0,
            directory: settings.directory.clone(),
        })
    }

    pub fn add_target(&mut self, identity: IdentityLabel) {
        self.targets.insert(identity);
    }

    pub fn remove_target(&mut self, identity: &IdentityLabel) -> Result<(), ControlError> {
        if self.targets.remove(identity) {
            Ok(())
        } else {
            Err(ControlError::UnknownIdentity(identity.to_string()))
        }
    }

    pub fn clear_targets(&mut self) {
        self.targets.clear();
    }

    pub fn targets(&self) -> HashSet<IdentityLabel> {
        self.targets.clone()
    }

    /// Evaluate a completed analysis result against the watch set. Returns
    /// the number of captures fired this cycle.
    pub fn observe(&mut self, result: &AnalysisResult, frame: &Frame) -> usize {
        self.observe_at(result, frame, Instant::now())
    }

    pub fn observe_at(&mut self, result: &AnalysisResult, frame: &Frame, now: Instant) -> usize {
        if self.targets.is_empty() {
            return 0;
        }
        let mut fired = 0;
        for (i, identity) in result.identities.iter().enumerate() {
            if identity.is_unknown() || !self.targets.contains(identity) {
                continue;
            }
            if let Some(last) = self.last_fired.get(identity) {
                if now.duration_since(*last) < self.cooldown {
                    continue;
                }
            }
            let aux = result.aux_labels.get(i).cloned();
            self.fire(identity.clone(), aux, frame, now);
            fired += 1;
        }
        fired
    }

    fn fire(&mut self, identity: IdentityLabel, aux: Option<AuxLabel>, frame: &Frame, now: Instant) {
        // The cooldown clock advances even when the artifact write fails, so
        // a broken disk cannot turn into a per-cycle retry storm.
        self.last_fired.insert(identity.clone(), now);

        let filename = format!(
            "capture_{}_{}.jpg",
            filename_safe(identity.as_str()),
            frame.wall_time_ms
        );
        let path = self.directory.join(filename);
        match write_jpeg_artifact(frame, &path) {
            Ok(()) => {
                log::info!("captured '{identity}' -> {}", path.display());
                self.record(CaptureEvent {
                    identity,
                    aux_label: aux,
                    wall_time_ms: frame.wall_time_ms,
                    artifact: path,
                    manual: false,
                });
            }
            Err(err) => {
                log::error!("capture of '{identity}' failed: {err:#}");
            }
        }
    }

    /// Operator-requested capture of the given frame. Bypasses the watch set
    /// and the cooldown.
    pub fn manual_capture(&mut self, frame: &Frame) -> Result<CaptureEvent> {
        let filename = format!("manual_{}.jpg", frame.wall_time_ms);
        let path = self.directory.join(filename);
        write_jpeg_artifact(frame, &path)?;
        let event = CaptureEvent {
            identity: IdentityLabel::unknown(),
            aux_label: None,
            wall_time_ms: frame.wall_time_ms,
            artifact: path,
            manual: true,
        };
        self.record(event.clone());
        log::info!("manual capture -> {}", event.artifact.display());
        Ok(event)
    }

    fn record(&mut self, event: CaptureEvent) {
        if self.history.len() >= self.history_limit {
            self.history.pop_front();
            self.evicted += 1;
        }
        self.history.push_back(event);
    }

    /// The most recent `limit` events in firing order.
    pub fn history(&self, limit: usize) -> Vec<CaptureEvent> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Events evicted from the bounded history so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

/// Identities come in through the control surface, so they cannot be trusted
/// as path components. Everything outside a filename-safe charset becomes an
/// underscore, keeping the artifact inside the capture directory.
fn filename_safe(identity: &str) -> String {
    identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_jpeg_artifact(frame: &Frame, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create artifact {}", path.display()))?;
    let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), ARTIFACT_JPEG_QUALITY);
    encoder
        .write_image(
            frame.pixels(),
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .with_context(|| format!("failed to encode artifact {}", path.display()))?;
    Ok(())
}
