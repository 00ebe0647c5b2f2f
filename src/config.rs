//! Pipeline configuration.
//!
//! Loaded from an optional TOML file (path in `FACEWATCH_CONFIG` or passed
//! explicitly), then overridden field-by-field from environment variables,
//! then validated. Every knob has a default so the pipeline runs with no
//! config at all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

const DEFAULT_SOURCE_ID: &str = "stub://camera0";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1000;
const DEFAULT_SWITCH_RETRIES: u32 = 4;
const DEFAULT_STRIDE: u64 = 15;
const DEFAULT_MIN_INTERVAL_MS: u64 = 500;
const DEFAULT_QUEUE_CAPACITY: usize = 2;
const DEFAULT_AUX_STRIDE: u64 = 30;
const DEFAULT_COOLDOWN_SECS: u64 = 5;
const DEFAULT_HISTORY_LIMIT: usize = 100;
const DEFAULT_CAPTURE_DIR: &str = "captures";
const DEFAULT_STREAM_FPS: u32 = 30;
const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    source: Option<SourceSection>,
    analysis: Option<AnalysisSection>,
    capture: Option<CaptureSection>,
    stream: Option<StreamSection>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceSection {
    id: Option<String>,
    default_id: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    reconnect_backoff_ms: Option<u64>,
    switch_retries: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisSection {
    stride: Option<u64>,
    min_interval_ms: Option<u64>,
    queue_capacity: Option<usize>,
    aux_enabled: Option<bool>,
    aux_stride: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureSection {
    cooldown_secs: Option<u64>,
    history_limit: Option<usize>,
    directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamSection {
    fps: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Clone, Debug)]
pub struct SourceSettings {
    pub id: String,
    /// Fallback id when a requested switch exhausts its retries.
    pub default_id: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub reconnect_backoff: Duration,
    pub switch_retries: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            id: DEFAULT_SOURCE_ID.to_string(),
            default_id: DEFAULT_SOURCE_ID.to_string(),
            target_fps: DEFAULT_TARGET_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            reconnect_backoff: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MS),
            switch_retries: DEFAULT_SWITCH_RETRIES,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AnalysisSettings {
    /// Process every Nth captured frame.
    pub stride: u64,
    /// Minimum wall-clock gap between sampled frames.
    pub min_interval: Duration,
    /// Analysis queue capacity. Small by design (2-5).
    pub queue_capacity: usize,
    pub aux_enabled: bool,
    /// Auxiliary classification cadence, coarser than detection.
    pub aux_stride: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            stride: DEFAULT_STRIDE,
            min_interval: Duration::from_millis(DEFAULT_MIN_INTERVAL_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            aux_enabled: false,
            aux_stride: DEFAULT_AUX_STRIDE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub cooldown: Duration,
    pub history_limit: usize,
    pub directory: PathBuf,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            directory: PathBuf::from(DEFAULT_CAPTURE_DIR),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StreamSettings {
    pub fps: u32,
    pub jpeg_quality: u8,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_STREAM_FPS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
    pub source: SourceSettings,
    pub analysis: AnalysisSettings,
    pub capture: CaptureSettings,
    pub stream: StreamSettings,
}

impl PipelineConfig {
    /// Load from the file named by `FACEWATCH_CONFIG` (if set), apply env
    /// overrides, validate.
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("FACEWATCH_CONFIG").ok() {
            Some(path) => read_config_file(Path::new(&path))?,
            None => ConfigFile::default(),
        };
        Self::finish(file_cfg)
    }

    /// Load from an explicit file path, apply env overrides, validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::finish(read_config_file(path)?)
    }

    fn finish(file: ConfigFile) -> Result<Self> {
        let mut cfg = Self::from_file(file);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Self {
        let mut cfg = Self::default();
        if let Some(source) = file.source {
            if let Some(id) = source.id {
                cfg.source.id = id;
            }
            if let Some(default_id) = source.default_id {
                cfg.source.default_id = default_id;
            }
            if let Some(fps) = source.target_fps {
                cfg.source.target_fps = fps;
            }
            if let Some(width) = source.width {
                cfg.source.width = width;
            }
            if let Some(height) = source.height {
                cfg.source.height = height;
            }
            if let Some(ms) = source.reconnect_backoff_ms {
                cfg.source.reconnect_backoff = Duration::from_millis(ms);
            }
            if let Some(retries) = source.switch_retries {
                cfg.source.switch_retries = retries;
            }
        }
        if let Some(analysis) = file.analysis {
            if let Some(stride) = analysis.stride {
                cfg.analysis.stride = stride;
            }
            if let Some(ms) = analysis.min_interval_ms {
                cfg.analysis.min_interval = Duration::from_millis(ms);
            }
            if let Some(capacity) = analysis.queue_capacity {
                cfg.analysis.queue_capacity = capacity;
            }
            if let Some(enabled) = analysis.aux_enabled {
                cfg.analysis.aux_enabled = enabled;
            }
            if let Some(stride) = analysis.aux_stride {
                cfg.analysis.aux_stride = stride;
            }
        }
        if let Some(capture) = file.capture {
            if let Some(secs) = capture.cooldown_secs {
                cfg.capture.cooldown = Duration::from_secs(secs);
            }
            if let Some(limit) = capture.history_limit {
                cfg.capture.history_limit = limit;
            }
            if let Some(dir) = capture.directory {
                cfg.capture.directory = dir;
            }
        }
        if let Some(stream) = file.stream {
            if let Some(fps) = stream.fps {
                cfg.stream.fps = fps;
            }
            if let Some(quality) = stream.jpeg_quality {
                cfg.stream.jpeg_quality = quality;
            }
        }
        cfg
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(id) = std::env::var("FACEWATCH_SOURCE") {
            self.source.id = id;
        }
        if let Ok(id) = std::env::var("FACEWATCH_DEFAULT_SOURCE") {
            self.source.default_id = id;
        }
        if let Some(fps) = env_parse("FACEWATCH_TARGET_FPS")? {
            self.source.target_fps = fps;
        }
        if let Some(stride) = env_parse("FACEWATCH_STRIDE")? {
            self.analysis.stride = stride;
        }
        if let Some(ms) = env_parse("FACEWATCH_MIN_INTERVAL_MS")? {
            self.analysis.min_interval = Duration::from_millis(ms);
        }
        if let Some(enabled) = env_parse("FACEWATCH_AUX_ENABLED")? {
            self.analysis.aux_enabled = enabled;
        }
        if let Some(stride) = env_parse("FACEWATCH_AUX_STRIDE")? {
            self.analysis.aux_stride = stride;
        }
        if let Some(secs) = env_parse("FACEWATCH_COOLDOWN_SECS")? {
            self.capture.cooldown = Duration::from_secs(secs);
        }
        if let Ok(dir) = std::env::var("FACEWATCH_CAPTURE_DIR") {
            self.capture.directory = PathBuf::from(dir);
        }
        if let Some(fps) = env_parse("FACEWATCH_STREAM_FPS")? {
            self.stream.fps = fps;
        }
        if let Some(quality) = env_parse("FACEWATCH_JPEG_QUALITY")? {
            self.stream.jpeg_quality = quality;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.target_fps == 0 {
            return Err(anyhow!("source.target_fps must be at least 1"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be non-zero"));
        }
        if self.source.switch_retries == 0 {
            return Err(anyhow!("source.switch_retries must be at least 1"));
        }
        if self.analysis.stride == 0 {
            return Err(anyhow!("analysis.stride must be at least 1"));
        }
        if !(2..=5).contains(&self.analysis.queue_capacity) {
            return Err(anyhow!(
                "analysis.queue_capacity must be between 2 and 5, got {}",
                self.analysis.queue_capacity
            ));
        }
        if !(10..=60).contains(&self.analysis.aux_stride) {
            return Err(anyhow!(
                "analysis.aux_stride must be between 10 and 60, got {}",
                self.analysis.aux_stride
            ));
        }
        if self.capture.history_limit == 0 {
            return Err(anyhow!("capture.history_limit must be at least 1"));
        }
        if self.stream.fps == 0 {
            return Err(anyhow!("stream.fps must be at least 1"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!(
                "stream.jpeg_quality must be between 1 and 100, got {}",
                self.stream.jpeg_quality
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("invalid {key}={raw}: {err}")),
        Err(_) => Ok(None),
    }
}
