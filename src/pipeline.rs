//! The pipeline context object.
//!
//! One `Pipeline` owns everything: the frame buffer, the sampling gate, the
//! analysis engine, the cooldown controller and the metrics collector. There
//! are no process-wide globals; control operations and streams all go through
//! a pipeline handle.
//!
//! Concurrency model: one capture thread, one analysis worker, any number of
//! presentation iterators. They communicate only through the shared state
//! below, each piece behind its own mutex with copy-on-read snapshots. A
//! single stop flag is checked at the top of every loop iteration; shutdown
//! joins both threads with a bounded timeout so nothing blocks indefinitely.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::analysis::{AnalysisEngine, AnalysisResult, AuxControl, Models, SamplingGate};
use crate::capture::{CaptureEvent, CooldownCaptureController};
use crate::config::PipelineConfig;
use crate::error::ControlError;
use crate::frame::FrameBuffer;
use crate::lock;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::source::SourceManager;
use crate::stream::MjpegStream;

/// How long `stop()` waits for each worker thread.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Analysis worker poll interval when the queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Cooperative stop signal shared by every loop and stream.
#[derive(Clone)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    fn new(set: bool) -> Self {
        Self(Arc::new(AtomicBool::new(set)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Shared {
    buffer: Arc<Mutex<FrameBuffer>>,
    gate: Mutex<SamplingGate>,
    current: Arc<Mutex<AnalysisResult>>,
    capture: Arc<Mutex<CooldownCaptureController>>,
    metrics: Mutex<MetricsCollector>,
    source: Mutex<SourceManager>,
    engine: Mutex<AnalysisEngine>,
    aux: AuxControl,
    stop: StopFlag,
}

struct WorkerThreads {
    capture: JoinHandle<()>,
    analysis: JoinHandle<()>,
}

pub struct Pipeline {
    config: PipelineConfig,
    shared: Arc<Shared>,
    threads: Option<WorkerThreads>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, models: Models) -> Result<Self> {
        let controller = CooldownCaptureController::new(&config.capture)?;
        let shared = Arc::new(Shared {
            buffer: Arc::new(Mutex::new(FrameBuffer::new(config.analysis.queue_capacity))),
            gate: Mutex::new(SamplingGate::new(
                config.analysis.stride,
                config.analysis.min_interval,
            )),
            current: Arc::new(Mutex::new(AnalysisResult::empty())),
            capture: Arc::new(Mutex::new(controller)),
            metrics: Mutex::new(MetricsCollector::new(&config.source.id)),
            source: Mutex::new(SourceManager::new(&config.source)),
            engine: Mutex::new(AnalysisEngine::new(models)),
            aux: AuxControl::new(config.analysis.aux_enabled, config.analysis.aux_stride),
            // Stopped until start(); streams opened early terminate at once.
            stop: StopFlag::new(true),
        });
        Ok(Self {
            config,
            shared,
            threads: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.threads.is_some()
    }

    /// Spawn the capture and analysis threads.
    pub fn start(&mut self) -> Result<(), ControlError> {
        if self.threads.is_some() {
            return Err(ControlError::AlreadyRunning);
        }
        self.shared.stop.clear();

        let interval = Duration::from_secs_f64(1.0 / self.config.source.target_fps.max(1) as f64);
        let backoff = self.config.source.reconnect_backoff;
        let capture_shared = self.shared.clone();
        let capture = std::thread::Builder::new()
            .name("facewatch-capture".to_string())
            .spawn(move || run_capture_loop(capture_shared, interval, backoff))
            .map_err(|err| ControlError::CaptureFailed(err.to_string()))?;

        let analysis_shared = self.shared.clone();
        let analysis = std::thread::Builder::new()
            .name("facewatch-analysis".to_string())
            .spawn(move || run_analysis_loop(analysis_shared))
            .map_err(|err| ControlError::CaptureFailed(err.to_string()))?;

        self.threads = Some(WorkerThreads { capture, analysis });
        log::info!("pipeline started (source '{}')", self.config.source.id);
        Ok(())
    }

    /// Signal stop and join both workers within the shutdown timeout. An
    /// in-flight analysis cycle finishes; it is never killed mid-cycle.
    pub fn stop(&mut self) -> Result<(), ControlError> {
        let threads = self.threads.take().ok_or(ControlError::NotRunning)?;
        self.shared.stop.set();
        join_with_timeout(threads.capture, "capture")?;
        join_with_timeout(threads.analysis, "analysis")?;
        log::info!("pipeline stopped");
        Ok(())
    }

    /// Switch the frame source. Blocks until the new source is open, or
    /// until retries are exhausted and the default source has been opened as
    /// fallback. Returns the id that ended up open.
    pub fn switch_source(&self, new_id: &str) -> Result<String, ControlError> {
        let mut source = lock(&self.shared.source);
        let opened = source
            .switch_source(new_id)
            .map_err(|err| ControlError::SourceSwitch(err.to_string()))?;
        let negotiated = source.negotiated();
        drop(source);
        lock(&self.shared.metrics).set_source(&opened, negotiated);
        Ok(opened)
    }

    pub fn add_target(&self, identity: crate::analysis::IdentityLabel) {
        lock(&self.shared.capture).add_target(identity);
    }

    pub fn remove_target(
        &self,
        identity: &crate::analysis::IdentityLabel,
    ) -> Result<(), ControlError> {
        lock(&self.shared.capture).remove_target(identity)
    }

    pub fn clear_targets(&self) {
        lock(&self.shared.capture).clear_targets();
    }

    pub fn targets(&self) -> std::collections::HashSet<crate::analysis::IdentityLabel> {
        lock(&self.shared.capture).targets()
    }

    pub fn set_aux_enabled(&self, enabled: bool) {
        self.shared.aux.set_enabled(enabled);
    }

    pub fn aux_enabled(&self) -> bool {
        self.shared.aux.enabled()
    }

    pub fn set_aux_stride(&self, stride: u64) -> Result<(), ControlError> {
        if !(10..=60).contains(&stride) {
            return Err(ControlError::InvalidAuxStride(stride));
        }
        self.shared.aux.set_stride(stride);
        Ok(())
    }

    pub fn set_stride(&self, stride: u64) -> Result<(), ControlError> {
        if stride == 0 {
            return Err(ControlError::InvalidStride(stride));
        }
        lock(&self.shared.gate).set_stride(stride);
        Ok(())
    }

    pub fn set_min_interval(&self, interval: Duration) -> Result<(), ControlError> {
        if interval.is_zero() {
            return Err(ControlError::InvalidInterval(interval));
        }
        lock(&self.shared.gate).set_min_interval(interval);
        Ok(())
    }

    /// Capture the latest frame immediately, bypassing watch set and
    /// cooldown.
    pub fn manual_capture(&self) -> Result<CaptureEvent, ControlError> {
        let frame = lock(&self.shared.buffer)
            .latest()
            .ok_or(ControlError::NoFrame)?;
        lock(&self.shared.capture)
            .manual_capture(&frame)
            .map_err(|err| ControlError::CaptureFailed(err.to_string()))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let (depth, dropped, total) = {
            let buffer = lock(&self.shared.buffer);
            (
                buffer.queue_depth(),
                buffer.dropped_frames(),
                buffer.total_frames(),
            )
        };
        lock(&self.shared.metrics).snapshot(depth, dropped, total)
    }

    pub fn history(&self, limit: usize) -> Vec<CaptureEvent> {
        lock(&self.shared.capture).history(limit)
    }

    pub fn current_result(&self) -> AnalysisResult {
        lock(&self.shared.current).clone()
    }

    /// Open a new annotated stream. Streams are independent and restartable;
    /// each terminates when the pipeline stops.
    pub fn open_stream(&self) -> MjpegStream {
        MjpegStream::new(
            self.shared.buffer.clone(),
            self.shared.current.clone(),
            self.shared.capture.clone(),
            self.shared.stop.clone(),
            &self.config.stream,
        )
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.threads.is_some() {
            let _ = self.stop();
        }
    }
}

/// Dedicated capture loop: pace to the target interval, publish every frame,
/// enqueue sampled frames, back off after source errors.
fn run_capture_loop(shared: Arc<Shared>, interval: Duration, backoff: Duration) {
    let mut next_due = Instant::now();
    while !shared.stop.is_set() {
        let now = Instant::now();
        if now < next_due {
            // Ahead of the target interval: yield instead of busy-spinning.
            std::thread::sleep((next_due - now).min(interval));
            continue;
        }
        next_due = now + interval;

        let read = lock(&shared.source).read_frame();
        match read {
            Ok(frame) => {
                let (source_id, negotiated) = {
                    let source = lock(&shared.source);
                    (source.current_id().to_string(), source.negotiated())
                };
                {
                    let mut metrics = lock(&shared.metrics);
                    metrics.record_capture(frame.captured_at);
                    metrics.set_source(&source_id, negotiated);
                }
                let sampled = lock(&shared.gate).should_sample(frame.seq, Instant::now());
                let mut buffer = lock(&shared.buffer);
                buffer.publish(frame.clone());
                if sampled {
                    buffer.enqueue_for_analysis(frame);
                }
            }
            Err(err) => {
                let reconnects = lock(&shared.source).reconnects();
                lock(&shared.metrics).record_reconnects(reconnects);
                log::warn!("capture error: {err}, backing off {backoff:?}");
                sleep_unless_stopped(&shared.stop, backoff);
            }
        }
    }
    lock(&shared.source).close();
}

/// Single analysis worker: drain the queue, run cycles, publish snapshots,
/// feed the cooldown controller.
fn run_analysis_loop(shared: Arc<Shared>) {
    while !shared.stop.is_set() {
        let frame = lock(&shared.buffer).dequeue_for_analysis();
        let Some(frame) = frame else {
            std::thread::sleep(IDLE_POLL);
            continue;
        };
        let result = lock(&shared.engine).run_cycle(&frame, &shared.aux);
        lock(&shared.metrics).record_cycle(!result.valid);
        *lock(&shared.current) = result.clone();
        if result.valid && !result.identities.is_empty() {
            lock(&shared.capture).observe(&result, &frame);
        }
    }
}

fn sleep_unless_stopped(stop: &StopFlag, total: Duration) {
    let slice = Duration::from_millis(50);
    let deadline = Instant::now() + total;
    while !stop.is_set() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(slice));
    }
}

fn join_with_timeout(handle: JoinHandle<()>, name: &'static str) -> Result<(), ControlError> {
    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(ControlError::ShutdownTimeout(name));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        log::error!("{name} thread panicked during shutdown");
    }
    Ok(())
}
