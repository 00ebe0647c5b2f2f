//! facewatchd - face recognition pipeline daemon
//!
//! This daemon:
//! 1. Opens the configured frame source (stub:// synthetic sources for now)
//! 2. Runs the capture and analysis threads via the pipeline context
//! 3. Drains an annotated MJPEG stream (payloads discarded; a transport
//!    layer would forward them)
//! 4. Logs pipeline health every few seconds
//! 5. Stops cleanly on Ctrl-C with bounded thread joins

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use facewatch::analysis::{Models, StubClassifier, StubDetector, StubRecognizer};
use facewatch::{IdentityLabel, Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Face recognition pipeline daemon")]
struct Args {
    /// Path to a TOML config file. Falls back to FACEWATCH_CONFIG, then to
    /// built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frame source id, e.g. stub://camera0. Overrides the config file.
    #[arg(long, env = "FACEWATCH_SOURCE")]
    source: Option<String>,

    /// Identity to auto-capture on sight. Repeatable.
    #[arg(long = "watch")]
    watch: Vec<String>,

    /// Exit after this many seconds instead of running until Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_from(path)?,
        None => PipelineConfig::load()?,
    };
    if let Some(source) = &args.source {
        config.source.id = source.clone();
    }
    config.validate()?;

    // Stub models: deterministic detector/recognizer/classifier keyed on
    // frame content. Real backends implement the same traits.
    let roster: Vec<IdentityLabel> = args.watch.iter().map(|w| w.as_str().into()).collect();
    let models = Models {
        detector: Box::new(StubDetector),
        recognizer: Box::new(StubRecognizer::with_roster(args.watch.clone())),
        classifier: Box::new(StubClassifier::new()),
    };

    let mut pipeline = Pipeline::new(config, models)?;
    for identity in roster {
        pipeline.add_target(identity);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_handler.store(true, Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    pipeline
        .start()
        .map_err(|err| anyhow::anyhow!("pipeline start failed: {err}"))?;
    log::info!("facewatchd running");

    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut stream = pipeline.open_stream();
    let mut last_health_log = Instant::now();
    let mut parts = 0u64;

    while !shutdown.load(Ordering::SeqCst) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }

        // Drain the stream at its own cadence. A transport layer would write
        // each part to a connection; the daemon discards them.
        match stream.next() {
            Some(_part) => parts += 1,
            None => break,
        }

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let snap = pipeline.metrics();
            log::info!(
                "health source={} fps={:.1} queue={} dropped={} cycles={} failures={} reconnects={} stream_parts={}",
                snap.source_id,
                snap.fps,
                snap.queue_depth,
                snap.dropped_frames,
                snap.analysis_cycles,
                snap.analysis_failures,
                snap.source_reconnects,
                parts
            );
            last_health_log = Instant::now();
        }
    }

    pipeline
        .stop()
        .map_err(|err| anyhow::anyhow!("pipeline stop failed: {err}"))?;
    let captures = pipeline.history(usize::MAX);
    log::info!(
        "facewatchd exiting: {} stream parts, {} captures recorded",
        parts,
        captures.len()
    );
    Ok(())
}
