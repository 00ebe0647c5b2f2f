//! End-to-end pipeline tests over the synthetic stub source.

use std::time::{Duration, Instant};

use tempfile::tempdir;

use facewatch::analysis::{Models, StubClassifier, StubDetector, StubRecognizer};
use facewatch::{ControlError, IdentityLabel, Pipeline, PipelineConfig};

fn test_config(capture_dir: &std::path::Path) -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.source.id = "stub://camera0".to_string();
    cfg.source.default_id = "stub://camera0".to_string();
    cfg.source.target_fps = 60;
    cfg.source.width = 64;
    cfg.source.height = 48;
    cfg.source.reconnect_backoff = Duration::from_millis(10);
    // Sample aggressively so short tests see analysis cycles.
    cfg.analysis.stride = 1;
    cfg.analysis.min_interval = Duration::from_millis(1);
    cfg.analysis.aux_enabled = true;
    cfg.analysis.aux_stride = 10;
    cfg.capture.cooldown = Duration::from_secs(60);
    cfg.capture.directory = capture_dir.to_path_buf();
    cfg.stream.fps = 60;
    cfg.stream.jpeg_quality = 80;
    cfg.validate().expect("test config valid");
    cfg
}

fn stub_models(identity: &str) -> Models {
    Models {
        detector: Box::new(StubDetector),
        recognizer: Box::new(StubRecognizer::always(identity)),
        classifier: Box::new(StubClassifier::new()),
    }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn pipeline_streams_analyzes_and_captures() {
    let dir = tempdir().expect("capture dir");
    let mut pipeline =
        Pipeline::new(test_config(dir.path()), stub_models("alice")).expect("pipeline");
    pipeline.add_target(IdentityLabel::new("alice"));

    // No frame exists before start.
    assert!(matches!(
        pipeline.manual_capture(),
        Err(ControlError::NoFrame)
    ));

    pipeline.start().expect("start");

    // The stream yields boundary-delimited JPEG parts.
    let mut stream = pipeline.open_stream();
    for _ in 0..3 {
        let part = stream.next().expect("stream part");
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(part.starts_with(header));
        // JPEG start-of-image marker right after the header.
        assert_eq!(&part[header.len()..header.len() + 2], &[0xFF, 0xD8]);
    }

    // Analysis runs and the watched identity fires exactly once inside the
    // long cooldown.
    assert!(
        wait_until(Duration::from_secs(5), || pipeline.history(10).len() == 1),
        "expected exactly one capture, got {}",
        pipeline.history(10).len()
    );
    std::thread::sleep(Duration::from_millis(200));
    let history = pipeline.history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].identity.as_str(), "alice");
    assert!(!history[0].manual);
    assert!(history[0].artifact.exists());

    // Manual capture bypasses the cooldown.
    let manual = pipeline.manual_capture().expect("manual capture");
    assert!(manual.manual);
    assert!(manual.artifact.exists());
    assert_eq!(pipeline.history(10).len(), 2);

    let snap = pipeline.metrics();
    assert!(snap.total_frames > 0);
    assert!(snap.analysis_cycles > 0);
    assert_eq!(snap.source_id, "stub://camera0");

    pipeline.stop().expect("stop");

    // Streams terminate once the pipeline stops.
    assert!(stream.next().is_none());
    assert!(pipeline.open_stream().next().is_none());
}

#[test]
fn stop_halts_capture_events_and_stream() {
    let dir = tempdir().expect("capture dir");
    let mut cfg = test_config(dir.path());
    // Near-zero cooldown: a surviving worker would keep appending events.
    cfg.capture.cooldown = Duration::from_millis(1);
    let mut pipeline = Pipeline::new(cfg, stub_models("alice")).expect("pipeline");
    pipeline.add_target(IdentityLabel::new("alice"));
    pipeline.start().expect("start");

    let mut stream = pipeline.open_stream();
    assert!(wait_until(Duration::from_secs(5), || {
        !pipeline.history(usize::MAX).is_empty()
    }));

    pipeline.stop().expect("stop");
    let recorded = pipeline.history(usize::MAX).len();

    // Several presentation ticks after stop: history must not grow.
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(pipeline.history(usize::MAX).len(), recorded);
    assert!(stream.next().is_none());
}

#[test]
fn start_and_stop_are_guarded() {
    let dir = tempdir().expect("capture dir");
    let mut pipeline =
        Pipeline::new(test_config(dir.path()), stub_models("alice")).expect("pipeline");

    assert!(matches!(pipeline.stop(), Err(ControlError::NotRunning)));
    pipeline.start().expect("start");
    assert!(matches!(
        pipeline.start(),
        Err(ControlError::AlreadyRunning)
    ));
    pipeline.stop().expect("stop");
    assert!(matches!(pipeline.stop(), Err(ControlError::NotRunning)));

    // The pipeline is restartable.
    pipeline.start().expect("restart");
    pipeline.stop().expect("stop again");
}

#[test]
fn switch_source_falls_back_to_default() {
    let dir = tempdir().expect("capture dir");
    let mut pipeline =
        Pipeline::new(test_config(dir.path()), stub_models("alice")).expect("pipeline");
    pipeline.start().expect("start");

    let opened = pipeline.switch_source("stub://backyard").expect("switch");
    assert_eq!(opened, "stub://backyard");
    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.metrics().source_id == "stub://backyard"
    }));

    // An unsupported source exhausts retries and falls back to the default.
    let opened = pipeline.switch_source("rtsp://nope").expect("fallback");
    assert_eq!(opened, "stub://camera0");

    pipeline.stop().expect("stop");
}

#[test]
fn runtime_tuning_is_validated() {
    let dir = tempdir().expect("capture dir");
    let pipeline =
        Pipeline::new(test_config(dir.path()), stub_models("alice")).expect("pipeline");

    assert!(matches!(
        pipeline.set_stride(0),
        Err(ControlError::InvalidStride(0))
    ));
    assert!(matches!(
        pipeline.set_min_interval(Duration::ZERO),
        Err(ControlError::InvalidInterval(_))
    ));
    assert!(matches!(
        pipeline.set_aux_stride(5),
        Err(ControlError::InvalidAuxStride(5))
    ));
    assert!(matches!(
        pipeline.set_aux_stride(61),
        Err(ControlError::InvalidAuxStride(61))
    ));

    pipeline.set_stride(30).expect("stride");
    pipeline.set_min_interval(Duration::from_millis(100)).expect("interval");
    pipeline.set_aux_stride(45).expect("aux stride");
    pipeline.set_aux_enabled(false);
    assert!(!pipeline.aux_enabled());

    // Watch set management.
    pipeline.add_target(IdentityLabel::new("bob"));
    assert!(pipeline.targets().contains(&IdentityLabel::new("bob")));
    pipeline
        .remove_target(&IdentityLabel::new("bob"))
        .expect("remove");
    assert!(matches!(
        pipeline.remove_target(&IdentityLabel::new("bob")),
        Err(ControlError::UnknownIdentity(_))
    ));
}
