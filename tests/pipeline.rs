use std::sync::Arc;
use std::time::{Duration, Instant};

use stillview::capture::simulated::SimulatedCamera;
use stillview::capture::{AcquisitionLoop, AcquisitionOptions};
use stillview::pipeline::Shared;
use stillview::storage::fits::read_image;
use stillview::storage::PersistenceSink;
use stillview::{Config, ExposureConfig, Mode, Pipeline, PipelineEvent};
use tempfile::tempdir;

type Loop = AcquisitionLoop<SimulatedCamera, PersistenceSink>;

fn build(
    camera: SimulatedCamera,
    sink: PersistenceSink,
) -> (Loop, Arc<Shared>, flume::Receiver<PipelineEvent>) {
    let shared = Arc::new(Shared::new(&ExposureConfig::default()).unwrap());
    let (tx, rx) = flume::unbounded();
    let acquisition = AcquisitionLoop::new(
        camera,
        sink,
        Arc::clone(&shared),
        tx,
        AcquisitionOptions::default(),
    );
    (acquisition, shared, rx)
}

fn saved_paths(rx: &flume::Receiver<PipelineEvent>) -> Vec<std::path::PathBuf> {
    rx.try_iter()
        .filter_map(|event| match event {
            PipelineEvent::FrameSaved(path) => Some(path),
            _ => None,
        })
        .collect()
}

#[test]
fn capture_exposure_is_not_pushed_while_live() {
    let dir = tempdir().unwrap();
    let camera = SimulatedCamera::new(8, 8, 3);
    let journal = camera.journal();
    let (mut acquisition, shared, _rx) = build(camera, PersistenceSink::fits(dir.path()));

    shared.control.set_exposure(Mode::Live, 1.0).unwrap();
    shared.control.set_exposure(Mode::Capture, 10.0).unwrap();
    acquisition.start().unwrap();
    for _ in 0..6 {
        acquisition.step().unwrap();
    }
    acquisition.teardown();

    let pushes = journal.exposure_pushes();
    assert!(!pushes.is_empty());
    assert!(pushes.iter().all(|&units| units == 1_000_000));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn requested_batch_is_saved_with_capture_exposure_then_returns_to_live() {
    let dir = tempdir().unwrap();
    let camera = SimulatedCamera::new(32, 16, 4);
    let journal = camera.journal();
    let (mut acquisition, shared, rx) = build(camera, PersistenceSink::fits(dir.path()));

    acquisition.start().unwrap();
    acquisition.step().unwrap();
    for _ in 0..3 {
        shared.control.request_capture();
    }

    let mut cycles = 0;
    while shared.control.pending_captures() > 0 {
        acquisition.step().unwrap();
        cycles += 1;
        assert!(cycles < 20, "batch never completed");
    }
    // Crossing into capture costs one frame taken at the live exposure.
    assert_eq!(cycles, 4);

    acquisition.step().unwrap();
    acquisition.teardown();

    let events: Vec<_> = rx.try_iter().collect();
    let completions = events
        .iter()
        .filter(|e| **e == PipelineEvent::CaptureComplete)
        .count();
    assert_eq!(completions, 1);

    let paths: Vec<_> = events
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::FrameSaved(path) => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(paths.len(), 3);
    for path in &paths {
        let image = read_image(path).unwrap();
        assert_eq!((image.width, image.height), (32, 16));
        let peak = image.samples.iter().copied().max().unwrap();
        assert!(peak > 4096, "{} looks live-exposed", path.display());
    }

    assert_eq!(
        journal.exposure_pushes(),
        vec![1_000_000, 10_000_000, 1_000_000]
    );
    assert_eq!(shared.control.mode(), Mode::Live);
}

#[test]
fn exposure_changes_reach_the_device_on_the_next_cycle() {
    let dir = tempdir().unwrap();
    let camera = SimulatedCamera::new(8, 8, 2);
    let journal = camera.journal();
    let (mut acquisition, shared, _rx) = build(camera, PersistenceSink::fits(dir.path()));

    acquisition.start().unwrap();
    acquisition.step().unwrap();
    shared.control.set_exposure(Mode::Live, 0.5).unwrap();
    acquisition.step().unwrap();
    acquisition.teardown();

    assert_eq!(journal.exposure_pushes(), vec![1_000_000, 500_000]);
}

#[test]
fn spawned_pipeline_completes_a_batch() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.storage.output_dir = dir.path().to_path_buf();
    let sink = PersistenceSink::fits(&config.storage.output_dir);

    let (handle, thread) =
        Pipeline::spawn(SimulatedCamera::new(16, 16, 3), sink, &config).unwrap();

    // Request only once live frames flow, so the batch starts from live mode.
    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.frames_published() == 0 {
        assert!(Instant::now() < deadline, "no frame published");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(handle.request_capture(), 1);
    assert_eq!(handle.request_capture(), 2);

    loop {
        match handle.events().recv_timeout(Duration::from_millis(50)) {
            Ok(PipelineEvent::CaptureComplete) => break,
            Ok(_) | Err(flume::RecvTimeoutError::Timeout) => {}
            Err(e) => panic!("event channel closed: {e}"),
        }
        assert!(Instant::now() < deadline, "batch never completed");
    }

    handle.shutdown();
    thread.join().unwrap();

    assert_eq!(handle.pending_capture_count(), 0);
    assert!(saved_paths(handle.events()).is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    assert!(handle.frames_published() >= 3);
}
