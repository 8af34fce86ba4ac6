use std::{
    sync::{mpsc, Arc, Mutex},
    time::Duration,
};

use image::{DynamicImage, GenericImageView};
use nalgebra::Matrix3;
use rectview::{
    crop::{CropRequest, ImageProcessor},
    detector::{DetectionOptions, ScriptedDetector},
    overlay::{OverlayStyle, OverlaySurface},
    pipeline::{FrameDisposition, FrameEvent, FrameUpdate},
    Detection, Error, Frame, NormalizedRect, Pipeline,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn frame() -> DynamicImage {
    DynamicImage::new_rgb8(40, 20)
}

fn detection(confidence: f32) -> Detection {
    Detection::from_rect(NormalizedRect::new(0.25, 0.25, 0.5, 0.5), confidence)
}

fn submit(pipeline: &Pipeline) -> FrameEvent {
    let disposition = pipeline.on_frame(Some(frame()), None);
    let FrameDisposition::Accepted(sequence) = disposition else {
        panic!("Frame was not accepted: {disposition:?}");
    };
    let event = pipeline.recv_timeout(TIMEOUT).expect("No event for frame");
    assert_eq!(event.sequence(), sequence);
    event
}

fn expect_update(event: FrameEvent) -> FrameUpdate {
    match event {
        FrameEvent::Detected(update) => update,
        FrameEvent::Failed { reason, .. } => panic!("Detection failed: {reason}"),
    }
}

#[test]
fn later_frame_replaces_overlay() {
    init_logs();
    let detector = ScriptedDetector::new()
        .then_detect([detection(1.0)])
        .then_detect(Vec::new());
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .build(detector)
        .expect("Failed to build pipeline");
    let surface = OverlaySurface::new();

    let first = expect_update(submit(&pipeline));
    assert_eq!(first.overlay.shape_count(), 2);
    assert!(surface.apply(first.overlay));

    let second = expect_update(submit(&pipeline));
    assert!(surface.apply(second.overlay));
    assert!(surface.current().is_empty());
}

#[test]
fn failed_detection_keeps_previous_overlay() {
    init_logs();
    let detector = ScriptedDetector::new()
        .then_detect([detection(1.0)])
        .then_fail("sensor glitch");
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .build(detector)
        .expect("Failed to build pipeline");
    let surface = OverlaySurface::new();

    surface.apply(expect_update(submit(&pipeline)).overlay);
    match submit(&pipeline) {
        FrameEvent::Failed { reason, .. } => assert!(reason.contains("sensor glitch")),
        FrameEvent::Detected(_) => panic!("Expected a failure"),
    }
    assert_eq!(surface.current().shape_count(), 2);
}

#[test]
fn missing_buffer_is_skipped() {
    init_logs();
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .build(ScriptedDetector::new())
        .expect("Failed to build pipeline");
    assert_eq!(pipeline.on_frame(None, None), FrameDisposition::Skipped);
    assert!(pipeline.recv_timeout(Duration::from_millis(100)).is_none());
}

#[test]
fn frames_are_dropped_while_detector_is_busy() {
    init_logs();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let detector = move |_: &Frame, _: &DetectionOptions| -> rectview::Result<Vec<Detection>> {
        gate_rx
            .recv()
            .map_err(|err| Error::Detection(err.to_string()))?;
        Ok(vec![detection(1.0)])
    };
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .build(detector)
        .expect("Failed to build pipeline");
    let sink = pipeline.sink();

    let FrameDisposition::Accepted(first) = sink.on_frame(Some(frame()), None) else {
        panic!("First frame should be accepted");
    };
    assert_eq!(sink.on_frame(Some(frame()), None), FrameDisposition::Dropped);
    assert_eq!(sink.on_frame(Some(frame()), None), FrameDisposition::Dropped);

    gate_tx.send(()).expect("Detector is gone");
    let event = pipeline.recv_timeout(TIMEOUT).expect("No event for frame");
    assert_eq!(event.sequence(), first);

    gate_tx.send(()).expect("Detector is gone");
    let next = submit(&pipeline);
    assert!(next.sequence() > first);
}

#[test]
fn events_arrive_in_submission_order() {
    init_logs();
    let detector = ScriptedDetector::new()
        .then_detect([detection(1.0)])
        .then_detect([detection(1.0), detection(0.5)])
        .then_fail("dark")
        .then_detect(Vec::new());
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .build(detector)
        .expect("Failed to build pipeline");
    let surface = OverlaySurface::new();

    let mut last = 0;
    for _ in 0..6 {
        let event = submit(&pipeline);
        assert!(event.sequence() > last);
        last = event.sequence();
        if let FrameEvent::Detected(update) = event {
            assert!(surface.apply(update.overlay));
        }
    }
    assert_eq!(surface.current().sequence, last);
}

#[test]
fn capped_detector_output_passes_through() {
    init_logs();
    let detector = ScriptedDetector::new().then_detect([
        detection(1.0),
        detection(0.9),
        detection(0.8),
    ]);
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .max_detections(1)
        .build(detector)
        .expect("Failed to build pipeline");
    let update = expect_update(submit(&pipeline));
    assert_eq!(update.detections.len(), 1);
    assert_eq!(update.overlay.fills.len(), 1);
}

#[test]
fn core_does_not_enforce_detection_cap() {
    init_logs();
    let seen = Arc::new(Mutex::new(None));
    let detector = {
        let seen = seen.clone();
        move |_: &Frame, options: &DetectionOptions| -> rectview::Result<Vec<Detection>> {
            *seen.lock().unwrap() = Some(options.max_detections);
            Ok(vec![detection(1.0), detection(0.9), detection(0.8)])
        }
    };
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .max_detections(1)
        .build(detector)
        .expect("Failed to build pipeline");
    let update = expect_update(submit(&pipeline));
    assert_eq!(*seen.lock().unwrap(), Some(1));
    assert_eq!(update.detections.len(), 3);
    assert_eq!(update.overlay.fills.len(), 3);
}

#[test]
fn previews_only_for_accepted_detections() {
    init_logs();
    let detector = ScriptedDetector::new().then_detect([detection(1.0), detection(0.8)]);
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .min_confidence_to_accept(1.0)
        .build(detector)
        .expect("Failed to build pipeline");
    let update = expect_update(submit(&pipeline));

    assert_eq!(update.overlay.fills.len(), 2);
    assert_eq!(update.overlay.outlines.len(), 1);
    assert_eq!(update.previews.len(), 1);
    assert_eq!(update.previews[0].detection, 0);
    // 40x20 buffer, centered half box, quarter turned
    assert_eq!(update.previews[0].image.dimensions(), (10, 20));
}

struct BrokenProcessor;

impl ImageProcessor for BrokenProcessor {
    fn crop(&self, _: &DynamicImage, request: &CropRequest) -> rectview::Result<DynamicImage> {
        Err(Error::EmptyCrop(request.pixel_rect))
    }
}

#[test]
fn crop_failure_leaves_overlay_intact() {
    init_logs();
    let detector = ScriptedDetector::new().then_detect([detection(1.0)]);
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .image_processor(BrokenProcessor)
        .build(detector)
        .expect("Failed to build pipeline");
    let update = expect_update(submit(&pipeline));
    assert!(update.previews.is_empty());
    assert_eq!(update.overlay.shape_count(), 2);
}

#[test]
fn intrinsics_reach_detector() {
    init_logs();
    let intrinsics = Matrix3::new(
        1000.0, 0.0, 320.0, //
        0.0, 1000.0, 240.0, //
        0.0, 0.0, 1.0,
    );
    let detector = move |frame: &Frame, _: &DetectionOptions| -> rectview::Result<Vec<Detection>> {
        if frame.intrinsics == Some(intrinsics) {
            Ok(vec![detection(1.0)])
        } else {
            Err(Error::Detection("intrinsics missing".into()))
        }
    };
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .build(detector)
        .expect("Failed to build pipeline");

    let FrameDisposition::Accepted(_) = pipeline.on_frame(Some(frame()), Some(intrinsics)) else {
        panic!("Frame was not accepted");
    };
    let update = expect_update(pipeline.recv_timeout(TIMEOUT).expect("No event for frame"));
    assert_eq!(update.detections.len(), 1);
}

#[test]
fn invalid_config_is_rejected() {
    let missing_surface = Pipeline::builder().build(ScriptedDetector::new());
    assert!(matches!(missing_surface, Err(Error::InvalidConfig(_))));

    let bad_confidence = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .min_confidence_to_accept(1.5)
        .build(ScriptedDetector::new());
    assert!(matches!(bad_confidence, Err(Error::InvalidConfig(_))));

    let bad_surface = Pipeline::builder()
        .surface_size(0.0, 100.0)
        .build(ScriptedDetector::new());
    assert!(matches!(bad_surface, Err(Error::InvalidConfig(_))));
}

#[test]
fn shutdown_stops_accepting_frames() {
    init_logs();
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .build(ScriptedDetector::new())
        .expect("Failed to build pipeline");
    let sink = pipeline.sink();
    pipeline.shutdown().expect("Failed to stop pipeline");
    assert_eq!(sink.on_frame(Some(frame()), None), FrameDisposition::Dropped);
}

#[test]
fn option_structs_configure_pipeline() {
    init_logs();
    let seen = Arc::new(Mutex::new(None));
    let detector = {
        let seen = seen.clone();
        move |_: &Frame, options: &DetectionOptions| -> rectview::Result<Vec<Detection>> {
            *seen.lock().unwrap() = Some(*options);
            Ok(vec![detection(1.0)])
        }
    };
    let options = DetectionOptions {
        max_detections: 2,
        min_detection_size: 0.05,
    };
    let style = OverlayStyle {
        fill_opacity: 0.5,
        border_width: 2.0,
    };
    let pipeline = Pipeline::builder()
        .surface_size(100.0, 100.0)
        .detection_options(options)
        .overlay_style(style)
        .build(detector)
        .expect("Failed to build pipeline");
    assert!(pipeline.try_recv().is_none());

    let FrameDisposition::Accepted(sequence) = pipeline.on_frame(Some(frame()), None) else {
        panic!("Frame was not accepted");
    };
    let start = std::time::Instant::now();
    let event = loop {
        if let Some(event) = pipeline.try_recv() {
            break event;
        }
        assert!(start.elapsed() < TIMEOUT, "No event for frame");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(event.sequence(), sequence);
    let update = expect_update(event);

    assert_eq!(*seen.lock().unwrap(), Some(options));
    assert_eq!(update.overlay.fills[0].opacity, 0.5);
    assert_eq!(update.overlay.outlines[0].border_width, 2.0);
    assert!(pipeline.try_recv().is_none());
}
