use std::time::{Duration, Instant};

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use imageproc::{drawing::draw_polygon_mut, point::Point};
use rectview::{
    detector::ScriptedDetector,
    overlay::{draw_overlay, OverlaySurface},
    pipeline::{FrameDisposition, FrameEvent},
    Detection, NormalizedPoint, NormalizedQuad, NormalizedRect, Pipeline,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

fn card_frame() -> DynamicImage {
    let mut image = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([20, 20, 20]));
    let card = [
        Point::new(80, 60),
        Point::new(240, 60),
        Point::new(240, 180),
        Point::new(80, 180),
    ];
    draw_polygon_mut(&mut image, &card, Rgb([240, 240, 240]));
    DynamicImage::ImageRgb8(image)
}

fn card_detection() -> Detection {
    let bounding_box = NormalizedRect::new(0.25, 0.25, 0.5, 0.5);
    let mut detection = Detection::from_rect(bounding_box, 1.0);
    // nudge one corner so the quad isn't a perfect rectangle
    detection.corners.top_right = NormalizedPoint::new(0.74, 0.75);
    detection
}

#[test]
fn card_is_outlined_and_corrected() {
    let _ = env_logger::builder().is_test(true).try_init();

    let detector = ScriptedDetector::new().then_detect([card_detection()]);
    let pipeline = Pipeline::builder()
        .surface_size(WIDTH as f32, HEIGHT as f32)
        .perspective_correction(true)
        .build(detector)
        .expect("Failed to build pipeline");
    let surface = OverlaySurface::new();

    let start = Instant::now();
    let FrameDisposition::Accepted(_) = pipeline.on_frame(Some(card_frame()), None) else {
        panic!("Frame was not accepted");
    };
    let update = match pipeline.recv_timeout(Duration::from_secs(5)) {
        Some(FrameEvent::Detected(update)) => update,
        other => panic!("Unexpected event {other:?}"),
    };
    log::debug!("{:?}", start.elapsed());

    assert_eq!(update.previews.len(), 1);
    let preview = &update.previews[0].image;
    let (width, height) = preview.dimensions();
    // same orientation as the quarter turned buffer
    assert!((118..=122).contains(&width), "preview width {width}");
    assert!((158..=162).contains(&height), "preview height {height}");
    let center = preview.to_rgb8().get_pixel(width / 2, height / 2).0;
    assert!(center.iter().all(|c| *c > 200), "center of preview was {center:?}");

    assert!(surface.apply(update.overlay));
    let mut canvas = card_frame().to_rgba8();
    draw_overlay(&mut canvas, &surface.current(), Rgb([255, 0, 0]));
    // bounding box border sits on the card's left edge
    assert_eq!(canvas.get_pixel(80, 120).0, [255, 0, 0, 255]);
    // card interior is tinted, not replaced
    let tinted = canvas.get_pixel(160, 120).0;
    assert!(tinted[0] > 240 && tinted[1] < 240 && tinted[1] > 100, "{tinted:?}");

    pipeline.shutdown().expect("Failed to stop pipeline");
}

#[test]
fn frames_without_detections_clear_screen() {
    let _ = env_logger::builder().is_test(true).try_init();

    let detector = ScriptedDetector::new()
        .then_detect([card_detection()])
        .then_detect(Vec::new());
    let pipeline = Pipeline::builder()
        .surface_size(WIDTH as f32, HEIGHT as f32)
        .build(detector)
        .expect("Failed to build pipeline");
    let surface = OverlaySurface::new();

    for _ in 0..2 {
        assert!(matches!(
            pipeline.on_frame(Some(card_frame()), None),
            FrameDisposition::Accepted(_)
        ));
        if let Some(FrameEvent::Detected(update)) = pipeline.recv_timeout(Duration::from_secs(5)) {
            surface.apply(update.overlay);
        }
    }

    let mut canvas = card_frame().to_rgba8();
    let before = canvas.clone();
    draw_overlay(&mut canvas, &surface.current(), Rgb([255, 0, 0]));
    assert_eq!(canvas, before);
}
