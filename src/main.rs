use std::{path::PathBuf, time::Instant};

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::{drawing::draw_polygon_mut, point::Point};
use rectview::{
    detector::ScriptedDetector,
    overlay::{draw_overlay, OverlaySurface},
    pipeline::{FrameDisposition, FrameEvent},
    Detection, NormalizedPoint, NormalizedQuad, NormalizedRect, Pipeline,
};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

const RAW_WIDTH: u32 = 640;
const RAW_HEIGHT: u32 = 480;

/// A landscape test frame with a bright, slightly skewed card on a dark background.
fn synthetic_frame() -> DynamicImage {
    let mut image = RgbImage::from_pixel(RAW_WIDTH, RAW_HEIGHT, Rgb([30, 30, 40]));
    let card = [
        Point::new(200, 120),
        Point::new(460, 140),
        Point::new(440, 360),
        Point::new(180, 330),
    ];
    draw_polygon_mut(&mut image, &card, Rgb([235, 230, 210]));
    DynamicImage::ImageRgb8(image)
}

/// Normalized (bottom-left origin) description of the card drawn by [`synthetic_frame`].
fn card_detection(confidence: f32) -> Detection {
    let normalize = |x: f32, y: f32| {
        NormalizedPoint::new(x / RAW_WIDTH as f32, 1.0 - y / RAW_HEIGHT as f32)
    };
    let corners = NormalizedQuad {
        top_left: normalize(200.0, 120.0),
        top_right: normalize(460.0, 140.0),
        bottom_right: normalize(440.0, 360.0),
        bottom_left: normalize(180.0, 330.0),
    };
    let bounding_box = NormalizedRect::new(
        180.0 / RAW_WIDTH as f32,
        1.0 - 360.0 / RAW_HEIGHT as f32,
        280.0 / RAW_WIDTH as f32,
        240.0 / RAW_HEIGHT as f32,
    );
    Detection {
        corners,
        bounding_box,
        confidence,
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let out = PathBuf::from("out");
    std::fs::create_dir_all(&out).expect("Failed to create output dir");

    let detector = ScriptedDetector::new()
        .then_detect([card_detection(1.0)])
        .then_detect([
            card_detection(0.8),
            Detection::from_rect(NormalizedRect::new(0.05, 0.05, 0.2, 0.2), 1.0),
        ])
        .then_fail("camera covered");
    let frames = detector.remaining();

    let pipeline = Pipeline::builder()
        .surface_size(RAW_WIDTH as f32, RAW_HEIGHT as f32)
        .perspective_correction(true)
        .min_confidence_to_accept(1.0)
        .build(detector)
        .expect("Failed to build pipeline");
    let surface = OverlaySurface::new();

    let start = Instant::now();
    for _ in 0..frames {
        let FrameDisposition::Accepted(sequence) =
            pipeline.on_frame(Some(synthetic_frame()), None)
        else {
            log::warn!("Frame dropped");
            continue;
        };
        match pipeline.recv() {
            Some(FrameEvent::Detected(update)) => {
                for preview in &update.previews {
                    let path = out.join(format!("preview_{sequence}_{}.png", preview.detection));
                    preview.image.save(&path).expect("Failed to save preview");
                }
                surface.apply(update.overlay);
            }
            Some(FrameEvent::Failed { reason, .. }) => {
                log::warn!("Frame {sequence} failed: {reason}");
            }
            None => break,
        }
    }
    log::debug!("{:?}", start.elapsed());

    let mut canvas = synthetic_frame().to_rgba8();
    draw_overlay(&mut canvas, &surface.current(), Rgb([255, 0, 0]));
    canvas
        .save(out.join("overlay.png"))
        .expect("Failed to save overlay");
    log::debug!("{:#?}", surface.current());

    pipeline.shutdown().expect("Failed to stop pipeline");
}
