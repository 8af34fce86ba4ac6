use std::sync::Arc;

use float_ord::FloatOrd;
use geo::{Polygon, Rect};
use image::DynamicImage;
use nalgebra::Matrix3;

/// A point in detector space: both coordinates in `[0, 1]`, origin at the bottom-left
/// corner of the frame, Y pointing up.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

impl NormalizedPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn clamped(self) -> Self {
        Self {
            x: self.x.clamp(0.0, 1.0),
            y: self.y.clamp(0.0, 1.0),
        }
    }
}

/// The four corners of a detected quadrilateral, in detector space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedQuad {
    pub top_left: NormalizedPoint,
    pub top_right: NormalizedPoint,
    pub bottom_left: NormalizedPoint,
    pub bottom_right: NormalizedPoint,
}

impl NormalizedQuad {
    /// Corners in drawing order: top-left, top-right, bottom-right, bottom-left.
    pub fn ring(&self) -> [NormalizedPoint; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }
}

/// Axis aligned box in detector space. `(x, y)` is the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Pulls slightly out of range detector output back into the unit square.
    pub fn clamped(self) -> Self {
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        Self {
            x,
            y,
            width: self.width.clamp(0.0, 1.0 - x),
            height: self.height.clamp(0.0, 1.0 - y),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub corners: NormalizedQuad,
    pub bounding_box: NormalizedRect,
    pub confidence: f32,
}

impl Detection {
    /// Builds a detection for an axis aligned quad covering `bounding_box`.
    pub fn from_rect(bounding_box: NormalizedRect, confidence: f32) -> Self {
        let NormalizedRect {
            x,
            y,
            width,
            height,
        } = bounding_box;
        Self {
            corners: NormalizedQuad {
                top_left: NormalizedPoint::new(x, y + height),
                top_right: NormalizedPoint::new(x + width, y + height),
                bottom_left: NormalizedPoint::new(x, y),
                bottom_right: NormalizedPoint::new(x + width, y),
            },
            bounding_box,
            confidence,
        }
    }
}

/// Overlay polygon, top-left origin, surface units. The ring is closed.
pub type ScreenPolygon = Polygon<f32>;
/// Overlay rectangle, top-left origin, surface units.
pub type ScreenRect = Rect<f32>;
/// Rectangle in the rotated source buffer, in pixels.
pub type PixelRect = Rect<f32>;

/// Quad corners in the rotated source buffer, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelQuad {
    pub top_left: (f32, f32),
    pub top_right: (f32, f32),
    pub bottom_right: (f32, f32),
    pub bottom_left: (f32, f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSize {
    pub width: f32,
    pub height: f32,
}

impl SurfaceSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Raw dimensions of a captured buffer, before the display rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSize {
    pub width: u32,
    pub height: u32,
}

impl BufferSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &DynamicImage) -> Self {
        Self::new(image.width(), image.height())
    }

    /// Dimensions of the buffer once it has been turned a quarter for display.
    pub fn rotated(self) -> Self {
        Self::new(self.height, self.width)
    }
}

/// One captured buffer, as handed over by the frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub intrinsics: Option<Matrix3<f32>>,
}

impl Frame {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            intrinsics: None,
        }
    }

    pub fn size(&self) -> BufferSize {
        BufferSize::of(&self.image)
    }
}

/// Detections produced for one frame, together with the buffer they came from.
#[derive(Debug, Clone)]
pub struct DetectionFrame {
    pub sequence: u64,
    pub detections: Vec<Detection>,
    pub frame: Arc<Frame>,
}

impl DetectionFrame {
    pub fn best(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .max_by_key(|detection| FloatOrd(detection.confidence))
    }
}
