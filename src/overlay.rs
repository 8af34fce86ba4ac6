use std::sync::{Arc, Mutex, PoisonError};

use image::{Rgb, Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_polygon_mut, Blend},
    point::Point,
    rect::Rect,
};
use tracing::instrument;

use crate::{
    filter::AcceptanceFilter,
    transform::{quad_to_screen_polygon, rect_to_screen_rect},
    Detection, ScreenPolygon, ScreenRect, SurfaceSize,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub fill_opacity: f32,
    pub border_width: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            fill_opacity: 0.3,
            border_width: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilledPolygon {
    pub polygon: ScreenPolygon,
    pub opacity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BorderedRect {
    pub rect: ScreenRect,
    pub border_width: f32,
}

/// Everything drawn on top of the preview for a single frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Overlay {
    pub sequence: u64,
    pub fills: Vec<FilledPolygon>,
    pub outlines: Vec<BorderedRect>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.fills.is_empty() && self.outlines.is_empty()
    }

    pub fn shape_count(&self) -> usize {
        self.fills.len() + self.outlines.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OverlayRenderer {
    pub style: OverlayStyle,
    pub surface: SurfaceSize,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle, surface: SurfaceSize) -> Self {
        Self { style, surface }
    }

    /// Every detection gets a filled polygon, only accepted ones get their bounding box.
    /// Detections the filter rejects are still filled.
    #[instrument(level = "trace", skip(self, detections))]
    pub fn render(
        &self,
        sequence: u64,
        detections: &[Detection],
        filter: &AcceptanceFilter,
    ) -> Overlay {
        let fills = detections
            .iter()
            .map(|it| FilledPolygon {
                polygon: quad_to_screen_polygon(&it.corners, self.surface),
                opacity: self.style.fill_opacity,
            })
            .collect();
        let outlines = filter
            .accepted(detections)
            .map(|it| BorderedRect {
                rect: rect_to_screen_rect(&it.bounding_box, self.surface),
                border_width: self.style.border_width,
            })
            .collect();
        Overlay {
            sequence,
            fills,
            outlines,
        }
    }
}

/// The overlay currently on screen. Updates swap the whole overlay at once.
#[derive(Debug, Default)]
pub struct OverlaySurface {
    current: Mutex<Arc<Overlay>>,
}

impl OverlaySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the shown overlay. Returns `false`, leaving the surface untouched, when
    /// `overlay` belongs to an older frame than the one already shown.
    pub fn apply(&self, overlay: Overlay) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if overlay.sequence < current.sequence {
            log::debug!(
                "Ignoring overlay for frame {}, frame {} is already shown.",
                overlay.sequence,
                current.sequence
            );
            return false;
        }
        *current = Arc::new(overlay);
        true
    }

    pub fn current(&self) -> Arc<Overlay> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn to_pixel_points(polygon: &ScreenPolygon) -> Vec<Point<i32>> {
    let mut points: Vec<Point<i32>> = Vec::with_capacity(5);
    for coord in polygon.exterior().coords() {
        let point = Point::new(coord.x.round() as i32, coord.y.round() as i32);
        if points.last() != Some(&point) {
            points.push(point);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

/// Paints `overlay` onto `canvas`: fills are alpha blended, borders grow inwards from
/// the rectangle's edge.
#[instrument(level = "trace", skip(canvas, overlay))]
pub fn draw_overlay(canvas: &mut RgbaImage, overlay: &Overlay, color: Rgb<u8>) {
    let Rgb([r, g, b]) = color;
    let mut blend = Blend(std::mem::take(canvas));
    for fill in &overlay.fills {
        let points = to_pixel_points(&fill.polygon);
        if points.len() < 3 {
            log::trace!("Skipping degenerate polygon {:?}", fill.polygon);
            continue;
        }
        let alpha = (fill.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
        draw_polygon_mut(&mut blend, &points, Rgba([r, g, b, alpha]));
    }
    *canvas = blend.0;

    for outline in &overlay.outlines {
        let min = outline.rect.min();
        let (x, y) = (min.x.round() as i32, min.y.round() as i32);
        let (width, height) = (
            outline.rect.width().round() as i32,
            outline.rect.height().round() as i32,
        );
        let border = outline.border_width.round().max(1.0) as i32;
        for inset in 0..border {
            let inner_width = width - 2 * inset;
            let inner_height = height - 2 * inset;
            if inner_width <= 0 || inner_height <= 0 {
                break;
            }
            let rect = Rect::at(x + inset, y + inset).of_size(inner_width as u32, inner_height as u32);
            draw_hollow_rect_mut(canvas, rect, Rgba([r, g, b, 255]));
        }
    }
}
