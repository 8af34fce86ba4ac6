//! Conversions from detector space into surface and buffer pixel space.
//!
//! Every map here is an affine [`Matrix3`] built from the target dimensions, so the
//! flips and the quarter turn are written down once and composed rather than spelled
//! out per call site.

use geo::{coord, LineString, Polygon, Rect};
use nalgebra::{Matrix3, Point2};

use crate::{
    BufferSize, NormalizedPoint, NormalizedQuad, NormalizedRect, PixelQuad, PixelRect,
    ScreenPolygon, ScreenRect, SurfaceSize,
};

/// Scales the unit square to `width x height` and moves the origin from the bottom-left
/// to the top-left corner.
pub fn flip_to_top_left(width: f32, height: f32) -> Matrix3<f32> {
    Matrix3::new(
        width, 0.0, 0.0, //
        0.0, -height, height, //
        0.0, 0.0, 1.0,
    )
}

/// Quarter turn of a top-left origin buffer that is `width` pixels wide: `(u, v) -> (v,
/// width - u)`. The turned buffer is `height x width`.
pub fn quarter_turn(width: f32) -> Matrix3<f32> {
    Matrix3::new(
        0.0, 1.0, 0.0, //
        -1.0, 0.0, width, //
        0.0, 0.0, 1.0,
    )
}

pub fn screen_transform(surface: SurfaceSize) -> Matrix3<f32> {
    flip_to_top_left(surface.width, surface.height)
}

pub fn pixel_transform(buffer: BufferSize) -> Matrix3<f32> {
    let (width, height) = (buffer.width as f32, buffer.height as f32);
    quarter_turn(width) * flip_to_top_left(width, height)
}

fn apply(transform: &Matrix3<f32>, point: NormalizedPoint) -> (f32, f32) {
    let point = point.clamped();
    let mapped = transform.transform_point(&Point2::new(point.x, point.y));
    (mapped.x, mapped.y)
}

fn map_rect(transform: &Matrix3<f32>, rect: NormalizedRect) -> Rect<f32> {
    let rect = rect.clamped();
    let (x0, y0) = apply(transform, NormalizedPoint::new(rect.x, rect.y));
    let (x1, y1) = apply(
        transform,
        NormalizedPoint::new(rect.x + rect.width, rect.y + rect.height),
    );
    Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 })
}

pub fn quad_to_screen_polygon(quad: &NormalizedQuad, surface: SurfaceSize) -> ScreenPolygon {
    let transform = screen_transform(surface);
    let ring = quad
        .ring()
        .into_iter()
        .map(|point| apply(&transform, point))
        .collect::<Vec<_>>();
    Polygon::new(LineString::from(ring), vec![])
}

pub fn rect_to_screen_rect(rect: &NormalizedRect, surface: SurfaceSize) -> ScreenRect {
    map_rect(&screen_transform(surface), *rect)
}

/// Maps a box into the quarter-turned buffer. `buffer` is the raw size, the result lives
/// in a `buffer.rotated()` sized image.
pub fn rect_to_image_pixel_rect(rect: &NormalizedRect, buffer: BufferSize) -> PixelRect {
    map_rect(&pixel_transform(buffer), *rect)
}

pub fn quad_to_image_pixel_quad(quad: &NormalizedQuad, buffer: BufferSize) -> PixelQuad {
    let transform = pixel_transform(buffer);
    PixelQuad {
        top_left: apply(&transform, quad.top_left),
        top_right: apply(&transform, quad.top_right),
        bottom_right: apply(&transform, quad.bottom_right),
        bottom_left: apply(&transform, quad.bottom_left),
    }
}
