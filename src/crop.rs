use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::instrument;

use crate::{
    mailbox::FrameMailbox,
    transform::{quad_to_image_pixel_quad, rect_to_image_pixel_rect},
    BufferSize, Detection, Error, PixelQuad, PixelRect, Result,
};

/// Geometry of one preview crop, in rotated buffer pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRequest {
    pub sequence: u64,
    pub buffer: BufferSize,
    pub pixel_rect: PixelRect,
    /// Present when the crop should also be perspective corrected.
    pub corners: Option<PixelQuad>,
}

/// Does the actual resampling for a [`CropRequest`].
///
/// `source` is the raw buffer, the request's geometry refers to it after the quarter
/// turn.
pub trait ImageProcessor: Send {
    fn crop(&self, source: &DynamicImage, request: &CropRequest) -> Result<DynamicImage>;
}

/// [`ImageProcessor`] backed by `image` and `imageproc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageprocProcessor;

impl ImageProcessor for ImageprocProcessor {
    #[instrument(level = "trace", skip(self, source))]
    fn crop(&self, source: &DynamicImage, request: &CropRequest) -> Result<DynamicImage> {
        match &request.corners {
            Some(corners) => correct_perspective(source, corners),
            None => crop_rotated(source, &request.pixel_rect),
        }
    }
}

fn crop_rotated(source: &DynamicImage, rect: &PixelRect) -> Result<DynamicImage> {
    let rotated = BufferSize::of(source).rotated();
    let (min, max) = (rect.min(), rect.max());
    let (x0, y0) = (min.x.round(), min.y.round());
    let (x1, y1) = (max.x.round(), max.y.round());
    if x0 < 0.0 || y0 < 0.0 || x1 > rotated.width as f32 || y1 > rotated.height as f32 {
        return Err(Error::CropOutOfBounds {
            rect: *rect,
            width: rotated.width,
            height: rotated.height,
        });
    }
    let (x0, y0, x1, y1) = (x0 as u32, y0 as u32, x1 as u32, y1 as u32);
    if x1 <= x0 || y1 <= y0 {
        return Err(Error::EmptyCrop(*rect));
    }
    // Crop before rotating: rotated (x, y) is raw (width - y, x).
    let raw_x = source.width() - y1;
    log::trace!("Slicing raw buffer at ({raw_x}, {x0}) size {}x{}", y1 - y0, x1 - x0);
    Ok(source.crop_imm(raw_x, x0, y1 - y0, x1 - x0).rotate270())
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

fn correct_perspective(source: &DynamicImage, corners: &PixelQuad) -> Result<DynamicImage> {
    // The quarter turn moves the detector's top-right corner to the top-left of the
    // turned buffer, so relabel to keep the same orientation as a plain crop.
    let PixelQuad {
        top_right: top_left,
        bottom_right: top_right,
        bottom_left: bottom_right,
        top_left: bottom_left,
    } = *corners;
    let width = distance(top_left, top_right)
        .max(distance(bottom_left, bottom_right))
        .round() as u32;
    let height = distance(top_left, bottom_left)
        .max(distance(top_right, bottom_right))
        .round() as u32;
    if width == 0 || height == 0 {
        return Err(Error::DegenerateQuad);
    }
    let (w, h) = (width as f32, height as f32);
    let projection = Projection::from_control_points(
        [top_left, top_right, bottom_right, bottom_left],
        [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)],
    )
    .ok_or(Error::DegenerateQuad)?;

    let rotated = source.rotate270().to_rgba8();
    let mut output = RgbaImage::new(width, height);
    warp_into(
        &rotated,
        &projection,
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 0]),
        &mut output,
    );
    Ok(DynamicImage::ImageRgba8(output))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropProducer {
    pub perspective_correction: bool,
}

impl CropProducer {
    pub fn new(perspective_correction: bool) -> Self {
        Self {
            perspective_correction,
        }
    }

    pub fn request(&self, sequence: u64, detection: &Detection, buffer: BufferSize) -> CropRequest {
        CropRequest {
            sequence,
            buffer,
            pixel_rect: rect_to_image_pixel_rect(&detection.bounding_box, buffer),
            corners: self
                .perspective_correction
                .then(|| quad_to_image_pixel_quad(&detection.corners, buffer)),
        }
    }

    /// Runs `request` against the buffer the mailbox holds for the same frame.
    #[instrument(level = "debug", skip(self, mailbox, processor))]
    pub fn produce(
        &self,
        request: &CropRequest,
        mailbox: &FrameMailbox,
        processor: &dyn ImageProcessor,
    ) -> Result<DynamicImage> {
        let frame = mailbox
            .buffer_for(request.sequence)
            .ok_or(Error::StaleBuffer(request.sequence))?;
        processor.crop(&frame.image, request)
    }
}
