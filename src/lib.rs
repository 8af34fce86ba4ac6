use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use image::DynamicImage;
use nalgebra::Matrix3;
use tracing::instrument;

pub mod crop;
pub mod detector;
mod error;
pub mod filter;
pub mod mailbox;
pub mod overlay;
pub mod pipeline;
mod result;
pub mod transform;

use crop::{CropProducer, ImageProcessor, ImageprocProcessor};
use detector::{DetectionOptions, RectangleDetector};
pub use error::{Error, Result};
use filter::AcceptanceFilter;
use mailbox::FrameMailbox;
use overlay::{OverlayRenderer, OverlayStyle};
use pipeline::{FrameDisposition, FrameEvent, FrameSink, Worker};
pub use result::*;

/// Capture quality the frame source should be configured with. The pipeline only
/// carries it around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePreset {
    Low,
    Medium,
    #[default]
    High,
    Photo,
}

pub struct PipelineBuilder {
    capture_preset: CapturePreset,
    detection: DetectionOptions,
    min_confidence: f32,
    style: OverlayStyle,
    surface: Option<SurfaceSize>,
    perspective_correction: bool,
    processor: Option<Box<dyn ImageProcessor>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_preset(mut self, preset: CapturePreset) -> Self {
        self.capture_preset = preset;
        self
    }

    pub fn detection_options(mut self, options: DetectionOptions) -> Self {
        self.detection = options;
        self
    }

    pub fn max_detections(mut self, max_detections: usize) -> Self {
        self.detection.max_detections = max_detections;
        self
    }

    pub fn min_detection_size(mut self, size: f32) -> Self {
        self.detection.min_detection_size = size;
        self
    }

    pub fn min_confidence_to_accept(mut self, confidence: f32) -> Self {
        self.min_confidence = confidence;
        self
    }

    pub fn overlay_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    pub fn fill_opacity(mut self, opacity: f32) -> Self {
        self.style.fill_opacity = opacity;
        self
    }

    pub fn border_width(mut self, width: f32) -> Self {
        self.style.border_width = width;
        self
    }

    /// Size of the surface the overlay is drawn on.
    pub fn surface_size(mut self, width: f32, height: f32) -> Self {
        self.surface = Some(SurfaceSize::new(width, height));
        self
    }

    pub fn perspective_correction(mut self, enabled: bool) -> Self {
        self.perspective_correction = enabled;
        self
    }

    pub fn image_processor(mut self, processor: impl ImageProcessor + 'static) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    fn validate(&self) -> Result<SurfaceSize> {
        let surface = self
            .surface
            .ok_or_else(|| Error::InvalidConfig("surface size is required".into()))?;
        if !(surface.width > 0.0 && surface.height > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "surface size must be positive, got {}x{}",
                surface.width, surface.height
            )));
        }
        let unit = |name: &str, value: f32| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )))
            }
        };
        unit("min_confidence_to_accept", self.min_confidence)?;
        unit("min_detection_size", self.detection.min_detection_size)?;
        unit("fill_opacity", self.style.fill_opacity)?;
        if !(self.style.border_width >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "border_width must not be negative, got {}",
                self.style.border_width
            )));
        }
        Ok(surface)
    }

    #[instrument(skip(self, detector))]
    pub fn build(mut self, detector: impl RectangleDetector + 'static) -> Result<Pipeline> {
        let surface = self.validate()?;
        let mailbox = Arc::new(FrameMailbox::new());
        let (events_tx, events) = mpsc::channel();
        let worker = Worker {
            mailbox: mailbox.clone(),
            detector: Box::new(detector),
            processor: self
                .processor
                .take()
                .unwrap_or_else(|| Box::new(ImageprocProcessor)),
            options: self.detection,
            filter: AcceptanceFilter::new(self.min_confidence),
            renderer: OverlayRenderer::new(self.style, surface),
            cropper: CropProducer::new(self.perspective_correction),
            events: events_tx,
        };
        let handle = std::thread::Builder::new()
            .name("rectview-worker".into())
            .spawn(move || worker.run())
            .map_err(|err| Error::Worker(err.to_string()))?;
        log::debug!(
            "Pipeline started with {:?} on a {}x{} surface",
            self.detection,
            surface.width,
            surface.height
        );

        Ok(Pipeline {
            sink: FrameSink::new(mailbox.clone()),
            mailbox,
            events,
            worker: Some(handle),
            capture_preset: self.capture_preset,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            capture_preset: CapturePreset::default(),
            detection: DetectionOptions::default(),
            min_confidence: 0.0,
            style: OverlayStyle::default(),
            surface: None,
            perspective_correction: false,
            processor: None,
        }
    }
}

/// A running detection pipeline.
///
/// Frames go in through [`Pipeline::sink`], one [`FrameEvent`] per accepted frame
/// comes out of [`Pipeline::recv`] in submission order. Dropping the pipeline stops
/// the worker.
pub struct Pipeline {
    sink: FrameSink,
    mailbox: Arc<FrameMailbox>,
    events: Receiver<FrameEvent>,
    worker: Option<JoinHandle<()>>,
    capture_preset: CapturePreset,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn sink(&self) -> FrameSink {
        self.sink.clone()
    }

    pub fn capture_preset(&self) -> CapturePreset {
        self.capture_preset
    }

    pub fn on_frame(
        &self,
        image: Option<DynamicImage>,
        intrinsics: Option<Matrix3<f32>>,
    ) -> FrameDisposition {
        self.sink.on_frame(image, intrinsics)
    }

    pub fn recv(&self) -> Option<FrameEvent> {
        self.events.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<FrameEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<FrameEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.mailbox.close();
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Worker("frame worker panicked".into())),
            None => Ok(()),
        }
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("{err}");
        }
    }
}
