use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc::Sender,
    Arc,
};

use image::DynamicImage;
use nalgebra::Matrix3;
use tracing::instrument;

use crate::{
    crop::{CropProducer, ImageProcessor},
    detector::{DetectionOptions, RectangleDetector},
    filter::AcceptanceFilter,
    mailbox::FrameMailbox,
    overlay::{Overlay, OverlayRenderer},
    Detection, DetectionFrame, Frame,
};

/// What happened to a frame handed to [`FrameSink::on_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Queued for detection under this sequence number.
    Accepted(u64),
    /// The previous frame is still being processed.
    Dropped,
    /// The source had no buffer for this callback.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Preview {
    /// Index into [`FrameUpdate::detections`].
    pub detection: usize,
    pub image: DynamicImage,
}

#[derive(Debug, Clone)]
pub struct FrameUpdate {
    pub sequence: u64,
    pub detections: Vec<Detection>,
    pub overlay: Overlay,
    pub previews: Vec<Preview>,
}

#[derive(Debug, Clone)]
pub enum FrameEvent {
    Detected(FrameUpdate),
    /// Detection failed, whatever is on screen should stay there.
    Failed { sequence: u64, reason: String },
}

impl FrameEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            FrameEvent::Detected(update) => update.sequence,
            FrameEvent::Failed { sequence, .. } => *sequence,
        }
    }
}

/// Entry point for the frame source. Cheap to clone and safe to call from any thread.
#[derive(Debug, Clone)]
pub struct FrameSink {
    mailbox: Arc<FrameMailbox>,
    next_sequence: Arc<AtomicU64>,
}

impl FrameSink {
    pub(crate) fn new(mailbox: Arc<FrameMailbox>) -> Self {
        Self {
            mailbox,
            next_sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn on_frame(
        &self,
        image: Option<DynamicImage>,
        intrinsics: Option<Matrix3<f32>>,
    ) -> FrameDisposition {
        let Some(image) = image else {
            log::trace!("Frame source delivered no buffer, skipping.");
            return FrameDisposition::Skipped;
        };
        self.submit(Frame { image, intrinsics })
    }

    pub fn submit(&self, frame: Frame) -> FrameDisposition {
        if self.mailbox.is_busy() || self.mailbox.is_closed() {
            return FrameDisposition::Dropped;
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        if self.mailbox.offer(sequence, Arc::new(frame)) {
            FrameDisposition::Accepted(sequence)
        } else {
            FrameDisposition::Dropped
        }
    }
}

pub(crate) struct Worker {
    pub mailbox: Arc<FrameMailbox>,
    pub detector: Box<dyn RectangleDetector>,
    pub processor: Box<dyn ImageProcessor>,
    pub options: DetectionOptions,
    pub filter: AcceptanceFilter,
    pub renderer: OverlayRenderer,
    pub cropper: CropProducer,
    pub events: Sender<FrameEvent>,
}

impl Worker {
    pub fn run(mut self) {
        while let Some((sequence, frame)) = self.mailbox.wait() {
            let event = self.process(sequence, frame);
            self.mailbox.release(sequence);
            if self.events.send(event).is_err() {
                log::debug!("Event receiver is gone, stopping worker.");
                break;
            }
        }
        log::debug!("Frame worker stopped.");
    }

    #[instrument(level = "debug", skip(self, frame))]
    fn process(&mut self, sequence: u64, frame: Arc<Frame>) -> FrameEvent {
        let detections = match self.detector.detect(&frame, &self.options) {
            Ok(detections) => detections,
            Err(err) => {
                log::error!("Detection failed for frame {sequence}: {err}");
                return FrameEvent::Failed {
                    sequence,
                    reason: err.to_string(),
                };
            }
        };
        let current = DetectionFrame {
            sequence,
            detections,
            frame,
        };
        if let Some(best) = current.best() {
            log::debug!(
                "Frame {sequence}: {} detections, best confidence {}",
                current.detections.len(),
                best.confidence
            );
        }

        let overlay = self
            .renderer
            .render(sequence, &current.detections, &self.filter);
        let previews = self.previews(&current);
        #[cfg(feature = "debug")]
        for preview in &previews {
            let path = format!("previews/{sequence}_{}.png", preview.detection);
            if let Err(err) = preview.image.save(&path) {
                log::warn!("Failed to dump preview to {path}: {err}");
            }
        }

        FrameEvent::Detected(FrameUpdate {
            sequence,
            detections: current.detections,
            overlay,
            previews,
        })
    }

    fn previews(&self, current: &DetectionFrame) -> Vec<Preview> {
        let buffer = current.frame.size();
        current
            .detections
            .iter()
            .enumerate()
            .filter(|(_, detection)| self.filter.accepts(detection))
            .filter_map(|(index, detection)| {
                let request = self.cropper.request(current.sequence, detection, buffer);
                match self
                    .cropper
                    .produce(&request, &self.mailbox, self.processor.as_ref())
                {
                    Ok(image) => Some(Preview {
                        detection: index,
                        image,
                    }),
                    Err(err) => {
                        log::warn!(
                            "No preview for detection {index} of frame {}: {err}",
                            current.sequence
                        );
                        None
                    }
                }
            })
            .collect()
    }
}
