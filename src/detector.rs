use std::collections::VecDeque;

use tracing::instrument;

use crate::{Detection, Error, Frame, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionOptions {
    /// Most detections the detector may return for one frame, `0` for no limit.
    pub max_detections: usize,
    /// Smallest rectangle worth reporting, as a fraction of the frame.
    pub min_detection_size: f32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            max_detections: 0,
            min_detection_size: 0.1,
        }
    }
}

/// The rectangle detector the pipeline feeds frames into.
///
/// Honoring `max_detections` and `min_detection_size` is the detector's job; the
/// pipeline uses whatever list comes back as is.
pub trait RectangleDetector: Send {
    fn detect(&mut self, frame: &Frame, options: &DetectionOptions) -> Result<Vec<Detection>>;
}

impl<F> RectangleDetector for F
where
    F: FnMut(&Frame, &DetectionOptions) -> Result<Vec<Detection>> + Send,
{
    fn detect(&mut self, frame: &Frame, options: &DetectionOptions) -> Result<Vec<Detection>> {
        self(frame, options)
    }
}

/// Replays canned results, one per frame. Returns nothing once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    script: VecDeque<std::result::Result<Vec<Detection>, String>>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_detect(mut self, detections: impl IntoIterator<Item = Detection>) -> Self {
        self.script.push_back(Ok(detections.into_iter().collect()));
        self
    }

    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.script.push_back(Err(reason.into()));
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl RectangleDetector for ScriptedDetector {
    #[instrument(level = "trace", skip(self, _frame))]
    fn detect(&mut self, _frame: &Frame, options: &DetectionOptions) -> Result<Vec<Detection>> {
        let mut detections = self
            .script
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
            .map_err(Error::Detection)?;
        detections.retain(|it| {
            it.bounding_box.width >= options.min_detection_size
                || it.bounding_box.height >= options.min_detection_size
        });
        if options.max_detections != 0 {
            detections.truncate(options.max_detections);
        }
        Ok(detections)
    }
}
