use crate::Detection;

/// Decides which detections get a bounding box and a crop.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AcceptanceFilter {
    /// Inclusive lower bound on the detector's confidence.
    pub min_confidence: f32,
}

impl AcceptanceFilter {
    pub fn new(min_confidence: f32) -> Self {
        Self { min_confidence }
    }

    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.confidence >= self.min_confidence
    }

    pub fn accepted<'a>(
        &'a self,
        detections: &'a [Detection],
    ) -> impl Iterator<Item = &'a Detection> + 'a {
        detections.iter().filter(|it| self.accepts(it))
    }
}
