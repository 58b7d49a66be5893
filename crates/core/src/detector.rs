//! The detector seam.
//!
//! Detection is an external capability: any inference backend plugs in
//! behind [`Detector`]. The pipeline asks a [`DetectorProvider`] for a
//! fresh instance at the start of every run, so cross-frame tracking
//! state (stable track ids) lives exactly as long as one run and never
//! leaks between sessions processed concurrently.

use image::RgbImage;

/// COCO class id for "person", the target class of the summary counters.
pub const PERSON_CLASS_ID: u32 = 0;

/// Axis-aligned detection box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

/// One detection returned by a backend for a single frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Stable identifier across frames of one run, when the backend
    /// tracks. `None` for detection-only backends.
    pub track_id: Option<u64>,
}

impl Detection {
    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS_ID
    }
}

/// Count the target-class detections in one frame.
pub fn count_people(detections: &[Detection]) -> u64 {
    detections.iter().filter(|d| d.is_person()).count() as u64
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("inference failed: {0}")]
    Inference(String),
}

/// An object-detection backend.
///
/// `&mut self` because tracking backends carry state between frames of
/// a run. Implementations are expected to be deterministic given the
/// same image and the same accumulated state, and to have already
/// applied their own confidence thresholds.
pub trait Detector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Factory handing each pipeline run its own detector instance.
pub trait DetectorProvider: Send + Sync {
    fn create_detector(&self) -> Box<dyn Detector>;
}

/// Backend used when no inference model is configured.
///
/// Reports no detections; the pipeline still assembles the uploaded
/// frames into a video with zeroed people counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDetector;

impl Detector for PassthroughDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        Ok(Vec::new())
    }
}

impl DetectorProvider for PassthroughDetector {
    fn create_detector(&self) -> Box<dyn Detector> {
        Box::new(PassthroughDetector)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
