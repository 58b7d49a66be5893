//! Detection overlay rendering.
//!
//! Draws bounding boxes and the per-frame summary text onto annotated
//! frames. Text rendering needs a TTF font; the annotator loads one
//! from a configured path at startup and degrades to boxes-only when
//! none is available (counters and video assembly are unaffected).

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detector::Detection;

const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const SUMMARY_SCALE: f32 = 28.0;
const LABEL_SCALE: f32 = 18.0;
const MARGIN: i32 = 10;

pub struct FrameAnnotator {
    font: Option<FontVec>,
}

impl FrameAnnotator {
    /// Annotator without text support (boxes only).
    pub fn new() -> Self {
        Self { font: None }
    }

    /// Load the overlay font from `path`. A missing or unparsable font
    /// is logged and the annotator falls back to boxes-only output.
    pub fn with_font_file(path: &Path) -> Self {
        let font = match std::fs::read(path) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(font) => Some(font),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Overlay font is not a valid TTF; text overlays disabled");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Overlay font not readable; text overlays disabled");
                None
            }
        };
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw a hollow box per detection, with a track/confidence label
    /// when a font is loaded.
    pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
        for detection in detections {
            let Some(rect) = clamp_to_image(detection, image) else {
                continue;
            };
            draw_hollow_rect_mut(image, rect, OVERLAY_COLOR);

            if let Some(font) = &self.font {
                let label = match detection.track_id {
                    Some(track_id) => format!("#{track_id} {:.2}", detection.confidence),
                    None => format!("{:.2}", detection.confidence),
                };
                let y = (rect.top() - LABEL_SCALE as i32).max(0);
                draw_text_mut(
                    image,
                    OVERLAY_COLOR,
                    rect.left(),
                    y,
                    PxScale::from(LABEL_SCALE),
                    font,
                    &label,
                );
            }
        }
    }

    /// Draw the per-frame summary: people count top-left, the frame's
    /// identifier bottom-left.
    pub fn draw_summary(&self, image: &mut RgbImage, people_count: u64, frame_name: &str) {
        let Some(font) = &self.font else {
            return;
        };
        draw_text_mut(
            image,
            OVERLAY_COLOR,
            MARGIN,
            MARGIN,
            PxScale::from(SUMMARY_SCALE),
            font,
            &format!("People detected: {people_count}"),
        );
        let bottom = image.height() as i32 - SUMMARY_SCALE as i32 - MARGIN;
        draw_text_mut(
            image,
            OVERLAY_COLOR,
            MARGIN,
            bottom.max(0),
            PxScale::from(SUMMARY_SCALE),
            font,
            &format!("Frame: {frame_name}"),
        );
    }
}

impl Default for FrameAnnotator {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a detection box to an integer rect clipped to the image.
/// Degenerate or fully out-of-frame boxes yield `None`.
fn clamp_to_image(detection: &Detection, image: &RgbImage) -> Option<Rect> {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let x1 = detection.bbox.x1.clamp(0.0, width - 1.0);
    let y1 = detection.bbox.y1.clamp(0.0, height - 1.0);
    let x2 = detection.bbox.x2.clamp(0.0, width - 1.0);
    let y2 = detection.bbox.y2.clamp(0.0, height - 1.0);
    let w = (x2 - x1) as u32;
    let h = (y2 - y1) as u32;
    if w == 0 || h == 0 {
        return None;
    }
    Some(Rect::at(x1 as i32, y1 as i32).of_size(w, h))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
