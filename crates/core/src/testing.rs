//! Shared test doubles for pipeline and scheduler tests.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, RgbImage};

use crate::detector::{
    BoundingBox, Detection, Detector, DetectorError, DetectorProvider, PERSON_CLASS_ID,
};
use crate::video::{EncodeError, FrameSink, VideoEncoder};

/// Encoded PNG of a blank image, for building upload batches.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    RgbImage::new(width, height)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn person(confidence: f32, track_id: u64) -> Detection {
    Detection {
        class_id: PERSON_CLASS_ID,
        confidence,
        bbox: BoundingBox {
            x1: 2.0,
            y1: 2.0,
            x2: 12.0,
            y2: 20.0,
        },
        track_id: Some(track_id),
    }
}

/// Provider whose detectors report a scripted number of people per
/// frame, in order. Frames beyond the script get zero detections. Each
/// created detector starts from the top of the script.
pub struct ScriptedDetector {
    script: Vec<u64>,
    instances: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<u64>) -> Self {
        Self {
            script,
            instances: AtomicUsize::new(0),
        }
    }

    /// How many per-run detector instances the pipeline asked for.
    pub fn instances_created(&self) -> usize {
        self.instances.load(Ordering::SeqCst)
    }
}

impl DetectorProvider for ScriptedDetector {
    fn create_detector(&self) -> Box<dyn Detector> {
        self.instances.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedInstance {
            script: self.script.clone(),
            cursor: 0,
        })
    }
}

struct ScriptedInstance {
    script: Vec<u64>,
    cursor: usize,
}

impl Detector for ScriptedInstance {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let people = self.script.get(self.cursor).copied().unwrap_or(0);
        self.cursor += 1;
        Ok((0..people).map(|i| person(0.9, i)).collect())
    }
}

/// Provider whose detectors sleep on every frame, keeping a run alive
/// long enough for a test to race it.
pub struct SlowDetector {
    delay: Duration,
}

impl SlowDetector {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl DetectorProvider for SlowDetector {
    fn create_detector(&self) -> Box<dyn Detector> {
        let delay = self.delay;
        struct Instance {
            delay: Duration,
        }
        impl Detector for Instance {
            fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
                std::thread::sleep(self.delay);
                Ok(Vec::new())
            }
        }
        Box::new(Instance { delay })
    }
}

/// In-memory encoder: counts opens and appended frames, and writes a
/// placeholder file on finalize so artifact publication has something
/// to rename.
pub struct CountingEncoder {
    opens: AtomicU64,
    frames: Arc<AtomicU64>,
    fail_open: AtomicBool,
}

impl CountingEncoder {
    pub fn new() -> Self {
        Self {
            opens: AtomicU64::new(0),
            frames: Arc::new(AtomicU64::new(0)),
            fail_open: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `open` fail.
    pub fn fail_on_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

impl VideoEncoder for CountingEncoder {
    fn open(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        _fps: u32,
    ) -> Result<Box<dyn FrameSink>, EncodeError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(EncodeError::ExecutionFailed {
                exit_code: Some(1),
                stderr: "simulated encoder failure".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSink {
            output: output.to_path_buf(),
            width,
            height,
            frames: Arc::clone(&self.frames),
        }))
    }
}

struct CountingSink {
    output: PathBuf,
    width: u32,
    height: u32,
    frames: Arc<AtomicU64>,
}

impl FrameSink for CountingSink {
    fn append(&mut self, frame: &RgbImage) -> Result<(), EncodeError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(EncodeError::FrameSizeMismatch {
                width: self.width,
                height: self.height,
                got_width: frame.width(),
                got_height: frame.height(),
            });
        }
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<(), EncodeError> {
        std::fs::write(&self.output, b"test video")?;
        Ok(())
    }
}
