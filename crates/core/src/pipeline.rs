//! The frame-by-frame processing pipeline.
//!
//! One run reads a session's frames in sequence order, invokes the
//! detector on each, overlays detection boxes and the per-frame
//! summary, encodes everything into a single video, and finalizes the
//! session record. Decode failures skip the frame; whole-run failures
//! land in `status = Error` with a cause. The CPU-bound frame loop runs
//! on the blocking pool; the registry is only touched from the async
//! wrapper around it.

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::detector::{count_people, DetectorProvider};
use crate::error::CoreError;
use crate::frames::{FrameStore, StoredFrame};
use crate::overlay::FrameAnnotator;
use crate::registry::SessionRegistry;
use crate::session::SessionStatus;
use crate::video::{EncodeError, VideoEncoder};

/// Whole-run failure: the session moves to `Error` with this as cause.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no readable frames")]
    NoReadableFrames,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("{0}")]
    Internal(String),
}

/// Counters accumulated over one completed frame loop.
#[derive(Debug, Default)]
struct LoopSummary {
    processed: u64,
    skipped: u64,
    total_people: u64,
    max_people_in_frame: u64,
    cancelled: bool,
}

pub struct Pipeline {
    registry: Arc<SessionRegistry>,
    frames: Arc<FrameStore>,
    artifacts: Arc<ArtifactStore>,
    detector: Arc<dyn DetectorProvider>,
    annotator: Arc<FrameAnnotator>,
    encoder: Arc<dyn VideoEncoder>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<SessionRegistry>,
        frames: Arc<FrameStore>,
        artifacts: Arc<ArtifactStore>,
        detector: Arc<dyn DetectorProvider>,
        annotator: Arc<FrameAnnotator>,
        encoder: Arc<dyn VideoEncoder>,
    ) -> Self {
        Self {
            registry,
            frames,
            artifacts,
            detector,
            annotator,
            encoder,
        }
    }

    /// Execute one run for `session_id` at `fps`.
    ///
    /// Never returns an error to the caller: outcomes are recorded on
    /// the session itself. If the session was deleted while the run was
    /// in flight, the final write is discarded.
    pub async fn run(&self, session_id: &str, fps: u32, cancel: CancellationToken) {
        tracing::info!(session_id, fps, "Pipeline run starting");
        match self.run_inner(session_id, fps, cancel).await {
            Ok(None) => {}
            Ok(Some(summary)) => {
                tracing::info!(
                    session_id,
                    processed = summary.processed,
                    skipped = summary.skipped,
                    total_people = summary.total_people,
                    "Pipeline run completed"
                );
            }
            Err(err) => {
                tracing::error!(session_id, error = %err, "Pipeline run failed");
                self.artifacts.discard_staged(session_id).await;
                self.record_failure(session_id, &err).await;
            }
        }
    }

    /// `Ok(None)` means the run was cancelled and left no trace.
    async fn run_inner(
        &self,
        session_id: &str,
        fps: u32,
        cancel: CancellationToken,
    ) -> Result<Option<LoopSummary>, PipelineError> {
        let frames = self
            .frames
            .list(session_id)
            .await
            .map_err(|err| PipelineError::Internal(err.to_string()))?;
        if frames.is_empty() {
            return Err(PipelineError::NoReadableFrames);
        }

        let staged = self
            .artifacts
            .stage(session_id)
            .await
            .map_err(|err| PipelineError::Internal(err.to_string()))?;

        let detector = Arc::clone(&self.detector);
        let annotator = Arc::clone(&self.annotator);
        let encoder = Arc::clone(&self.encoder);
        let loop_cancel = cancel.clone();
        let summary = tokio::task::spawn_blocking(move || {
            encode_frames(&frames, &staged, fps, &*detector, &annotator, &*encoder, &loop_cancel)
        })
        .await
        .map_err(|err| PipelineError::Internal(format!("frame loop panicked: {err}")))??;

        if summary.cancelled {
            tracing::debug!(session_id, "Pipeline run cancelled; discarding output");
            self.artifacts.discard_staged(session_id).await;
            return Ok(None);
        }

        let artifact = self
            .artifacts
            .publish(session_id)
            .await
            .map_err(|err| PipelineError::Internal(err.to_string()))?;

        self.record_completion(session_id, &summary, artifact).await;
        Ok(Some(summary))
    }

    async fn record_completion(&self, session_id: &str, summary: &LoopSummary, artifact: PathBuf) {
        let result = self
            .registry
            .update(session_id, |rec| {
                rec.transition_to(SessionStatus::Completed)?;
                rec.processed_count = summary.processed;
                rec.total_people = summary.total_people;
                rec.max_people_in_frame = summary.max_people_in_frame;
                rec.output_artifact = Some(artifact);
                rec.error_detail = None;
                Ok(())
            })
            .await;

        if let Err(CoreError::NotFound { .. }) = result {
            // Deleted mid-run: nothing to update, and the artifact we
            // just published belongs to no one.
            tracing::debug!(session_id, "Session deleted during run; discarding result");
            if let Err(err) = self.artifacts.delete(session_id).await {
                tracing::warn!(session_id, error = %err, "Failed to remove orphaned artifact");
            }
        } else if let Err(err) = result {
            tracing::error!(session_id, error = %err, "Failed to record completion");
        }
    }

    async fn record_failure(&self, session_id: &str, cause: &PipelineError) {
        let result = self
            .registry
            .update(session_id, |rec| {
                rec.transition_to(SessionStatus::Error)?;
                rec.error_detail = Some(cause.to_string());
                Ok(())
            })
            .await;

        if let Err(CoreError::NotFound { .. }) = result {
            tracing::debug!(session_id, "Session deleted during run; discarding failure");
        } else if let Err(err) = result {
            tracing::error!(session_id, error = %err, "Failed to record pipeline failure");
        }
    }
}

/// The synchronous frame loop, run on the blocking pool.
///
/// Output dimensions are fixed by the first frame that decodes; frames
/// that fail to decode or arrive at a different size are skipped, not
/// resized. The cancellation token is polled between frames.
fn encode_frames(
    frames: &[StoredFrame],
    output: &std::path::Path,
    fps: u32,
    detector_provider: &dyn DetectorProvider,
    annotator: &FrameAnnotator,
    encoder: &dyn VideoEncoder,
    cancel: &CancellationToken,
) -> Result<LoopSummary, PipelineError> {
    // Tracking state lives exactly as long as this run.
    let mut detector = detector_provider.create_detector();
    let mut sink = None;
    let mut dimensions = (0u32, 0u32);
    let mut summary = LoopSummary::default();

    for frame in frames {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            // Drop the sink without finalizing; the staged file is
            // discarded by the caller.
            drop(sink);
            return Ok(summary);
        }

        let image = match decode_frame(frame) {
            Some(image) => image,
            None => {
                summary.skipped += 1;
                continue;
            }
        };

        // The first decodable frame fixes the output dimensions.
        if sink.is_none() {
            dimensions = (image.width(), image.height());
            sink = Some(encoder.open(output, dimensions.0, dimensions.1, fps)?);
        } else if (image.width(), image.height()) != dimensions {
            tracing::warn!(
                frame = %frame.file_name(),
                "Skipping frame whose size differs from the first frame"
            );
            summary.skipped += 1;
            continue;
        }

        let detections = match detector.detect(&image) {
            Ok(detections) => detections,
            Err(err) => {
                tracing::warn!(frame = %frame.file_name(), error = %err, "Detector failed on frame; skipping");
                summary.skipped += 1;
                continue;
            }
        };

        let people = count_people(&detections);
        summary.total_people += people;
        summary.max_people_in_frame = summary.max_people_in_frame.max(people);

        let mut annotated = image;
        annotator.draw_detections(&mut annotated, &detections);
        annotator.draw_summary(&mut annotated, people, &frame.file_name());

        if let Some(stream) = sink.as_mut() {
            stream.append(&annotated)?;
            summary.processed += 1;
        }
    }

    let Some(sink) = sink else {
        // Every frame failed to decode.
        return Err(PipelineError::NoReadableFrames);
    };
    sink.finalize()?;
    Ok(summary)
}

fn decode_frame(frame: &StoredFrame) -> Option<RgbImage> {
    match image::open(&frame.path) {
        Ok(image) => Some(image.to_rgb8()),
        Err(err) => {
            tracing::warn!(frame = %frame.file_name(), error = %err, "Failed to decode frame; skipping");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
