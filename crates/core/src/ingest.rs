//! Upload ingestion.
//!
//! Accepts an ordered batch of payloads for a session, skips anything
//! that is not a supported raster image, and assigns each accepted
//! frame a sequence index. Index ranges are reserved under the registry
//! lock, so two batches racing on one session can never collide or
//! reorder; the visible `file_count` is committed only after every
//! frame of the batch is on disk, so a trigger that observes a nonzero
//! count always finds the frames behind it.

use std::sync::Arc;

use chrono::Utc;
use image::ImageFormat;

use crate::error::CoreError;
use crate::frames::FrameStore;
use crate::registry::SessionRegistry;
use crate::session::{self, SessionStatus};

/// One item of an upload batch, in caller-supplied order.
pub struct UploadItem {
    /// Client-side file name, for logging only; storage names frames
    /// by sequence index.
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Result of ingesting one batch.
#[derive(Debug)]
pub struct IngestOutcome {
    pub session_id: String,
    pub accepted: u64,
    pub skipped: u64,
    pub status: SessionStatus,
}

pub struct Ingestor {
    registry: Arc<SessionRegistry>,
    frames: Arc<FrameStore>,
}

impl Ingestor {
    pub fn new(registry: Arc<SessionRegistry>, frames: Arc<FrameStore>) -> Self {
        Self { registry, frames }
    }

    /// Ingest a batch for `session_id`, creating the session on first
    /// contact and re-arming a terminal one. Non-image payloads are
    /// skipped, never failing the batch.
    pub async fn ingest(
        &self,
        session_id: &str,
        batch: Vec<UploadItem>,
    ) -> Result<IngestOutcome, CoreError> {
        session::validate_session_id(session_id)?;

        // Sniff content up front; only decodable raster types count.
        let mut accepted = Vec::new();
        let mut skipped = 0u64;
        for item in batch {
            match sniff_format(&item.bytes) {
                Some(format) => accepted.push((item.bytes, frame_extension(format))),
                None => {
                    skipped += 1;
                    tracing::warn!(
                        session_id,
                        file_name = item.file_name.as_deref().unwrap_or("<unnamed>"),
                        "Skipping upload item that is not a supported image"
                    );
                }
            }
        }

        // Reserve the index range first, write the frames, and only
        // then publish the batch: a nonzero `file_count` must never be
        // observable before its frames exist on disk.
        let now = Utc::now();
        let count = accepted.len() as u64;
        let start_index = self
            .registry
            .upsert(session_id, |rec| Ok(rec.reserve_frame_indices(count)))
            .await?;

        for (offset, (bytes, extension)) in accepted.iter().enumerate() {
            self.frames
                .store(session_id, start_index + offset as u64, extension, bytes)
                .await?;
        }

        let status = match self
            .registry
            .update(session_id, |rec| {
                rec.record_upload(count, now);
                Ok(rec.status)
            })
            .await
        {
            Ok(status) => status,
            // Deleted between reservation and commit: the stored
            // frames belong to no one.
            Err(err @ CoreError::NotFound { .. }) => {
                self.frames.remove_session(session_id).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        tracing::info!(session_id, accepted = count, skipped, "Ingested upload batch");

        Ok(IngestOutcome {
            session_id: session_id.to_string(),
            accepted: count,
            skipped,
            status,
        })
    }
}

/// Identify a supported raster format from payload bytes, ignoring any
/// client-supplied file name or content type.
fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)) => Some(format),
        _ => None,
    }
}

fn frame_extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        _ => "bin",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
