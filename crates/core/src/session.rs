//! Session records and the upload-to-video state machine.
//!
//! A session is one logical upload-to-video job. Its status is monotone
//! along `Uploaded -> Processing -> {Completed, Error}`; the only way
//! back is a fresh upload re-arming a terminal session to `Uploaded`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;

/// Maximum length of a caller-supplied session id.
const MAX_SESSION_ID_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Has at least one stored frame (or just been created); no job running.
    Uploaded,
    /// A pipeline run is scheduled or in flight.
    Processing,
    /// A run finished and an artifact is available for download.
    Completed,
    /// A run aborted before producing a usable artifact.
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether a run has finished (successfully or not).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether the transition `self -> next` is on the state graph.
    ///
    /// Terminal states return to `Uploaded` only via a fresh upload
    /// batch; nothing leaves `Processing` except the pipeline itself.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Uploaded, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Error)
                | (Self::Completed, Self::Uploaded)
                | (Self::Error, Self::Uploaded)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One session record, owned by the [`crate::registry::SessionRegistry`].
///
/// `output_artifact` is internal bookkeeping (a filesystem path) and is
/// never serialized into API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_upload_at: Option<DateTime<Utc>>,
    /// Cumulative count of frames ingested; only ever incremented, and
    /// only after the frames are on disk.
    pub file_count: u64,
    /// Next free sequence index. Runs ahead of `file_count` while a
    /// batch is being written; a failed batch leaves a gap, never a
    /// collision.
    #[serde(skip_serializing)]
    pub next_frame_index: u64,
    pub processed_count: u64,
    pub max_people_in_frame: u64,
    pub total_people: u64,
    #[serde(skip_serializing)]
    pub output_artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl SessionRecord {
    /// Fresh record in `Uploaded` state with zeroed counters.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Uploaded,
            created_at: Utc::now(),
            last_upload_at: None,
            file_count: 0,
            next_frame_index: 0,
            processed_count: 0,
            max_people_in_frame: 0,
            total_people: 0,
            output_artifact: None,
            error_detail: None,
        }
    }

    /// Apply a validated status transition.
    pub fn transition_to(&mut self, next: SessionStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidState(format!(
                "session {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Reserve `count` sequence indices for a batch about to be
    /// written, returning the first. Visible counters are untouched;
    /// the batch is published with [`Self::record_upload`] once every
    /// frame is on disk.
    pub fn reserve_frame_indices(&mut self, count: u64) -> u64 {
        let start = self.next_frame_index;
        self.next_frame_index += count;
        start
    }

    /// Publish an upload batch whose frames are already stored: bump
    /// counters and, if a previous run already finished, re-arm the
    /// session to `Uploaded`. An upload landing while a run is in
    /// flight leaves `Processing` untouched.
    pub fn record_upload(&mut self, accepted: u64, at: DateTime<Utc>) {
        self.file_count += accepted;
        self.last_upload_at = Some(at);
        if self.status.is_terminal() {
            self.status = SessionStatus::Uploaded;
        }
    }
}

// ---------------------------------------------------------------------------
// Session ids
// ---------------------------------------------------------------------------

/// Generate an opaque session id.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validate a caller-supplied session id.
///
/// Ids become path components of the frame and artifact stores, so the
/// character set is restricted to alphanumeric, hyphen, and underscore.
pub fn validate_session_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation(
            "Session id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Session id must not exceed {MAX_SESSION_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(
            "Session id may only contain alphanumeric, hyphen, or underscore characters"
                .to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
