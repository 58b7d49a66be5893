//! Handlers for the `/sessions` resource.
//!
//! A session is one upload-to-video job: frames go in via multipart
//! upload, a pipeline run turns them into an annotated video, and the
//! video comes back out as a download.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use framesight_core::error::CoreError;
use framesight_core::ingest::UploadItem;
use framesight_core::session::{self, SessionRecord, SessionStatus};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Response for a processed upload batch.
#[derive(Serialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub accepted_count: u64,
    pub skipped_count: u64,
    pub status: SessionStatus,
}

/// POST /api/v1/sessions/upload
///
/// Multipart fields:
/// - `files` (repeated): image payloads, in the order they should
///   appear in the video. Non-image payloads are skipped, not fatal.
/// - `session_id` (optional): continue an existing session; omitted
///   means a new session with a generated id.
/// - `process_now` (optional bool): start a pipeline run right after
///   ingest.
/// - `fps` (optional u32): frame rate for `process_now`.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let mut session_id: Option<String> = None;
    let mut process_now = false;
    let mut fps: Option<u32> = None;
    let mut items: Vec<UploadItem> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" => {
                let file_name = field.file_name().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                items.push(UploadItem {
                    file_name,
                    bytes: data.to_vec(),
                });
            }
            "session_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                session_id = Some(text);
            }
            "process_now" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                process_now = text
                    .parse()
                    .map_err(|_| AppError::BadRequest("process_now must be a bool".into()))?;
            }
            "fps" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                fps = Some(
                    text.parse()
                        .map_err(|_| AppError::BadRequest("fps must be an integer".into()))?,
                );
            }
            _ => {} // ignore unknown fields
        }
    }

    if items.is_empty() {
        return Err(AppError::BadRequest(
            "Missing required 'files' field".into(),
        ));
    }

    let session_id = session_id.unwrap_or_else(session::generate_session_id);
    let outcome = state.ingestor.ingest(&session_id, items).await?;

    // A batch that contributed nothing must not trigger a run; the
    // session stays in whatever state the ingest left it.
    let mut status = outcome.status;
    if process_now && outcome.accepted > 0 {
        let fps = fps.unwrap_or(state.config.default_fps);
        match state.scheduler.schedule(&session_id, fps).await {
            Ok(()) => status = SessionStatus::Processing,
            // A run already in flight will pick nothing up, but the
            // upload itself succeeded; don't fail the batch over it.
            Err(CoreError::InvalidState(msg)) => {
                tracing::warn!(session_id = %session_id, error = %msg, "process_now skipped");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(Json(UploadResponse {
        session_id: outcome.session_id,
        accepted_count: outcome.accepted,
        skipped_count: outcome.skipped,
        status,
    }))
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ProcessParams {
    pub fps: Option<u32>,
}

#[derive(Serialize)]
pub struct ProcessResponse {
    pub session_id: String,
    pub status: SessionStatus,
}

/// POST /api/v1/sessions/{id}/process
///
/// Start a pipeline run. Returns 202 once the run is scheduled; track
/// progress via the status endpoint. 409 if a run is already in flight
/// or the session has no frames.
pub async fn process(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ProcessParams>,
) -> AppResult<(StatusCode, Json<ProcessResponse>)> {
    let fps = params.fps.unwrap_or(state.config.default_fps);
    state.scheduler.schedule(&id, fps).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessResponse {
            session_id: id,
            status: SessionStatus::Processing,
        }),
    ))
}

// ---------------------------------------------------------------------------
// Status / list
// ---------------------------------------------------------------------------

/// GET /api/v1/sessions/{id}
///
/// Full session record. Internal filesystem paths never appear in the
/// response.
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<SessionRecord>> {
    let record = state.registry.get(&id).await?;
    Ok(Json(record))
}

/// One row of the session list.
#[derive(Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub file_count: u64,
}

/// GET /api/v1/sessions
///
/// Snapshot of all sessions, oldest first.
pub async fn list(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let mut records = state.registry.list().await;
    records.sort_by_key(|r| r.created_at);

    let sessions = records
        .into_iter()
        .map(|r| SessionSummary {
            session_id: r.id,
            status: r.status,
            created_at: r.created_at,
            file_count: r.file_count,
        })
        .collect();
    Json(sessions)
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /api/v1/sessions/{id}/video
///
/// The finished video as `video/mp4`. 409 until the session reaches
/// `Completed`; a re-upload after completion keeps the previous video
/// downloadable until its replacement is published.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl axum::response::IntoResponse> {
    let record = state.registry.get(&id).await?;
    if record.status != SessionStatus::Completed {
        return Err(AppError::Core(CoreError::InvalidState(format!(
            "session {id} is {}, not completed",
            record.status
        ))));
    }

    let bytes = state.artifacts.read(&id).await?;
    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "video/mp4".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"processed_{id}.mp4\""),
            ),
        ],
        bytes,
    ))
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// DELETE /api/v1/sessions/{id}
///
/// Remove the session record, stored frames, and any finished video.
/// An in-flight run is cancelled and its output discarded. Repeat
/// deletes return 404.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    // Removing the record first makes the 404 semantics atomic; the
    // cancelled run's final write is discarded against the missing id.
    state.registry.remove(&id).await?;

    if state.scheduler.cancel(&id).await {
        tracing::info!(session_id = %id, "Cancelled in-flight run for deleted session");
    }

    state.frames.remove_session(&id).await?;
    state.artifacts.delete(&id).await?;

    tracing::info!(session_id = %id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}
