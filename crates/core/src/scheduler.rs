//! Per-session job scheduling.
//!
//! Guards the single most important concurrency invariant: at most one
//! pipeline run per session at any time. The claim is the registry's
//! `Uploaded -> Processing` transition, taken while holding the active
//! map lock; the run itself is a spawned task the caller never awaits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::pipeline::Pipeline;
use crate::registry::SessionRegistry;
use crate::session::SessionStatus;

/// Frame rates outside this range are rejected up front.
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 120;

struct RunHandle {
    run_id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct JobScheduler {
    pipeline: Arc<Pipeline>,
    registry: Arc<SessionRegistry>,
    active: Arc<Mutex<HashMap<String, RunHandle>>>,
    next_run_id: AtomicU64,
}

impl JobScheduler {
    pub fn new(pipeline: Arc<Pipeline>, registry: Arc<SessionRegistry>) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            registry,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_run_id: AtomicU64::new(0),
        })
    }

    /// Start a run for `session_id`, returning once the `Processing`
    /// transition is recorded. Rejects unknown sessions, sessions with
    /// no frames, sessions already processing, and out-of-range frame
    /// rates; never starts a second concurrent run for one session.
    pub async fn schedule(&self, session_id: &str, fps: u32) -> Result<(), CoreError> {
        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            return Err(CoreError::Validation(format!(
                "fps must be between {MIN_FPS} and {MAX_FPS}, got {fps}"
            )));
        }

        let mut active = self.active.lock().await;

        // The registry transition is the authoritative claim, taken
        // while holding the map lock so two racing schedule calls
        // cannot both pass. A live run always has `Processing` set, so
        // a leftover map entry from a finished run never blocks a
        // reschedule.
        self.registry
            .update(session_id, |rec| {
                if rec.status == SessionStatus::Processing {
                    return Err(CoreError::InvalidState(format!(
                        "session {session_id} is already processing"
                    )));
                }
                if rec.file_count == 0 {
                    return Err(CoreError::InvalidState(format!(
                        "session {session_id} has no frames to process"
                    )));
                }
                rec.transition_to(SessionStatus::Processing)?;
                // A retry starts clean; stale failure detail would
                // shadow this run's outcome.
                rec.error_detail = None;
                Ok(())
            })
            .await?;

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let active_map = Arc::clone(&self.active);
        let id = session_id.to_string();
        let handle = tokio::spawn(async move {
            pipeline.run(&id, fps, run_cancel).await;
            // Only clear our own entry: a reschedule may already have
            // replaced it with a newer run.
            let mut active = active_map.lock().await;
            if active.get(&id).is_some_and(|run| run.run_id == run_id) {
                active.remove(&id);
            }
        });

        active.insert(
            session_id.to_string(),
            RunHandle {
                run_id,
                cancel,
                handle,
            },
        );
        tracing::info!(session_id, fps, "Pipeline run scheduled");
        Ok(())
    }

    /// Signal an in-flight run to stop. Returns whether a run was
    /// active. The pipeline notices between frames and discards its
    /// output; this never blocks on the run itself.
    pub async fn cancel(&self, session_id: &str) -> bool {
        let active = self.active.lock().await;
        match active.get(session_id) {
            Some(run) if !run.handle.is_finished() => {
                run.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Number of sessions with a live run.
    pub async fn active_count(&self) -> usize {
        let active = self.active.lock().await;
        active.values().filter(|run| !run.handle.is_finished()).count()
    }

    /// Cancel every in-flight run and wait for the tasks to wind down.
    /// Used on graceful shutdown.
    pub async fn shutdown(&self) {
        let handles: Vec<RunHandle> = {
            let mut active = self.active.lock().await;
            active.drain().map(|(_, run)| run).collect()
        };
        for run in &handles {
            run.cancel.cancel();
        }
        for run in handles {
            let _ = run.handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::frames::FrameStore;
    use crate::ingest::{Ingestor, UploadItem};
    use crate::overlay::FrameAnnotator;
    use crate::testing::{png_bytes, CountingEncoder, ScriptedDetector, SlowDetector};

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<SessionRegistry>,
        ingestor: Ingestor,
        encoder: Arc<CountingEncoder>,
        scheduler: Arc<JobScheduler>,
    }

    fn fixture(detector: Arc<dyn crate::detector::DetectorProvider>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let frames = Arc::new(FrameStore::new(dir.path().join("uploads")));
        let artifacts = Arc::new(ArtifactStore::new(dir.path().join("results")));
        let encoder = Arc::new(CountingEncoder::new());
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&registry),
            Arc::clone(&frames),
            artifacts,
            detector,
            Arc::new(FrameAnnotator::new()),
            Arc::clone(&encoder) as Arc<dyn crate::video::VideoEncoder>,
        ));
        let scheduler = JobScheduler::new(pipeline, Arc::clone(&registry));
        Fixture {
            _dir: dir,
            ingestor: Ingestor::new(Arc::clone(&registry), frames),
            registry,
            encoder,
            scheduler,
        }
    }

    async fn upload_frames(fixture: &Fixture, session_id: &str, count: usize) {
        let batch = (0..count)
            .map(|_| UploadItem {
                file_name: None,
                bytes: png_bytes(32, 32),
            })
            .collect();
        fixture.ingestor.ingest(session_id, batch).await.unwrap();
    }

    async fn wait_until_settled(registry: &SessionRegistry, session_id: &str) -> SessionStatus {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match registry.get(session_id).await {
                    Ok(rec) if rec.status != SessionStatus::Processing => return rec.status,
                    _ => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
        })
        .await
        .expect("pipeline run did not settle in time")
    }

    #[tokio::test]
    async fn run_completes_and_publishes_counters() {
        let detector = Arc::new(ScriptedDetector::new(vec![1, 3, 0]));
        let fx = fixture(detector);
        upload_frames(&fx, "s1", 3).await;

        fx.scheduler.schedule("s1", 15).await.unwrap();
        assert_eq!(wait_until_settled(&fx.registry, "s1").await, SessionStatus::Completed);

        let rec = fx.registry.get("s1").await.unwrap();
        assert_eq!(rec.processed_count, 3);
        assert_eq!(rec.total_people, 4);
        assert_eq!(rec.max_people_in_frame, 3);
        assert!(rec.output_artifact.is_some());
        assert!(rec.error_detail.is_none());
        assert_eq!(fx.encoder.opens(), 1);
        assert_eq!(fx.encoder.frames_written(), 3);
    }

    #[tokio::test]
    async fn zero_frame_session_is_rejected_without_starting_a_run() {
        let fx = fixture(Arc::new(ScriptedDetector::new(vec![])));
        fx.ingestor
            .ingest("s1", vec![UploadItem { file_name: None, bytes: b"junk".to_vec() }])
            .await
            .unwrap();

        assert_matches!(
            fx.scheduler.schedule("s1", 15).await,
            Err(CoreError::InvalidState(_))
        );
        assert_eq!(fx.scheduler.active_count().await, 0);
        assert_eq!(fx.registry.get("s1").await.unwrap().status, SessionStatus::Uploaded);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let fx = fixture(Arc::new(ScriptedDetector::new(vec![])));
        assert_matches!(
            fx.scheduler.schedule("ghost", 15).await,
            Err(CoreError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn out_of_range_fps_is_rejected() {
        let fx = fixture(Arc::new(ScriptedDetector::new(vec![])));
        upload_frames(&fx, "s1", 1).await;
        assert_matches!(
            fx.scheduler.schedule("s1", 0).await,
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            fx.scheduler.schedule("s1", 500).await,
            Err(CoreError::Validation(_))
        );
    }

    #[tokio::test]
    async fn double_schedule_runs_the_pipeline_exactly_once() {
        // Slow detector keeps the first run alive while the second
        // schedule call races it.
        let fx = fixture(Arc::new(SlowDetector::new(Duration::from_millis(100))));
        upload_frames(&fx, "s1", 3).await;

        fx.scheduler.schedule("s1", 15).await.unwrap();
        assert_matches!(
            fx.scheduler.schedule("s1", 15).await,
            Err(CoreError::InvalidState(_))
        );

        assert_eq!(wait_until_settled(&fx.registry, "s1").await, SessionStatus::Completed);
        let rec = fx.registry.get("s1").await.unwrap();
        assert_eq!(rec.processed_count, 3);
        assert_eq!(fx.encoder.opens(), 1);
        assert_eq!(fx.encoder.frames_written(), 3);
    }

    #[tokio::test]
    async fn delete_mid_run_discards_the_final_write() {
        let fx = fixture(Arc::new(SlowDetector::new(Duration::from_millis(50))));
        upload_frames(&fx, "s1", 5).await;

        fx.scheduler.schedule("s1", 15).await.unwrap();

        // Mirror the delete endpoint: drop the record, then cancel.
        fx.registry.remove("s1").await.unwrap();
        assert!(fx.scheduler.cancel("s1").await);

        tokio::time::timeout(Duration::from_secs(10), async {
            while fx.scheduler.active_count().await != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("cancelled run did not wind down");

        assert_matches!(fx.registry.get("s1").await, Err(CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn schedule_racing_an_upload_never_sees_missing_frames() {
        let fx = fixture(Arc::new(ScriptedDetector::new(vec![0; 5])));

        // Hammer schedule while the batch is still being written; a
        // claim that succeeds must imply every counted frame is on
        // disk, so the run can never come up short.
        let upload = upload_frames(&fx, "s1", 5);
        let schedule = async {
            tokio::time::timeout(Duration::from_secs(10), async {
                loop {
                    match fx.scheduler.schedule("s1", 15).await {
                        Ok(()) => break,
                        Err(_) => tokio::task::yield_now().await,
                    }
                }
            })
            .await
            .expect("schedule never succeeded");
        };
        tokio::join!(upload, schedule);

        assert_eq!(wait_until_settled(&fx.registry, "s1").await, SessionStatus::Completed);
        let rec = fx.registry.get("s1").await.unwrap();
        assert_eq!(rec.processed_count, 5);
        assert!(rec.error_detail.is_none());
    }

    #[tokio::test]
    async fn failed_run_records_error_detail() {
        let fx = fixture(Arc::new(ScriptedDetector::new(vec![0])));
        fx.encoder.fail_on_open();
        upload_frames(&fx, "s1", 1).await;

        fx.scheduler.schedule("s1", 15).await.unwrap();
        assert_eq!(wait_until_settled(&fx.registry, "s1").await, SessionStatus::Error);

        let rec = fx.registry.get("s1").await.unwrap();
        assert!(rec.error_detail.is_some());
        assert!(rec.output_artifact.is_none());
    }

    #[tokio::test]
    async fn rerun_after_reupload_uses_a_fresh_detector() {
        let detector = Arc::new(ScriptedDetector::new(vec![2, 2]));
        let fx = fixture(Arc::clone(&detector) as Arc<dyn crate::detector::DetectorProvider>);
        upload_frames(&fx, "s1", 2).await;

        fx.scheduler.schedule("s1", 15).await.unwrap();
        assert_eq!(wait_until_settled(&fx.registry, "s1").await, SessionStatus::Completed);
        assert_eq!(detector.instances_created(), 1);

        upload_frames(&fx, "s1", 1).await;
        fx.scheduler.schedule("s1", 15).await.unwrap();
        assert_eq!(wait_until_settled(&fx.registry, "s1").await, SessionStatus::Completed);

        // Second run got its own detector and swept all 3 frames.
        assert_eq!(detector.instances_created(), 2);
        let rec = fx.registry.get("s1").await.unwrap();
        assert_eq!(rec.processed_count, 3);
    }

    #[tokio::test]
    async fn shutdown_cancels_active_runs() {
        let fx = fixture(Arc::new(SlowDetector::new(Duration::from_millis(200))));
        upload_frames(&fx, "s1", 10).await;
        fx.scheduler.schedule("s1", 15).await.unwrap();

        fx.scheduler.shutdown().await;
        assert_eq!(fx.scheduler.active_count().await, 0);
    }
}
