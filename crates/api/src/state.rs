use std::sync::Arc;

use framesight_core::artifacts::ArtifactStore;
use framesight_core::detector::PassthroughDetector;
use framesight_core::frames::FrameStore;
use framesight_core::ingest::Ingestor;
use framesight_core::overlay::FrameAnnotator;
use framesight_core::pipeline::Pipeline;
use framesight_core::registry::SessionRegistry;
use framesight_core::scheduler::JobScheduler;
use framesight_core::video::FfmpegEncoder;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Cheaply cloneable (everything is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub frames: Arc<FrameStore>,
    pub artifacts: Arc<ArtifactStore>,
    pub ingestor: Arc<Ingestor>,
    pub scheduler: Arc<JobScheduler>,
}

impl AppState {
    /// Wire up stores, pipeline, and scheduler from configuration.
    ///
    /// No inference backend ships with the server; detection runs
    /// through the passthrough backend until one is plugged in behind
    /// [`framesight_core::detector::DetectorProvider`].
    pub fn build(config: Arc<ServerConfig>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let frames = Arc::new(FrameStore::new(config.uploads_dir()));
        let artifacts = Arc::new(ArtifactStore::new(config.results_dir()));

        let annotator = Arc::new(FrameAnnotator::with_font_file(&config.overlay_font));
        let encoder = Arc::new(FfmpegEncoder::with_binary(config.ffmpeg_bin.clone()));

        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&registry),
            Arc::clone(&frames),
            Arc::clone(&artifacts),
            Arc::new(PassthroughDetector),
            annotator,
            encoder,
        ));

        let ingestor = Arc::new(Ingestor::new(Arc::clone(&registry), Arc::clone(&frames)));
        let scheduler = JobScheduler::new(pipeline, Arc::clone(&registry));

        Self {
            config,
            registry,
            frames,
            artifacts,
            ingestor,
            scheduler,
        }
    }
}
