//! Framesight domain logic.
//!
//! Everything the HTTP layer builds on: session records and their state
//! machine, the in-memory session registry, frame and artifact storage,
//! the detector seam, frame annotation, video encoding, the processing
//! pipeline, and the per-session job scheduler. No axum types leak in
//! here; the `framesight-api` crate owns the web surface.

pub mod artifacts;
pub mod detector;
pub mod error;
pub mod frames;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;
