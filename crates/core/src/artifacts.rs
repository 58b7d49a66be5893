//! Artifact storage: one finished video per session.
//!
//! Runs encode into a staging path and publish via `rename`, so a
//! re-run's previous artifact stays downloadable until the replacement
//! is complete, and a download can never observe a half-written file.

use std::path::PathBuf;

use crate::error::CoreError;

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the published artifact for a session.
    pub fn artifact_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}_annotated.mp4"))
    }

    fn staging_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}_annotated.mp4.part"))
    }

    /// Prepare a staging path for a new run's output. Ensures the
    /// results directory exists.
    pub async fn stage(&self, session_id: &str) -> Result<PathBuf, CoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(self.staging_path(session_id))
    }

    /// Atomically replace the session's artifact with the staged file.
    pub async fn publish(&self, session_id: &str) -> Result<PathBuf, CoreError> {
        let staged = self.staging_path(session_id);
        let target = self.artifact_path(session_id);
        tokio::fs::rename(&staged, &target).await?;
        Ok(target)
    }

    /// Drop a staged file from an abandoned run, if one exists.
    pub async fn discard_staged(&self, session_id: &str) {
        if let Err(err) = tokio::fs::remove_file(self.staging_path(session_id)).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(session_id, error = %err, "Failed to remove staged artifact");
            }
        }
    }

    /// Read the published artifact's bytes.
    pub async fn read(&self, session_id: &str) -> Result<Vec<u8>, CoreError> {
        match tokio::fs::read(self.artifact_path(session_id)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(CoreError::NotFound {
                entity: "Artifact",
                id: session_id.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove the session's artifact and any staged leftovers. Missing
    /// files are fine.
    pub async fn delete(&self, session_id: &str) -> Result<(), CoreError> {
        for path in [self.artifact_path(session_id), self.staging_path(session_id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
