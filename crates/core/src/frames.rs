//! Frame storage, partitioned by session id.
//!
//! Frames live at `<root>/<session_id>/<index:05>.<ext>`. The sequence
//! index is assigned at ingestion time and parsed back out of the file
//! name on listing; playback order is derived from that index, never
//! from directory enumeration order.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// One stored frame, ordered by its sequence index.
#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub index: u64,
    pub path: PathBuf,
}

impl StoredFrame {
    /// The stored file name, used as the frame identifier in overlays.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub struct FrameStore {
    root: PathBuf,
}

impl FrameStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Persist one frame under its assigned sequence index.
    ///
    /// Frames are immutable once written; callers must never reuse an
    /// index within a session.
    pub async fn store(
        &self,
        session_id: &str,
        index: u64,
        extension: &str,
        bytes: &[u8],
    ) -> Result<(), CoreError> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{index:05}.{extension}"));
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    /// List a session's frames in ascending sequence-index order.
    ///
    /// Returns an empty list for a session with no stored frames. Files
    /// whose names do not carry a parseable index are ignored with a
    /// warning rather than corrupting the ordering.
    pub async fn list(&self, session_id: &str) -> Result<Vec<StoredFrame>, CoreError> {
        let dir = self.session_dir(session_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut frames = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match parse_index(&path) {
                Some(index) => frames.push(StoredFrame { index, path }),
                None => {
                    tracing::warn!(path = %path.display(), "Ignoring file without a sequence index");
                }
            }
        }
        frames.sort_by_key(|frame| frame.index);
        Ok(frames)
    }

    /// Remove all frames belonging to a session. Missing directories
    /// are fine; deletion is idempotent at this layer.
    pub async fn remove_session(&self, session_id: &str) -> Result<(), CoreError> {
        match tokio::fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Parse the zero-padded sequence index out of a stored frame path.
fn parse_index(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
