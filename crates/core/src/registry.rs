//! In-memory session registry.
//!
//! Single source of truth for every known session. All mutations go
//! through [`SessionRegistry::update`] (or [`SessionRegistry::upsert`]),
//! which applies the mutator to a copy of the record and commits only
//! when it returns `Ok` -- a mutator that fails part-way leaves nothing
//! behind. One `RwLock` guards the whole map; mutations are tiny field
//! updates and the lock is never held across frame decode, detection,
//! or encoding work.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::session::SessionRecord;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a brand-new session. Fails if the id is already taken.
    pub async fn create(&self, id: &str) -> Result<SessionRecord, CoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            return Err(CoreError::InvalidState(format!(
                "session {id} already exists"
            )));
        }
        let record = SessionRecord::new(id);
        sessions.insert(id.to_string(), record.clone());
        Ok(record)
    }

    /// Snapshot of one session.
    pub async fn get(&self, id: &str) -> Result<SessionRecord, CoreError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::session_not_found(id))
    }

    /// Atomic read-modify-write of one session.
    ///
    /// The mutator runs against a copy; the copy replaces the stored
    /// record only when the mutator returns `Ok`.
    pub async fn update<T>(
        &self,
        id: &str,
        mutator: impl FnOnce(&mut SessionRecord) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get(id)
            .ok_or_else(|| CoreError::session_not_found(id))?;
        let mut draft = record.clone();
        let value = mutator(&mut draft)?;
        sessions.insert(id.to_string(), draft);
        Ok(value)
    }

    /// Like [`Self::update`], but inserts `SessionRecord::new(id)` first
    /// when the session does not exist yet. Used by ingestion, where the
    /// first upload batch creates the session.
    pub async fn upsert<T>(
        &self,
        id: &str,
        mutator: impl FnOnce(&mut SessionRecord) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut sessions = self.sessions.write().await;
        let mut draft = sessions
            .get(id)
            .cloned()
            .unwrap_or_else(|| SessionRecord::new(id));
        let value = mutator(&mut draft)?;
        sessions.insert(id.to_string(), draft);
        Ok(value)
    }

    /// Remove a session, returning its final record.
    pub async fn remove(&self, id: &str) -> Result<SessionRecord, CoreError> {
        self.sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| CoreError::session_not_found(id))
    }

    /// Snapshot of all sessions. Iteration order carries no meaning.
    pub async fn list(&self) -> Vec<SessionRecord> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
