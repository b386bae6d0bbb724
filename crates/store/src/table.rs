use dropzone_protocol::{NewSession, SessionId, SessionUpdate, UploadSession};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Ordered session list plus the id counter, shared by both backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionTable {
    next_id: u64,
    /// Newest first.
    sessions: Vec<UploadSession>,
}

impl SessionTable {
    pub(crate) fn seeded(mut sessions: Vec<UploadSession>) -> Self {
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        let next_id = sessions.iter().map(|s| s.id.0).max().map_or(1, |m| m + 1);
        Self { next_id, sessions }
    }

    pub(crate) fn create(&mut self, new: NewSession) -> UploadSession {
        // A table loaded from an older document may carry a zero counter.
        let floor = self.sessions.iter().map(|s| s.id.0 + 1).max().unwrap_or(1);
        let id = SessionId(self.next_id.max(floor));
        self.next_id = id.0 + 1;

        let session = UploadSession::from_new(id, new);
        self.sessions.insert(0, session.clone());
        session
    }

    pub(crate) fn get(&self, id: SessionId) -> Option<UploadSession> {
        self.sessions.iter().find(|s| s.id == id).cloned()
    }

    pub(crate) fn list(&self) -> Vec<UploadSession> {
        self.sessions.clone()
    }

    pub(crate) fn update(
        &mut self,
        id: SessionId,
        update: SessionUpdate,
    ) -> Result<UploadSession, StoreError> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound(id))?;
        update.apply(session);
        Ok(session.clone())
    }

    pub(crate) fn delete(&mut self, id: SessionId) -> Result<bool, StoreError> {
        let idx = self
            .sessions
            .iter()
            .position(|s| s.id == id)
            .ok_or(StoreError::NotFound(id))?;
        self.sessions.remove(idx);
        Ok(true)
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }
}
