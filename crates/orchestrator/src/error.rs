//! Orchestrator error types.

use dropzone_protocol::{FileId, FileStatus, SessionId, TransitionError};
use dropzone_store::StoreError;
use dropzone_transfer::UploadError;

/// Errors produced by [`UploadOrchestrator`](crate::UploadOrchestrator).
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("file {file_id} not found in session {session_id}")]
    FileNotFound {
        session_id: SessionId,
        file_id: FileId,
    },

    #[error("file {file_id} cannot move from {from} to {to}")]
    InvalidState {
        file_id: FileId,
        from: FileStatus,
        to: FileStatus,
    },

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("upload task failed: {0}")]
    Task(String),
}

impl OrchestratorError {
    /// `true` for a missing session or file record.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OrchestratorError::SessionNotFound(_) | OrchestratorError::FileNotFound { .. }
        )
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => OrchestratorError::SessionNotFound(id),
            other => OrchestratorError::Store(other),
        }
    }
}

impl From<TransitionError> for OrchestratorError {
    fn from(e: TransitionError) -> Self {
        OrchestratorError::InvalidState {
            file_id: e.file_id,
            from: e.from,
            to: e.to,
        }
    }
}
