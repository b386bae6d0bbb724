use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a file record, unique within its session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a single file in the upload queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "error")]
    Error,
}

impl FileStatus {
    /// Returns `true` if a record may move from `self` to `to`.
    ///
    /// Removal through cancel is not a status change and is not covered here.
    pub fn can_transition(self, to: FileStatus) -> bool {
        use FileStatus::*;
        matches!(
            (self, to),
            (Pending, Uploading) | (Uploading, Success) | (Uploading, Error) | (Error, Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Uploading => "uploading",
            FileStatus::Success => "success",
            FileStatus::Error => "error",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change on a [`FileRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition for file {file_id}: {from} -> {to}")]
pub struct TransitionError {
    pub file_id: FileId,
    pub from: FileStatus,
    pub to: FileStatus,
}

/// Per-file upload state and metadata within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub status: FileStatus,
    pub upload_progress: u8,
    pub upload_speed: f64,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FileRecord {
    /// Creates a pending record with a fresh id.
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            id: FileId::generate(),
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            status: FileStatus::Pending,
            upload_progress: 0,
            upload_speed: 0.0,
            url: None,
            thumbnail: None,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    fn transition(&mut self, to: FileStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition(to) {
            return Err(TransitionError {
                file_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// pending -> uploading.
    pub fn begin_upload(&mut self) -> Result<(), TransitionError> {
        self.transition(FileStatus::Uploading)
    }

    /// Records a chunk acknowledgement. Progress never moves backwards.
    pub fn record_progress(&mut self, progress: u8, speed: f64) {
        if self.status != FileStatus::Uploading {
            return;
        }
        self.upload_progress = progress.min(100).max(self.upload_progress);
        self.upload_speed = speed;
    }

    /// uploading -> success.
    pub fn complete(&mut self, url: String) -> Result<(), TransitionError> {
        self.transition(FileStatus::Success)?;
        self.url = Some(url);
        self.upload_speed = 0.0;
        Ok(())
    }

    /// uploading -> error.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(FileStatus::Error)?;
        self.error_message = Some(message.into());
        self.upload_speed = 0.0;
        Ok(())
    }

    /// error -> pending, clearing everything a new attempt recomputes.
    ///
    /// A record that is already pending is reset in place.
    pub fn reset_for_retry(&mut self) -> Result<(), TransitionError> {
        if self.status != FileStatus::Pending {
            self.transition(FileStatus::Pending)?;
        }
        self.upload_progress = 0;
        self.upload_speed = 0.0;
        self.error_message = None;
        Ok(())
    }

    /// Sets the preview image unless one is already present.
    pub fn set_thumbnail(&mut self, thumbnail: String) {
        if self.thumbnail.is_none() {
            self.thumbnail = Some(thumbnail);
        }
    }

    /// Bytes counted as uploaded for session aggregation.
    pub fn uploaded_bytes(&self) -> f64 {
        self.size as f64 * (f64::from(self.upload_progress) / 100.0)
    }
}
