use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FileId, FileRecord, FileStatus, SessionId};

/// One upload interaction: an ordered queue of files plus running totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: SessionId,
    pub total_files: usize,
    pub completed_files: usize,
    pub total_size: u64,
    pub uploaded_size: u64,
    pub start_time: DateTime<Utc>,
    pub files: Vec<FileRecord>,
}

impl UploadSession {
    /// Builds a session from a creation request and a store-assigned id.
    pub fn from_new(id: SessionId, new: NewSession) -> Self {
        let mut session = Self {
            id,
            total_files: 0,
            completed_files: 0,
            total_size: 0,
            uploaded_size: 0,
            start_time: new.start_time,
            files: new.files,
        };
        session.recompute_totals();
        session
    }

    pub fn file(&self, file_id: &FileId) -> Option<&FileRecord> {
        self.files.iter().find(|f| &f.id == file_id)
    }

    pub fn file_mut(&mut self, file_id: &FileId) -> Option<&mut FileRecord> {
        self.files.iter_mut().find(|f| &f.id == file_id)
    }

    /// Removes a record, returning it if it was present.
    pub fn remove_file(&mut self, file_id: &FileId) -> Option<FileRecord> {
        let idx = self.files.iter().position(|f| &f.id == file_id)?;
        let removed = self.files.remove(idx);
        self.recompute_totals();
        Some(removed)
    }

    /// Recomputes every derived aggregate from `files`.
    pub fn recompute_totals(&mut self) {
        self.total_files = self.files.len();
        self.total_size = self.files.iter().map(|f| f.size).sum();
        self.recompute_completed();
        self.recompute_uploaded_size();
    }

    pub fn recompute_completed(&mut self) {
        self.completed_files = self
            .files
            .iter()
            .filter(|f| f.status == FileStatus::Success)
            .count();
    }

    /// `round(sum(size * progress / 100))`, clamped to `total_size`.
    pub fn recompute_uploaded_size(&mut self) {
        let uploaded: f64 = self.files.iter().map(FileRecord::uploaded_bytes).sum();
        self.uploaded_size = (uploaded.round() as u64).min(self.total_size);
    }

    pub fn is_complete(&self) -> bool {
        self.completed_files == self.total_files
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats::default();
        for f in &self.files {
            match f.status {
                FileStatus::Pending => stats.pending += 1,
                FileStatus::Uploading => {
                    stats.uploading += 1;
                    stats.upload_speed += f.upload_speed;
                }
                FileStatus::Success => stats.success += 1,
                FileStatus::Error => stats.error += 1,
            }
        }
        stats.overall_progress = if self.total_size == 0 {
            0.0
        } else {
            self.uploaded_size as f64 / self.total_size as f64 * 100.0
        };
        stats.is_complete = self.is_complete();
        stats
    }

    /// Checks the aggregate invariants. Used by tests and debug assertions.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.total_files != self.files.len() {
            return Err(format!(
                "total_files {} != files.len() {}",
                self.total_files,
                self.files.len()
            ));
        }
        let size: u64 = self.files.iter().map(|f| f.size).sum();
        if self.total_size != size {
            return Err(format!("total_size {} != sum {}", self.total_size, size));
        }
        let done = self
            .files
            .iter()
            .filter(|f| f.status == FileStatus::Success)
            .count();
        if self.completed_files != done {
            return Err(format!(
                "completed_files {} != successes {}",
                self.completed_files, done
            ));
        }
        if self.uploaded_size > self.total_size {
            return Err(format!(
                "uploaded_size {} > total_size {}",
                self.uploaded_size, self.total_size
            ));
        }
        Ok(())
    }
}

/// Creation request handed to a session store, which assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub start_time: DateTime<Utc>,
    pub files: Vec<FileRecord>,
}

impl NewSession {
    pub fn new(files: Vec<FileRecord>) -> Self {
        Self {
            start_time: Utc::now(),
            files,
        }
    }
}

/// Partial session update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub total_files: Option<usize>,
    pub completed_files: Option<usize>,
    pub total_size: Option<u64>,
    pub uploaded_size: Option<u64>,
    pub files: Option<Vec<FileRecord>>,
}

impl SessionUpdate {
    pub fn apply(self, session: &mut UploadSession) {
        if let Some(v) = self.total_files {
            session.total_files = v;
        }
        if let Some(v) = self.completed_files {
            session.completed_files = v;
        }
        if let Some(v) = self.total_size {
            session.total_size = v;
        }
        if let Some(v) = self.uploaded_size {
            session.uploaded_size = v;
        }
        if let Some(v) = self.files {
            session.files = v;
        }
    }
}

impl From<&UploadSession> for SessionUpdate {
    fn from(s: &UploadSession) -> Self {
        Self {
            total_files: Some(s.total_files),
            completed_files: Some(s.completed_files),
            total_size: Some(s.total_size),
            uploaded_size: Some(s.uploaded_size),
            files: Some(s.files.clone()),
        }
    }
}

/// Per-status counts and aggregate figures for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub pending: usize,
    pub uploading: usize,
    pub success: usize,
    pub error: usize,
    /// Sum of `upload_speed` over uploading records, bytes/sec.
    pub upload_speed: f64,
    /// Percentage of `total_size` uploaded.
    pub overall_progress: f64,
    pub is_complete: bool,
}
