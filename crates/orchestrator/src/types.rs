//! Configuration and result types for the orchestrator.

use std::sync::Arc;

use dropzone_protocol::{FileId, FileRecord, UploadSession};
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Caller hook invoked after every persisted progress update.
pub type ProgressFn<'a> = dyn Fn(&FileRecord, &UploadSession) + Send + Sync + 'a;

/// Shareable progress hook, used where uploads run on spawned tasks.
pub type ProgressCallback = Arc<ProgressFn<'static>>;

/// A progress hook that ignores every update.
pub fn no_progress() -> ProgressCallback {
    Arc::new(|_: &FileRecord, _: &UploadSession| {})
}

/// Tunables for [`UploadOrchestrator`](crate::UploadOrchestrator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on transfers running at once through `upload_batch`.
    pub max_concurrent_uploads: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 3,
        }
    }
}

/// Outcome of one file in a batch upload.
#[derive(Debug)]
pub struct BatchResult {
    pub file_id: FileId,
    pub result: Result<FileRecord, OrchestratorError>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
