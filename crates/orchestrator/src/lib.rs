//! Upload queue orchestration.
//!
//! [`UploadOrchestrator`] owns no session data itself: every operation
//! loads a session from a [`SessionStore`](dropzone_store::SessionStore),
//! mutates a working copy and writes it back. Transfers go through an
//! [`UploadTransport`](dropzone_transfer::UploadTransport) and previews
//! through an optional [`ThumbnailSource`](dropzone_thumbnail::ThumbnailSource).

pub mod error;
pub mod orchestrator;
pub mod types;

pub use error::OrchestratorError;
pub use orchestrator::{UploadOrchestrator, UploadOrchestratorBuilder};
pub use types::{BatchResult, OrchestratorConfig, ProgressCallback, ProgressFn, no_progress};
