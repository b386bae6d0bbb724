//! Data model shared by the dropzone crates: upload sessions, per-file
//! records and the file status state machine.

pub mod session;
pub mod types;

pub use session::{NewSession, SessionStats, SessionUpdate, UploadSession};
pub use types::{FileId, FileRecord, FileStatus, SessionId, TransitionError};
