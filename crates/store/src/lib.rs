//! Session persistence.
//!
//! The orchestrator only sees the [`SessionStore`] trait; backends own the
//! session data and hand out copies.

use std::future::Future;
use std::pin::Pin;

use dropzone_protocol::{NewSession, SessionId, SessionUpdate, UploadSession};

mod error;
mod json_file;
mod memory;
mod table;

pub use error::StoreError;
pub use json_file::JsonFileSessionStore;
pub use memory::MemorySessionStore;

/// Boxed future returned by [`SessionStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Abstract session storage.
///
/// Every method returns owned copies; mutating a returned session has no
/// effect until it is written back with [`update`](Self::update).
pub trait SessionStore: Send + Sync {
    /// Persists a new session and assigns its id.
    fn create(&self, new: NewSession) -> StoreFuture<'_, UploadSession>;

    fn get_by_id(&self, id: SessionId) -> StoreFuture<'_, Option<UploadSession>>;

    /// All sessions, most recent first.
    fn list_all(&self) -> StoreFuture<'_, Vec<UploadSession>>;

    /// Applies a partial update. Fails with [`StoreError::NotFound`] if absent.
    fn update(&self, id: SessionId, update: SessionUpdate) -> StoreFuture<'_, UploadSession>;

    /// Removes a session. Fails with [`StoreError::NotFound`] if absent.
    fn delete(&self, id: SessionId) -> StoreFuture<'_, bool>;
}
