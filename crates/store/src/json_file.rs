use std::path::{Path, PathBuf};

use dropzone_protocol::{NewSession, SessionId, SessionUpdate, UploadSession};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::table::SessionTable;
use crate::{SessionStore, StoreError, StoreFuture};

/// Session store persisted as one JSON document.
///
/// Every mutation is applied to a copy of the table, written to a temporary
/// file and renamed over the document; the in-memory table is only replaced
/// once the write succeeded. The whole document is rewritten on every
/// update, including per-chunk progress, so it is kept compact.
#[derive(Debug)]
pub struct JsonFileSessionStore {
    path: PathBuf,
    table: Mutex<SessionTable>,
}

impl JsonFileSessionStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionTable::default(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), sessions = table.len(), "session store opened");
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, table: &SessionTable) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec(table)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "session store written");
        Ok(())
    }

    /// Runs `op` on a copy of the table and commits it after a successful write.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut SessionTable) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.table.lock().await;
        let mut next = guard.clone();
        let out = op(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }
}

impl SessionStore for JsonFileSessionStore {
    fn create(&self, new: NewSession) -> StoreFuture<'_, UploadSession> {
        Box::pin(self.mutate(move |t| Ok(t.create(new))))
    }

    fn get_by_id(&self, id: SessionId) -> StoreFuture<'_, Option<UploadSession>> {
        Box::pin(async move { Ok(self.table.lock().await.get(id)) })
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<UploadSession>> {
        Box::pin(async move { Ok(self.table.lock().await.list()) })
    }

    fn update(&self, id: SessionId, update: SessionUpdate) -> StoreFuture<'_, UploadSession> {
        Box::pin(self.mutate(move |t| t.update(id, update)))
    }

    fn delete(&self, id: SessionId) -> StoreFuture<'_, bool> {
        Box::pin(self.mutate(move |t| t.delete(id)))
    }
}
