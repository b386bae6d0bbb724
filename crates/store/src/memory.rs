use std::time::Duration;

use dropzone_protocol::{NewSession, SessionId, SessionUpdate, UploadSession};
use tokio::sync::RwLock;

use crate::table::SessionTable;
use crate::{SessionStore, StoreFuture};

/// In-process session store.
///
/// Each instance has its own id counter and list. An optional latency is
/// slept before every call to mimic a remote service.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    table: RwLock<SessionTable>,
    latency: Option<Duration>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing sessions; new ids continue after the highest one.
    pub fn with_sessions(sessions: Vec<UploadSession>) -> Self {
        Self {
            table: RwLock::new(SessionTable::seeded(sessions)),
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, new: NewSession) -> StoreFuture<'_, UploadSession> {
        Box::pin(async move {
            self.delay().await;
            Ok(self.table.write().await.create(new))
        })
    }

    fn get_by_id(&self, id: SessionId) -> StoreFuture<'_, Option<UploadSession>> {
        Box::pin(async move {
            self.delay().await;
            Ok(self.table.read().await.get(id))
        })
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<UploadSession>> {
        Box::pin(async move {
            self.delay().await;
            Ok(self.table.read().await.list())
        })
    }

    fn update(&self, id: SessionId, update: SessionUpdate) -> StoreFuture<'_, UploadSession> {
        Box::pin(async move {
            self.delay().await;
            self.table.write().await.update(id, update)
        })
    }

    fn delete(&self, id: SessionId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.delay().await;
            self.table.write().await.delete(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use dropzone_protocol::FileRecord;

    fn new_session(names: &[&str]) -> NewSession {
        NewSession::new(names.iter().map(|n| FileRecord::new(*n, 10, "text/plain")).collect())
    }

    #[tokio::test]
    async fn ids_increment_per_instance() {
        let a = MemorySessionStore::new();
        let b = MemorySessionStore::new();
        assert_eq!(a.create(new_session(&["x"])).await.unwrap().id, SessionId(1));
        assert_eq!(a.create(new_session(&["y"])).await.unwrap().id, SessionId(2));
        assert_eq!(b.create(new_session(&["z"])).await.unwrap().id, SessionId(1));
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemorySessionStore::new();
        let created = store.create(new_session(&["a.txt", "b.txt"])).await.unwrap();
        assert_eq!(created.total_files, 2);
        assert_eq!(created.total_size, 20);

        let fetched = store.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(store.get_by_id(created.id).await.unwrap().unwrap(), fetched);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = MemorySessionStore::new();
        store.create(new_session(&["1"])).await.unwrap();
        store.create(new_session(&["2"])).await.unwrap();
        let ids: Vec<_> = store.list_all().await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId(2), SessionId(1)]);
    }

    #[tokio::test]
    async fn returned_copies_are_detached() {
        let store = MemorySessionStore::new();
        let mut s = store.create(new_session(&["a"])).await.unwrap();
        s.files.clear();
        assert_eq!(store.get_by_id(s.id).await.unwrap().unwrap().files.len(), 1);
    }

    #[tokio::test]
    async fn update_applies_partial_fields() {
        let store = MemorySessionStore::new();
        let s = store.create(new_session(&["a"])).await.unwrap();
        let updated = store
            .update(
                s.id,
                SessionUpdate {
                    uploaded_size: Some(7),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.uploaded_size, 7);
        assert_eq!(updated.files, s.files);
    }

    #[tokio::test]
    async fn missing_sessions() {
        let store = MemorySessionStore::new();
        assert!(store.get_by_id(SessionId(9)).await.unwrap().is_none());
        assert!(matches!(
            store.update(SessionId(9), SessionUpdate::default()).await,
            Err(StoreError::NotFound(SessionId(9)))
        ));
        assert!(matches!(
            store.delete(SessionId(9)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes() {
        let store = MemorySessionStore::new();
        let s = store.create(new_session(&["a"])).await.unwrap();
        assert!(store.delete(s.id).await.unwrap());
        assert!(store.is_empty().await);
        assert!(store.delete(s.id).await.is_err());
    }

    #[tokio::test]
    async fn seeded_ids_continue_after_max() {
        let mut old = UploadSession::from_new(SessionId(41), new_session(&["old"]));
        old.start_time = chrono::Utc::now() - chrono::Duration::hours(1);
        let store = MemorySessionStore::with_sessions(vec![old]);
        let s = store.create(new_session(&["new"])).await.unwrap();
        assert_eq!(s.id, SessionId(42));
        assert_eq!(store.list_all().await.unwrap()[0].id, SessionId(42));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_applied() {
        let store = MemorySessionStore::new().with_latency(Duration::from_millis(200));
        let start = tokio::time::Instant::now();
        store.list_all().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
