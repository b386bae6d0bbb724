//! Upload orchestrator.
//!
//! Drives files through `pending -> uploading -> success | error`, keeps
//! session aggregates in step with every chunk, and lets callers retry,
//! cancel and delete while transfers are running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dropzone_protocol::{FileId, FileRecord, NewSession, SessionId, SessionUpdate, UploadSession};
use dropzone_store::SessionStore;
use dropzone_thumbnail::ThumbnailSource;
use dropzone_transfer::{ChunkProgress, FileDescriptor, UploadError, UploadTransport};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::types::{BatchResult, OrchestratorConfig, ProgressCallback, ProgressFn};

type InFlightKey = (SessionId, FileId);

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn UploadTransport>,
    thumbnails: Option<Arc<dyn ThumbnailSource>>,
    /// Serializes every read-modify-write of a session.
    write_lock: tokio::sync::Mutex<()>,
    in_flight: Mutex<HashMap<InFlightKey, InFlight>>,
    next_generation: AtomicU64,
    /// Parent of every per-upload token.
    shutdown: CancellationToken,
    upload_slots: Arc<Semaphore>,
}

/// Coordinates sessions, file records and transfers.
///
/// Cheap to clone; clones share the same store, transport and in-flight
/// registry.
#[derive(Clone)]
pub struct UploadOrchestrator {
    inner: Arc<Inner>,
}

/// Builder for [`UploadOrchestrator`].
pub struct UploadOrchestratorBuilder {
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn UploadTransport>,
    thumbnails: Option<Arc<dyn ThumbnailSource>>,
    config: OrchestratorConfig,
}

impl UploadOrchestratorBuilder {
    pub fn thumbnails(mut self, source: Arc<dyn ThumbnailSource>) -> Self {
        self.thumbnails = Some(source);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> UploadOrchestrator {
        UploadOrchestrator {
            inner: Arc::new(Inner {
                store: self.store,
                transport: self.transport,
                thumbnails: self.thumbnails,
                write_lock: tokio::sync::Mutex::new(()),
                in_flight: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                upload_slots: Arc::new(Semaphore::new(self.config.max_concurrent_uploads.max(1))),
            }),
        }
    }
}

impl UploadOrchestrator {
    /// Orchestrator with default config and no thumbnails.
    pub fn new(store: Arc<dyn SessionStore>, transport: Arc<dyn UploadTransport>) -> Self {
        Self::builder(store, transport).build()
    }

    pub fn builder(
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn UploadTransport>,
    ) -> UploadOrchestratorBuilder {
        UploadOrchestratorBuilder {
            store,
            transport,
            thumbnails: None,
            config: OrchestratorConfig::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Creates a session with one pending record per file, in order.
    ///
    /// Files are not validated here.
    pub async fn create_session(
        &self,
        files: &[FileDescriptor],
    ) -> Result<UploadSession, OrchestratorError> {
        let records = files.iter().map(record_for).collect();
        let session = self.inner.store.create(NewSession::new(records)).await?;
        info!(
            session = %session.id,
            files = session.total_files,
            bytes = session.total_size,
            "upload session created"
        );
        Ok(session)
    }

    /// Appends pending records to an existing session.
    ///
    /// Returns the updated session and the ids of the new records, in order.
    pub async fn append_files(
        &self,
        session_id: SessionId,
        files: &[FileDescriptor],
    ) -> Result<(UploadSession, Vec<FileId>), OrchestratorError> {
        let (ids, session) = self
            .modify(session_id, |s| {
                let records: Vec<FileRecord> = files.iter().map(record_for).collect();
                let ids = records.iter().map(|r| r.id.clone()).collect();
                s.files.extend(records);
                s.recompute_totals();
                Ok(ids)
            })
            .await?;
        info!(session = %session_id, added = files.len(), total = session.total_files, "files appended");
        Ok((session, ids))
    }

    /// All sessions, most recent first.
    pub async fn list_sessions(&self) -> Result<Vec<UploadSession>, OrchestratorError> {
        Ok(self.inner.store.list_all().await?)
    }

    pub async fn get_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<UploadSession>, OrchestratorError> {
        Ok(self.inner.store.get_by_id(session_id).await?)
    }

    /// The most recently created session, if any.
    pub async fn latest_session(&self) -> Result<Option<UploadSession>, OrchestratorError> {
        Ok(self.inner.store.list_all().await?.into_iter().next())
    }

    /// Deletes a session and cancels its in-flight transfers.
    pub async fn delete_session(&self, session_id: SessionId) -> Result<(), OrchestratorError> {
        {
            let _guard = self.inner.write_lock.lock().await;
            self.inner.store.delete(session_id).await?;
        }
        let cancelled = self.cancel_where(|(sid, _)| *sid == session_id);
        info!(session = %session_id, cancelled, "upload session deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    /// Uploads a pending file and returns its final record.
    ///
    /// `on_progress` runs after each chunk is persisted. On failure the
    /// record is marked `error` and the transport error is returned.
    pub async fn upload_file(
        &self,
        session_id: SessionId,
        file_id: &FileId,
        file: FileDescriptor,
        on_progress: &ProgressFn<'_>,
    ) -> Result<FileRecord, OrchestratorError> {
        self.run_upload(session_id, file_id, file, on_progress, false)
            .await
    }

    /// Resets a failed (or still pending) file and uploads it again.
    pub async fn retry_upload(
        &self,
        session_id: SessionId,
        file_id: &FileId,
        file: FileDescriptor,
        on_progress: &ProgressFn<'_>,
    ) -> Result<FileRecord, OrchestratorError> {
        self.run_upload(session_id, file_id, file, on_progress, true)
            .await
    }

    /// Removes a file from its session and stops its transfer.
    ///
    /// Progress that still arrives from the stopped transfer is discarded.
    pub async fn cancel_upload(
        &self,
        session_id: SessionId,
        file_id: &FileId,
    ) -> Result<UploadSession, OrchestratorError> {
        let (removed, session) = self
            .modify(session_id, |s| {
                s.remove_file(file_id)
                    .ok_or_else(|| file_not_found(session_id, file_id))
            })
            .await?;
        let cancelled = self.cancel_where(|(sid, fid)| *sid == session_id && fid == file_id);
        info!(
            session = %session_id,
            file = %file_id,
            status = %removed.status,
            in_flight = cancelled > 0,
            "upload cancelled"
        );
        Ok(session)
    }

    /// Uploads many files concurrently, bounded by
    /// [`OrchestratorConfig::max_concurrent_uploads`].
    ///
    /// Returns one result per input, in input order. A failed file does not
    /// stop the others.
    pub async fn upload_batch(
        &self,
        session_id: SessionId,
        files: Vec<(FileId, FileDescriptor)>,
        on_progress: ProgressCallback,
    ) -> Vec<BatchResult> {
        let mut handles = Vec::with_capacity(files.len());
        for (file_id, file) in files {
            let this = self.clone();
            let on_progress = Arc::clone(&on_progress);
            let slots = Arc::clone(&self.inner.upload_slots);
            let id = file_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = slots
                    .acquire_owned()
                    .await
                    .map_err(|_| OrchestratorError::Upload(UploadError::Cancelled))?;
                this.upload_file(session_id, &id, file, on_progress.as_ref())
                    .await
            });
            handles.push((file_id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (file_id, handle) in handles {
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => Err(OrchestratorError::Task(e.to_string())),
            };
            results.push(BatchResult { file_id, result });
        }

        let ok = results.iter().filter(|r| r.is_success()).count();
        info!(session = %session_id, succeeded = ok, failed = results.len() - ok, "batch finished");
        results
    }

    /// Cancels every in-flight transfer, now and in the future.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let cancelled = self.cancel_where(|_| true);
        info!(cancelled, "orchestrator shut down");
    }

    /// Number of transfers currently running.
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn run_upload(
        &self,
        session_id: SessionId,
        file_id: &FileId,
        file: FileDescriptor,
        on_progress: &ProgressFn<'_>,
        retry: bool,
    ) -> Result<FileRecord, OrchestratorError> {
        // Registered under the write lock, so a concurrent cancel either
        // sees the token or finds the record already gone.
        let mut registration = None;
        let started = self
            .modify(session_id, |s| {
                let rec = s
                    .file_mut(file_id)
                    .ok_or_else(|| file_not_found(session_id, file_id))?;
                if retry {
                    rec.reset_for_retry()?;
                }
                rec.begin_upload()?;
                s.recompute_uploaded_size();
                registration = Some(self.register(session_id, file_id));
                Ok(())
            })
            .await;

        let (generation, cancel) = match (started, registration) {
            (Ok(_), Some(reg)) => reg,
            (started, reg) => {
                if let Some((generation, _)) = reg {
                    self.unregister(session_id, file_id, generation);
                }
                return Err(started
                    .err()
                    .unwrap_or_else(|| file_not_found(session_id, file_id)));
            }
        };
        debug!(session = %session_id, file = %file_id, retry, "upload started");

        let result = self
            .transfer(session_id, file_id, file, on_progress, cancel)
            .await;
        self.unregister(session_id, file_id, generation);
        result
    }

    async fn transfer(
        &self,
        session_id: SessionId,
        file_id: &FileId,
        file: FileDescriptor,
        on_progress: &ProgressFn<'_>,
        cancel: CancellationToken,
    ) -> Result<FileRecord, OrchestratorError> {
        if let Some(source) = &self.inner.thumbnails {
            if let Some(thumbnail) = source.thumbnail(file.clone()).await {
                self.attach_thumbnail(session_id, file_id, thumbnail).await;
            }
        }

        let name = file.name.clone();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChunkProgress>();
        let mut upload = self.inner.transport.upload(file, tx, cancel);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(p) = rx.recv() => {
                    self.apply_progress(session_id, file_id, p, on_progress).await;
                }
                res = &mut upload => break res,
            }
        };
        while let Ok(p) = rx.try_recv() {
            self.apply_progress(session_id, file_id, p, on_progress)
                .await;
        }

        match outcome {
            Ok(receipt) => self.finish_success(session_id, file_id, &name, receipt.url).await,
            Err(err) => {
                self.finish_failure(session_id, file_id, &name, &err).await;
                Err(err.into())
            }
        }
    }

    async fn attach_thumbnail(&self, session_id: SessionId, file_id: &FileId, thumbnail: String) {
        let result = self
            .modify(session_id, |s| {
                s.file_mut(file_id)
                    .ok_or_else(|| file_not_found(session_id, file_id))?
                    .set_thumbnail(thumbnail);
                Ok(())
            })
            .await;
        if let Err(e) = result {
            debug!(session = %session_id, file = %file_id, error = %e, "thumbnail discarded");
        }
    }

    async fn apply_progress(
        &self,
        session_id: SessionId,
        file_id: &FileId,
        p: ChunkProgress,
        on_progress: &ProgressFn<'_>,
    ) {
        let result = self
            .modify(session_id, |s| {
                let rec = s
                    .file_mut(file_id)
                    .ok_or_else(|| file_not_found(session_id, file_id))?;
                rec.record_progress(p.progress, p.speed);
                let rec = rec.clone();
                s.recompute_uploaded_size();
                Ok(rec)
            })
            .await;

        match result {
            Ok((record, session)) => on_progress(&record, &session),
            Err(e) if e.is_not_found() => {
                debug!(session = %session_id, file = %file_id, progress = p.progress, "late progress discarded");
            }
            Err(e) => {
                warn!(session = %session_id, file = %file_id, error = %e, "progress not persisted");
            }
        }
    }

    async fn finish_success(
        &self,
        session_id: SessionId,
        file_id: &FileId,
        name: &str,
        url: String,
    ) -> Result<FileRecord, OrchestratorError> {
        let result = self
            .modify(session_id, |s| {
                let rec = s
                    .file_mut(file_id)
                    .ok_or_else(|| file_not_found(session_id, file_id))?;
                rec.complete(url)?;
                let rec = rec.clone();
                s.recompute_totals();
                Ok(rec)
            })
            .await;

        match result {
            Ok((record, session)) => {
                info!(
                    session = %session_id,
                    file = %file_id,
                    name,
                    completed = session.completed_files,
                    total = session.total_files,
                    "upload complete"
                );
                Ok(record)
            }
            Err(e) if e.is_not_found() => {
                debug!(session = %session_id, file = %file_id, "upload finished after removal");
                Err(UploadError::Cancelled.into())
            }
            Err(e) => Err(e),
        }
    }

    async fn finish_failure(
        &self,
        session_id: SessionId,
        file_id: &FileId,
        name: &str,
        err: &UploadError,
    ) {
        warn!(session = %session_id, file = %file_id, name, error = %err, "upload failed");
        let message = err.to_string();
        let result = self
            .modify(session_id, |s| {
                let rec = s
                    .file_mut(file_id)
                    .ok_or_else(|| file_not_found(session_id, file_id))?;
                rec.fail(message)?;
                s.recompute_uploaded_size();
                Ok(())
            })
            .await;
        if let Err(e) = result {
            debug!(session = %session_id, file = %file_id, error = %e, "failure not recorded");
        }
    }

    /// Loads a session, applies `f` and writes the result back, all under the
    /// write lock. Nothing is written if `f` fails.
    async fn modify<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut UploadSession) -> Result<T, OrchestratorError>,
    ) -> Result<(T, UploadSession), OrchestratorError> {
        let _guard = self.inner.write_lock.lock().await;
        let mut session = self
            .inner
            .store
            .get_by_id(session_id)
            .await?
            .ok_or(OrchestratorError::SessionNotFound(session_id))?;
        let out = f(&mut session)?;
        debug_assert!(session.check_invariants().is_ok());
        let saved = self
            .inner
            .store
            .update(session_id, SessionUpdate::from(&session))
            .await?;
        Ok((out, saved))
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<InFlightKey, InFlight>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, session_id: SessionId, file_id: &FileId) -> (u64, CancellationToken) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.shutdown.child_token();
        self.lock_in_flight().insert(
            (session_id, file_id.clone()),
            InFlight {
                generation,
                token: token.clone(),
            },
        );
        (generation, token)
    }

    fn unregister(&self, session_id: SessionId, file_id: &FileId, generation: u64) {
        let mut map = self.lock_in_flight();
        let key = (session_id, file_id.clone());
        if map.get(&key).is_some_and(|e| e.generation == generation) {
            map.remove(&key);
        }
    }

    fn cancel_where(&self, pred: impl Fn(&InFlightKey) -> bool) -> usize {
        let mut map = self.lock_in_flight();
        let keys: Vec<InFlightKey> = map.keys().filter(|k| pred(k)).cloned().collect();
        for key in &keys {
            if let Some(entry) = map.remove(key) {
                entry.token.cancel();
            }
        }
        keys.len()
    }
}

fn record_for(file: &FileDescriptor) -> FileRecord {
    FileRecord::new(file.name.clone(), file.size, file.mime_type.clone())
}

fn file_not_found(session_id: SessionId, file_id: &FileId) -> OrchestratorError {
    OrchestratorError::FileNotFound {
        session_id,
        file_id: file_id.clone(),
    }
}

impl std::fmt::Debug for UploadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOrchestrator")
            .field("in_flight", &self.in_flight())
            .field("thumbnails", &self.inner.thumbnails.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropzone_protocol::FileStatus;
    use dropzone_store::{JsonFileSessionStore, MemorySessionStore};
    use dropzone_transfer::{SimulatorConfig, UploadReceipt, UploadSimulator};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn ignore(_: &FileRecord, _: &UploadSession) {}

    fn file(name: &str, size: u64) -> FileDescriptor {
        FileDescriptor::detached(name, size, "application/octet-stream")
    }

    /// Emits fixed progress steps, then returns the next scripted outcome.
    struct ScriptedTransport {
        steps: Vec<u8>,
        outcomes: Mutex<VecDeque<Result<(), String>>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<u8>, outcomes: Vec<Result<(), String>>) -> Self {
            Self {
                steps,
                outcomes: Mutex::new(outcomes.into()),
            }
        }

        fn always_ok() -> Self {
            Self::new(vec![25, 50, 75, 100], Vec::new())
        }
    }

    impl UploadTransport for ScriptedTransport {
        fn upload(
            &self,
            file: FileDescriptor,
            progress: mpsc::UnboundedSender<ChunkProgress>,
            _cancel: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt, UploadError>> + Send + '_>> {
            Box::pin(async move {
                let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
                let steps: &[u8] = match outcome {
                    Ok(()) => &self.steps,
                    Err(_) => &self.steps[..1],
                };
                for &p in steps {
                    let _ = progress.send(ChunkProgress {
                        progress: p,
                        speed: 1000.0,
                        uploaded_bytes: file.size * u64::from(p) / 100,
                    });
                    tokio::task::yield_now().await;
                }
                match outcome {
                    Ok(()) => Ok(UploadReceipt {
                        url: format!("https://test.local/{}", file.name),
                    }),
                    Err(msg) => Err(UploadError::Network(msg)),
                }
            })
        }
    }

    /// Sends one chunk, then waits for `release` without watching the
    /// cancellation token, then finishes.
    #[derive(Default)]
    struct GatedTransport {
        release: Notify,
    }

    impl UploadTransport for GatedTransport {
        fn upload(
            &self,
            file: FileDescriptor,
            progress: mpsc::UnboundedSender<ChunkProgress>,
            _cancel: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt, UploadError>> + Send + '_>> {
            Box::pin(async move {
                let _ = progress.send(ChunkProgress {
                    progress: 10,
                    speed: 500.0,
                    uploaded_bytes: file.size / 10,
                });
                self.release.notified().await;
                for p in [50, 100] {
                    let _ = progress.send(ChunkProgress {
                        progress: p,
                        speed: 500.0,
                        uploaded_bytes: file.size * p as u64 / 100,
                    });
                }
                Ok(UploadReceipt {
                    url: "https://test.local/late".into(),
                })
            })
        }
    }

    /// Tracks how many uploads run at once.
    #[derive(Default)]
    struct CountingTransport {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl UploadTransport for CountingTransport {
        fn upload(
            &self,
            _file: FileDescriptor,
            progress: mpsc::UnboundedSender<ChunkProgress>,
            _cancel: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt, UploadError>> + Send + '_>> {
            Box::pin(async move {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = progress.send(ChunkProgress {
                    progress: 100,
                    speed: 1.0,
                    uploaded_bytes: 0,
                });
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(UploadReceipt { url: "u".into() })
            })
        }
    }

    #[derive(Default)]
    struct FakeThumbnails {
        calls: AtomicUsize,
    }

    impl ThumbnailSource for FakeThumbnails {
        fn thumbnail(
            &self,
            file: FileDescriptor,
        ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { file.is_image().then(|| "data:image/jpeg;base64,AA==".to_string()) })
        }
    }

    fn orchestrator(transport: Arc<dyn UploadTransport>) -> UploadOrchestrator {
        UploadOrchestrator::new(Arc::new(MemorySessionStore::new()), transport)
    }

    fn simulator() -> Arc<UploadSimulator> {
        Arc::new(UploadSimulator::new(SimulatorConfig {
            failure_rate: 0.0,
            seed: Some(1),
            ..Default::default()
        }))
    }

    async fn session(orch: &UploadOrchestrator, id: SessionId) -> UploadSession {
        orch.get_session(id).await.unwrap().unwrap()
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn create_session_builds_pending_records() {
        let orch = orchestrator(Arc::new(ScriptedTransport::always_ok()));
        let s = orch
            .create_session(&[file("a.txt", 100), file("b.png", 300)])
            .await
            .unwrap();

        assert_eq!(s.total_files, 2);
        assert_eq!(s.total_size, 400);
        assert_eq!(s.completed_files, 0);
        assert_eq!(s.uploaded_size, 0);
        assert!(s.files.iter().all(|f| f.status == FileStatus::Pending));
        assert_eq!(s.files[0].name, "a.txt");
        assert_eq!(s.files[1].name, "b.png");
        assert_ne!(s.files[0].id, s.files[1].id);

        let fetched = session(&orch, s.id).await;
        assert_eq!(fetched, s);
        assert_eq!(session(&orch, s.id).await, fetched);
    }

    #[tokio::test]
    async fn append_keeps_completed_count() {
        let orch = orchestrator(Arc::new(ScriptedTransport::always_ok()));
        let s = orch.create_session(&[file("a", 100)]).await.unwrap();
        let a = s.files[0].id.clone();
        orch.upload_file(s.id, &a, file("a", 100), &ignore)
            .await
            .unwrap();

        let (s, ids) = orch
            .append_files(s.id, &[file("b", 50), file("c", 50)])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(s.total_files, 3);
        assert_eq!(s.total_size, 200);
        assert_eq!(s.completed_files, 1);
        assert_eq!(s.uploaded_size, 100);
        assert_eq!(s.files[1].id, ids[0]);
        s.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn list_and_latest_are_newest_first() {
        let orch = orchestrator(Arc::new(ScriptedTransport::always_ok()));
        assert!(orch.latest_session().await.unwrap().is_none());
        let first = orch.create_session(&[file("a", 1)]).await.unwrap();
        let second = orch.create_session(&[file("b", 1)]).await.unwrap();

        let ids: Vec<_> = orch
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(orch.latest_session().await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn not_found_errors() {
        let orch = orchestrator(Arc::new(ScriptedTransport::always_ok()));
        let s = orch.create_session(&[file("a", 1)]).await.unwrap();
        let missing = FileId::from("nope");

        let err = orch
            .upload_file(SessionId(99), &s.files[0].id, file("a", 1), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionNotFound(SessionId(99))));

        let err = orch
            .upload_file(s.id, &missing, file("a", 1), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::FileNotFound { .. }));

        let err = orch
            .retry_upload(s.id, &missing, file("a", 1), &ignore)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert!(orch.cancel_upload(s.id, &missing).await.unwrap_err().is_not_found());
        assert!(matches!(
            orch.delete_session(SessionId(99)).await,
            Err(OrchestratorError::SessionNotFound(_))
        ));
        assert_eq!(orch.in_flight(), 0);
    }

    #[tokio::test]
    async fn delete_session_removes_it() {
        let orch = orchestrator(Arc::new(ScriptedTransport::always_ok()));
        let s = orch.create_session(&[file("a", 1)]).await.unwrap();
        orch.delete_session(s.id).await.unwrap();
        assert!(orch.get_session(s.id).await.unwrap().is_none());
        assert!(orch.list_sessions().await.unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn successful_upload_reports_each_chunk() {
        let orch = orchestrator(Arc::new(ScriptedTransport::always_ok()));
        let s = orch
            .create_session(&[file("a.bin", 1000), file("b.bin", 1000)])
            .await
            .unwrap();
        let id = s.files[0].id.clone();

        let seen = Mutex::new(Vec::new());
        let invariants_held = AtomicBool::new(true);
        let on_progress = |rec: &FileRecord, session: &UploadSession| {
            if session.check_invariants().is_err() || rec.status != FileStatus::Uploading {
                invariants_held.store(false, Ordering::SeqCst);
            }
            seen.lock()
                .unwrap()
                .push((rec.upload_progress, session.uploaded_size));
        };

        let record = orch
            .upload_file(s.id, &id, file("a.bin", 1000), &on_progress)
            .await
            .unwrap();

        assert_eq!(record.status, FileStatus::Success);
        assert_eq!(record.url.as_deref(), Some("https://test.local/a.bin"));
        assert_eq!(record.upload_speed, 0.0);
        assert_eq!(record.upload_progress, 100);
        assert!(invariants_held.load(Ordering::SeqCst));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(25, 250), (50, 500), (75, 750), (100, 1000)]
        );

        let s = session(&orch, s.id).await;
        assert_eq!(s.completed_files, 1);
        assert_eq!(s.uploaded_size, 1000);
        assert!(!s.is_complete());
        s.check_invariants().unwrap();
        assert_eq!(orch.in_flight(), 0);
    }

    #[tokio::test]
    async fn failed_upload_is_recorded_and_returned() {
        let transport = ScriptedTransport::new(
            vec![25, 50, 75, 100],
            vec![Err("Upload failed due to network error".into())],
        );
        let orch = orchestrator(Arc::new(transport));
        let s = orch.create_session(&[file("a", 400)]).await.unwrap();
        let id = s.files[0].id.clone();

        let err = orch
            .upload_file(s.id, &id, file("a", 400), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Upload(UploadError::Network(_))));
        assert_eq!(err.to_string(), "Upload failed due to network error");

        let s = session(&orch, s.id).await;
        let rec = s.file(&id).unwrap();
        assert_eq!(rec.status, FileStatus::Error);
        assert_eq!(
            rec.error_message.as_deref(),
            Some("Upload failed due to network error")
        );
        assert_eq!(rec.upload_speed, 0.0);
        assert_eq!(rec.upload_progress, 25);
        assert!(rec.url.is_none());
        assert_eq!(s.uploaded_size, 100);
        assert_eq!(s.completed_files, 0);
    }

    #[tokio::test]
    async fn retry_after_failure_succeeds() {
        let transport = ScriptedTransport::new(vec![50, 100], vec![Err("boom".into()), Ok(())]);
        let orch = orchestrator(Arc::new(transport));
        let s = orch.create_session(&[file("a", 100)]).await.unwrap();
        let id = s.files[0].id.clone();

        assert!(orch.upload_file(s.id, &id, file("a", 100), &ignore).await.is_err());

        let seen = Mutex::new(Vec::new());
        let on_progress = |rec: &FileRecord, _: &UploadSession| {
            assert!(rec.error_message.is_none());
            seen.lock().unwrap().push(rec.upload_progress);
        };
        let record = orch
            .retry_upload(s.id, &id, file("a", 100), &on_progress)
            .await
            .unwrap();
        assert_eq!(record.status, FileStatus::Success);
        assert!(record.error_message.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![50, 100]);
        assert_eq!(session(&orch, s.id).await.completed_files, 1);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let orch = orchestrator(Arc::new(ScriptedTransport::always_ok()));
        let s = orch.create_session(&[file("a", 1)]).await.unwrap();
        let id = s.files[0].id.clone();
        orch.upload_file(s.id, &id, file("a", 1), &ignore)
            .await
            .unwrap();

        let err = orch
            .upload_file(s.id, &id, file("a", 1), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidState {
                from: FileStatus::Success,
                to: FileStatus::Uploading,
                ..
            }
        ));

        let err = orch
            .retry_upload(s.id, &id, file("a", 1), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidState {
                from: FileStatus::Success,
                to: FileStatus::Pending,
                ..
            }
        ));
        assert_eq!(session(&orch, s.id).await.file(&id).unwrap().status, FileStatus::Success);
        assert_eq!(orch.in_flight(), 0);
    }

    #[tokio::test]
    async fn retry_of_pending_file_just_uploads() {
        let orch = orchestrator(Arc::new(ScriptedTransport::always_ok()));
        let s = orch.create_session(&[file("a", 1)]).await.unwrap();
        let id = s.files[0].id.clone();
        let rec = orch
            .retry_upload(s.id, &id, file("a", 1), &ignore)
            .await
            .unwrap();
        assert_eq!(rec.status, FileStatus::Success);
    }

    #[tokio::test]
    async fn cancel_removes_record_and_ignores_late_progress() {
        let transport = Arc::new(GatedTransport::default());
        let orch = orchestrator(transport.clone());
        let s = orch
            .create_session(&[file("keep", 100), file("drop", 1000)])
            .await
            .unwrap();
        let sid = s.id;
        let fid = s.files[1].id.clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = {
            let orch = orch.clone();
            let fid = fid.clone();
            tokio::spawn(async move {
                let on_progress = move |rec: &FileRecord, _: &UploadSession| {
                    let _ = tx.send(rec.upload_progress);
                };
                orch.upload_file(sid, &fid, file("drop", 1000), &on_progress)
                    .await
            })
        };

        assert_eq!(rx.recv().await, Some(10));
        let after_cancel = orch.cancel_upload(sid, &fid).await.unwrap();
        assert_eq!(after_cancel.total_files, 1);
        assert_eq!(after_cancel.total_size, 100);
        assert_eq!(after_cancel.uploaded_size, 0);
        assert!(after_cancel.file(&fid).is_none());

        transport.release.notify_one();
        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(OrchestratorError::Upload(UploadError::Cancelled))
        ));

        // No callback fired for the orphaned chunks.
        assert_eq!(rx.recv().await, None);
        let s = session(&orch, sid).await;
        assert!(s.file(&fid).is_none());
        assert_eq!(s.total_files, 1);
        s.check_invariants().unwrap();
        assert_eq!(orch.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_cooperative_transfer() {
        let orch = orchestrator(simulator());
        let s = orch.create_session(&[file("big", 10_000_000)]).await.unwrap();
        let (sid, fid) = (s.id, s.files[0].id.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = {
            let orch = orch.clone();
            let fid = fid.clone();
            tokio::spawn(async move {
                let on_progress = move |rec: &FileRecord, _: &UploadSession| {
                    let _ = tx.send(rec.upload_progress);
                };
                orch.upload_file(sid, &fid, file("big", 10_000_000), &on_progress)
                    .await
            })
        };

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(orch.in_flight(), 1);
        orch.cancel_upload(sid, &fid).await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(OrchestratorError::Upload(UploadError::Cancelled))
        ));
        assert!(session(&orch, sid).await.files.is_empty());
        assert_eq!(orch.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_session_cancels_its_transfers() {
        let orch = orchestrator(simulator());
        let s = orch.create_session(&[file("big", 10_000_000)]).await.unwrap();
        let (sid, fid) = (s.id, s.files[0].id.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = {
            let orch = orch.clone();
            tokio::spawn(async move {
                let on_progress = move |rec: &FileRecord, _: &UploadSession| {
                    let _ = tx.send(rec.upload_progress);
                };
                orch.upload_file(sid, &fid, file("big", 10_000_000), &on_progress)
                    .await
            })
        };

        rx.recv().await.unwrap();
        orch.delete_session(sid).await.unwrap();
        assert!(matches!(
            task.await.unwrap(),
            Err(OrchestratorError::Upload(UploadError::Cancelled))
        ));
        assert!(orch.get_session(sid).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_fails_running_uploads() {
        let orch = orchestrator(simulator());
        let s = orch.create_session(&[file("big", 10_000_000)]).await.unwrap();
        let (sid, fid) = (s.id, s.files[0].id.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = {
            let orch = orch.clone();
            let fid = fid.clone();
            tokio::spawn(async move {
                let on_progress = move |rec: &FileRecord, _: &UploadSession| {
                    let _ = tx.send(rec.upload_progress);
                };
                orch.upload_file(sid, &fid, file("big", 10_000_000), &on_progress)
                    .await
            })
        };

        rx.recv().await.unwrap();
        orch.shutdown();
        assert!(task.await.unwrap().is_err());

        let rec = session(&orch, sid).await.file(&fid).cloned().unwrap();
        assert_eq!(rec.status, FileStatus::Error);
        assert_eq!(rec.error_message.as_deref(), Some("upload cancelled"));

        // Later uploads are cancelled immediately.
        let err = orch
            .retry_upload(sid, &fid, file("big", 10_000_000), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Upload(UploadError::Cancelled)));
    }

    #[tokio::test]
    async fn thumbnails_are_attached_to_images() {
        let thumbs = Arc::new(FakeThumbnails::default());
        let orch = UploadOrchestrator::builder(
            Arc::new(MemorySessionStore::new()),
            Arc::new(ScriptedTransport::always_ok()),
        )
        .thumbnails(thumbs.clone())
        .build();

        let files = [file("pic.png", 10), file("doc.pdf", 10)];
        let s = orch.create_session(&files).await.unwrap();
        for (rec, f) in s.files.iter().zip(files.iter()) {
            orch.upload_file(s.id, &rec.id, f.clone(), &ignore)
                .await
                .unwrap();
        }

        let s = session(&orch, s.id).await;
        assert_eq!(thumbs.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            s.files[0].thumbnail.as_deref(),
            Some("data:image/jpeg;base64,AA==")
        );
        assert!(s.files[1].thumbnail.is_none());
    }

    // -----------------------------------------------------------------------
    // Batches
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn concurrent_uploads_do_not_lose_updates() {
        let orch = orchestrator(simulator());
        let files: Vec<_> = (0..6).map(|i| file(&format!("f{i}.bin"), 50_000)).collect();
        let s = orch.create_session(&files).await.unwrap();
        let items = s
            .files
            .iter()
            .map(|r| r.id.clone())
            .zip(files.into_iter())
            .collect();

        let broken = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&broken);
        let on_progress: ProgressCallback = Arc::new(move |_: &FileRecord, s: &UploadSession| {
            if s.check_invariants().is_err() {
                flag.store(true, Ordering::SeqCst);
            }
        });

        let results = orch.upload_batch(s.id, items, on_progress).await;
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(BatchResult::is_success));
        assert!(!broken.load(Ordering::SeqCst));

        let s = session(&orch, s.id).await;
        assert_eq!(s.completed_files, 6);
        assert_eq!(s.uploaded_size, s.total_size);
        assert!(s.is_complete());
        assert!(s.files.iter().all(|f| f.url.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_respects_concurrency_limit() {
        let transport = Arc::new(CountingTransport::default());
        let orch = UploadOrchestrator::builder(Arc::new(MemorySessionStore::new()), transport.clone())
            .config(OrchestratorConfig {
                max_concurrent_uploads: 2,
            })
            .build();

        let files: Vec<_> = (0..6).map(|i| file(&format!("{i}"), 1)).collect();
        let s = orch.create_session(&files).await.unwrap();
        let items = s
            .files
            .iter()
            .map(|r| r.id.clone())
            .zip(files.into_iter())
            .collect();

        let results = orch
            .upload_batch(s.id, items, crate::types::no_progress())
            .await;
        assert!(results.iter().all(BatchResult::is_success));
        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn batch_reports_per_file_results_in_order() {
        let transport = ScriptedTransport::new(vec![100], vec![Ok(()), Err("boom".into())]);
        let orch = UploadOrchestrator::builder(Arc::new(MemorySessionStore::new()), Arc::new(transport))
            .config(OrchestratorConfig {
                max_concurrent_uploads: 1,
            })
            .build();
        let files = vec![file("a", 1), file("b", 1)];
        let s = orch.create_session(&files).await.unwrap();
        let ids: Vec<_> = s.files.iter().map(|r| r.id.clone()).collect();
        let items = ids.iter().cloned().zip(files).collect();

        let results = orch
            .upload_batch(s.id, items, crate::types::no_progress())
            .await;
        assert_eq!(results[0].file_id, ids[0]);
        assert_eq!(results[1].file_id, ids[1]);
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 1);

        let s = session(&orch, s.id).await;
        assert_eq!(s.completed_files, 1);
        assert_eq!(s.stats().error, 1);
    }

    #[tokio::test]
    async fn works_over_json_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = Arc::new(JsonFileSessionStore::open(&path).await.unwrap());
        let orch = UploadOrchestrator::new(store, Arc::new(ScriptedTransport::always_ok()));

        let s = orch.create_session(&[file("a.txt", 10)]).await.unwrap();
        let id = s.files[0].id.clone();
        orch.upload_file(s.id, &id, file("a.txt", 10), &ignore)
            .await
            .unwrap();

        let reopened = JsonFileSessionStore::open(&path).await.unwrap();
        let persisted = reopened.get_by_id(s.id).await.unwrap().unwrap();
        assert_eq!(persisted.completed_files, 1);
        assert_eq!(persisted.files[0].status, FileStatus::Success);
        assert_eq!(
            persisted.files[0].url.as_deref(),
            Some("https://test.local/a.txt")
        );
    }
}
