//! Upload transport abstraction and a simulated chunked transport.
//!
//! `UploadTransport` is implemented by anything that can move a file
//! somewhere and hand back a URL. `UploadSimulator` fakes a remote endpoint:
//! it acknowledges ~1% chunks after a random delay and injects random network
//! failures, which is enough to drive every state of the upload queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{ChunkProgress, FileDescriptor, UploadReceipt};

/// Message carried by simulated network failures.
pub const NETWORK_ERROR_MESSAGE: &str = "Upload failed due to network error";

/// Simulated speed assumes each chunk takes this long on the wire.
const NOMINAL_CHUNK_SECS: f64 = 0.1;

/// Characters left intact by `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Errors produced by an upload transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    Network(String),

    #[error("upload cancelled")]
    Cancelled,
}

/// Moves one file to its destination, reporting per-chunk progress.
///
/// Progress is sent on `progress`; the receiver may be gone, so send
/// failures must be ignored. Implementations should stop early once
/// `cancel` fires and return [`UploadError::Cancelled`].
pub trait UploadTransport: Send + Sync {
    fn upload(
        &self,
        file: FileDescriptor,
        progress: mpsc::UnboundedSender<ChunkProgress>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt, UploadError>> + Send + '_>>;
}

// ---------------------------------------------------------------------------
// SimulatorConfig
// ---------------------------------------------------------------------------

/// Tunables for [`UploadSimulator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Prefix of generated URLs.
    pub base_url: String,
    /// Probability of failure checked after every non-final chunk.
    pub failure_rate: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Lower bound on chunk size in bytes.
    pub min_chunk_size: u64,
    /// Fixed RNG seed for reproducible runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dropzone-uploads.com".into(),
            failure_rate: 0.05,
            min_delay_ms: 50,
            max_delay_ms: 250,
            min_chunk_size: 1024,
            seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// UploadSimulator
// ---------------------------------------------------------------------------

/// Simulated chunked upload with random latency and failure injection.
pub struct UploadSimulator {
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
}

impl Default for UploadSimulator {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl UploadSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    fn next_delay(&self) -> Duration {
        let (lo, hi) = (self.config.min_delay_ms, self.config.max_delay_ms);
        let ms = if hi > lo {
            self.with_rng(|rng| rng.gen_range(lo as f64..hi as f64))
        } else {
            lo as f64
        };
        Duration::from_secs_f64(ms / 1000.0)
    }

    fn roll(&self) -> f64 {
        self.with_rng(|rng| rng.gen_range(0.0..1.0))
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        // A poisoned lock still holds a usable RNG.
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut rng)
    }

    fn url_for(&self, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            uuid::Uuid::new_v4().simple(),
            utf8_percent_encode(name, URI_COMPONENT)
        )
    }

    async fn run(
        &self,
        file: FileDescriptor,
        progress_tx: mpsc::UnboundedSender<ChunkProgress>,
        cancel: CancellationToken,
    ) -> Result<UploadReceipt, UploadError> {
        let total = file.size as f64;
        let chunk_size = (total / 100.0).max(self.config.min_chunk_size as f64);
        let speed = chunk_size / NOMINAL_CHUNK_SECS;
        let mut uploaded = 0.0_f64;
        let mut chunks = 0u32;

        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            uploaded += chunk_size;
            chunks += 1;
            let progress = if total == 0.0 {
                100.0
            } else {
                (uploaded / total * 100.0).min(100.0)
            };

            let _ = progress_tx.send(ChunkProgress {
                progress: progress.round() as u8,
                speed,
                uploaded_bytes: uploaded.min(total) as u64,
            });

            if progress >= 100.0 {
                debug!(file = %file.name, chunks, "simulated upload complete");
                return Ok(UploadReceipt {
                    url: self.url_for(&file.name),
                });
            }

            if self.roll() < self.config.failure_rate {
                debug!(file = %file.name, chunks, "simulated network failure");
                return Err(UploadError::Network(NETWORK_ERROR_MESSAGE.into()));
            }
        }
    }
}

impl UploadTransport for UploadSimulator {
    fn upload(
        &self,
        file: FileDescriptor,
        progress: mpsc::UnboundedSender<ChunkProgress>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt, UploadError>> + Send + '_>> {
        Box::pin(self.run(file, progress, cancel))
    }
}
