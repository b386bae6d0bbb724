//! Uploader run loop: validate the selection, queue it in a session and
//! upload with bounded concurrency.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use dropzone_orchestrator::{BatchResult, ProgressCallback, UploadOrchestrator};
use dropzone_protocol::{FileRecord, SessionId, UploadSession};
use dropzone_store::{JsonFileSessionStore, MemorySessionStore, SessionStore};
use dropzone_thumbnail::ThumbnailGenerator;
use dropzone_transfer::{
    FileDescriptor, FileValidator, UploadSimulator, calculate_eta, format_file_size,
    format_upload_speed,
};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Validate files and upload them with per-file progress.
#[derive(Debug, Default, PartialEq, Parser)]
#[command(name = "dropzone", version, about = "Validate and upload files")]
pub struct Args {
    /// Print stored sessions and exit
    #[arg(long)]
    pub list: bool,

    /// Add the files to the most recent session instead of a new one
    #[arg(long)]
    pub append: bool,

    /// Files to upload
    #[arg(required_unless_present = "list")]
    pub files: Vec<PathBuf>,
}

/// Outcome of one uploader run.
#[derive(Debug, Default)]
pub struct Summary {
    pub session: Option<SessionId>,
    pub uploaded: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
    pub rejected: usize,
}

pub async fn run(config: Config, args: Args) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let orchestrator = build_orchestrator(&config, store);

    if args.list {
        for session in orchestrator.list_sessions().await? {
            print_session(&session);
        }
        return Ok(());
    }

    let watcher = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling uploads");
            watcher.shutdown();
        }
    });

    let summary = upload(&orchestrator, &config, &args).await?;
    for (name, url) in &summary.uploaded {
        println!("uploaded  {name}  {url}");
    }
    for (name, error) in &summary.failed {
        println!("failed    {name}  {error}");
    }
    if summary.rejected > 0 {
        println!("rejected  {} file(s)", summary.rejected);
    }
    if let Some(id) = summary.session {
        if let Some(session) = orchestrator.get_session(id).await? {
            print_session(&session);
        }
    }

    if !summary.failed.is_empty() {
        bail!("{} upload(s) failed", summary.failed.len());
    }
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn SessionStore>> {
    if config.store_path.is_empty() {
        return Ok(Arc::new(MemorySessionStore::new()));
    }
    Ok(Arc::new(JsonFileSessionStore::open(&config.store_path).await?))
}

pub fn build_orchestrator(config: &Config, store: Arc<dyn SessionStore>) -> UploadOrchestrator {
    UploadOrchestrator::builder(
        store,
        Arc::new(UploadSimulator::new(config.simulator.clone())),
    )
    .thumbnails(Arc::new(ThumbnailGenerator::new()))
    .config(config.orchestrator())
    .build()
}

/// Validates `args.files`, queues the accepted ones and uploads them.
pub async fn upload(
    orchestrator: &UploadOrchestrator,
    config: &Config,
    args: &Args,
) -> anyhow::Result<Summary> {
    let mut summary = Summary::default();

    let mut selected = Vec::with_capacity(args.files.len());
    for path in &args.files {
        match FileDescriptor::from_path(path).await {
            Ok(file) => selected.push(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                summary.failed.push((path.display().to_string(), e.to_string()));
            }
        }
    }

    let outcome = FileValidator::new(config.constraints()).validate(selected);
    for message in outcome.messages() {
        warn!(reason = %message, "file rejected");
    }
    summary.rejected = outcome.rejected_files();
    if outcome.accepted.is_empty() {
        info!("nothing to upload");
        return Ok(summary);
    }
    info!(files = outcome.accepted.len(), "file(s) added for upload");

    let open = if args.append {
        orchestrator.latest_session().await?
    } else {
        None
    };
    let (session_id, ids) = match open {
        Some(session) => {
            let (session, ids) = orchestrator
                .append_files(session.id, &outcome.accepted)
                .await?;
            (session.id, ids)
        }
        None => {
            let session = orchestrator.create_session(&outcome.accepted).await?;
            let ids = session.files.iter().map(|f| f.id.clone()).collect();
            (session.id, ids)
        }
    };
    summary.session = Some(session_id);

    let names: Vec<String> = outcome.accepted.iter().map(|f| f.name.clone()).collect();
    let items = ids.into_iter().zip(outcome.accepted).collect();
    let results = orchestrator
        .upload_batch(session_id, items, progress_logger())
        .await;

    for (name, BatchResult { result, .. }) in names.into_iter().zip(results) {
        match result {
            Ok(record) => summary
                .uploaded
                .push((name, record.url.unwrap_or_default())),
            Err(e) => summary.failed.push((name, e.to_string())),
        }
    }
    Ok(summary)
}

fn progress_logger() -> ProgressCallback {
    Arc::new(|record: &FileRecord, session: &UploadSession| {
        let stats = session.stats();
        debug!(
            file = %record.name,
            progress = record.upload_progress,
            speed = %format_upload_speed(record.upload_speed),
            session_progress = stats.overall_progress.round(),
            eta = %calculate_eta(session.uploaded_size, session.total_size, stats.upload_speed),
            "chunk uploaded"
        );
    })
}

fn print_session(session: &UploadSession) {
    let stats = session.stats();
    println!(
        "session {}  {}/{} files  {} of {}  started {}",
        session.id,
        session.completed_files,
        session.total_files,
        format_file_size(session.uploaded_size),
        format_file_size(session.total_size),
        session.start_time.format("%Y-%m-%d %H:%M:%S"),
    );
    if stats.error > 0 || stats.pending > 0 {
        println!("  {} failed, {} pending", stats.error, stats.pending);
    }
}
