//! Resumable single-stream copy shared by the HTTP and registry fetchers
//!
//! Bytes land in `<destination>.syn` and are renamed into place only once the
//! declared size has been received and synced. A crash or cancellation leaves
//! the partial file (and its checkpoint) behind for the next run.

pub mod http;

pub use http::HttpFetcher;

use crate::config::{DEFAULT_CHECKPOINT_INTERVAL, FetchConfig};
use crate::digest::DigestUtils;
use crate::error::{FetchError, IoResultExt, Result};
use crate::logging::Logger;
use crate::progress::ProgressReporter;
use crate::status::{DownloadStatus, StatusStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_RANGE, HeaderMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

pub const PARTIAL_SUFFIX: &str = ".syn";

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Destination path with the partial-download suffix appended
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Keep only the final path component of a remote file name
pub fn safe_file_name(name: &str) -> Result<String> {
    let candidate = name.trim().rsplit(['/', '\\']).next().unwrap_or("");
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return Err(FetchError::UnexpectedResponse(format!(
            "Remote file name {:?} is not usable",
            name
        )));
    }
    Ok(candidate.to_string())
}

/// First byte a `206` response carries, from `Content-Range: bytes <start>-<end>/<total>`.
///
/// Falls back to `requested` when the header is missing or unreadable.
pub fn partial_content_start(headers: &HeaderMap, requested: u64) -> u64 {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().strip_prefix("bytes "))
        .and_then(|v| v.split('-').next())
        .and_then(|start| start.trim().parse().ok())
        .unwrap_or(requested)
}

/// Remote metadata resolved before any bytes move
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    pub name: String,
    pub size: u64,
    pub digest: Option<String>,
}

/// A body stream and the offset the server actually started it at
pub struct RangedStream {
    pub stream: ByteStream,
    pub start: u64,
}

/// Something that can serve the artifact's bytes from an offset onward
#[async_trait]
pub trait ByteSource: Send + Sync {
    fn describe(&self) -> String;

    async fn open_at(&self, offset: u64) -> Result<RangedStream>;
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Reuse an existing partial file when it checks out
    pub resume: bool,
    pub checkpoint_interval: u64,
    pub verify_digest: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            resume: true,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            verify_digest: false,
        }
    }
}

impl From<&FetchConfig> for FetchOptions {
    fn from(config: &FetchConfig) -> Self {
        Self {
            resume: config.resume,
            checkpoint_interval: config.checkpoint_interval_bytes.max(1),
            verify_digest: config.verify_digest,
        }
    }
}

/// Per-run state handed to a fetcher
#[derive(Clone)]
pub struct FetchSession {
    pub output: Logger,
    pub options: FetchOptions,
    pub checkpoint: Option<StatusStore>,
    /// Checkpoint loaded by the caller, if any
    pub existing: Option<DownloadStatus>,
    pub cancel: CancellationToken,
}

impl FetchSession {
    pub fn new(output: Logger) -> Self {
        Self {
            output,
            options: FetchOptions::default(),
            checkpoint: None,
            existing: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_checkpoint(mut self, store: StatusStore, existing: Option<DownloadStatus>) -> Self {
        self.checkpoint = Some(store);
        self.existing = existing;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Drive one network step, abandoning it as soon as the session is cancelled
    pub async fn until_cancelled<T>(&self, step: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled),
            result = step => result,
        }
    }

    /// Copy `artifact` from `source` into `dest_dir`, resuming when possible
    pub async fn download(
        &self,
        artifact: &RemoteArtifact,
        dest_dir: &Path,
        source: &dyn ByteSource,
    ) -> Result<PathBuf> {
        let name = safe_file_name(&artifact.name)?;
        let dest = dest_dir.join(&name);
        let total = artifact.size;

        if let Ok(meta) = tokio::fs::metadata(&dest).await {
            if meta.is_file() && meta.len() == total {
                self.output.success(&format!("{} already complete at {}", name, dest.display()));
                return Ok(dest);
            }
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .fs_context("create destination directory", dest_dir)?;

        let temp = partial_path(&dest);
        let mut offset = self.resume_offset(&dest, &temp, total).await;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&temp)
            .await
            .fs_context("open partial file", &temp)?;
        file.set_len(offset).await.fs_context("truncate partial file", &temp)?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .fs_context("seek partial file", &temp)?;

        let mut status = DownloadStatus::new(&dest, total, source.describe());
        status.curr = offset;

        if offset < total {
            let mut ranged = self.until_cancelled(source.open_at(offset)).await?;
            if ranged.start != offset {
                self.output.warning(&format!(
                    "{} answered the range request at byte {} instead of {}, restarting {} from the beginning",
                    source.describe(),
                    ranged.start,
                    offset,
                    name
                ));
                offset = 0;
                file.set_len(0).await.fs_context("truncate partial file", &temp)?;
                file.seek(std::io::SeekFrom::Start(0))
                    .await
                    .fs_context("seek partial file", &temp)?;
                status.curr = 0;

                if ranged.start != 0 {
                    ranged = self.until_cancelled(source.open_at(0)).await?;
                    if ranged.start != 0 {
                        return Err(FetchError::UnexpectedResponse(format!(
                            "{} served byte {} when the whole file was requested",
                            source.describe(),
                            ranged.start
                        )));
                    }
                }
            }
            self.save_checkpoint(&status).await?;

            if offset > 0 {
                self.output.info(&format!(
                    "Resuming {} at {} of {}",
                    name,
                    self.output.format_size(offset),
                    self.output.format_size(total)
                ));
            } else {
                self.output.info(&format!("Downloading {} ({})", name, self.output.format_size(total)));
            }

            let counter = Arc::new(AtomicU64::new(0));
            let reporter = ProgressReporter::start(
                &name,
                total,
                offset,
                counter.clone(),
                self.output.clone(),
                self.cancel.clone(),
            );
            let copied = self
                .copy_stream(ranged.stream, &mut file, &temp, &mut status, &counter)
                .await;
            reporter.stop().await;
            copied?;
        }

        file.sync_all().await.fs_context("sync partial file", &temp)?;
        drop(file);

        if self.options.verify_digest {
            if let Some(digest) = &artifact.digest {
                self.output.step(&format!("Verifying {}", DigestUtils::format_digest_short(digest)));
                if let Err(err) = DigestUtils::verify_file(&temp, digest).await {
                    let _ = tokio::fs::remove_file(&temp).await;
                    let _ = self.clear_checkpoint().await;
                    return Err(err);
                }
            }
        }

        tokio::fs::rename(&temp, &dest)
            .await
            .fs_context("rename partial file", &dest)?;
        self.clear_checkpoint().await?;

        self.output.success(&format!("{} saved to {}", name, dest.display()));
        Ok(dest)
    }

    /// Where to pick the partial file back up; 0 discards it
    async fn resume_offset(&self, dest: &Path, temp: &Path, total: u64) -> u64 {
        if !self.options.resume {
            return 0;
        }
        let partial_size = match tokio::fs::metadata(temp).await {
            Ok(meta) => meta.len(),
            Err(_) => return 0,
        };
        if partial_size > total {
            self.output.warning(&format!(
                "Partial file {} is larger than the remote artifact, starting over",
                temp.display()
            ));
            return 0;
        }

        match self.existing.as_ref().filter(|s| s.target_file == dest) {
            Some(status) if !StatusStore::validate(status, partial_size) => {
                self.output.warning(&format!(
                    "Checkpoint for {} is stale ({} recorded, {} on disk), starting over",
                    status.display_name(),
                    status.curr,
                    partial_size
                ));
                0
            }
            _ => partial_size,
        }
    }

    async fn copy_stream(
        &self,
        mut stream: ByteStream,
        file: &mut File,
        temp: &Path,
        status: &mut DownloadStatus,
        counter: &AtomicU64,
    ) -> Result<()> {
        let interval = self.options.checkpoint_interval.max(1);
        let mut pending: Vec<u8> = Vec::with_capacity(interval.min(DEFAULT_CHECKPOINT_INTERVAL) as usize);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Some(Err(FetchError::Cancelled)),
                item = stream.next() => item,
            };

            match next {
                Some(Ok(chunk)) => {
                    let received = status.curr + pending.len() as u64 + chunk.len() as u64;
                    if received > status.total_size {
                        self.flush_pending(file, temp, &mut pending, status).await?;
                        return Err(FetchError::UnexpectedResponse(format!(
                            "{} sent more than the declared {} bytes",
                            status.source_reference, status.total_size
                        )));
                    }
                    pending.extend_from_slice(&chunk);
                    counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    if pending.len() as u64 >= interval {
                        self.flush_pending(file, temp, &mut pending, status).await?;
                    }
                }
                Some(Err(err)) => {
                    if let Err(flush_err) = self.flush_pending(file, temp, &mut pending, status).await {
                        self.output.warning(&format!("Could not save progress: {}", flush_err));
                    }
                    return Err(err);
                }
                None => break,
            }
        }

        self.flush_pending(file, temp, &mut pending, status).await?;
        if status.curr != status.total_size {
            return Err(FetchError::Network(format!(
                "{} ended the stream at {} of {} bytes",
                status.source_reference, status.curr, status.total_size
            )));
        }
        Ok(())
    }

    /// Write, sync, then checkpoint; the checkpoint never runs ahead of the disk
    async fn flush_pending(
        &self,
        file: &mut File,
        temp: &Path,
        pending: &mut Vec<u8>,
        status: &mut DownloadStatus,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        file.write_all(pending).await.fs_context("write partial file", temp)?;
        file.sync_data().await.fs_context("sync partial file", temp)?;
        status.curr += pending.len() as u64;
        pending.clear();
        self.save_checkpoint(status).await
    }

    async fn save_checkpoint(&self, status: &DownloadStatus) -> Result<()> {
        match &self.checkpoint {
            Some(store) => store.save(status).await,
            None => Ok(()),
        }
    }

    async fn clear_checkpoint(&self) -> Result<()> {
        match &self.checkpoint {
            Some(store) => store.clear().await,
            None => Ok(()),
        }
    }
}
