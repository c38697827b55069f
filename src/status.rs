//! Download checkpoint persistence
//!
//! A checkpoint records how many bytes of a destination's `.syn` partial file
//! are durably on disk. Missing or unreadable checkpoints simply mean "start
//! fresh"; resuming is an optimization, never a correctness requirement.

use crate::error::{IoResultExt, Result};
use crate::fetch::partial_path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStatus {
    /// Final destination path; identifies the download session
    #[serde(rename = "TargetFile")]
    pub target_file: PathBuf,
    /// Bytes durably written to the partial file
    #[serde(rename = "Curr")]
    pub curr: u64,
    /// Expected final size from remote metadata
    #[serde(rename = "TotalSize")]
    pub total_size: u64,
    #[serde(rename = "SourceReference", default)]
    pub source_reference: String,
}

impl DownloadStatus {
    pub fn new(target_file: impl Into<PathBuf>, total_size: u64, source_reference: impl Into<String>) -> Self {
        Self {
            target_file: target_file.into(),
            curr: 0,
            total_size,
            source_reference: source_reference.into(),
        }
    }

    pub fn partial_file(&self) -> PathBuf {
        partial_path(&self.target_file)
    }

    /// The checkpoint only holds if the partial file is exactly `curr` long
    pub fn is_resumable(&self, partial_size_on_disk: u64) -> bool {
        partial_size_on_disk == self.curr && self.curr <= self.total_size
    }

    /// Integer percent; the `+1` keeps an unknown total from dividing by zero
    pub fn percent(&self) -> u64 {
        self.curr.saturating_mul(100) / self.total_size.saturating_add(1)
    }

    pub fn display_name(&self) -> String {
        self.target_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.target_file.display().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn validate(status: &DownloadStatus, partial_size_on_disk: u64) -> bool {
        status.is_resumable(partial_size_on_disk)
    }

    /// Read the checkpoint, treating a missing or corrupt file as absent
    pub async fn load(&self) -> Option<DownloadStatus> {
        let data = tokio::fs::read(&self.path).await.ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// Load the checkpoint and keep it only if the partial file on disk agrees
    pub async fn load_valid(&self) -> Option<DownloadStatus> {
        let status = self.load().await?;
        let partial_size = tokio::fs::metadata(status.partial_file())
            .await
            .map(|m| m.len())
            .ok()?;
        Self::validate(&status, partial_size).then_some(status)
    }

    /// Persist through a temp file and rename so readers never see a torn write
    pub async fn save(&self, status: &DownloadStatus) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .fs_context("create status directory", parent)?;
        }

        let data = serde_json::to_vec_pretty(status).map_err(|e| {
            crate::error::FetchError::Configuration(format!("Cannot encode status: {}", e))
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .fs_context("create status temp file", &tmp)?;
        file.write_all(&data).await.fs_context("write status", &tmp)?;
        file.sync_all().await.fs_context("sync status", &tmp)?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .fs_context("rename status", &self.path)
    }

    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).fs_context("remove status", &self.path),
        }
    }
}
