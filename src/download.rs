use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{PipelineError, PipelineResult};
use crate::record::video_id;

/// Acquires a resolved locator into local storage
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        locator: &str,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<PathBuf>;
}

/// Deterministic local file name for a locator
pub fn download_file_name(locator: &str) -> String {
    let path = Url::parse(locator)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| locator.to_string());

    let ext = Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp4".to_string());

    format!("{}.{}", video_id(locator, None), ext)
}

/// Streaming HTTP downloader
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    progress_interval_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, progress_interval_bytes: u64) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            progress_interval_bytes: progress_interval_bytes.max(1),
        })
    }

    async fn stream_to_file(
        &self,
        locator: &str,
        part_path: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<u64> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            response = self.client.get(locator).send() => {
                response.map_err(|e| PipelineError::transient(locator, e))?
            }
        };

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(PipelineError::transient(locator, format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(PipelineError::Download(format!("HTTP {} for {}", status, locator)));
        }

        let declared = response.content_length();
        let mut file = tokio::fs::File::create(part_path).await.map_err(|e| {
            PipelineError::Download(format!("cannot create {}: {}", part_path.display(), e))
        })?;

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut next_report = self.progress_interval_bytes;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await.map_err(|e| {
                        PipelineError::Download(format!("write to {} failed: {}", part_path.display(), e))
                    })?;
                    written += bytes.len() as u64;

                    if written >= next_report {
                        match declared {
                            Some(total) if total > 0 => debug!(
                                "⬇️  {} / {} bytes ({:.1}%)",
                                written,
                                total,
                                written as f64 / total as f64 * 100.0
                            ),
                            _ => debug!("⬇️  {} bytes", written),
                        }
                        next_report = written + self.progress_interval_bytes;
                    }
                }
                // A body shorter than the declared length ends the stream with an error
                Some(Err(e)) if declared.is_some_and(|total| written < total) => {
                    debug!("Body for {} ended early: {}", locator, e);
                    break;
                }
                Some(Err(e)) => return Err(PipelineError::transient(locator, e)),
                None => break,
            }
        }

        file.flush()
            .await
            .map_err(|e| PipelineError::Download(format!("flush failed: {}", e)))?;

        if let Some(total) = declared {
            if total != written {
                warn!(
                    "Content length mismatch for {}: declared {} bytes, received {}",
                    locator, total, written
                );
            }
        }

        Ok(written)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        locator: &str,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<PathBuf> {
        if let Some(local) = local_source(locator) {
            debug!("📁 Using local file: {}", local.display());
            return Ok(local);
        }

        tokio::fs::create_dir_all(dest_dir).await.map_err(|e| {
            PipelineError::Download(format!("cannot create {}: {}", dest_dir.display(), e))
        })?;

        let file_name = download_file_name(locator);
        let final_path = dest_dir.join(&file_name);
        let mut part = PartFile::new(dest_dir.join(format!("{}.part", file_name)));

        info!("⬇️  Downloading {} -> {}", locator, final_path.display());

        let written = self.stream_to_file(locator, &part.path, cancel).await?;

        tokio::fs::rename(&part.path, &final_path).await.map_err(|e| {
            PipelineError::Download(format!(
                "cannot move download into place at {}: {}",
                final_path.display(),
                e
            ))
        })?;
        part.keep();

        info!("✅ Downloaded {} bytes to {}", written, final_path.display());
        Ok(final_path)
    }
}

/// `file://` URLs and existing plain paths are used in place
fn local_source(locator: &str) -> Option<PathBuf> {
    match Url::parse(locator) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        Ok(_) => None,
        Err(_) => {
            let path = PathBuf::from(locator);
            path.is_file().then_some(path)
        }
    }
}

/// Temporary download file, removed on drop unless it was moved into place.
///
/// Dropping covers every early exit, including the fetch future being dropped
/// by a timeout or cancellation.
struct PartFile {
    path: PathBuf,
    keep: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial download {}: {}", self.path.display(), e);
            }
        }
    }
}
