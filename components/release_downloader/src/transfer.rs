// components/release_downloader/src/transfer.rs
use crate::error::{DownloadError, FetchError, Result};
use crate::fetcher::PageFetcher;
use crate::page::{stat_url, MarkupFormat};
use crate::utils::{content_length, content_range_total, response_file_name};
use release_primitives::{AudioFormat, ReleaseId};
use reqwest::header::{HeaderMap, HeaderValue, RANGE, REFERER};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Observes transfer progress; must not influence the transfer
pub trait ProgressObserver: Send + Sync {
    /// Called at least once per received chunk
    fn on_progress(&self, name: &str, bytes: u64, total: Option<u64>);
}

impl<F> ProgressObserver for F
where
    F: Fn(&str, u64, Option<u64>) + Send + Sync,
{
    fn on_progress(&self, name: &str, bytes: u64, total: Option<u64>) {
        self(name, bytes, total)
    }
}

/// Observer that ignores progress
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _name: &str, _bytes: u64, _total: Option<u64>) {}
}

/// A verified transfer promoted to its final name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub path: PathBuf,
    pub bytes: u64,
    /// Release named by the download page, when it names one
    pub release: Option<ReleaseId>,
}

impl TransferResult {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Temporary sibling a transfer is streamed into
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Resumable, verified transfer of release archives
pub struct TransferEngine {
    fetcher: Arc<PageFetcher>,
    markup: Arc<dyn MarkupFormat>,
    download_dir: PathBuf,
}

impl TransferEngine {
    pub fn new(
        fetcher: Arc<PageFetcher>,
        markup: Arc<dyn MarkupFormat>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            markup,
            download_dir: download_dir.into(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Fetch the artifact behind a download page in the requested format
    pub async fn transfer(
        &self,
        download_page: &Url,
        format: AudioFormat,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<TransferResult> {
        let page = self.fetcher.fetch(download_page).await?;
        let downloads = self.markup.download_page(&page.url, &page.body)?;
        let signed = downloads.signed_url(format)?.clone();
        let source = self.renewed_url(&signed).await.unwrap_or(signed);

        let mut headers = HeaderMap::new();
        if let Ok(referer) = HeaderValue::from_str(download_page.as_str()) {
            headers.insert(REFERER, referer);
        }

        let name = self.probe_name(&source, &headers).await?;
        let final_path = self.download_dir.join(&name);
        let (path, bytes) = self
            .stream_to_disk(&source, headers, &name, &final_path, observer, cancel)
            .await?;

        info!(file = %path.display(), bytes, "transfer complete");
        Ok(TransferResult {
            path,
            bytes,
            release: downloads.release,
        })
    }

    /// Exchange a signed URL for a freshly minted one via the status endpoint
    async fn renewed_url(&self, signed: &Url) -> Option<Url> {
        let stat = stat_url(signed)?;
        match self.fetcher.fetch(&stat).await {
            Ok(page) => {
                let renewed = self.markup.stat_retry_url(&page.body);
                if renewed.is_none() {
                    debug!(%stat, "status endpoint offered no retry url");
                }
                renewed
            }
            Err(error) => {
                debug!(%stat, %error, "status endpoint failed, using original signed url");
                None
            }
        }
    }

    /// Learn the artifact name from the server's declared file name
    async fn probe_name(&self, source: &Url, headers: &HeaderMap) -> Result<String> {
        let probe = self.fetcher.get_stream(source, headers.clone()).await?;
        let name = response_file_name(probe.headers(), probe.url());
        drop(probe);
        name.ok_or_else(|| {
            DownloadError::InvalidUrl(format!("{source} declares no usable file name"))
        })
    }

    async fn stream_to_disk(
        &self,
        source: &Url,
        mut headers: HeaderMap,
        name: &str,
        final_path: &Path,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, u64)> {
        fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| DownloadError::io("create download directory", &self.download_dir, e))?;

        let tmp_path = partial_path(final_path);
        let mut offset = match fs::metadata(&tmp_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if offset > 0 {
            info!(file = %tmp_path.display(), offset, "resuming partial transfer");
            if let Ok(range) = HeaderValue::from_str(&format!("bytes={offset}-")) {
                headers.insert(RANGE, range);
            }
        }

        let mut response = match self.fetcher.get_stream(source, headers).await {
            Ok(response) => response,
            Err(FetchError::HttpStatus { status, .. })
                if status == StatusCode::RANGE_NOT_SATISFIABLE =>
            {
                // The partial file no longer lines up with the resource
                discard(&tmp_path).await;
                return Err(DownloadError::TransferIntegrity {
                    path: tmp_path,
                    expected: 0,
                    actual: offset,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let resumed = offset > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !resumed {
            warn!(file = %tmp_path.display(), "server ignored range request, restarting");
            offset = 0;
        }
        let total = if resumed {
            content_range_total(response.headers())
                .or_else(|| content_length(response.headers()).map(|len| len + offset))
        } else {
            content_length(response.headers())
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(&tmp_path)
            .await
            .map_err(|e| DownloadError::io("open partial file", &tmp_path, e))?;

        let mut written = offset;
        observer.on_progress(name, written, total);
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(error) = file.flush().await {
                        warn!(file = %tmp_path.display(), %error, "could not flush partial file");
                    }
                    info!(file = %tmp_path.display(), written, "transfer cancelled, keeping partial file");
                    return Err(DownloadError::Cancelled);
                }
                chunk = response.chunk() => chunk.map_err(|e| FetchError::network(source, e))?,
            };
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io("write partial file", &tmp_path, e))?;
            written += chunk.len() as u64;
            observer.on_progress(name, written, total);
        }
        file.flush()
            .await
            .map_err(|e| DownloadError::io("flush partial file", &tmp_path, e))?;
        drop(file);

        if let Some(expected) = total {
            if written != expected {
                warn!(file = %tmp_path.display(), expected, written, "byte count mismatch, discarding");
                discard(&tmp_path).await;
                return Err(DownloadError::TransferIntegrity {
                    path: final_path.to_path_buf(),
                    expected,
                    actual: written,
                });
            }
        }

        if fs::metadata(final_path).await.is_ok() {
            fs::remove_file(final_path)
                .await
                .map_err(|e| DownloadError::io("remove stale artifact", final_path, e))?;
        }
        fs::rename(&tmp_path, final_path)
            .await
            .map_err(|e| DownloadError::io("promote partial file", final_path, e))?;

        Ok((final_path.to_path_buf(), written))
    }
}

async fn discard(path: &Path) {
    if let Err(error) = fs::remove_file(path).await {
        debug!(file = %path.display(), %error, "could not remove partial file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/music/Artist - Album.zip")),
            PathBuf::from("/music/Artist - Album.zip.tmp")
        );
    }

    #[test]
    fn closures_observe_progress() {
        let seen = parking_lot::Mutex::new(Vec::new());
        let observer = |name: &str, bytes: u64, total: Option<u64>| {
            seen.lock().push((name.to_string(), bytes, total));
        };
        observer.on_progress("a.zip", 5, Some(10));
        assert_eq!(seen.lock()[0], ("a.zip".to_string(), 5, Some(10)));
    }

    #[test]
    fn file_name_of_result() {
        let result = TransferResult {
            path: PathBuf::from("/music/Album.zip"),
            bytes: 1,
            release: None,
        };
        assert_eq!(result.file_name(), "Album.zip");
    }
}
