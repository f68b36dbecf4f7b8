use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::HerdError;

/// Downloads a remote archive to a local path, overwriting it.
///
/// Network and HTTP problems must be reported as [`HerdError::Fetch`]; the
/// catalog treats every other error as fatal.
pub trait ArchiveFetcher: Send + Sync {
    fn download(
        &self,
        url: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<(), HerdError>> + Send;
}

/// Fetches `http(s)://` URLs with reqwest and `file://` URLs from disk.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, HerdError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| HerdError::HttpClient { source })?;
        Ok(Self { client })
    }

    async fn download_http(&self, url: &str, tmp_path: &Path) -> Result<(), HerdError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(url, &e))?;

        if !response.status().is_success() {
            return Err(HerdError::Fetch {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let mut file = tokio::fs::File::create(tmp_path)
            .await
            .map_err(|e| HerdError::Io {
                context: format!("creating temp file {}", tmp_path.display()),
                source: e,
            })?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fetch_error(url, &e))?;
            file.write_all(&chunk).await.map_err(|e| HerdError::Io {
                context: "writing workflow archive".into(),
                source: e,
            })?;
        }

        file.flush().await.map_err(|e| HerdError::Io {
            context: "flushing workflow archive".into(),
            source: e,
        })?;

        Ok(())
    }
}

impl ArchiveFetcher for HttpFetcher {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), HerdError> {
        let tmp_path = part_path(dest);

        // Remove any stale .part file from a previous failed download
        let _ = tokio::fs::remove_file(&tmp_path).await;

        let result = match url.strip_prefix("file://") {
            Some(source) => copy_local(url, Path::new(source), &tmp_path).await,
            None => self.download_http(url, &tmp_path).await,
        };
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        tokio::fs::rename(&tmp_path, dest)
            .await
            .map_err(|e| HerdError::Io {
                context: format!("renaming {} to {}", tmp_path.display(), dest.display()),
                source: e,
            })?;

        tracing::debug!(url = %url, path = %dest.display(), "workflow archive downloaded");
        Ok(())
    }
}

/// A missing or unreadable source file is the local equivalent of an HTTP
/// failure; only the write side is a local I/O error.
async fn copy_local(url: &str, source: &Path, tmp_path: &Path) -> Result<(), HerdError> {
    let bytes = tokio::fs::read(source).await.map_err(|e| HerdError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    tokio::fs::write(tmp_path, &bytes)
        .await
        .map_err(|e| HerdError::Io {
            context: format!("writing {}", tmp_path.display()),
            source: e,
        })
}

fn fetch_error(url: &str, e: &reqwest::Error) -> HerdError {
    let message = if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    };
    HerdError::Fetch {
        url: url.to_string(),
        message,
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
