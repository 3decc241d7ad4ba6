//! HTTP transport: playlist text and segment downloads with bounded retry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::{CaptureConfig, StreamConfig};
use crate::error::{CaptureError, Result};
use crate::playlist::SegmentRef;
use crate::store::SegmentStore;

/// Shared client for playlist and segment requests (TLS sessions are reused).
pub fn build_client(stream: &StreamConfig, capture: &CaptureConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(stream.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(capture.request_timeout())
        .timeout(capture.request_timeout())
        .build()?;
    Ok(client)
}

/// GET a playlist as text. Any transport error or non-success status is
/// `PlaylistUnavailable`.
pub async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    let unavailable = |reason: String| CaptureError::PlaylistUnavailable {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(unavailable(format!("status {}", status)));
    }

    response.text().await.map_err(|e| unavailable(e.to_string()))
}

/// Result of a successful segment download.
#[derive(Debug, Clone)]
pub struct FetchedSegment {
    pub sequence: u64,
    pub path: PathBuf,
    pub bytes: u64,
    pub attempts: u32,
}

/// Downloads one segment into the store's cache, retrying up to a fixed
/// number of attempts. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    client: Client,
    attempts: u32,
    backoff: Duration,
}

impl SegmentFetcher {
    pub fn new(client: Client, capture: &CaptureConfig) -> Self {
        Self::with_retry(client, capture.fetch_attempts, capture.retry_backoff())
    }

    pub fn with_retry(client: Client, attempts: u32, backoff: Duration) -> Self {
        Self {
            client,
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetch `segment` into `store.cache_path_for(segment)`.
    pub async fn fetch(
        &self,
        segment: &SegmentRef,
        store: &SegmentStore,
    ) -> Result<FetchedSegment> {
        let dest = store.cache_path_for(segment);
        let part = store.partial_path_for(segment);

        for attempt in 1..=self.attempts {
            match self.download_once(&segment.url, &part, &dest).await {
                Ok(bytes) => {
                    info!(
                        "[fetch] downloaded {} ({} bytes, attempt {})",
                        segment.url, bytes, attempt
                    );
                    return Ok(FetchedSegment {
                        sequence: segment.sequence,
                        path: dest,
                        bytes,
                        attempts: attempt,
                    });
                }
                Err(reason) if attempt < self.attempts => {
                    debug!(
                        "[fetch] attempt {} failed for {}: {}. Retrying...",
                        attempt, segment.url, reason
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(reason) => {
                    warn!(
                        "[fetch] failed to download {} after {} attempts: {}",
                        segment.url, self.attempts, reason
                    );
                }
            }
        }

        let _ = tokio::fs::remove_file(&part).await;
        Err(CaptureError::FetchFailed {
            url: segment.url.clone(),
            attempts: self.attempts,
        })
    }

    /// One attempt: stream the body chunk by chunk into `part`, then rename
    /// it over `dest`.
    async fn download_once(
        &self,
        url: &str,
        part: &Path,
        dest: &Path,
    ) -> std::result::Result<u64, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("status code: {}", status));
        }

        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| format!("create {}: {}", part.display(), e))?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("write {}: {}", part.display(), e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| e.to_string())?;
        drop(file);

        tokio::fs::rename(part, dest)
            .await
            .map_err(|e| format!("rename {}: {}", part.display(), e))?;
        Ok(written)
    }
}
