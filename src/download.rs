use std::time::Duration;

use http::Method;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::transport::{ProbeTransport, TransportError};
use crate::types::{ProbeTarget, FAILED_BANDWIDTH};

/// Placeholder in the download URL template replaced by the byte count.
pub const SIZE_PLACEHOLDER: &str = "%d";

const MIN_READ_SECS: f64 = 1e-6;

/// Outcome of one timed chunk download.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSample {
    /// Bytes per second over the body-read phase, or [`FAILED_BANDWIDTH`].
    pub bandwidth: f64,
    pub ttfb: Option<Duration>,
    pub bytes: u64,
}

impl ChunkSample {
    pub fn failed() -> Self {
        Self {
            bandwidth: FAILED_BANDWIDTH,
            ttfb: None,
            bytes: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.bytes == 0
    }
}

#[derive(Debug, Error)]
enum ChunkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("status {0}")]
    Status(u16),

    #[error("empty body despite success status")]
    EmptyBody,
}

/// Build the request URL for a chunk of `bytes` from `template`.
pub fn chunk_url(template: &str, bytes: u64) -> String {
    template.replacen(SIZE_PLACEHOLDER, &bytes.to_string(), 1)
}

/// Download `bytes` through `target`'s connector and time it.
///
/// TTFB is taken when the response head arrives, before the body is read.
/// Bandwidth covers the body-read phase only. A body cut short by the deadline
/// still counts the bytes that arrived. A request error, a status of 300 or
/// above, or an empty body all yield [`ChunkSample::failed`].
pub async fn download_chunk(
    target: &ProbeTarget,
    bytes: u64,
    timeout: Duration,
    url_template: &str,
) -> ChunkSample {
    match try_download(target, bytes, timeout, url_template).await {
        Ok(sample) => sample,
        Err(err) => {
            debug!(proxy = %target.name, bytes, "chunk download failed: {err}");
            ChunkSample::failed()
        }
    }
}

async fn try_download(
    target: &ProbeTarget,
    bytes: u64,
    timeout: Duration,
    url_template: &str,
) -> Result<ChunkSample, ChunkError> {
    let transport = ProbeTransport::new(target.connector.clone(), timeout);
    let url = chunk_url(url_template, bytes);

    let start = Instant::now();
    let resp = transport.send(Method::GET, &url).await?;
    let status = resp.status().as_u16();
    if status >= 300 {
        return Err(ChunkError::Status(status));
    }

    let ttfb = start.elapsed();
    let written = transport.drain(resp.into_body()).await;
    if written == 0 {
        return Err(ChunkError::EmptyBody);
    }

    let read_secs = (start.elapsed() - ttfb).as_secs_f64().max(MIN_READ_SECS);
    Ok(ChunkSample {
        bandwidth: written as f64 / read_secs,
        ttfb: Some(ttfb),
        bytes: written,
    })
}
