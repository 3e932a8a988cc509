//! Segment worker - downloads a single byte range into the destination file
//!
//! Each worker opens its own handle on the destination and writes at its
//! range's offset, so no merge step is needed once all ranges are done.
//! A failed range is requested again from the first missing byte, up to
//! the retry budget.

use crate::engine::config::LiveConfig;
use crate::engine::rate_limiter::RateLimiter;
use crate::engine::{MAX_RANGE_RETRIES, RETRY_DELAY};
use crate::error::DlbridgeError;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A contiguous byte range of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: u32,
    pub start: u64,
    /// Inclusive; `u64::MAX` means "until the server stops sending"
    pub end: u64,
    pub downloaded: u64,
}

impl Segment {
    pub fn new(index: u32, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            downloaded: 0,
        }
    }

    /// A single segment covering the whole resource, size unknown
    pub fn open_ended() -> Self {
        Self::new(0, 0, u64::MAX)
    }

    pub fn is_unknown_size(&self) -> bool {
        self.end == u64::MAX
    }

    /// Total size of this segment, `u64::MAX` if unknown
    pub fn size(&self) -> u64 {
        if self.is_unknown_size() {
            u64::MAX
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.is_unknown_size() && self.downloaded >= self.size()
    }
}

/// Split `total_size` bytes into `count` ranges.
///
/// Resources smaller than `min_size` per range are not split further.
pub fn calculate_segments(total_size: u64, count: u32, min_size: u64) -> Vec<Segment> {
    if total_size == 0 {
        return vec![Segment::open_ended()];
    }

    let max_by_size = (total_size / min_size.max(1)).max(1);
    let count = u64::from(count.max(1)).min(max_by_size);
    let segment_size = total_size / count;

    (0..count)
        .map(|i| {
            let start = i * segment_size;
            let end = if i == count - 1 {
                total_size - 1
            } else {
                (i + 1) * segment_size - 1
            };
            Segment::new(i as u32, start, end)
        })
        .collect()
}

/// Result of a segment download
#[derive(Debug)]
pub struct SegmentResult {
    pub index: u32,
    /// Total size learned from the response when it was unknown up front
    pub discovered_size: Option<u64>,
}

/// Downloads one segment, retrying transient failures
pub struct SegmentWorker {
    segment: Segment,
    url: String,
    destination: PathBuf,
    client: Client,
    rate_limiter: RateLimiter,
    config: Arc<LiveConfig>,
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
    downloaded_bytes: Arc<AtomicU64>,
}

impl SegmentWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        segment: Segment,
        url: String,
        destination: PathBuf,
        client: Client,
        rate_limiter: RateLimiter,
        config: Arc<LiveConfig>,
        cancel: CancellationToken,
        paused: Arc<AtomicBool>,
        downloaded_bytes: Arc<AtomicU64>,
    ) -> Self {
        Self {
            segment,
            url,
            destination,
            client,
            rate_limiter,
            config,
            cancel,
            paused,
            downloaded_bytes,
        }
    }

    /// Run the segment download
    pub async fn run(mut self) -> Result<SegmentResult, DlbridgeError> {
        let mut attempt = 0;
        loop {
            match self.fetch().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < MAX_RANGE_RETRIES => {
                    attempt += 1;
                    warn!(
                        "Segment {} failed (attempt {}/{}): {}. Retrying from byte {}",
                        self.segment.index,
                        attempt,
                        MAX_RANGE_RETRIES,
                        e,
                        self.segment.start + self.segment.downloaded
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(DlbridgeError::Cancelled),
                        _ = tokio::time::sleep(RETRY_DELAY * attempt) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch(&mut self) -> Result<SegmentResult, DlbridgeError> {
        let index = self.segment.index;
        if self.segment.is_complete() {
            debug!("Segment {} already complete", index);
            return Ok(SegmentResult {
                index,
                discovered_size: None,
            });
        }

        let start_byte = self.segment.start + self.segment.downloaded;
        let unknown_size = self.segment.is_unknown_size();

        // Open-ended segments from byte 0 are a plain GET, everything else
        // is a range request
        let range = if unknown_size && start_byte == 0 {
            None
        } else if unknown_size {
            Some(format!("bytes={}-", start_byte))
        } else {
            Some(format!("bytes={}-{}", start_byte, self.segment.end))
        };

        let mut request = self.client.get(&self.url);
        if let Some(range) = &range {
            debug!("Segment {} requesting range: {}", index, range);
            request = request.header(header::RANGE, range.as_str());
        }

        let timeout = self.config.timeout();
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DlbridgeError::Cancelled),
            sent = tokio::time::timeout(timeout, request.send()) => {
                sent.map_err(|_| DlbridgeError::Timeout(self.config.timeout_ms()))??
            }
        };

        let status = response.status();
        let honoured = match range {
            Some(_) => status == StatusCode::PARTIAL_CONTENT,
            None => status.is_success(),
        };
        if !honoured {
            return Err(DlbridgeError::ServerError {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected response")
                    .to_string(),
            });
        }

        let discovered_size = if unknown_size {
            discover_total_size(&response, start_byte)
        } else {
            None
        };
        if let Some(total) = discovered_size {
            info!("Got total size from response headers: {} bytes", total);
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.destination)
            .await?;
        file.seek(SeekFrom::Start(start_byte)).await?;

        let mut stream = response.bytes_stream();
        loop {
            self.wait_while_paused().await?;

            let timeout = self.config.timeout();
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DlbridgeError::Cancelled),
                next = tokio::time::timeout(timeout, stream.next()) => next,
            };
            let chunk = match next {
                Err(_) => return Err(DlbridgeError::Timeout(self.config.timeout_ms())),
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };

            // never write past the end of this range
            let mut len = chunk.len() as u64;
            if !unknown_size {
                len = len.min(self.segment.size() - self.segment.downloaded);
            }
            if len == 0 {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DlbridgeError::Cancelled),
                _ = self.rate_limiter.acquire(len) => {}
            }

            file.write_all(&chunk[..len as usize]).await?;

            self.segment.downloaded += len;
            self.downloaded_bytes.fetch_add(len, Ordering::AcqRel);

            if self.segment.is_complete() {
                break;
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        if !unknown_size && !self.segment.is_complete() {
            return Err(DlbridgeError::Incomplete {
                expected: self.segment.size(),
                received: self.segment.downloaded,
            });
        }

        info!(
            "Segment {} complete ({} bytes)",
            index, self.segment.downloaded
        );

        Ok(SegmentResult {
            index,
            discovered_size: discovered_size.or_else(|| {
                unknown_size.then_some(self.segment.start + self.segment.downloaded)
            }),
        })
    }

    async fn wait_while_paused(&self) -> Result<(), DlbridgeError> {
        while self.paused.load(Ordering::Acquire) {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DlbridgeError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        Ok(())
    }
}

/// Total resource size from `Content-Range` ("bytes 0-X/12345") or, for a
/// plain response, `Content-Length` plus the resume offset
fn discover_total_size(response: &reqwest::Response, start_byte: u64) -> Option<u64> {
    let from_range = response
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total);

    from_range.or_else(|| response.content_length().map(|len| start_byte + len))
}

/// Parse the total out of a `Content-Range` header value
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    let total = value.rsplit('/').next()?.trim();
    if total == "*" {
        return None;
    }
    total.parse().ok()
}
