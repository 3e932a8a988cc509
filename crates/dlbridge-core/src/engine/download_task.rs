//! Transfer task - probes the resource, splits it and drives the segment
//! workers to completion
//!
//! Both engine variants run their transfer through [`TransferJob`]; they
//! differ only in whether the resource may be split and whether the pause
//! flag is ever raised.

use crate::engine::config::LiveConfig;
use crate::engine::rate_limiter::RateLimiter;
use crate::engine::segment_worker::{
    calculate_segments, parse_content_range_total, Segment, SegmentWorker,
};
use crate::engine::tracker::TransferTracker;
use crate::engine::{MAX_RANGE_RETRIES, MIN_CHUNK_SIZE, PROGRESS_INTERVAL, RETRY_DELAY};
use crate::error::DlbridgeError;
use reqwest::{header, Client, StatusCode};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a probe learned about the remote resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProbeResult {
    /// 0 when the server did not say
    total_size: u64,
    accepts_ranges: bool,
    /// The server reported a zero-length resource
    empty: bool,
}

/// One run of a transfer, from probe to completion notification
pub(crate) struct TransferJob {
    pub uri: String,
    pub destination: PathBuf,
    pub client: Client,
    pub rate_limiter: RateLimiter,
    pub config: Arc<LiveConfig>,
    pub tracker: Arc<TransferTracker>,
    pub cancel: CancellationToken,
    pub paused: Arc<AtomicBool>,
    /// Whether the resource may be split into several ranges
    pub allow_split: bool,
}

impl TransferJob {
    /// Run the transfer and emit the completion notification
    pub async fn run(self) {
        let downloaded = Arc::new(AtomicU64::new(0));
        let total = Arc::new(AtomicU64::new(0));

        let stop_reporter = CancellationToken::new();
        let reporter = self.spawn_progress_reporter(
            downloaded.clone(),
            total.clone(),
            stop_reporter.clone(),
        );

        let result = self.transfer(&downloaded, &total).await;

        stop_reporter.cancel();
        let _ = reporter.await;

        match &result {
            Ok(()) => {
                let done = downloaded.load(Ordering::Acquire);
                let size = total.load(Ordering::Acquire).max(done);
                self.tracker.progress(0, size, size);
                info!("Transfer of {} complete ({} bytes)", self.uri, size);
            }
            Err(DlbridgeError::Cancelled) => info!("Transfer of {} cancelled", self.uri),
            Err(e) => error!("Transfer of {} failed: {}", self.uri, e),
        }

        self.tracker.complete(result);
    }

    async fn transfer(
        &self,
        downloaded: &Arc<AtomicU64>,
        total: &Arc<AtomicU64>,
    ) -> Result<(), DlbridgeError> {
        let probe = self.probe_with_retry().await?;
        total.store(probe.total_size, Ordering::Release);

        if let Some(parent) = self.destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = File::create(&self.destination).await?;
        if probe.total_size > 0 {
            file.set_len(probe.total_size).await?;
        }
        drop(file);

        if probe.empty {
            info!("{} is empty", self.uri);
            return Ok(());
        }

        let segments = self.plan(&probe);
        info!(
            "Downloading {} ({} bytes) in {} segment(s)",
            self.uri,
            probe.total_size,
            segments.len()
        );

        let size = self.run_segments(segments, downloaded.clone()).await?;
        if size > 0 {
            total.fetch_max(size, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Probe under the same retry budget as a byte range
    async fn probe_with_retry(&self) -> Result<ProbeResult, DlbridgeError> {
        let mut attempt = 0;
        loop {
            match self.probe().await {
                Ok(probe) => return Ok(probe),
                Err(e) if e.is_retryable() && attempt < MAX_RANGE_RETRIES => {
                    attempt += 1;
                    warn!(
                        "Probe of {} failed (attempt {}/{}): {}",
                        self.uri, attempt, MAX_RANGE_RETRIES, e
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

    /// Learn the resource size and range support with a one-byte range
    /// request
    async fn probe(&self) -> Result<ProbeResult, DlbridgeError> {
        debug!("Probing {}", self.uri);
        let request = self.client.get(&self.uri).header(header::RANGE, "bytes=0-0");

        let timeout = self.config.timeout();
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DlbridgeError::Cancelled),
            sent = tokio::time::timeout(timeout, request.send()) => {
                sent.map_err(|_| DlbridgeError::Timeout(self.config.timeout_ms()))??
            }
        };

        let status = response.status();
        let range_total = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        if status == StatusCode::PARTIAL_CONTENT {
            let total_size = range_total.unwrap_or(0);
            return Ok(ProbeResult {
                total_size,
                accepts_ranges: total_size > 0,
                empty: false,
            });
        }

        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            // "bytes */0": nothing to fetch. Any other total falls back to a
            // plain GET of the whole resource.
            return Ok(ProbeResult {
                total_size: 0,
                accepts_ranges: false,
                empty: range_total == Some(0),
            });
        }

        if status.is_success() {
            // the server ignored the range and would send everything
            let total_size = response.content_length().unwrap_or(0);
            return Ok(ProbeResult {
                total_size,
                accepts_ranges: false,
                empty: response.content_length() == Some(0),
            });
        }

        Err(DlbridgeError::ServerError {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("unexpected response")
                .to_string(),
        })
    }

    fn plan(&self, probe: &ProbeResult) -> Vec<Segment> {
        if !probe.accepts_ranges {
            return vec![Segment::open_ended()];
        }

        let split = self.allow_split
            && self.config.parallel_transfer()
            && probe.total_size >= MIN_CHUNK_SIZE;
        if split {
            calculate_segments(probe.total_size, self.config.chunk_count(), MIN_CHUNK_SIZE)
        } else {
            vec![Segment::new(0, 0, probe.total_size - 1)]
        }
    }

    /// Run every segment, keeping at most `parallel_connections` in flight.
    /// Returns the final resource size when a segment discovered it.
    async fn run_segments(
        &self,
        segments: Vec<Segment>,
        downloaded: Arc<AtomicU64>,
    ) -> Result<u64, DlbridgeError> {
        let workers_cancel = self.cancel.child_token();
        let mut pending: VecDeque<Segment> = segments.into();
        let mut running = JoinSet::new();
        let mut discovered = 0;

        loop {
            // re-read on every scheduling pass so a changed connection
            // count applies to the chunks that have not started yet
            let limit = self.config.parallel_connections().max(1) as usize;
            while running.len() < limit {
                let Some(segment) = pending.pop_front() else {
                    break;
                };
                debug!("Starting segment {}", segment.index);
                let worker = SegmentWorker::new(
                    segment,
                    self.uri.clone(),
                    self.destination.clone(),
                    self.client.clone(),
                    self.rate_limiter.clone(),
                    self.config.clone(),
                    workers_cancel.clone(),
                    self.paused.clone(),
                    downloaded.clone(),
                );
                running.spawn(worker.run());
            }

            let failure = match running.join_next().await {
                None => break,
                Some(Ok(Ok(result))) => {
                    if let Some(size) = result.discovered_size {
                        discovered = discovered.max(size);
                    }
                    continue;
                }
                Some(Ok(Err(e))) => e,
                Some(Err(join_error)) => {
                    DlbridgeError::InvalidOperation(format!("Segment task failed: {}", join_error))
                }
            };

            if !matches!(failure, DlbridgeError::Cancelled) {
                warn!("Segment failed, stopping remaining segments: {}", failure);
            }
            workers_cancel.cancel();
            running.shutdown().await;
            return Err(failure);
        }

        Ok(discovered)
    }

    fn spawn_progress_reporter(
        &self,
        downloaded: Arc<AtomicU64>,
        total: Arc<AtomicU64>,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let tracker = self.tracker.clone();
        let paused = self.paused.clone();

        tokio::spawn(async move {
            // windowed average smoothed with an EMA
            let mut speed_samples: VecDeque<f64> = VecDeque::with_capacity(10);
            let mut last_downloaded = downloaded.load(Ordering::Acquire);
            let mut last_time = Instant::now();
            let mut smoothed_speed: f64 = 0.0;
            let alpha = 0.3;

            let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let now = Instant::now();
                let done = downloaded.load(Ordering::Acquire);

                if paused.load(Ordering::Acquire) {
                    last_time = now;
                    last_downloaded = done;
                    speed_samples.clear();
                    smoothed_speed = 0.0;
                    continue;
                }

                let elapsed = now.duration_since(last_time).as_secs_f64();
                let instant_speed = if elapsed > 0.0 {
                    done.saturating_sub(last_downloaded) as f64 / elapsed
                } else {
                    0.0
                };
                last_time = now;
                last_downloaded = done;

                speed_samples.push_back(instant_speed);
                if speed_samples.len() > 10 {
                    speed_samples.pop_front();
                }
                let window_avg = speed_samples.iter().sum::<f64>() / speed_samples.len() as f64;
                smoothed_speed = alpha * window_avg + (1.0 - alpha) * smoothed_speed;

                // 0 until the size is known
                let size = total.load(Ordering::Acquire);
                tracker.progress(smoothed_speed as u64, done, size);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::TransferConfig;
    use dlbridge_types::{DownloadClientSettings, Transfer, TransferEvent, TransferStatus};
    use std::time::Duration;

    fn job(uri: String, destination: PathBuf, chunks: i64) -> TransferJob {
        let settings = DownloadClientSettings {
            chunk_count: chunks,
            ..DownloadClientSettings::default()
        };
        let config = TransferConfig::from_settings(&settings);
        TransferJob {
            tracker: Arc::new(TransferTracker::new(Transfer::new(
                uri.clone(),
                destination.clone(),
            ))),
            uri,
            destination,
            client: Client::new(),
            rate_limiter: RateLimiter::unlimited(),
            config: Arc::new(LiveConfig::new(&config)),
            cancel: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
            allow_split: true,
        }
    }

    #[tokio::test]
    async fn probe_reads_total_from_content_range() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/a.bin").header("range", "bytes=0-0");
                then.status(206)
                    .header("content-range", "bytes 0-0/5000")
                    .body("x");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let job = job(server.url("/a.bin"), dir.path().join("a.bin"), 4);
        let probe = job.probe().await.unwrap();
        assert_eq!(
            probe,
            ProbeResult {
                total_size: 5000,
                accepts_ranges: true,
                empty: false,
            }
        );
        assert_eq!(job.plan(&probe).len(), 4);
    }

    #[tokio::test]
    async fn servers_without_ranges_get_one_stream() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/b.bin");
                then.status(200).body(vec![7u8; 3000]);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let job = job(server.url("/b.bin"), dir.path().join("b.bin"), 4);
        let probe = job.probe().await.unwrap();
        assert!(!probe.accepts_ranges);
        assert_eq!(job.plan(&probe), vec![Segment::open_ended()]);
    }

    #[tokio::test]
    async fn probe_failure_carries_the_status() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/missing");
                then.status(404);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let job = job(server.url("/missing"), dir.path().join("missing"), 1);
        match job.probe().await {
            Err(DlbridgeError::ServerError { status, .. }) => assert_eq!(status, 404),
            other => panic!("unexpected probe result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_resources_complete_without_a_body() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/empty").header("range", "bytes=0-0");
                then.status(416).header("content-range", "bytes */0");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("empty");
        let job = job(server.url("/empty"), destination.clone(), 4);
        let probe = job.probe().await.unwrap();
        assert!(probe.empty);

        let tracker = job.tracker.clone();
        let mut sub = tracker.subscribe();
        job.run().await;

        let mut completion = None;
        while let Some(event) = sub.try_recv() {
            if let TransferEvent::Completed { error } = event {
                completion = Some(error);
            }
        }
        assert_eq!(completion, Some(None));
        let transfer = tracker.snapshot();
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert_eq!(transfer.bytes_total, 0);
        assert_eq!(std::fs::metadata(&destination).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn probe_is_retried_after_a_transient_failure() {
        let server = httpmock::MockServer::start_async().await;
        let busy = server
            .mock_async(|when, then| {
                when.method("GET").path("/flaky");
                then.status(503);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let job = job(server.url("/flaky"), dir.path().join("flaky"), 1);
        let probing = tokio::spawn(async move { job.probe_with_retry().await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while busy.hits_async().await == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        busy.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/flaky");
                then.status(206)
                    .header("content-range", "bytes 0-0/2048")
                    .body("x");
            })
            .await;

        let probe = probing.await.unwrap().unwrap();
        assert_eq!(probe.total_size, 2048);
        assert!(probe.accepts_ranges);
    }

    #[tokio::test]
    async fn unknown_size_is_reported_as_zero_total() {
        let dir = tempfile::tempdir().unwrap();
        let job = job("http://example.com/stream".into(), dir.path().join("stream"), 1);
        let mut sub = job.tracker.subscribe();

        let stop = CancellationToken::new();
        let reporter = job.spawn_progress_reporter(
            Arc::new(AtomicU64::new(500)),
            Arc::new(AtomicU64::new(0)),
            stop.clone(),
        );

        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap();
        stop.cancel();
        reporter.await.unwrap();

        assert!(matches!(
            event,
            Some(TransferEvent::Progress {
                bytes_done: 500,
                bytes_total: 0,
                ..
            })
        ));
        assert_eq!(job.tracker.snapshot().progress(), 0.0);
    }
}
