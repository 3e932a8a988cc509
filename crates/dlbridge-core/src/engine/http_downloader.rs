//! Chunked HTTP engine
//!
//! Splits the resource into byte ranges, downloads them over parallel
//! connections under one shared speed cap, and re-reads its settings every
//! few seconds while running. Pausing is not supported.

use crate::engine::config::{LiveConfig, TransferConfig};
use crate::engine::download_task::TransferJob;
use crate::engine::rate_limiter::RateLimiter;
use crate::engine::reconfigure::Reconfigurer;
use crate::engine::tracker::{TransferSubscription, TransferTracker};
use crate::engine::{build_client, parse_uri, Downloader, RECONFIGURE_INTERVAL};
use crate::error::DlbridgeError;
use crate::settings::SettingsProvider;
use async_trait::async_trait;
use dlbridge_types::{Transfer, TransferStatus};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// State shared by the engine variants: everything needed to launch a
/// transfer plus the handles used to control it afterwards
pub(crate) struct EngineCore {
    uri: String,
    destination: PathBuf,
    provider: Arc<dyn SettingsProvider>,
    client: Client,
    config: Arc<LiveConfig>,
    rate_limiter: RateLimiter,
    tracker: Arc<TransferTracker>,
    cancel: CancellationToken,
    pub paused: Arc<AtomicBool>,
    started: AtomicBool,
}

impl EngineCore {
    pub fn new(
        uri: &str,
        destination: PathBuf,
        provider: Arc<dyn SettingsProvider>,
    ) -> Result<Self, DlbridgeError> {
        let uri = parse_uri(uri)?.to_string();
        let config = TransferConfig::from_settings(&provider.snapshot().download_client);
        let client = build_client(&config)?;

        Ok(Self {
            tracker: Arc::new(TransferTracker::new(Transfer::new(
                uri.clone(),
                destination.clone(),
            ))),
            uri,
            destination,
            provider,
            client,
            rate_limiter: RateLimiter::new(config.max_speed),
            config: Arc::new(LiveConfig::new(&config)),
            cancel: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the transfer and its reconfiguration loop
    pub fn launch(&self, allow_split: bool) -> Result<(), DlbridgeError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(DlbridgeError::AlreadyStarted);
        }

        info!("Starting transfer {} -> {}", self.uri, self.destination.display());
        self.tracker.set_status(TransferStatus::Downloading);

        let job = TransferJob {
            uri: self.uri.clone(),
            destination: self.destination.clone(),
            client: self.client.clone(),
            rate_limiter: self.rate_limiter.clone(),
            config: self.config.clone(),
            tracker: self.tracker.clone(),
            cancel: self.cancel.clone(),
            paused: self.paused.clone(),
            allow_split,
        };
        tokio::spawn(job.run());

        let reconfigurer = Reconfigurer {
            provider: self.provider.clone(),
            config: self.config.clone(),
            rate_limiter: self.rate_limiter.clone(),
            interval: RECONFIGURE_INTERVAL,
            finished: self.tracker.finished(),
            cancel: self.cancel.clone(),
        };
        tokio::spawn(reconfigurer.run());

        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("Cancelling transfer {}", self.uri);
            self.cancel.cancel();
        }
    }

    pub fn tracker(&self) -> &TransferTracker {
        &self.tracker
    }

    pub fn live_config(&self) -> &LiveConfig {
        &self.config
    }
}

/// The chunked HTTP engine
pub struct HttpDownloader {
    core: EngineCore,
}

impl HttpDownloader {
    /// Create an engine for `uri`, configured from the provider's current
    /// settings. Nothing is transferred until [`Downloader::start`].
    pub fn new(
        uri: &str,
        destination: PathBuf,
        settings: Arc<dyn SettingsProvider>,
    ) -> Result<Self, DlbridgeError> {
        Ok(Self {
            core: EngineCore::new(uri, destination, settings)?,
        })
    }

    pub fn config(&self) -> &LiveConfig {
        self.core.live_config()
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn start(&self) -> Result<(), DlbridgeError> {
        self.core.launch(true)
    }

    async fn pause(&self) -> Result<(), DlbridgeError> {
        Ok(())
    }

    async fn resume(&self) -> Result<(), DlbridgeError> {
        Ok(())
    }

    async fn cancel(&self) -> Result<(), DlbridgeError> {
        self.core.cancel();
        Ok(())
    }

    fn supports_pause(&self) -> bool {
        false
    }

    fn subscribe(&self) -> TransferSubscription {
        self.core.tracker().subscribe()
    }

    fn snapshot(&self) -> Transfer {
        self.core.tracker().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::StaticSettings;
    use dlbridge_types::{DownloadClientSettings, Settings, TransferEvent};
    use httpmock::prelude::*;
    use std::time::Duration;

    fn provider(client: DownloadClientSettings) -> Arc<dyn SettingsProvider> {
        Arc::new(StaticSettings::new(Settings {
            download_client: client,
            ..Settings::default()
        }))
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Drain a subscription until the completion event
    async fn collect(mut sub: TransferSubscription) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        let wait = tokio::time::timeout(Duration::from_secs(20), async {
            while let Some(event) = sub.recv().await {
                let done = matches!(event, TransferEvent::Completed { .. });
                events.push(event);
                if done {
                    break;
                }
            }
        });
        wait.await.expect("transfer should complete");
        events
    }

    fn assert_well_ordered(events: &[TransferEvent]) {
        let completions = events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Completed { .. }))
            .count();
        assert_eq!(completions, 1);
        assert!(matches!(events.last(), Some(TransferEvent::Completed { .. })));

        let mut last = 0;
        for event in events {
            if let TransferEvent::Progress { bytes_done, .. } = event {
                assert!(*bytes_done >= last);
                last = *bytes_done;
            }
        }
    }

    #[tokio::test]
    async fn downloads_in_parallel_ranges() {
        let data = payload(4096);
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/file.bin").header("range", "bytes=0-0");
                then.status(206)
                    .header("content-range", "bytes 0-0/4096")
                    .body(&data[..1]);
            })
            .await;
        let mut ranges = Vec::new();
        for i in 0..4 {
            let (start, end) = (i * 1024, i * 1024 + 1023);
            let mock = server
                .mock_async(|when, then| {
                    when.method(GET)
                        .path("/file.bin")
                        .header("range", format!("bytes={}-{}", start, end));
                    then.status(206)
                        .header("content-range", format!("bytes {}-{}/4096", start, end))
                        .body(&data[start..=end]);
                })
                .await;
            ranges.push(mock);
        }

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("file.bin");
        let engine = HttpDownloader::new(
            &server.url("/file.bin"),
            destination.clone(),
            provider(DownloadClientSettings {
                parallel_count: 2,
                chunk_count: 4,
                ..DownloadClientSettings::default()
            }),
        )
        .unwrap();

        let sub = engine.subscribe();
        engine.start().await.unwrap();
        let events = collect(sub).await;

        assert_well_ordered(&events);
        assert_eq!(events.last(), Some(&TransferEvent::Completed { error: None }));
        for mock in &ranges {
            mock.assert_async().await;
        }
        assert_eq!(std::fs::read(&destination).unwrap(), data);

        let transfer = engine.snapshot();
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert_eq!(transfer.bytes_done, 4096);
        assert_eq!(transfer.bytes_total, 4096);
        assert_eq!(transfer.speed, 0);
    }

    #[tokio::test]
    async fn single_chunk_streams_the_whole_body() {
        let data = payload(3000);
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/plain.bin");
                then.status(200).body(&data);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested").join("plain.bin");
        let engine = HttpDownloader::new(
            &server.url("/plain.bin"),
            destination.clone(),
            provider(DownloadClientSettings {
                chunk_count: 1,
                ..DownloadClientSettings::default()
            }),
        )
        .unwrap();

        let sub = engine.subscribe();
        engine.start().await.unwrap();
        let events = collect(sub).await;

        assert_well_ordered(&events);
        assert_eq!(events.last(), Some(&TransferEvent::Completed { error: None }));
        assert_eq!(std::fs::read(&destination).unwrap(), data);
        let transfer = engine.snapshot();
        assert_eq!(transfer.bytes_done, transfer.bytes_total);
    }

    #[tokio::test]
    async fn http_errors_fail_the_transfer() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone");
                then.status(404);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = HttpDownloader::new(
            &server.url("/gone"),
            dir.path().join("gone"),
            provider(DownloadClientSettings::default()),
        )
        .unwrap();

        let sub = engine.subscribe();
        engine.start().await.unwrap();
        let events = collect(sub).await;

        assert_eq!(
            events.last(),
            Some(&TransferEvent::Completed {
                error: Some("Server error: 404 - Not Found".into())
            })
        );
        assert_eq!(engine.snapshot().status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_reports_exactly_one_cancellation() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow");
                then.status(200)
                    .delay(Duration::from_secs(10))
                    .body("never");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = HttpDownloader::new(
            &server.url("/slow"),
            dir.path().join("slow"),
            provider(DownloadClientSettings {
                timeout: 60_000,
                ..DownloadClientSettings::default()
            }),
        )
        .unwrap();

        let mut sub = engine.subscribe();
        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.cancel().await.unwrap();
        engine.cancel().await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("cancel should complete promptly");
        assert_eq!(
            event,
            Some(TransferEvent::Completed {
                error: Some("The download was cancelled".into())
            })
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(sub.try_recv(), None);
        assert_eq!(engine.snapshot().status, TransferStatus::Cancelled);
    }

    #[tokio::test]
    async fn stalled_server_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stall");
                then.status(200)
                    .delay(Duration::from_secs(5))
                    .body("late");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = HttpDownloader::new(
            &server.url("/stall"),
            dir.path().join("stall"),
            provider(DownloadClientSettings {
                timeout: 200,
                ..DownloadClientSettings::default()
            }),
        )
        .unwrap();

        let sub = engine.subscribe();
        engine.start().await.unwrap();
        let events = collect(sub).await;
        assert_eq!(
            events.last(),
            Some(&TransferEvent::Completed {
                error: Some("Timeout after 200 ms without data".into())
            })
        );
    }

    #[tokio::test]
    async fn pause_and_resume_are_accepted_no_ops() {
        let engine = HttpDownloader::new(
            "http://127.0.0.1:9/never",
            "never".into(),
            provider(DownloadClientSettings::default()),
        )
        .unwrap();

        assert!(!engine.supports_pause());
        engine.pause().await.unwrap();
        engine.resume().await.unwrap();
        assert_eq!(engine.snapshot().status, TransferStatus::Queued);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/once");
                then.status(200).delay(Duration::from_secs(10)).body("x");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = HttpDownloader::new(
            &server.url("/once"),
            dir.path().join("once"),
            provider(DownloadClientSettings::default()),
        )
        .unwrap();

        engine.start().await.unwrap();
        assert!(matches!(
            engine.start().await,
            Err(DlbridgeError::AlreadyStarted)
        ));
        assert_eq!(engine.snapshot().status, TransferStatus::Downloading);
        engine.cancel().await.unwrap();
    }

    #[test]
    fn construction_coerces_settings() {
        let engine = HttpDownloader::new(
            "http://example.com/a",
            "a".into(),
            provider(DownloadClientSettings {
                parallel_count: 0,
                chunk_count: -2,
                max_speed: -1,
                timeout: 0,
                ..DownloadClientSettings::default()
            }),
        )
        .unwrap();

        let config = engine.config();
        assert_eq!(config.parallel_connections(), 1);
        assert_eq!(config.chunk_count(), 1);
        assert_eq!(config.max_speed(), 0);
        assert_eq!(config.timeout_ms(), 1000);
    }
}
