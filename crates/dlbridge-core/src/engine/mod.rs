//! Download Engine
//!
//! This module implements the transfer side of dlbridge:
//! - A backend-neutral [`Downloader`] contract
//! - A chunked, parallel, throttled HTTP engine ([`HttpDownloader`])
//! - A single-stream engine that can pause mid-transfer ([`SimpleDownloader`])
//! - Token bucket rate limiting shared by all ranges of a transfer
//! - Periodic reconfiguration of running transfers

mod config;
mod download_task;
mod http_downloader;
mod rate_limiter;
mod reconfigure;
mod segment_worker;
mod simple_downloader;
mod tracker;

pub use config::*;
pub use http_downloader::*;
pub use rate_limiter::*;
pub use segment_worker::{calculate_segments, Segment};
pub use simple_downloader::*;
pub use tracker::*;

use crate::error::DlbridgeError;
use crate::settings::SettingsProvider;
use async_trait::async_trait;
use dlbridge_types::{DownloaderKind, Transfer};
use reqwest::{header, Client, Proxy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Attempts per byte range before the transfer fails
pub const MAX_RANGE_RETRIES: u32 = 5;

/// Resources smaller than this are never split
pub const MIN_CHUNK_SIZE: u64 = 1024;

/// How often a running transfer re-reads its settings
pub const RECONFIGURE_INTERVAL: Duration = Duration::from_secs(5);

/// Progress notification cadence
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Base back-off between range retries, multiplied by the attempt number
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

pub const USER_AGENT: &str = "dlbridge";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Capabilities every download backend offers.
///
/// `start` returns as soon as the transfer is running; the outcome is only
/// reported through the completion event of [`Downloader::subscribe`].
/// `pause`/`resume` are best effort: backends that cannot pause, and
/// transfers that are not running, treat them as successful no-ops.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn start(&self) -> Result<(), DlbridgeError>;

    async fn pause(&self) -> Result<(), DlbridgeError>;

    async fn resume(&self) -> Result<(), DlbridgeError>;

    /// Abort in-flight work. Idempotent; the completion event follows from
    /// the transfer itself.
    async fn cancel(&self) -> Result<(), DlbridgeError>;

    /// Whether `pause` actually holds the transfer
    fn supports_pause(&self) -> bool;

    /// Register the listener, replacing any previous one
    fn subscribe(&self) -> TransferSubscription;

    fn snapshot(&self) -> Transfer;
}

/// Build the backend selected in the current settings
pub fn create_downloader(
    uri: &str,
    destination: PathBuf,
    settings: Arc<dyn SettingsProvider>,
) -> Result<Arc<dyn Downloader>, DlbridgeError> {
    let kind = settings.snapshot().download_client.downloader;
    create_downloader_of_kind(kind, uri, destination, settings)
}

pub fn create_downloader_of_kind(
    kind: DownloaderKind,
    uri: &str,
    destination: PathBuf,
    settings: Arc<dyn SettingsProvider>,
) -> Result<Arc<dyn Downloader>, DlbridgeError> {
    Ok(match kind {
        DownloaderKind::Internal => Arc::new(HttpDownloader::new(uri, destination, settings)?),
        DownloaderKind::Simple => Arc::new(SimpleDownloader::new(uri, destination, settings)?),
    })
}

/// Only http(s) URLs can be transferred
pub(crate) fn parse_uri(uri: &str) -> Result<url::Url, DlbridgeError> {
    let parsed = url::Url::parse(uri).map_err(|_| DlbridgeError::InvalidUrl(uri.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(DlbridgeError::InvalidUrl(uri.to_string())),
    }
}

/// HTTP client for one transfer. The proxy is fixed for the client's life.
pub(crate) fn build_client(config: &TransferConfig) -> Result<Client, DlbridgeError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("*/*"));

    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .http1_only()
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .gzip(true)
        .deflate(true)
        .connect_timeout(CONNECT_TIMEOUT);

    if let Some(proxy) = &config.proxy {
        let proxy = Proxy::all(proxy.as_str())
            .map_err(|e| DlbridgeError::Config(format!("Invalid proxy {}: {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| DlbridgeError::Config(format!("Failed to create HTTP client: {}", e)))
}
