//! Shared types for dlbridge
//!
//! This crate contains the data structures shared by the download engine,
//! the qBittorrent compatibility server and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Transfer Types
// ============================================================================

/// State of a single in-flight or finished transfer.
///
/// Only the engine instance that owns a transfer ever mutates it; everyone
/// else works on snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub uri: String,
    pub destination: PathBuf,
    pub status: TransferStatus,
    pub bytes_done: u64,
    pub bytes_total: u64,
    /// Bytes per second, 0 once the transfer has finished
    pub speed: u64,
    /// Set only when the status becomes `Failed` or `Cancelled`
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    pub fn new(uri: String, destination: PathBuf) -> Self {
        Self {
            uri,
            destination,
            status: TransferStatus::Queued,
            bytes_done: 0,
            bytes_total: 0,
            speed: 0,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Completed fraction in `0.0..=1.0`
    pub fn progress(&self) -> f64 {
        if self.status == TransferStatus::Completed {
            return 1.0;
        }
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_done as f64 / self.bytes_total as f64).min(1.0)
    }

    /// Estimated seconds until completion, if the rate is known
    pub fn eta(&self) -> Option<u64> {
        if self.speed == 0 || self.bytes_total == 0 {
            return None;
        }
        Some(self.bytes_total.saturating_sub(self.bytes_done) / self.speed)
    }
}

/// Status of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// Notifications emitted by a download engine.
///
/// For one transfer, `Progress` events arrive with non-decreasing
/// `bytes_done` and `Completed` is always the last event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransferEvent {
    Progress {
        speed: u64,
        bytes_done: u64,
        bytes_total: u64,
    },
    Completed {
        error: Option<String>,
    },
}

// ============================================================================
// Settings Types
// ============================================================================

/// Which engine backend runs new transfers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloaderKind {
    /// Chunked, throttled, multi-connection HTTP engine
    #[default]
    Internal,
    /// Single connection, supports pause/resume
    Simple,
}

/// Operator-facing download client settings.
///
/// Values are kept exactly as entered; the engine coerces them every time it
/// reads them, so out-of-range values are legal here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadClientSettings {
    /// Connections opened in parallel for one transfer
    pub parallel_count: i64,
    /// Number of byte ranges a transfer is split into
    pub chunk_count: i64,
    /// Speed cap in MiB/s, 0 or less means unlimited
    pub max_speed: i64,
    /// Transport timeout in milliseconds
    pub timeout: i64,
    /// Outbound proxy, e.g. `http://127.0.0.1:8080`
    pub proxy_server: Option<String>,
    pub downloader: DownloaderKind,
}

impl Default for DownloadClientSettings {
    fn default() -> Self {
        Self {
            parallel_count: 4,
            chunk_count: 4,
            max_speed: 0,
            timeout: 1000,
            proxy_server: None,
            downloader: DownloaderKind::Internal,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory new transfers are written to
    pub download_path: PathBuf,
    /// Categories offered to automation tools
    pub categories: Vec<String>,
    pub download_client: DownloadClientSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_path: dirs::download_dir()
                .map(|p| p.join("dlbridge"))
                .unwrap_or_else(|| PathBuf::from("downloads")),
            categories: Vec::new(),
            download_client: DownloadClientSettings::default(),
        }
    }
}

// ============================================================================
// qBittorrent Wire Types
// ============================================================================

/// One entry of `torrents/info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentInfo {
    pub hash: String,
    pub name: String,
    pub category: Option<String>,
    pub size: u64,
    /// Completed fraction in `0.0..=1.0`
    pub progress: f64,
    pub state: String,
    pub save_path: String,
    pub content_path: String,
    pub dlspeed: u64,
    pub downloaded: u64,
    pub eta: i64,
    pub added_on: i64,
    pub completion_on: i64,
}

/// Response of `torrents/properties`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentProperties {
    pub save_path: String,
    pub total_size: u64,
    pub total_downloaded: u64,
    pub dl_speed: u64,
    pub eta: i64,
    pub addition_date: i64,
    pub completion_date: i64,
}

/// Value side of the `torrents/categories` map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentCategory {
    pub name: String,
    #[serde(rename = "savePath")]
    pub save_path: String,
}

/// Response of `app/preferences`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppPreferences {
    pub save_path: String,
    pub temp_path_enabled: bool,
    pub temp_path: String,
    /// Global download limit in bytes/s, 0 when unlimited
    pub dl_limit: u64,
    pub max_connec_per_torrent: u32,
    pub queueing_enabled: bool,
    pub max_ratio_enabled: bool,
    pub max_ratio: f64,
}
