//! Torrent registry - the list of known transfers as automation tools see it
//!
//! The compatibility API only talks to [`TorrentRegistry`]. [`MemoryRegistry`]
//! is the in-process implementation: every added URL gets its own engine and
//! nothing survives a restart.

use crate::engine::{create_downloader, Downloader, TransferConfig};
use crate::error::DlbridgeError;
use crate::settings::SettingsProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dlbridge_types::{
    AppPreferences, TorrentCategory, TorrentInfo, TorrentProperties, Transfer, TransferEvent,
    TransferStatus,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// qBittorrent's "infinite" ETA
pub const ETA_UNKNOWN: i64 = 8_640_000;

/// How long a delete waits for a cancelled transfer to wind down
const DELETE_GRACE: Duration = Duration::from_secs(5);

/// Domain operations behind the compatibility API
#[async_trait]
pub trait TorrentRegistry: Send + Sync {
    async fn torrent_info(&self) -> Result<Vec<TorrentInfo>, DlbridgeError>;

    /// `None` when no entry has this hash
    async fn torrent_properties(
        &self,
        hash: &str,
    ) -> Result<Option<TorrentProperties>, DlbridgeError>;

    async fn delete(&self, hash: &str, delete_files: bool) -> Result<(), DlbridgeError>;

    async fn add(&self, url: &str) -> Result<(), DlbridgeError>;

    /// An empty or missing category clears it
    async fn set_category(&self, hash: &str, category: Option<&str>) -> Result<(), DlbridgeError>;

    async fn categories(&self) -> Result<BTreeMap<String, TorrentCategory>, DlbridgeError>;

    async fn preferences(&self) -> Result<AppPreferences, DlbridgeError>;

    async fn default_save_path(&self) -> Result<String, DlbridgeError>;
}

/// qBittorrent state label for a transfer status
pub fn state_label(status: TransferStatus) -> &'static str {
    match status {
        TransferStatus::Queued => "queuedDL",
        TransferStatus::Downloading => "downloading",
        TransferStatus::Paused => "pausedDL",
        TransferStatus::Completed => "pausedUP",
        TransferStatus::Failed | TransferStatus::Cancelled => "error",
    }
}

struct Entry {
    name: String,
    category: Option<String>,
    engine: Arc<dyn Downloader>,
    /// Last state folded from the engine's notifications
    transfer: Transfer,
    watcher: Option<JoinHandle<()>>,
}

impl Entry {
    fn info(&self, hash: &str) -> TorrentInfo {
        let t = &self.transfer;
        TorrentInfo {
            hash: hash.to_string(),
            name: self.name.clone(),
            category: self.category.clone(),
            size: t.bytes_total,
            progress: t.progress(),
            state: state_label(t.status).to_string(),
            save_path: save_path_of(t),
            content_path: t.destination.display().to_string(),
            dlspeed: t.speed,
            downloaded: t.bytes_done,
            eta: eta_of(t),
            added_on: t.created_at.timestamp(),
            completion_on: timestamp_or_unknown(t.completed_at),
        }
    }

    fn properties(&self) -> TorrentProperties {
        let t = &self.transfer;
        TorrentProperties {
            save_path: save_path_of(t),
            total_size: t.bytes_total,
            total_downloaded: t.bytes_done,
            dl_speed: t.speed,
            eta: eta_of(t),
            addition_date: t.created_at.timestamp(),
            completion_date: timestamp_or_unknown(t.completed_at),
        }
    }
}

fn save_path_of(transfer: &Transfer) -> String {
    transfer
        .destination
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

fn eta_of(transfer: &Transfer) -> i64 {
    if transfer.status == TransferStatus::Completed {
        return 0;
    }
    transfer
        .eta()
        .and_then(|secs| i64::try_from(secs).ok())
        .unwrap_or(ETA_UNKNOWN)
}

fn timestamp_or_unknown(time: Option<DateTime<Utc>>) -> i64 {
    time.map(|t| t.timestamp()).unwrap_or(-1)
}

/// Last path segment of the URL, or a generic name
fn file_name_from_url(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("download")
        .to_string()
}

/// In-memory registry that drives one engine per entry
pub struct MemoryRegistry {
    settings: Arc<dyn SettingsProvider>,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryRegistry {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            settings,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Transfer state of one entry
    pub fn transfer(&self, hash: &str) -> Option<Transfer> {
        self.entries.read().get(hash).map(|e| e.transfer.clone())
    }

    fn destination_for(&self, hash: &str, name: &str) -> PathBuf {
        let dir = self.settings.snapshot().download_path;
        let candidate = dir.join(name);
        let taken = self
            .entries
            .read()
            .values()
            .any(|e| e.transfer.destination == candidate);
        if taken {
            dir.join(format!("{}-{}", &hash[..8], name))
        } else {
            candidate
        }
    }

    /// Fold an engine's notifications into its entry until it completes
    fn spawn_watcher(&self, hash: String, engine: Arc<dyn Downloader>) -> JoinHandle<()> {
        let entries = self.entries.clone();
        let mut subscription = engine.subscribe();

        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let snapshot = engine.snapshot();
                let done = matches!(event, TransferEvent::Completed { .. });

                if let TransferEvent::Completed { error } = &event {
                    match error {
                        None => info!(hash = %hash, "Transfer finished"),
                        Some(e) => warn!(hash = %hash, "Transfer ended: {}", e),
                    }
                }

                match entries.write().get_mut(&hash) {
                    Some(entry) => entry.transfer = snapshot,
                    None => break,
                }
                if done {
                    break;
                }
            }
        })
    }
}

#[async_trait]
impl TorrentRegistry for MemoryRegistry {
    async fn torrent_info(&self) -> Result<Vec<TorrentInfo>, DlbridgeError> {
        let entries = self.entries.read();
        let mut list: Vec<TorrentInfo> = entries
            .iter()
            .map(|(hash, entry)| entry.info(hash))
            .collect();
        list.sort_by(|a, b| a.added_on.cmp(&b.added_on).then_with(|| a.name.cmp(&b.name)));
        Ok(list)
    }

    async fn torrent_properties(
        &self,
        hash: &str,
    ) -> Result<Option<TorrentProperties>, DlbridgeError> {
        Ok(self.entries.read().get(hash).map(Entry::properties))
    }

    async fn delete(&self, hash: &str, delete_files: bool) -> Result<(), DlbridgeError> {
        let removed = self.entries.write().remove(hash);
        let Some(mut entry) = removed else {
            return Ok(());
        };

        info!(hash = %hash, "Deleting {}", entry.name);
        entry.engine.cancel().await?;
        if let Some(watcher) = entry.watcher.take() {
            if tokio::time::timeout(DELETE_GRACE, watcher).await.is_err() {
                warn!(hash = %hash, "Transfer did not stop in time");
            }
        }

        if delete_files {
            match tokio::fs::remove_file(&entry.transfer.destination).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn add(&self, url: &str) -> Result<(), DlbridgeError> {
        let parsed = url::Url::parse(url).map_err(|_| DlbridgeError::InvalidUrl(url.to_string()))?;
        let hash = Uuid::new_v4().simple().to_string();
        let name = file_name_from_url(&parsed);
        let destination = self.destination_for(&hash, &name);

        let engine = create_downloader(url, destination, self.settings.clone())?;
        let watcher = self.spawn_watcher(hash.clone(), engine.clone());

        self.entries.write().insert(
            hash.clone(),
            Entry {
                name: name.clone(),
                category: None,
                transfer: engine.snapshot(),
                engine: engine.clone(),
                watcher: Some(watcher),
            },
        );

        if let Err(e) = engine.start().await {
            if let Some(mut entry) = self.entries.write().remove(&hash) {
                if let Some(watcher) = entry.watcher.take() {
                    watcher.abort();
                }
            }
            return Err(e);
        }

        if let Some(entry) = self.entries.write().get_mut(&hash) {
            entry.transfer = engine.snapshot();
        }

        info!(hash = %hash, "Added {} as {}", url, name);
        Ok(())
    }

    async fn set_category(&self, hash: &str, category: Option<&str>) -> Result<(), DlbridgeError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(hash)
            .ok_or_else(|| DlbridgeError::NotFound(hash.to_string()))?;
        entry.category = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        Ok(())
    }

    async fn categories(&self) -> Result<BTreeMap<String, TorrentCategory>, DlbridgeError> {
        let settings = self.settings.snapshot();
        let assigned: Vec<String> = self
            .entries
            .read()
            .values()
            .filter_map(|e| e.category.clone())
            .collect();

        Ok(settings
            .categories
            .into_iter()
            .chain(assigned)
            .map(|name| {
                let category = TorrentCategory {
                    save_path: settings.download_path.join(&name).display().to_string(),
                    name: name.clone(),
                };
                (name, category)
            })
            .collect())
    }

    async fn preferences(&self) -> Result<AppPreferences, DlbridgeError> {
        let settings = self.settings.snapshot();
        let config = TransferConfig::from_settings(&settings.download_client);
        Ok(AppPreferences {
            save_path: settings.download_path.display().to_string(),
            temp_path_enabled: false,
            temp_path: String::new(),
            dl_limit: config.max_speed,
            max_connec_per_torrent: config.parallel_connections,
            queueing_enabled: false,
            max_ratio_enabled: false,
            max_ratio: -1.0,
        })
    }

    async fn default_save_path(&self) -> Result<String, DlbridgeError> {
        Ok(self.settings.snapshot().download_path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::StaticSettings;
    use dlbridge_types::Settings;
    use httpmock::prelude::*;

    fn registry(dir: &std::path::Path) -> MemoryRegistry {
        let settings = Settings {
            download_path: dir.to_path_buf(),
            categories: vec!["movies".into()],
            ..Settings::default()
        };
        MemoryRegistry::new(Arc::new(StaticSettings::new(settings)))
    }

    async fn wait_for(registry: &MemoryRegistry, hash: &str, status: TransferStatus) {
        let waited = tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                if registry.transfer(hash).map(|t| t.status) == Some(status) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });
        waited.await.expect("transfer should reach the expected status");
    }

    #[tokio::test]
    async fn added_urls_are_downloaded_and_listed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/show.mkv");
                then.status(200).body("episode");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.add(&server.url("/show.mkv")).await.unwrap();

        let list = registry.torrent_info().await.unwrap();
        assert_eq!(list.len(), 1);
        let hash = list[0].hash.clone();
        assert_eq!(list[0].name, "show.mkv");
        assert_eq!(hash.len(), 32);

        wait_for(&registry, &hash, TransferStatus::Completed).await;
        let info = registry.torrent_info().await.unwrap().remove(0);
        assert_eq!(info.state, "pausedUP");
        assert_eq!(info.progress, 1.0);
        assert_eq!(info.size, 7);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("show.mkv")).unwrap(),
            "episode"
        );

        let properties = registry.torrent_properties(&hash).await.unwrap().unwrap();
        assert_eq!(properties.total_downloaded, 7);
        assert_eq!(properties.eta, 0);
    }

    #[tokio::test]
    async fn invalid_urls_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        assert!(matches!(
            registry.add("not a url").await,
            Err(DlbridgeError::InvalidUrl(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn deleting_unknown_hashes_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.delete("missing", true).await.unwrap();
        assert_eq!(registry.torrent_properties("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_cancels_and_removes_the_file() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/big.iso");
                then.status(200)
                    .delay(Duration::from_secs(10))
                    .body("data");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.add(&server.url("/big.iso")).await.unwrap();
        let hash = registry.torrent_info().await.unwrap()[0].hash.clone();

        std::fs::write(dir.path().join("big.iso"), b"partial").unwrap();
        registry.delete(&hash, true).await.unwrap();

        assert!(registry.is_empty());
        assert!(!dir.path().join("big.iso").exists());
    }

    #[tokio::test]
    async fn categories_combine_settings_and_assignments() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/a.bin");
                then.status(200).delay(Duration::from_secs(10)).body("a");
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.add(&server.url("/a.bin")).await.unwrap();
        let hash = registry.torrent_info().await.unwrap()[0].hash.clone();

        registry.set_category(&hash, Some("tv")).await.unwrap();
        assert!(matches!(
            registry.set_category("missing", Some("tv")).await,
            Err(DlbridgeError::NotFound(_))
        ));

        let categories = registry.categories().await.unwrap();
        assert_eq!(
            categories.keys().cloned().collect::<Vec<_>>(),
            vec!["movies".to_string(), "tv".to_string()]
        );
        assert_eq!(
            categories["tv"].save_path,
            dir.path().join("tv").display().to_string()
        );

        registry.set_category(&hash, Some("")).await.unwrap();
        assert_eq!(registry.torrent_info().await.unwrap()[0].category, None);
        registry.delete(&hash, false).await.unwrap();
    }

    #[tokio::test]
    async fn preferences_reflect_coerced_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings {
            download_path: dir.path().to_path_buf(),
            ..Settings::default()
        };
        settings.download_client.max_speed = 2;
        settings.download_client.parallel_count = 0;
        let registry = MemoryRegistry::new(Arc::new(StaticSettings::new(settings)));

        let preferences = registry.preferences().await.unwrap();
        assert_eq!(preferences.dl_limit, 2 * 1024 * 1024);
        assert_eq!(preferences.max_connec_per_torrent, 1);
        assert_eq!(
            registry.default_save_path().await.unwrap(),
            dir.path().display().to_string()
        );
    }

    #[test]
    fn states_use_qbittorrent_labels() {
        assert_eq!(state_label(TransferStatus::Downloading), "downloading");
        assert_eq!(state_label(TransferStatus::Completed), "pausedUP");
        assert_eq!(state_label(TransferStatus::Cancelled), "error");
    }
}
