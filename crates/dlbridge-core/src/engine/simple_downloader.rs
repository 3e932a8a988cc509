//! Single-stream engine with real pause/resume
//!
//! Uses one connection for the whole resource. Pausing holds the stream open
//! and stops reading from it; the speed cap and timeout are still reloaded
//! while the transfer runs.

use crate::engine::config::LiveConfig;
use crate::engine::http_downloader::EngineCore;
use crate::engine::tracker::TransferSubscription;
use crate::engine::Downloader;
use crate::error::DlbridgeError;
use crate::settings::SettingsProvider;
use async_trait::async_trait;
use dlbridge_types::{Transfer, TransferStatus};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

pub struct SimpleDownloader {
    core: EngineCore,
}

impl SimpleDownloader {
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

    pub fn is_paused(&self) -> bool {
        self.core.paused.load(Ordering::Acquire)
    }

    /// Pausing only means something between start and completion
    fn is_running(&self) -> bool {
        self.core.is_started() && !self.core.tracker().is_finished()
    }
}

#[async_trait]
impl Downloader for SimpleDownloader {
    async fn start(&self) -> Result<(), DlbridgeError> {
        self.core.launch(false)
    }

    async fn pause(&self) -> Result<(), DlbridgeError> {
        if !self.is_running() {
            debug!("Ignoring pause of a transfer that is not running");
            return Ok(());
        }
        self.core.paused.store(true, Ordering::Release);
        self.core.tracker().set_status(TransferStatus::Paused);
        info!("Transfer {} paused", self.core.tracker().snapshot().uri);
        Ok(())
    }

    async fn resume(&self) -> Result<(), DlbridgeError> {
        if !self.is_running() {
            debug!("Ignoring resume of a transfer that is not running");
            return Ok(());
        }
        self.core.paused.store(false, Ordering::Release);
        self.core.tracker().set_status(TransferStatus::Downloading);
        info!("Transfer {} resumed", self.core.tracker().snapshot().uri);
        Ok(())
    }

    async fn cancel(&self) -> Result<(), DlbridgeError> {
        self.core.cancel();
        Ok(())
    }

    fn supports_pause(&self) -> bool {
        true
    }

    fn subscribe(&self) -> TransferSubscription {
        self.core.tracker().subscribe()
    }

    fn snapshot(&self) -> Transfer {
        self.core.tracker().snapshot()
    }
}
