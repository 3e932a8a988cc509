//! Reconfiguration loop
//!
//! Re-reads the download client settings on a fixed interval and pushes the
//! coerced values into a running transfer until the transfer finishes.

use crate::engine::config::{LiveConfig, TransferConfig};
use crate::engine::rate_limiter::RateLimiter;
use crate::settings::SettingsProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(crate) struct Reconfigurer {
    pub provider: Arc<dyn SettingsProvider>,
    pub config: Arc<LiveConfig>,
    pub rate_limiter: RateLimiter,
    /// Time between settings reads, `RECONFIGURE_INTERVAL` in production
    pub interval: Duration,
    /// Fired by the tracker once the completion notification went out
    pub finished: CancellationToken,
    pub cancel: CancellationToken,
}

impl Reconfigurer {
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.finished.cancelled() => break,
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.apply().await,
            }
        }
        debug!("Reconfiguration loop stopped");
    }

    async fn apply(&self) {
        let settings = self.provider.snapshot();
        let config = TransferConfig::from_settings(&settings.download_client);

        if self.config.apply(&config) {
            info!("Speed limit changed to {} bytes/s", config.max_speed);
            self.rate_limiter.set_limit(config.max_speed).await;
        }
    }
}
