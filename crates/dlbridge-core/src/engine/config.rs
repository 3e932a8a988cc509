//! Effective transfer configuration
//!
//! Operator settings are coerced into safe values here. The same coercion is
//! used at construction time and on every reconfiguration pass.

use dlbridge_types::DownloadClientSettings;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Timeout used when the configured one is not positive
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Coerced snapshot of the download client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    pub parallel_connections: u32,
    pub chunk_count: u32,
    /// True when the transfer is split into more than one range
    pub parallel_transfer: bool,
    /// Bytes per second, 0 = unlimited
    pub max_speed: u64,
    pub timeout_ms: u64,
    pub proxy: Option<String>,
}

impl TransferConfig {
    pub fn from_settings(settings: &DownloadClientSettings) -> Self {
        let chunk_count = at_least_one(settings.chunk_count);
        let max_speed = if settings.max_speed <= 0 {
            0
        } else {
            (settings.max_speed as u64).saturating_mul(BYTES_PER_MIB)
        };
        let timeout_ms = if settings.timeout <= 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            settings.timeout as u64
        };
        let proxy = settings
            .proxy_server
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Self {
            parallel_connections: at_least_one(settings.parallel_count),
            chunk_count,
            parallel_transfer: chunk_count > 1,
            max_speed,
            timeout_ms,
            proxy,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn at_least_one(value: i64) -> u32 {
    if value <= 0 {
        1
    } else {
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}

/// The mutable part of a running transfer's configuration.
///
/// Shared by the transfer worker and the reconfiguration loop. Fields are
/// independent atomics, so concurrent writers resolve last-writer-wins per
/// field and nobody ever blocks on a lock.
#[derive(Debug)]
pub struct LiveConfig {
    parallel_connections: AtomicU32,
    chunk_count: AtomicU32,
    parallel_transfer: AtomicBool,
    max_speed: AtomicU64,
    timeout_ms: AtomicU64,
}

impl LiveConfig {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            parallel_connections: AtomicU32::new(config.parallel_connections),
            chunk_count: AtomicU32::new(config.chunk_count),
            parallel_transfer: AtomicBool::new(config.parallel_transfer),
            max_speed: AtomicU64::new(config.max_speed),
            timeout_ms: AtomicU64::new(config.timeout_ms),
        }
    }

    /// Push a new snapshot. Returns true if the speed cap changed.
    pub fn apply(&self, config: &TransferConfig) -> bool {
        self.parallel_connections
            .store(config.parallel_connections, Ordering::Release);
        self.chunk_count.store(config.chunk_count, Ordering::Release);
        self.parallel_transfer
            .store(config.parallel_transfer, Ordering::Release);
        self.timeout_ms.store(config.timeout_ms, Ordering::Release);
        self.max_speed.swap(config.max_speed, Ordering::AcqRel) != config.max_speed
    }

    pub fn parallel_connections(&self) -> u32 {
        self.parallel_connections.load(Ordering::Acquire)
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count.load(Ordering::Acquire)
    }

    pub fn parallel_transfer(&self) -> bool {
        self.parallel_transfer.load(Ordering::Acquire)
    }

    pub fn max_speed(&self) -> u64 {
        self.max_speed.load(Ordering::Acquire)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(parallel: i64, chunks: i64, speed: i64, timeout: i64) -> DownloadClientSettings {
        DownloadClientSettings {
            parallel_count: parallel,
            chunk_count: chunks,
            max_speed: speed,
            timeout,
            ..DownloadClientSettings::default()
        }
    }

    #[test]
    fn non_positive_values_are_coerced() {
        for bad in [0, -1, i64::MIN] {
            let config = TransferConfig::from_settings(&settings(bad, bad, bad, bad));
            assert_eq!(config.parallel_connections, 1);
            assert_eq!(config.chunk_count, 1);
            assert!(!config.parallel_transfer);
            assert_eq!(config.max_speed, 0);
            assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        }
    }

    #[test]
    fn speed_is_converted_from_mib() {
        let config = TransferConfig::from_settings(&settings(2, 8, 3, 2500));
        assert_eq!(config.parallel_connections, 2);
        assert_eq!(config.chunk_count, 8);
        assert!(config.parallel_transfer);
        assert_eq!(config.max_speed, 3 * 1024 * 1024);
        assert_eq!(config.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn blank_proxy_is_ignored() {
        let mut raw = DownloadClientSettings::default();
        raw.proxy_server = Some("   ".into());
        assert_eq!(TransferConfig::from_settings(&raw).proxy, None);

        raw.proxy_server = Some(" http://proxy:3128 ".into());
        assert_eq!(
            TransferConfig::from_settings(&raw).proxy.as_deref(),
            Some("http://proxy:3128")
        );
    }

    #[test]
    fn live_config_reports_throttle_changes() {
        let live = LiveConfig::new(&TransferConfig::from_settings(&settings(1, 1, 0, 0)));
        let same = TransferConfig::from_settings(&settings(4, 4, 0, 0));
        assert!(!live.apply(&same));
        assert_eq!(live.parallel_connections(), 4);
        assert!(live.parallel_transfer());

        let throttled = TransferConfig::from_settings(&settings(4, 4, 1, 0));
        assert!(live.apply(&throttled));
        assert_eq!(live.max_speed(), 1024 * 1024);
    }
}
