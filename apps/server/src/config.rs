//! Server configuration
//!
//! Read from a TOML file. The `[settings]` table is re-read periodically so
//! running transfers pick up new download client settings.

use dlbridge_core::SharedSettings;
use dlbridge_types::Settings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 6500;

/// How often the config file is checked for new settings
pub const RELOAD_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    /// Without credentials every login is accepted
    pub auth: Option<AuthConfig>,
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl ServerConfig {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&text)
    }

    /// Load `path` if it exists, defaults otherwise
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!("Loading config from {}", path.display());
            Self::load(path).await
        } else {
            info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// `<config dir>/dlbridge/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("dlbridge"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

/// Re-read the settings table once. Returns true if the settings changed.
/// A missing file leaves the settings alone.
pub async fn reload_settings(path: &Path, shared: &SharedSettings) -> Result<bool, ConfigError> {
    match ServerConfig::load(path).await {
        Ok(config) => Ok(shared.replace(config.settings)),
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config at {}, nothing to reload", path.display());
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Keep `shared` in sync with the config file until the task is aborted
pub fn spawn_reload(path: PathBuf, shared: SharedSettings, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match reload_settings(&path, &shared).await {
                Ok(true) => info!("Settings reloaded from {}", path.display()),
                Ok(false) => debug!("Settings unchanged"),
                Err(e) => warn!("Keeping previous settings: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlbridge_core::SettingsProvider;

    const SAMPLE: &str = r#"
[server]
port = 8080

[auth]
username = "admin"
password = "secret"

[settings]
download_path = "/data/downloads"
categories = ["tv", "movies"]

[settings.download_client]
chunk_count = 8
max_speed = 5
"#;

    #[test]
    fn parses_a_full_config() {
        let config = ServerConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.unwrap().username, "admin");
        assert_eq!(config.settings.download_path, PathBuf::from("/data/downloads"));
        assert_eq!(config.settings.download_client.chunk_count, 8);
        assert_eq!(config.settings.download_client.parallel_count, 4);
    }

    #[test]
    fn empty_file_means_defaults() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(config.auth.is_none());
    }

    #[test]
    fn bad_toml_is_rejected() {
        assert!(matches!(
            ServerConfig::parse("[server]\nport = \"eighty\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn reload_publishes_changed_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let shared = SharedSettings::new(Settings::default());
        assert!(reload_settings(&path, &shared).await.unwrap());
        assert_eq!(shared.snapshot().download_client.max_speed, 5);
        assert!(!reload_settings(&path, &shared).await.unwrap());

        std::fs::write(&path, "not = [valid").unwrap();
        assert!(reload_settings(&path, &shared).await.is_err());
        assert_eq!(shared.snapshot().download_client.max_speed, 5);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load_or_default(&dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
    }

    #[tokio::test]
    async fn reload_without_a_file_keeps_settings_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.download_client.max_speed = 3;
        let shared = SharedSettings::new(settings);

        let changed = reload_settings(&dir.path().join("absent.toml"), &shared)
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(shared.snapshot().download_client.max_speed, 3);
    }
}
