//! Settings providers
//!
//! Engines never hold on to settings; they ask a provider for a fresh
//! snapshot whenever they (re)configure themselves.

use dlbridge_types::Settings;
use parking_lot::RwLock;
use std::sync::Arc;

/// Source of the current application settings
pub trait SettingsProvider: Send + Sync {
    /// Current settings, by value
    fn snapshot(&self) -> Settings;
}

/// Settings that never change
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(Settings);

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self(settings)
    }
}

impl SettingsProvider for StaticSettings {
    fn snapshot(&self) -> Settings {
        self.0.clone()
    }
}

/// Settings that can be replaced at runtime, e.g. after a config reload
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Replace the settings. Returns false if nothing changed.
    pub fn replace(&self, settings: Settings) -> bool {
        let mut current = self.inner.write();
        if *current == settings {
            return false;
        }
        *current = settings;
        true
    }

    /// Edit the settings in place
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.inner.write());
    }
}

impl SettingsProvider for SharedSettings {
    fn snapshot(&self) -> Settings {
        self.inner.read().clone()
    }
}
