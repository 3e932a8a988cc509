//! Shared handler state

use crate::auth::AuthProvider;
use dlbridge_core::TorrentRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn TorrentRegistry>,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    pub fn new(registry: Arc<dyn TorrentRegistry>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { registry, auth }
    }
}
