//! Session authentication for the compatibility API
//!
//! A successful login issues a session id that the client sends back in the
//! `SID` cookie.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Name of the session cookie qBittorrent clients expect
pub const SESSION_COOKIE: &str = "SID";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the new session id, or `None` when the credentials are wrong
    async fn login(&self, username: &str, password: &str) -> Result<Option<String>, AuthError>;

    async fn logout(&self, session: &str) -> Result<(), AuthError>;

    async fn is_authenticated(&self, session: &str) -> bool;
}

/// Live sessions kept per provider; the oldest is dropped beyond this
pub const MAX_SESSIONS: usize = 64;

/// In-memory list of issued session ids, oldest first
#[derive(Debug, Default)]
struct Sessions {
    ids: RwLock<VecDeque<String>>,
}

impl Sessions {
    fn issue(&self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let mut ids = self.ids.write();
        if ids.len() >= MAX_SESSIONS {
            ids.pop_front();
        }
        ids.push_back(id.clone());
        id
    }

    fn revoke(&self, id: &str) {
        self.ids.write().retain(|issued| issued != id);
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.read().iter().any(|issued| issued == id)
    }
}

/// Checks logins against one configured username/password pair
#[derive(Debug)]
pub struct CredentialAuth {
    username: String,
    password: String,
    sessions: Sessions,
}

impl CredentialAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            sessions: Sessions::default(),
        }
    }
}

#[async_trait]
impl AuthProvider for CredentialAuth {
    async fn login(&self, username: &str, password: &str) -> Result<Option<String>, AuthError> {
        if username == self.username && password == self.password {
            info!("Login succeeded for {}", username);
            Ok(Some(self.sessions.issue()))
        } else {
            warn!("Login failed for {}", username);
            Ok(None)
        }
    }

    async fn logout(&self, session: &str) -> Result<(), AuthError> {
        self.sessions.revoke(session);
        Ok(())
    }

    async fn is_authenticated(&self, session: &str) -> bool {
        self.sessions.contains(session)
    }
}

/// Accepts any login. Used when no credentials are configured.
#[derive(Debug, Default)]
pub struct OpenAuth {
    sessions: Sessions,
}

impl OpenAuth {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthProvider for OpenAuth {
    async fn login(&self, _username: &str, _password: &str) -> Result<Option<String>, AuthError> {
        Ok(Some(self.sessions.issue()))
    }

    async fn logout(&self, session: &str) -> Result<(), AuthError> {
        self.sessions.revoke(session);
        Ok(())
    }

    async fn is_authenticated(&self, session: &str) -> bool {
        self.sessions.contains(session)
    }
}
