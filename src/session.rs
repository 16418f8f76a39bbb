//! Bearer-token session kept in local storage under [`TOKEN_STORAGE_KEY`].
//!
//! The token is verified against `/auth/me`; a verified profile is broadcast
//! to every [`SessionListener`](crate::auth::SessionListener) through the
//! [`AuthNotifier`].

use crate::auth::AuthNotifier;
use crate::remote::USER_AGENT;
use crate::storage::{LocalStore, StorageError};
use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const TOKEN_STORAGE_KEY: &str = "home_token";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(StatusCode),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub needs_profile: bool,
}

#[derive(Clone)]
pub struct AuthSession {
    client: reqwest::Client,
    api_base: String,
    local: Arc<dyn LocalStore>,
    notifier: AuthNotifier,
    profile: Arc<RwLock<Option<UserProfile>>>,
}

impl AuthSession {
    pub fn new(
        api_base: impl Into<String>,
        timeout: Duration,
        local: Arc<dyn LocalStore>,
        notifier: AuthNotifier,
    ) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, api_base, local, notifier))
    }

    pub fn with_client(
        client: reqwest::Client,
        api_base: impl Into<String>,
        local: Arc<dyn LocalStore>,
        notifier: AuthNotifier,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            local,
            notifier,
            profile: Arc::new(RwLock::new(None)),
        }
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.profile
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn notifier(&self) -> &AuthNotifier {
        &self.notifier
    }

    pub fn is_authenticated(&self) -> bool {
        self.profile().is_some()
    }

    fn take_profile(&self) -> Option<UserProfile> {
        self.profile
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn set_profile(&self, profile: Option<UserProfile>) {
        *self
            .profile
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = profile;
    }

    /// Verifies the stored token. A rejected token (401) is discarded; any
    /// other failure keeps it for the next attempt and leaves the session
    /// logged out.
    pub async fn restore(&self) -> Result<Option<UserProfile>, SessionError> {
        let Some(token) = self.local.read(TOKEN_STORAGE_KEY)? else {
            debug!("No stored token, staying logged out");
            return Ok(None);
        };

        let url = format!("{}/auth/me", self.api_base);
        debug!("Request URL: {}", url);
        let response = self.client.get(&url).bearer_auth(&token).send().await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                warn!("Stored token rejected, discarding it");
                // a session that was live ends here
                if self.take_profile().is_some() {
                    self.notifier.notify_logout().await;
                }
                self.local.remove(TOKEN_STORAGE_KEY)?;
                Ok(None)
            }
            status if !status.is_success() => Err(SessionError::Status(status)),
            _ => {
                let profile: UserProfile = response.json().await?;
                info!("Session restored for {}", profile.email);
                if profile.needs_profile {
                    info!("Profile for {} is incomplete", profile.email);
                }
                self.set_profile(Some(profile.clone()));
                self.notifier.notify_login(&profile.email).await;
                Ok(Some(profile))
            }
        }
    }

    /// Stores a freshly issued token and starts the session with it.
    pub async fn adopt_token(&self, token: &str) -> Result<Option<UserProfile>, SessionError> {
        self.local.write(TOKEN_STORAGE_KEY, token)?;
        self.restore().await
    }

    /// Ends the session. Listeners are always notified, even when the
    /// session was already gone, so nothing stays attributed to the old user.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.take_profile();
        self.notifier.notify_logout().await;
        self.local.remove(TOKEN_STORAGE_KEY)?;
        Ok(())
    }
}
