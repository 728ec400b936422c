//! Credential management
//!
//! Owns one OAuth access/refresh token pair and its expiry. The pair is
//! created by the interactive grant flow (outside this crate) and loaded from
//! the token file it wrote; from then on this module refreshes it on demand
//! under a single-writer mutex and persists each new pair.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use super::api::TokenResponse;
use crate::config::GmailCredentials;
use crate::error::CredentialError;

/// Seconds before nominal expiry at which a token is already treated as
/// expired, so a tick never starts sends with a token about to lapse.
const EXPIRY_SLACK_SECS: i64 = 300;

/// One OAuth access/refresh token pair
///
/// The on-disk form matches what the grant flow writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds at which the access token expires
    pub expires_at: Option<i64>,
}

impl Credential {
    /// Whether the access token can still be used at `now` (with slack).
    /// A credential without a known expiry is treated as expired.
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now.timestamp() + EXPIRY_SLACK_SECS,
            None => false,
        }
    }
}

/// Refresh exchange against the identity provider
pub trait TokenProvider: Send + Sync {
    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CredentialError>;
}

/// Production token provider: Google's OAuth2 token endpoint
pub struct GoogleTokenProvider {
    client_id: String,
    client_secret: String,
    agent: ureq::Agent,
}

impl GoogleTokenProvider {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    pub fn new(credentials: &GmailCredentials, timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            agent,
        }
    }
}

impl TokenProvider for GoogleTokenProvider {
    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CredentialError> {
        let response = self
            .agent
            .post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .map_err(|e| match e {
                // 4xx means the grant itself was rejected; anything else is
                // a transient exchange failure the next tick can retry
                ureq::Error::StatusCode(code) if (400..500).contains(&code) => {
                    CredentialError::Revoked(format!("HTTP status {}", code))
                }
                other => CredentialError::Exchange(other.to_string()),
            })?;

        let mut token: TokenResponse = response
            .into_body()
            .read_json()
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        // Preserve the refresh token if not returned
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }
}

/// Issues a valid access token, refreshing transparently on expiry
///
/// The credential state is exclusive to the dispatcher during a tick; the
/// mutex enforces the single-writer discipline for any other reader.
pub struct CredentialManager {
    provider: Box<dyn TokenProvider>,
    state: Mutex<Credential>,
    token_path: Option<PathBuf>,
}

impl CredentialManager {
    /// Manage an in-memory credential (no persistence)
    pub fn new(provider: Box<dyn TokenProvider>, credential: Credential) -> Self {
        Self {
            provider,
            state: Mutex::new(credential),
            token_path: None,
        }
    }

    /// Load the credential the grant flow persisted and write refreshed
    /// pairs back to the same file
    pub fn load(provider: Box<dyn TokenProvider>, token_path: PathBuf) -> Result<Self> {
        let credential: Credential = config::load_json_file(&token_path)
            .with_context(|| format!("Failed to load token file {}", token_path.display()))?;
        Ok(Self {
            provider,
            state: Mutex::new(credential),
            token_path: Some(token_path),
        })
    }

    /// Return a token valid at `now`, refreshing first if the cached one has
    /// expired. Exactly one refresh happens per expired-token call; a fresh
    /// token triggers none.
    pub fn get_valid_token(&self, now: DateTime<Utc>) -> Result<String, CredentialError> {
        let mut state = self.state.lock().unwrap();

        if state.is_valid_at(now) {
            return Ok(state.access_token.clone());
        }

        let refresh_token = state
            .refresh_token
            .clone()
            .ok_or(CredentialError::MissingRefreshToken)?;

        let token = self.provider.refresh(&refresh_token)?;

        *state = Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|d| now.timestamp() + d as i64),
        };

        if let Some(path) = &self.token_path {
            if let Err(e) = config::save_json_file(path, &*state) {
                warn!("failed to persist refreshed token: {:#}", e);
            }
        }

        Ok(state.access_token.clone())
    }
}
