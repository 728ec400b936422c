//! Configuration for the dispatcher
//!
//! OAuth client credentials come from (in order of priority) the JSON file in
//! the Courier config directory (Google Cloud Console format) or environment
//! variables. Runtime settings live in `dispatcher.json` next to it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Credentials filename in the Courier config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Dispatcher settings filename in the Courier config directory
const DISPATCHER_FILE: &str = "dispatcher.json";

/// Token file written by the grant flow and updated after each refresh
pub const TOKEN_FILE: &str = "gmail-tokens.json";

/// OAuth client credentials for the Gmail API
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials from the config file, falling back to environment
    /// variables
    pub fn load() -> Result<Self> {
        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }
        Self::from_env()
    }

    /// Parse credentials from JSON (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

/// Runtime settings for the dispatch daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Seconds between ticks
    pub tick_interval_secs: u64,
    /// Bound on every outbound HTTP call (refresh and send)
    pub http_timeout_secs: u64,
    /// Queue database path; defaults to `queue.db` in the config directory
    pub queue_path: Option<PathBuf>,
    /// Attachment blob root; defaults to `attachments/` in the config
    /// directory
    pub attachment_root: Option<PathBuf>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            http_timeout_secs: 30,
            queue_path: None,
            attachment_root: None,
        }
    }
}

impl DispatcherConfig {
    /// Load `dispatcher.json` from the Courier config directory, or the
    /// defaults when the file is absent
    pub fn load() -> Result<Self> {
        if config::config_exists(DISPATCHER_FILE) {
            return config::load_json(DISPATCHER_FILE);
        }
        Ok(Self::default())
    }

    pub fn queue_path(&self) -> Result<PathBuf> {
        match &self.queue_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path("queue.db").context("Could not determine config directory"),
        }
    }

    pub fn attachment_root(&self) -> Result<PathBuf> {
        match &self.attachment_root {
            Some(path) => Ok(path.clone()),
            None => {
                config::config_path("attachments").context("Could not determine config directory")
            }
        }
    }
}
