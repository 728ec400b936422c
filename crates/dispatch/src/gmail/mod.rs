//! Gmail API integration
//!
//! This module provides:
//! - Credential management with transparent token refresh
//! - The transport client that hands encoded envelopes to the Gmail API

mod auth;
mod client;

pub use auth::{Credential, CredentialManager, GoogleTokenProvider, TokenProvider};
pub use client::{GmailTransport, Transport};

/// Gmail / Google identity API request and response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Body for `users/me/messages/send`
    #[derive(Debug, Serialize)]
    pub struct SendMessageRequest {
        /// URL-safe base64 encoded envelope, padding stripped
        pub raw: String,
    }

    /// Token endpoint response
    #[derive(Debug, Deserialize)]
    pub struct TokenResponse {
        pub access_token: String,
        pub refresh_token: Option<String>,
        pub expires_in: Option<u64>,
        pub token_type: Option<String>,
    }
}
