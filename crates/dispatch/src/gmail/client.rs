//! Gmail API transport
//!
//! Hands an encoded envelope to the delivery service. No retry is performed
//! here; a failure is recorded once by the dispatcher.

use std::time::Duration;

use super::api::SendMessageRequest;
use crate::error::TransportError;

/// Delivery service boundary
pub trait Transport: Send + Sync {
    /// Attempt delivery of one encoded envelope
    fn send(&self, access_token: &str, raw_envelope: &str) -> Result<(), TransportError>;
}

/// Gmail API transport client
pub struct GmailTransport {
    agent: ureq::Agent,
}

impl GmailTransport {
    const SEND_URL: &'static str =
        "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

    /// Create a transport whose requests are bounded by `timeout`
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Transport for GmailTransport {
    fn send(&self, access_token: &str, raw_envelope: &str) -> Result<(), TransportError> {
        let request = SendMessageRequest {
            raw: raw_envelope.to_string(),
        };

        self.agent
            .post(Self::SEND_URL)
            .header("Authorization", &format!("Bearer {}", access_token))
            .send_json(&request)
            .map_err(|e| match e {
                ureq::Error::StatusCode(code) => TransportError::Rejected(code),
                other => TransportError::Network(other.to_string()),
            })?;

        Ok(())
    }
}
