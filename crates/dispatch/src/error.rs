//! Error taxonomy for the dispatch pipeline
//!
//! Only `CredentialError` aborts a tick; everything else is scoped to a
//! single message and recorded as a terminal `Failed` status.

use thiserror::Error;

/// Token refresh against the identity provider failed.
///
/// Escalated: no send in a tick can proceed without a valid token, so the
/// tick's remaining sends are aborted. Already-completed sends stand and the
/// next tick retries from scratch.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The provider rejected the refresh token (revoked or invalid grant).
    #[error("refresh token rejected by identity provider: {0}")]
    Revoked(String),

    /// The stored credential has no refresh token to exchange.
    #[error("stored credential has no refresh token")]
    MissingRefreshToken,

    /// Network-level failure reaching the identity provider, including
    /// timeouts. Retryable by the next tick.
    #[error("token refresh request failed: {0}")]
    Exchange(String),

    /// The provider answered with a body we could not parse.
    #[error("failed to parse token response: {0}")]
    Malformed(String),
}

/// A delivery attempt was rejected or did not complete.
///
/// Isolated to the one message: it is marked `Failed` and the tick moves on.
/// The core performs no retries.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The delivery service refused the envelope.
    #[error("delivery rejected with HTTP status {0}")]
    Rejected(u16),

    /// The request never completed (connection failure or timeout).
    #[error("delivery request failed: {0}")]
    Network(String),
}

/// An attachment blob was missing or unreadable at send time.
///
/// Recoverable: the message is sent without the attachment (degrade policy,
/// see DESIGN.md) and the degradation is logged.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment not found: {0}")]
    Missing(String),

    #[error("failed to read attachment {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Message fields cannot be assembled into a valid envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// A header value contains CR or LF, which would let the value inject
    /// additional headers into the envelope.
    #[error("header {0} contains line breaks")]
    HeaderInjection(&'static str),
}

/// Why one message's send attempt failed. Never aborts the tick.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// An externally generated draft violated the required-field contract.
#[derive(Debug, Error)]
#[error("draft missing required field `{field}`")]
pub struct DraftError {
    pub field: &'static str,
}
