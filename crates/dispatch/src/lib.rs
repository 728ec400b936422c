//! Dispatch crate - throttled, time-driven outbound mail dispatch
//!
//! This crate provides the dispatch engine for scheduled bulk mail:
//! - Domain models (QueuedMessage, DeliveryStatus, MessageDraft)
//! - Durable queue store abstractions (in-memory and SQLite)
//! - Credential management with transparent OAuth token refresh
//! - Pure multipart envelope assembly for the Gmail send endpoint
//! - A ticking scheduler that partitions due records by per-submission
//!   rate caps and records each outcome exactly once
//!
//! The ingestion path (uploads, content generation) and the interactive
//! credential grant flow live outside this crate; it holds their interface
//! boundaries only.

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod gmail;
pub mod models;
pub mod storage;

pub use config::{DispatcherConfig, GmailCredentials};
pub use dispatch::{partition_by_cap, select_due, DispatchScheduler, Dispatcher, RateGroup, TickStats};
pub use envelope::build_envelope;
pub use error::{
    AttachmentError, CredentialError, DraftError, EnvelopeError, SendError, TransportError,
};
pub use gmail::{
    Credential, CredentialManager, GmailTransport, GoogleTokenProvider, TokenProvider, Transport,
};
pub use models::{
    AttachmentRef, DeliveryReport, DeliveryStatus, MessageDraft, MessageId, QueuedMessage,
    ValidDraft,
};
pub use storage::{
    AttachmentStore, FileAttachmentStore, InMemoryAttachmentStore, InMemoryQueueStore, QueueStore,
    SqliteQueueStore,
};
