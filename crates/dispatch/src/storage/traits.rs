//! Queue store trait definition

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{DeliveryReport, DeliveryStatus, MessageId, QueuedMessage};

/// Durable collection of message records.
///
/// The dispatch core relies on exactly two operations: `query_due` and
/// `update_status` (a per-record atomic write). `insert` belongs to the
/// ingestion path and `list_for_owner` to the analytics read path; neither is
/// called from a tick.
pub trait QueueStore: Send + Sync {
    /// Insert a record, honoring the status it carries.
    fn insert(&self, message: QueuedMessage) -> Result<()>;

    /// Records with `Scheduled` status and `send_time <= now`, ascending by
    /// `send_time`.
    fn query_due(&self, now: DateTime<Utc>) -> Result<Vec<QueuedMessage>>;

    /// Terminal status write, persisted immediately.
    ///
    /// Idempotent for repeated writes of the same value. A record that has
    /// already reached a different terminal status is never overwritten.
    fn update_status(&self, id: &MessageId, status: DeliveryStatus) -> Result<()>;

    /// Persist an invalid externally-generated draft as `Failed`, keeping the
    /// audit trail the analytics path reads.
    fn insert_rejected(&self, mut message: QueuedMessage) -> Result<()> {
        message.status = DeliveryStatus::Failed;
        self.insert(message)
    }

    /// Analytics projection for one owning identity, ascending by `send_time`.
    fn list_for_owner(&self, owner: &str) -> Result<Vec<DeliveryReport>>;
}
