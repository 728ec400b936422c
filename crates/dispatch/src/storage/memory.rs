//! In-memory queue store
//!
//! Used by tests and as a reference implementation of the queue contract.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::QueueStore;
use crate::models::{DeliveryReport, DeliveryStatus, MessageId, QueuedMessage};

/// In-memory implementation of QueueStore
///
/// A HashMap protected by an RwLock. Tracks the number of status writes so
/// tests can assert that an empty tick touches nothing.
pub struct InMemoryQueueStore {
    messages: RwLock<HashMap<String, QueuedMessage>>,
    status_writes: AtomicUsize,
}

impl InMemoryQueueStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            status_writes: AtomicUsize::new(0),
        }
    }

    /// Number of status writes performed so far (for tests)
    pub fn status_write_count(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Fetch a record by id (for tests)
    pub fn get(&self, id: &MessageId) -> Option<QueuedMessage> {
        let messages = self.messages.read().unwrap();
        messages.get(id.as_str()).cloned()
    }

    /// Count records currently in the given status (for tests)
    pub fn count_with_status(&self, status: DeliveryStatus) -> usize {
        let messages = self.messages.read().unwrap();
        messages.values().filter(|m| m.status == status).count()
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStore for InMemoryQueueStore {
    fn insert(&self, message: QueuedMessage) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        messages.insert(message.id.as_str().to_string(), message);
        Ok(())
    }

    fn query_due(&self, now: DateTime<Utc>) -> Result<Vec<QueuedMessage>> {
        let messages = self.messages.read().unwrap();
        let mut due: Vec<QueuedMessage> = messages
            .values()
            .filter(|m| m.status == DeliveryStatus::Scheduled && m.send_time <= now)
            .cloned()
            .collect();

        // Ascending by send_time; id as tie-breaker for a stable order
        due.sort_by(|a, b| {
            a.send_time
                .cmp(&b.send_time)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });

        Ok(due)
    }

    fn update_status(&self, id: &MessageId, status: DeliveryStatus) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        let Some(message) = messages.get_mut(id.as_str()) else {
            bail!("unknown message id: {}", id.as_str());
        };

        if message.status.is_terminal() {
            if message.status == status {
                return Ok(()); // idempotent repeat
            }
            bail!(
                "message {} already terminal as {}, refusing {}",
                id.as_str(),
                message.status.as_str(),
                status.as_str()
            );
        }

        message.status = status;
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list_for_owner(&self, owner: &str) -> Result<Vec<DeliveryReport>> {
        let messages = self.messages.read().unwrap();
        let mut reports: Vec<(DateTime<Utc>, DeliveryReport)> = messages
            .values()
            .filter(|m| m.owner == owner)
            .map(|m| {
                (
                    m.send_time,
                    DeliveryReport {
                        company: m.company.clone(),
                        to: m.to.clone(),
                        status: m.status,
                        send_time: m.send_time,
                    },
                )
            })
            .collect();

        reports.sort_by_key(|(send_time, _)| *send_time);
        Ok(reports.into_iter().map(|(_, r)| r).collect())
    }
}
