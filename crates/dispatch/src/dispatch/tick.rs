//! One dispatch cycle
//!
//! `Dispatcher::run_tick` drives a full cycle: select due records, obtain a
//! valid token, build and send an envelope per message, record the outcome,
//! release each message's attachment. It never returns an error to its
//! caller; per-message failures become terminal `Failed` statuses and a
//! credential failure aborts the remainder of the cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use super::batch::select_due;
use crate::envelope::build_envelope;
use crate::error::SendError;
use crate::gmail::{CredentialManager, Transport};
use crate::models::{DeliveryStatus, QueuedMessage};
use crate::storage::{AttachmentStore, QueueStore};

/// Statistics from one dispatch cycle
#[derive(Debug, Default, Clone)]
pub struct TickStats {
    /// Total records due at tick time
    pub due: usize,
    /// Messages delivered and marked `Sent`
    pub sent: usize,
    /// Messages marked `Failed`
    pub failed: usize,
    /// Messages left `Scheduled` for a later tick by their group cap
    pub deferred: usize,
    /// Remaining sends were abandoned after a credential failure
    pub aborted: bool,
    /// Another tick was already running, nothing was done
    pub skipped: bool,
    /// Duration of the cycle
    pub duration_ms: u64,
}

/// Clears the in-flight flag when the cycle ends, panicking or not
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives one dispatch cycle at a time
pub struct Dispatcher {
    queue: Arc<dyn QueueStore>,
    attachments: Arc<dyn AttachmentStore>,
    credentials: Arc<CredentialManager>,
    transport: Arc<dyn Transport>,
    in_flight: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        attachments: Arc<dyn AttachmentStore>,
        credentials: Arc<CredentialManager>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            queue,
            attachments,
            credentials,
            transport,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one full dispatch cycle at `now`.
    ///
    /// Non-overlap guard: if a cycle is still in flight, this call is a
    /// logged no-op with `skipped` set.
    pub fn run_tick(&self, now: DateTime<Utc>) -> TickStats {
        if self.in_flight.swap(true, Ordering::Acquire) {
            warn!("tick already in progress, skipping");
            return TickStats {
                skipped: true,
                ..TickStats::default()
            };
        }

        // The flag is cleared on unwind too, so a panicking cycle (say, a
        // poisoned store lock) does not wedge every later tick into a skip.
        let _guard = InFlightGuard(&self.in_flight);
        let stats = self.run_cycle(now);

        if stats.due > 0 || stats.aborted {
            info!(
                "tick done: {} due, {} sent, {} failed, {} deferred{} ({} ms)",
                stats.due,
                stats.sent,
                stats.failed,
                stats.deferred,
                if stats.aborted { ", aborted" } else { "" },
                stats.duration_ms
            );
        }
        stats
    }

    fn run_cycle(&self, now: DateTime<Utc>) -> TickStats {
        let start = std::time::Instant::now();
        let mut stats = TickStats::default();

        let groups = match select_due(self.queue.as_ref(), now) {
            Ok(groups) => groups,
            Err(e) => {
                error!("due-query failed: {:#}", e);
                return stats;
            }
        };

        stats.due = groups.iter().map(|g| g.send_now.len() + g.deferred).sum();
        if groups.is_empty() {
            debug!("no messages due");
            return stats;
        }

        // Token barrier: the refresh (if any) completes and is cached before
        // the first send of the tick.
        let token = match self.credentials.get_valid_token(now) {
            Ok(token) => token,
            Err(e) => {
                error!("credential refresh failed, aborting tick: {}", e);
                stats.aborted = true;
                stats.duration_ms = start.elapsed().as_millis() as u64;
                return stats;
            }
        };

        for group in groups {
            stats.deferred += group.deferred;
            debug!(
                "dispatching group cap={}: {} now, {} deferred",
                group.cap,
                group.send_now.len(),
                group.deferred
            );

            for message in group.send_now {
                let outcome = match self.send_one(&token, &message) {
                    Ok(()) => {
                        stats.sent += 1;
                        DeliveryStatus::Sent
                    }
                    Err(e) => {
                        warn!("send failed for {}: {}", message.id.as_str(), e);
                        stats.failed += 1;
                        DeliveryStatus::Failed
                    }
                };

                // Persist immediately so a crash mid-tick leaves only
                // unattempted records Scheduled
                if let Err(e) = self.queue.update_status(&message.id, outcome) {
                    error!(
                        "status write failed for {}: {:#}",
                        message.id.as_str(),
                        e
                    );
                }

                // The attempt consumed the attachment, whatever the outcome.
                // Cleanup is per message, never shared with batch-mates.
                if let Some(attachment) = &message.attachment {
                    if let Err(e) = self.attachments.delete(attachment) {
                        warn!(
                            "failed to delete attachment {} for {}: {}",
                            attachment.path,
                            message.id.as_str(),
                            e
                        );
                    }
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        stats
    }

    /// Build and deliver one envelope. Errors here are scoped to the message.
    fn send_one(&self, token: &str, message: &QueuedMessage) -> Result<(), SendError> {
        // Degrade policy: a missing or unreadable attachment does not fail
        // the message; it goes out without the attachment.
        let attachment_bytes = match &message.attachment {
            Some(attachment) => match self.attachments.read(attachment) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(
                        "attachment {} unavailable for {}, sending without it: {}",
                        attachment.path,
                        message.id.as_str(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let attachment = message
            .attachment
            .as_ref()
            .zip(attachment_bytes.as_deref())
            .map(|(att, bytes)| (att.filename.as_str(), bytes));

        let raw = build_envelope(message, attachment)?;
        self.transport.send(token, &raw)?;
        Ok(())
    }
}
