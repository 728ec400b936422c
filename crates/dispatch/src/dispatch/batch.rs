//! Batch selection
//!
//! Caps are per submission, not global: the due-set is partitioned by each
//! record's own declared rate cap, and every group independently sends up to
//! its cap per tick. Total tick throughput is the sum of all active caps.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::models::QueuedMessage;
use crate::storage::QueueStore;

/// Messages sharing one declared rate cap, due in the same tick
#[derive(Debug)]
pub struct RateGroup {
    /// The declared cap (group key)
    pub cap: u32,
    /// This tick's send-set: the `cap` oldest due messages of the group
    pub send_now: Vec<QueuedMessage>,
    /// How many stayed `Scheduled` for a later tick
    pub deferred: usize,
}

/// Query the due-set at `now` and partition it into rate groups
pub fn select_due(queue: &dyn QueueStore, now: DateTime<Utc>) -> Result<Vec<RateGroup>> {
    let due = queue.query_due(now)?;
    Ok(partition_by_cap(due))
}

/// Partition an already send_time-ordered due-set by rate cap.
///
/// Within each group the send-set keeps the store's oldest-due-first order;
/// the remainder is left untouched in the store (not requeued, never skipped
/// permanently). Groups come back in ascending cap order.
pub fn partition_by_cap(due: Vec<QueuedMessage>) -> Vec<RateGroup> {
    let mut groups: BTreeMap<u32, Vec<QueuedMessage>> = BTreeMap::new();
    for message in due {
        // A zero cap would starve its records forever; treat it as 1
        let cap = message.throttle_limit.max(1);
        groups.entry(cap).or_default().push(message);
    }

    groups
        .into_iter()
        .map(|(cap, mut messages)| {
            let deferred = messages.len().saturating_sub(cap as usize);
            messages.truncate(cap as usize);
            RateGroup {
                cap,
                send_now: messages,
                deferred,
            }
        })
        .collect()
}
