/// Message lifecycle tracker.
///
/// Pipeline: Pending → Sent → (Relayed)? → Delivered → Read, with Failed
/// absorbing from any non-terminal state. Transitions are strictly
/// monotonic — regressions are ignored, so out-of-order ACKs are
/// harmless. Pure logic, no I/O.
use std::collections::HashMap;

use crate::types::{MessageStatus, NodeId};

/// Maximum number of tracked messages.
const MAX_TRACKED: usize = 10_000;

/// A status transition event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub message_id: String,
    pub previous: MessageStatus,
    pub current: MessageStatus,
}

/// Lifecycle record of one sent message.
#[derive(Debug, Clone)]
pub struct MessageStatusEntry {
    pub message_id: String,
    pub to: NodeId,
    pub status: MessageStatus,
    /// Unix ms at which each status was first reached.
    pub timestamps: HashMap<MessageStatus, u64>,
}

impl MessageStatusEntry {
    fn new(message_id: String, to: NodeId, now: u64) -> Self {
        let mut timestamps = HashMap::new();
        timestamps.insert(MessageStatus::Pending, now);
        Self {
            message_id,
            to,
            status: MessageStatus::Pending,
            timestamps,
        }
    }

    /// The most recent status timestamp.
    pub fn last_update(&self) -> u64 {
        self.timestamps.values().copied().max().unwrap_or(0)
    }
}

/// Tracks the lifecycle of every sent message.
#[derive(Default)]
pub struct MessageTracker {
    messages: HashMap<String, MessageStatusEntry>,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a message. Idempotent: returns `true` on the first
    /// call, `false` if the id is already tracked (or capacity is hit).
    pub fn track(&mut self, message_id: &str, to: NodeId, now: u64) -> bool {
        if self.messages.contains_key(message_id) {
            return false;
        }
        if self.messages.len() >= MAX_TRACKED {
            tracing::warn!(message_id, "tracker at capacity, not tracking");
            return false;
        }
        self.messages.insert(
            message_id.to_string(),
            MessageStatusEntry::new(message_id.to_string(), to, now),
        );
        true
    }

    pub fn mark_sent(&mut self, message_id: &str, now: u64) -> Option<StatusChange> {
        self.advance(message_id, MessageStatus::Sent, now)
    }

    pub fn mark_relayed(&mut self, message_id: &str, now: u64) -> Option<StatusChange> {
        self.advance(message_id, MessageStatus::Relayed, now)
    }

    pub fn mark_delivered(&mut self, message_id: &str, now: u64) -> Option<StatusChange> {
        self.advance(message_id, MessageStatus::Delivered, now)
    }

    pub fn mark_read(&mut self, message_id: &str, now: u64) -> Option<StatusChange> {
        self.advance(message_id, MessageStatus::Read, now)
    }

    /// Mark a message failed. Allowed from any non-terminal state.
    pub fn mark_failed(&mut self, message_id: &str, now: u64) -> Option<StatusChange> {
        let entry = self.messages.get_mut(message_id)?;
        if entry.status.is_terminal() {
            return None;
        }
        let previous = entry.status;
        entry.status = MessageStatus::Failed;
        entry.timestamps.insert(MessageStatus::Failed, now);
        Some(StatusChange {
            message_id: message_id.to_string(),
            previous,
            current: MessageStatus::Failed,
        })
    }

    pub fn status(&self, message_id: &str) -> Option<MessageStatus> {
        self.messages.get(message_id).map(|m| m.status)
    }

    pub fn entry(&self, message_id: &str) -> Option<&MessageStatusEntry> {
        self.messages.get(message_id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Remove terminal (`Read`/`Failed`) entries whose newest timestamp
    /// is older than `max_age_ms`. Returns how many were removed.
    pub fn cleanup(&mut self, max_age_ms: u64, now: u64) -> usize {
        let horizon = now.saturating_sub(max_age_ms);
        let before = self.messages.len();
        self.messages
            .retain(|_, entry| !(entry.status.is_terminal() && entry.last_update() < horizon));
        before - self.messages.len()
    }

    /// Advance along the pipeline; regressions and terminal states are
    /// ignored.
    fn advance(&mut self, message_id: &str, new_status: MessageStatus, now: u64) -> Option<StatusChange> {
        let entry = self.messages.get_mut(message_id)?;
        let (Some(current_rank), Some(new_rank)) = (entry.status.rank(), new_status.rank()) else {
            return None; // already failed
        };
        if new_rank <= current_rank {
            return None;
        }
        let previous = entry.status;
        entry.status = new_status;
        entry.timestamps.insert(new_status, now);
        Some(StatusChange {
            message_id: message_id.to_string(),
            previous,
            current: new_status,
        })
    }
}
