//! Relay mailbox store.
//!
//! Payloads are held per recipient identity, independent of whether the
//! recipient is connected, and handed out in deposit order. Retention is
//! bounded three ways: a per-mailbox payload count, a per-mailbox byte
//! budget (both evict oldest first), and a TTL applied by
//! [`MailboxStore::purge_expired`]. Recipients may also acknowledge a
//! payload to drop it early.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use peerdrop_shared::types::{FilePayload, PayloadId, PeerId};

use crate::config::MailboxLimits;
use crate::error::MailboxError;

/// Result of a successful deposit.
#[derive(Debug, Clone)]
pub struct Deposit {
    /// Recipient's full mailbox after the deposit, oldest first.
    pub mailbox: Vec<FilePayload>,
    /// Payloads pushed out to make room, oldest first.
    pub evicted: Vec<FilePayload>,
}

#[derive(Debug)]
pub struct MailboxStore {
    boxes: HashMap<PeerId, VecDeque<FilePayload>>,
    limits: MailboxLimits,
    max_payload_size: usize,
}

impl MailboxStore {
    pub fn new(limits: MailboxLimits, max_payload_size: usize) -> Self {
        Self {
            boxes: HashMap::new(),
            limits,
            max_payload_size,
        }
    }

    /// Append `payload` to `recipient`'s mailbox, creating it if absent.
    ///
    /// Fails only when the payload alone exceeds the size limits.
    pub fn deposit(
        &mut self,
        recipient: PeerId,
        payload: FilePayload,
    ) -> Result<Deposit, MailboxError> {
        let size = payload.content.len();
        let max = self.max_payload_size.min(self.limits.max_bytes);
        if size > max {
            return Err(MailboxError::PayloadTooLarge { size, max });
        }

        let queue = self.boxes.entry(recipient).or_default();
        let mut held: usize = queue.iter().map(|p| p.content.len()).sum();
        let mut evicted = Vec::new();

        while queue.len() >= self.limits.max_payloads.max(1)
            || (held + size > self.limits.max_bytes && !queue.is_empty())
        {
            let Some(oldest) = queue.pop_front() else {
                break;
            };
            held -= oldest.content.len();
            warn!(
                recipient = %recipient,
                payload = %oldest.id,
                name = %oldest.name,
                "Mailbox full, evicting oldest payload"
            );
            evicted.push(oldest);
        }

        debug!(
            recipient = %recipient,
            payload = %payload.id,
            name = %payload.name,
            size,
            "Deposited payload"
        );
        queue.push_back(payload);

        Ok(Deposit {
            mailbox: queue.iter().cloned().collect(),
            evicted,
        })
    }

    /// Contents of `recipient`'s mailbox in deposit order. Never fails.
    pub fn fetch(&self, recipient: &PeerId) -> Vec<FilePayload> {
        self.boxes
            .get(recipient)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop one payload the recipient has downloaded.
    /// Returns `false` if it was not in the mailbox.
    pub fn acknowledge(&mut self, recipient: &PeerId, payload_id: &PayloadId) -> bool {
        let Some(queue) = self.boxes.get_mut(recipient) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|p| p.id != *payload_id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.boxes.remove(recipient);
        }
        if removed {
            debug!(recipient = %recipient, payload = %payload_id, "Payload acknowledged");
        }
        removed
    }

    /// Evict payloads older than the configured TTL. A zero TTL disables
    /// age-based eviction. Returns the number of payloads removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        if self.limits.ttl.is_zero() {
            return 0;
        }
        let Ok(ttl) = chrono::Duration::from_std(self.limits.ttl) else {
            return 0;
        };
        let cutoff = now - ttl;

        let mut removed = 0;
        self.boxes.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|p| p.deposited_at > cutoff);
            removed += before - queue.len();
            !queue.is_empty()
        });

        if removed > 0 {
            info!(removed, "Purged expired mailbox payloads");
        }
        removed
    }

    /// Total payloads waiting across all mailboxes.
    pub fn pending(&self) -> usize {
        self.boxes.values().map(VecDeque::len).sum()
    }
}
