//! Fan-out of relay events to connected clients.
//!
//! Every connection owns a bounded outbound queue drained by its own
//! writer task. Sends never block: a full queue drops the message for that
//! connection only, so one slow client cannot stall the others.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use peerdrop_shared::protocol::ServerMessage;
use peerdrop_shared::types::{FilePayload, PeerId, PeerRecord};

use crate::presence::ConnectionHandle;

#[derive(Debug)]
pub struct EventBroadcaster {
    subscribers: HashMap<ConnectionHandle, mpsc::Sender<ServerMessage>>,
    queue_capacity: usize,
}

impl EventBroadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: HashMap::new(),
            queue_capacity,
        }
    }

    /// Open an outbound queue for `handle`. The receiver feeds the
    /// connection's writer task.
    pub fn subscribe(&mut self, handle: ConnectionHandle) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.subscribers.insert(handle, tx);
        rx
    }

    pub fn unsubscribe(&mut self, handle: ConnectionHandle) {
        self.subscribers.remove(&handle);
    }

    /// Send the presence snapshot to every connection.
    pub fn broadcast_presence(&self, version: u64, peers: Vec<PeerRecord>) {
        let message = ServerMessage::PresenceSnapshot { version, peers };
        for handle in self.subscribers.keys() {
            self.send(*handle, message.clone());
        }
        debug!(
            version,
            listeners = self.subscribers.len(),
            "Broadcast presence snapshot"
        );
    }

    /// Targeted mailbox update for exactly one connection.
    pub fn notify_mailbox(
        &self,
        handle: ConnectionHandle,
        recipient_id: PeerId,
        payloads: Vec<FilePayload>,
    ) -> bool {
        self.send(
            handle,
            ServerMessage::MailboxUpdated {
                recipient_id,
                payloads,
            },
        )
    }

    /// Queue one message for one connection. Returns `false` if it was dropped.
    pub fn send(&self, handle: ConnectionHandle, message: ServerMessage) -> bool {
        let Some(tx) = self.subscribers.get(&handle) else {
            return false;
        };

        match tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(
                    handle = %handle,
                    kind = message.kind(),
                    "Outbound queue full, dropping message for slow connection"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                debug!(
                    handle = %handle,
                    kind = message.kind(),
                    "Outbound queue closed"
                );
                false
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.subscribers.len()
    }
}
