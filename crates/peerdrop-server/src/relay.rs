//! Relay coordinator.
//!
//! Owns the presence registry, the mailbox store and the event broadcaster
//! behind a single lock. Every registry mutation fans out a presence
//! snapshot before the lock is released, which is what gives all listeners
//! the same ordering of snapshots.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use peerdrop_shared::protocol::{ClientMessage, ServerMessage};
use peerdrop_shared::types::{FilePayload, OutgoingPayload, PayloadId, PeerId, PeerRecord};

use crate::broadcast::EventBroadcaster;
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::MailboxError;
use crate::mailbox::MailboxStore;
use crate::presence::{ConnectionHandle, PresenceRegistry};

/// `delivery-failed` reason for payloads pushed out of a full mailbox.
const EVICTED_REASON: &str = "recipient mailbox full, payload evicted";

/// A freshly registered connection.
#[derive(Debug)]
pub struct Connection {
    pub handle: ConnectionHandle,
    pub peer: PeerRecord,
    /// Messages queued for this connection, starting with its identity.
    pub outbound: mpsc::Receiver<ServerMessage>,
}

struct RelayState {
    registry: PresenceRegistry,
    mailboxes: MailboxStore,
    broadcaster: EventBroadcaster,
}

impl RelayState {
    fn broadcast_presence(&self) {
        self.broadcaster
            .broadcast_presence(self.registry.version(), self.registry.snapshot());
    }
}

pub struct Relay {
    state: Mutex<RelayState>,
    next_handle: AtomicU64,
    clock: Clock,
}

impl Relay {
    pub fn new(config: &ServerConfig, clock: Clock) -> Self {
        Self {
            state: Mutex::new(RelayState {
                registry: PresenceRegistry::new(clock),
                mailboxes: MailboxStore::new(config.mailbox, config.max_payload_size),
                broadcaster: EventBroadcaster::new(config.outbound_queue_capacity),
            }),
            next_handle: AtomicU64::new(1),
            clock,
        }
    }

    /// Register a new connection and announce it to everyone.
    pub async fn connect(&self, address: IpAddr) -> Connection {
        let handle = ConnectionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        let mut state = self.state.lock().await;
        let outbound = state.broadcaster.subscribe(handle);
        let peer = state.registry.register(handle, address);
        state.broadcaster.send(
            handle,
            ServerMessage::Identity { peer: peer.clone() },
        );
        state.broadcast_presence();

        info!(
            handle = %handle,
            peer = %peer.id,
            name = %peer.display_name,
            addr = %address,
            "Peer connected"
        );

        Connection {
            handle,
            peer,
            outbound,
        }
    }

    pub async fn rename(&self, handle: ConnectionHandle, name: &str) -> bool {
        let mut state = self.state.lock().await;
        let changed = state.registry.rename(handle, name);
        if changed {
            state.broadcast_presence();
        }
        changed
    }

    /// Liveness heartbeat: refresh `last_seen_at` and re-broadcast even
    /// though the topology is unchanged. Returns `false` once the handle
    /// is gone.
    pub async fn touch(&self, handle: ConnectionHandle) -> bool {
        let mut state = self.state.lock().await;
        let touched = state.registry.touch(handle);
        if touched {
            state.broadcast_presence();
        }
        touched
    }

    /// Close the connection's outbound queue and flag it as in its grace
    /// period. The peer stays visible to others.
    pub async fn disconnect(&self, handle: ConnectionHandle) -> bool {
        let mut state = self.state.lock().await;
        state.broadcaster.unsubscribe(handle);
        let Some(peer_id) = state.registry.get(handle).map(|p| p.id) else {
            return false;
        };
        state.registry.mark_grace_period(handle);
        state.broadcast_presence();

        info!(handle = %handle, peer = %peer_id, "Peer disconnected, grace period started");
        true
    }

    /// Remove a peer whose grace period has elapsed. Safe to call late or
    /// twice.
    pub async fn expire(&self, handle: ConnectionHandle) -> Option<PeerRecord> {
        let mut state = self.state.lock().await;
        match state.registry.expire(handle) {
            Ok(Some(peer)) => {
                state.broadcast_presence();
                info!(handle = %handle, peer = %peer.id, "Peer removed after grace period");
                Some(peer)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(handle = %handle, error = %e, "Refusing to expire peer");
                None
            }
        }
    }

    /// Store a payload from `sender` for `target_id` and push it to the
    /// recipient if it is reachable right now.
    pub async fn deposit(
        &self,
        sender: ConnectionHandle,
        target_id: PeerId,
        outgoing: OutgoingPayload,
    ) -> Result<Option<PayloadId>, MailboxError> {
        let mut state = self.state.lock().await;
        let Some(sender_id) = state.registry.get(sender).map(|p| p.id) else {
            debug!(handle = %sender, "Deposit from unregistered connection ignored");
            return Ok(None);
        };

        let name = outgoing.name.clone();
        let payload = FilePayload::from_outgoing(outgoing, sender_id, target_id, self.clock.now());
        let payload_id = payload.id;

        let deposit = match state.mailboxes.deposit(target_id, payload.clone()) {
            Ok(deposit) => deposit,
            Err(e) => {
                warn!(
                    sender = %sender_id,
                    recipient = %target_id,
                    name = %name,
                    error = %e,
                    "Deposit refused"
                );
                state.broadcaster.send(
                    sender,
                    ServerMessage::DeliveryFailed {
                        recipient_id: target_id,
                        name,
                        reason: e.to_string(),
                    },
                );
                return Err(e);
            }
        };

        for lost in &deposit.evicted {
            if let Some(owner) = state.registry.resolve(&lost.sender_id) {
                state.broadcaster.send(
                    owner,
                    ServerMessage::DeliveryFailed {
                        recipient_id: lost.recipient_id,
                        name: lost.name.clone(),
                        reason: EVICTED_REASON.to_string(),
                    },
                );
            }
        }

        if let Some(recipient) = state.registry.resolve(&target_id) {
            state
                .broadcaster
                .send(recipient, ServerMessage::PayloadPushed { payload });
            state
                .broadcaster
                .notify_mailbox(recipient, target_id, deposit.mailbox);
        } else {
            debug!(recipient = %target_id, "Recipient offline, payload held for fetch");
        }

        state.broadcaster.send(
            sender,
            ServerMessage::PayloadDeposited {
                payload_id,
                recipient_id: target_id,
            },
        );

        info!(
            sender = %sender_id,
            recipient = %target_id,
            payload = %payload_id,
            name = %name,
            evicted = deposit.evicted.len(),
            "Payload deposited"
        );
        Ok(Some(payload_id))
    }

    pub async fn fetch(&self, recipient: &PeerId) -> Vec<FilePayload> {
        self.state.lock().await.mailboxes.fetch(recipient)
    }

    /// Answer a `fetch-mailbox` request on the asking connection.
    pub async fn send_mailbox(&self, handle: ConnectionHandle, target_id: PeerId) {
        let state = self.state.lock().await;
        let payloads = state.mailboxes.fetch(&target_id);
        state.broadcaster.notify_mailbox(handle, target_id, payloads);
    }

    /// Drop a downloaded payload from the caller's own mailbox.
    pub async fn acknowledge(&self, handle: ConnectionHandle, payload_id: PayloadId) -> bool {
        let mut state = self.state.lock().await;
        let Some(peer_id) = state.registry.get(handle).map(|p| p.id) else {
            return false;
        };
        let removed = state.mailboxes.acknowledge(&peer_id, &payload_id);
        if removed {
            let payloads = state.mailboxes.fetch(&peer_id);
            state.broadcaster.notify_mailbox(handle, peer_id, payloads);
        }
        removed
    }

    /// Consistent point-in-time view: registry version and all records.
    pub async fn snapshot(&self) -> (u64, Vec<PeerRecord>) {
        let state = self.state.lock().await;
        (state.registry.version(), state.registry.snapshot())
    }

    pub async fn find(&self, id: &PeerId) -> Option<PeerRecord> {
        self.state.lock().await.registry.find(id).cloned()
    }

    pub async fn purge_expired_payloads(&self) -> usize {
        let now = self.clock.now();
        self.state.lock().await.mailboxes.purge_expired(now)
    }

    /// Counts for the info endpoint: (peers, listeners, pending payloads).
    pub async fn stats(&self) -> (usize, usize, usize) {
        let state = self.state.lock().await;
        (
            state.registry.len(),
            state.broadcaster.listener_count(),
            state.mailboxes.pending(),
        )
    }

    /// Apply one client frame on behalf of `handle`.
    pub async fn handle_text(&self, handle: ConnectionHandle, text: &str) {
        match ClientMessage::from_text(text) {
            Ok(message) => self.handle_message(handle, message).await,
            Err(e) => {
                debug!(handle = %handle, error = %e, "Rejected client frame");
                let state = self.state.lock().await;
                state.broadcaster.send(
                    handle,
                    ServerMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
    }

    pub async fn handle_message(&self, handle: ConnectionHandle, message: ClientMessage) {
        match message {
            ClientMessage::SetDisplayName { name } => {
                self.rename(handle, &name).await;
            }
            ClientMessage::FetchMailbox { target_id } => {
                self.send_mailbox(handle, target_id).await;
            }
            ClientMessage::DepositPayload { target_id, payload } => {
                // Refusals are reported to the sender inside `deposit`.
                let _ = self.deposit(handle, target_id, payload).await;
            }
            ClientMessage::AcknowledgePayload { payload_id } => {
                self.acknowledge(handle, payload_id).await;
            }
            ClientMessage::WhoAmI => {
                let state = self.state.lock().await;
                if let Some(peer) = state.registry.get(handle).cloned() {
                    state
                        .broadcaster
                        .send(handle, ServerMessage::Identity { peer });
                }
            }
            ClientMessage::FetchPeers => {
                let state = self.state.lock().await;
                state.broadcaster.send(
                    handle,
                    ServerMessage::PresenceSnapshot {
                        version: state.registry.version(),
                        peers: state.registry.snapshot(),
                    },
                );
            }
        }
    }
}
