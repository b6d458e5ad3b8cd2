use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{FilePayload, OutgoingPayload, PayloadId, PeerId, PeerRecord};

/// Messages pushed from the relay to a client (one JSON text frame each).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// The identity assigned to this connection. Always the first frame.
    Identity { peer: PeerRecord },

    /// Full listing of known peers, in registration order.
    #[serde(rename_all = "camelCase")]
    PresenceSnapshot { version: u64, peers: Vec<PeerRecord> },

    /// Current contents of one mailbox.
    #[serde(rename_all = "camelCase")]
    MailboxUpdated {
        recipient_id: PeerId,
        payloads: Vec<FilePayload>,
    },

    /// A payload just deposited for this connection's peer.
    PayloadPushed { payload: FilePayload },

    /// Sender-side confirmation that a deposit was stored.
    #[serde(rename_all = "camelCase")]
    PayloadDeposited {
        payload_id: PayloadId,
        recipient_id: PeerId,
    },

    /// Sender-side notice that a deposit was refused.
    #[serde(rename_all = "camelCase")]
    DeliveryFailed {
        recipient_id: PeerId,
        name: String,
        reason: String,
    },

    Error { message: String },
}

/// Messages sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    SetDisplayName { name: String },

    #[serde(rename_all = "camelCase")]
    FetchMailbox { target_id: PeerId },

    #[serde(rename_all = "camelCase")]
    DepositPayload {
        target_id: PeerId,
        payload: OutgoingPayload,
    },

    /// Remove a payload from the caller's own mailbox once downloaded.
    #[serde(rename_all = "camelCase")]
    AcknowledgePayload { payload_id: PayloadId },

    WhoAmI,

    FetchPeers,
}

impl ServerMessage {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Identity { .. } => "identity",
            ServerMessage::PresenceSnapshot { .. } => "presence-snapshot",
            ServerMessage::MailboxUpdated { .. } => "mailbox-updated",
            ServerMessage::PayloadPushed { .. } => "payload-pushed",
            ServerMessage::PayloadDeposited { .. } => "payload-deposited",
            ServerMessage::DeliveryFailed { .. } => "delivery-failed",
            ServerMessage::Error { .. } => "error",
        }
    }
}

impl ClientMessage {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tags() {
        let msg = ClientMessage::from_text(r#"{"type":"set-display-name","name":"Laptop"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SetDisplayName {
                name: "Laptop".into()
            }
        );

        let msg = ClientMessage::from_text(r#"{"type":"who-am-i"}"#).unwrap();
        assert_eq!(msg, ClientMessage::WhoAmI);
    }

    #[test]
    fn test_deposit_payload_parses() {
        let target = PeerId::new();
        let text = format!(
            r#"{{"type":"deposit-payload","targetId":"{target}","payload":{{"name":"a.bin","mimeType":"application/x-a","content":"AAEC"}}}}"#
        );

        match ClientMessage::from_text(&text).unwrap() {
            ClientMessage::DepositPayload { target_id, payload } => {
                assert_eq!(target_id, target);
                assert_eq!(payload.name, "a.bin");
                assert_eq!(&payload.content[..], &[0u8, 1, 2]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = ClientMessage::from_text(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_server_message_envelope() {
        let msg = ServerMessage::PresenceSnapshot {
            version: 7,
            peers: Vec::new(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "presence-snapshot");
        assert_eq!(value["version"], 7);
        assert_eq!(msg.kind(), "presence-snapshot");
    }
}
