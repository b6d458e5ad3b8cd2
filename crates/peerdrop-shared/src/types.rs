use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ephemeral identity of a connected device. Minted once per connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PayloadId(pub Uuid);

impl PayloadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PayloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PayloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Presence state of a registered peer. A peer that is neither is not
/// registered at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Active,
    GracePeriod,
}

/// A device as seen by every other device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub id: PeerId,
    pub display_name: String,
    pub address: String,
    pub last_seen_at: DateTime<Utc>,
    pub connection_state: ConnectionState,
}

/// A file held by the relay for a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub id: PayloadId,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub content: Bytes,
    pub sender_id: PeerId,
    pub recipient_id: PeerId,
    pub deposited_at: DateTime<Utc>,
}

/// A file as submitted by the sending client. The relay assigns the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPayload {
    pub name: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub content: Bytes,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

impl FilePayload {
    pub fn from_outgoing(
        outgoing: OutgoingPayload,
        sender_id: PeerId,
        recipient_id: PeerId,
        deposited_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PayloadId::new(),
            name: outgoing.name,
            size_bytes: outgoing.content.len() as u64,
            mime_type: outgoing.mime_type,
            content: outgoing.content,
            sender_id,
            recipient_id,
            deposited_at,
        }
    }
}

/// Standard base64 for binary content inside JSON frames.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
