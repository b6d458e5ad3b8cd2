/// Application name
pub const APP_NAME: &str = "PeerDrop";

/// Default HTTP/WebSocket port of the relay
pub const DEFAULT_HTTP_PORT: u16 = 3001;

/// Prefix of auto-generated display names
pub const DISPLAY_NAME_PREFIX: &str = "User-";

/// Number of random base-36 characters after the display name prefix
pub const DISPLAY_NAME_SUFFIX_LEN: usize = 9;

/// Longest display name a peer may choose, in characters
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Liveness heartbeat interval in seconds
pub const LIVENESS_INTERVAL_SECS: u64 = 10;

/// Time a disconnected peer stays visible, in seconds
pub const GRACE_PERIOD_SECS: u64 = 30;

/// Maximum size of a single file payload in bytes (50 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Maximum number of pending payloads per mailbox
pub const MAILBOX_MAX_PAYLOADS: usize = 32;

/// Maximum total content bytes held per mailbox (200 MiB)
pub const MAILBOX_MAX_BYTES: usize = 200 * 1024 * 1024;

/// Age after which an unacknowledged payload is evicted (24 h)
pub const MAILBOX_TTL_SECS: u64 = 24 * 60 * 60;

/// Per-connection outbound queue depth
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
