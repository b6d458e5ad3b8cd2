//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration on a LAN.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use peerdrop_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, GRACE_PERIOD_SECS, LIVENESS_INTERVAL_SECS, MAILBOX_MAX_BYTES,
    MAILBOX_MAX_PAYLOADS, MAILBOX_TTL_SECS, MAX_PAYLOAD_SIZE, OUTBOUND_QUEUE_CAPACITY,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3001`
    pub http_addr: SocketAddr,

    /// Human-readable name for this relay instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Heartbeat interval for each active connection.
    /// Env: `LIVENESS_INTERVAL_SECS`
    /// Default: 10 s
    pub liveness_interval: Duration,

    /// How long a disconnected peer stays visible before removal.
    /// Env: `GRACE_PERIOD_SECS`
    /// Default: 30 s
    pub grace_period: Duration,

    /// Maximum size of one file payload in bytes.
    /// Env: `MAX_PAYLOAD_SIZE`
    /// Default: 50 MiB
    pub max_payload_size: usize,

    pub mailbox: MailboxLimits,

    /// How often expired mailbox payloads are purged.
    /// Env: `MAILBOX_PURGE_INTERVAL_SECS`
    /// Default: 300 s
    pub mailbox_purge_interval: Duration,

    /// Depth of each connection's outbound message queue.
    /// Env: `OUTBOUND_QUEUE_CAPACITY`
    /// Default: 256
    pub outbound_queue_capacity: usize,
}

/// Retention limits applied to every mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxLimits {
    /// Env: `MAILBOX_MAX_PAYLOADS`
    pub max_payloads: usize,
    /// Env: `MAILBOX_MAX_BYTES`
    pub max_bytes: usize,
    /// Env: `MAILBOX_TTL_SECS`
    pub ttl: Duration,
}

impl Default for MailboxLimits {
    fn default() -> Self {
        Self {
            max_payloads: MAILBOX_MAX_PAYLOADS,
            max_bytes: MAILBOX_MAX_BYTES,
            ttl: Duration::from_secs(MAILBOX_TTL_SECS),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: format!("{APP_NAME} Relay"),
            liveness_interval: Duration::from_secs(LIVENESS_INTERVAL_SECS),
            grace_period: Duration::from_secs(GRACE_PERIOD_SECS),
            max_payload_size: MAX_PAYLOAD_SIZE,
            mailbox: MailboxLimits::default(),
            mailbox_purge_interval: Duration::from_secs(300),
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "LIVENESS_INTERVAL_SECS") {
            if secs > 0 {
                config.liveness_interval = Duration::from_secs(secs);
            } else {
                tracing::warn!("LIVENESS_INTERVAL_SECS must be positive, using default");
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "GRACE_PERIOD_SECS") {
            config.grace_period = Duration::from_secs(secs);
        }

        if let Some(n) = parse_var::<usize>(&lookup, "MAX_PAYLOAD_SIZE") {
            config.max_payload_size = n;
        }

        if let Some(n) = parse_var::<usize>(&lookup, "MAILBOX_MAX_PAYLOADS") {
            config.mailbox.max_payloads = n;
        }

        if let Some(n) = parse_var::<usize>(&lookup, "MAILBOX_MAX_BYTES") {
            config.mailbox.max_bytes = n;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "MAILBOX_TTL_SECS") {
            config.mailbox.ttl = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "MAILBOX_PURGE_INTERVAL_SECS") {
            if secs > 0 {
                config.mailbox_purge_interval = Duration::from_secs(secs);
            }
        }

        if let Some(n) = parse_var::<usize>(&lookup, "OUTBOUND_QUEUE_CAPACITY") {
            if n > 0 {
                config.outbound_queue_capacity = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Largest WebSocket frame accepted: base64 inflates content by 4/3,
    /// plus room for the JSON envelope.
    pub fn max_frame_size(&self) -> usize {
        (self.max_payload_size / 3)
            .saturating_mul(4)
            .saturating_add(64 * 1024)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid numeric setting, using default");
            None
        }
    }
}
