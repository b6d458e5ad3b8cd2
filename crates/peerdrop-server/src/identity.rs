//! Ephemeral identities for new connections.

use std::net::IpAddr;

use rand::distributions::Uniform;
use rand::Rng;

use peerdrop_shared::constants::{DISPLAY_NAME_PREFIX, DISPLAY_NAME_SUFFIX_LEN};
use peerdrop_shared::types::{ConnectionState, PeerId, PeerRecord};

use crate::clock::Clock;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Default)]
pub struct IdentityGenerator {
    clock: Clock,
}

impl IdentityGenerator {
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }

    /// Mint a fresh ACTIVE record. Ids are random v4 UUIDs, never counters,
    /// so they stay unique across relay restarts.
    pub fn generate(&self, address: IpAddr) -> PeerRecord {
        PeerRecord {
            id: PeerId::new(),
            display_name: random_display_name(),
            address: address.to_string(),
            last_seen_at: self.clock.now(),
            connection_state: ConnectionState::Active,
        }
    }
}

/// `User-` followed by nine lowercase base-36 characters.
pub fn random_display_name() -> String {
    let mut rng = rand::thread_rng();
    let dist = Uniform::from(0..BASE36.len());
    let suffix: String = (0..DISPLAY_NAME_SUFFIX_LEN)
        .map(|_| BASE36[rng.sample(dist)] as char)
        .collect();
    format!("{DISPLAY_NAME_PREFIX}{suffix}")
}
