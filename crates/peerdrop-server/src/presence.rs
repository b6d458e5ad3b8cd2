//! Presence registry: the single source of truth for who is online.
//!
//! Maps process-local connection handles to [`PeerRecord`]s. Records are
//! only ever mutated through the methods below. Operations on an unknown
//! handle are silent no-ops, because a client message racing its own
//! disconnect is routine.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{debug, warn};

use peerdrop_shared::constants::MAX_DISPLAY_NAME_LEN;
use peerdrop_shared::types::{ConnectionState, PeerId, PeerRecord};

use crate::clock::Clock;
use crate::error::RegistryError;
use crate::identity::IdentityGenerator;

/// Identifies one accepted connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
struct Entry {
    /// Registration order, used to keep snapshots stable.
    seq: u64,
    record: PeerRecord,
}

#[derive(Debug)]
pub struct PresenceRegistry {
    entries: HashMap<ConnectionHandle, Entry>,
    by_id: HashMap<PeerId, ConnectionHandle>,
    identities: IdentityGenerator,
    clock: Clock,
    next_seq: u64,
    version: u64,
}

impl PresenceRegistry {
    pub fn new(clock: Clock) -> Self {
        Self {
            entries: HashMap::new(),
            by_id: HashMap::new(),
            identities: IdentityGenerator::new(clock),
            clock,
            next_seq: 0,
            version: 0,
        }
    }

    /// Create and store a fresh ACTIVE record for `handle`.
    ///
    /// Registering a handle twice keeps the original record; a handle maps
    /// to exactly one record for its lifetime.
    pub fn register(&mut self, handle: ConnectionHandle, address: IpAddr) -> PeerRecord {
        if let Some(existing) = self.entries.get(&handle) {
            warn!(handle = %handle, "Handle registered twice, keeping original record");
            return existing.record.clone();
        }

        let record = self.identities.generate(address);
        let seq = self.next_seq;
        self.next_seq += 1;

        self.by_id.insert(record.id, handle);
        self.entries.insert(
            handle,
            Entry {
                seq,
                record: record.clone(),
            },
        );
        self.version += 1;

        debug!(
            handle = %handle,
            peer = %record.id,
            name = %record.display_name,
            peers = self.entries.len(),
            "Registered peer"
        );
        record
    }

    /// Change a peer's display name. Returns `true` when the registry changed.
    pub fn rename(&mut self, handle: ConnectionHandle, new_name: &str) -> bool {
        let name = new_name.trim();
        if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_LEN {
            debug!(handle = %handle, "Ignoring invalid display name");
            return false;
        }

        let Some(entry) = self.entries.get_mut(&handle) else {
            return false;
        };
        if entry.record.display_name == name {
            return false;
        }

        entry.record.display_name = name.to_string();
        self.version += 1;
        debug!(handle = %handle, peer = %entry.record.id, name, "Renamed peer");
        true
    }

    /// Refresh `last_seen_at`. Returns `false` for an unknown handle.
    pub fn touch(&mut self, handle: ConnectionHandle) -> bool {
        let now = self.clock.now();
        match self.entries.get_mut(&handle) {
            Some(entry) => {
                entry.record.last_seen_at = now;
                self.version += 1;
                true
            }
            None => false,
        }
    }

    /// Move a record into its grace period. Idempotent: only the first call
    /// changes state, but every call stamps `last_seen_at`.
    /// Returns `true` when the state changed.
    pub fn mark_grace_period(&mut self, handle: ConnectionHandle) -> bool {
        let now = self.clock.now();
        let Some(entry) = self.entries.get_mut(&handle) else {
            return false;
        };

        entry.record.last_seen_at = now;
        if entry.record.connection_state == ConnectionState::GracePeriod {
            return false;
        }

        entry.record.connection_state = ConnectionState::GracePeriod;
        self.version += 1;
        debug!(handle = %handle, peer = %entry.record.id, "Peer entered grace period");
        true
    }

    /// Remove a record that has finished its grace period.
    ///
    /// Unknown handles yield `Ok(None)` so a late timer is harmless.
    pub fn expire(
        &mut self,
        handle: ConnectionHandle,
    ) -> Result<Option<PeerRecord>, RegistryError> {
        match self.entries.get(&handle) {
            None => return Ok(None),
            Some(entry) if entry.record.connection_state == ConnectionState::Active => {
                return Err(RegistryError::ExpireWhileActive(handle));
            }
            Some(_) => {}
        }

        let Some(entry) = self.entries.remove(&handle) else {
            return Ok(None);
        };
        self.by_id.remove(&entry.record.id);
        self.version += 1;

        debug!(
            handle = %handle,
            peer = %entry.record.id,
            peers = self.entries.len(),
            "Expired peer"
        );
        Ok(Some(entry.record))
    }

    /// All known records, ACTIVE and GRACE_PERIOD alike, in registration order.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.record.clone()).collect()
    }

    /// Reverse lookup from a stable identity to its live connection.
    pub fn resolve(&self, id: &PeerId) -> Option<ConnectionHandle> {
        self.by_id.get(id).copied()
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<&PeerRecord> {
        self.entries.get(&handle).map(|entry| &entry.record)
    }

    pub fn find(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.resolve(id).and_then(|handle| self.get(handle))
    }

    /// Monotonic counter bumped by every visible mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn addr() -> IpAddr {
        "192.168.0.10".parse().unwrap()
    }

    fn registry() -> PresenceRegistry {
        PresenceRegistry::new(Clock::new())
    }

    #[tokio::test]
    async fn test_register_and_snapshot_order() {
        let mut reg = registry();
        let a = reg.register(ConnectionHandle(5), addr());
        let b = reg.register(ConnectionHandle(2), addr());
        let c = reg.register(ConnectionHandle(9), addr());

        let ids: Vec<PeerId> = reg.snapshot().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert_eq!(reg.len(), 3);
    }

    #[tokio::test]
    async fn test_register_twice_keeps_record() {
        let mut reg = registry();
        let first = reg.register(ConnectionHandle(1), addr());
        let second = reg.register(ConnectionHandle(1), addr());
        assert_eq!(first.id, second.id);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_rename_unknown_handle_is_noop() {
        let mut reg = registry();
        reg.register(ConnectionHandle(1), addr());
        let before = reg.snapshot();
        let version = reg.version();

        assert!(!reg.rename(ConnectionHandle(42), "Ghost"));
        assert_eq!(reg.snapshot(), before);
        assert_eq!(reg.version(), version);
    }

    #[tokio::test]
    async fn test_rename() {
        let mut reg = registry();
        reg.register(ConnectionHandle(1), addr());

        assert!(reg.rename(ConnectionHandle(1), "  Kitchen iPad "));
        assert_eq!(
            reg.get(ConnectionHandle(1)).unwrap().display_name,
            "Kitchen iPad"
        );
        // Same name again is not a change.
        assert!(!reg.rename(ConnectionHandle(1), "Kitchen iPad"));
        assert!(!reg.rename(ConnectionHandle(1), "   "));
        assert!(!reg.rename(ConnectionHandle(1), &"x".repeat(65)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_updates_last_seen() {
        let mut reg = registry();
        let record = reg.register(ConnectionHandle(1), addr());

        tokio::time::advance(std::time::Duration::from_secs(10)).await;
        assert!(reg.touch(ConnectionHandle(1)));
        assert!(!reg.touch(ConnectionHandle(2)));

        let touched = reg.get(ConnectionHandle(1)).unwrap();
        assert_eq!(
            touched.last_seen_at - record.last_seen_at,
            chrono::Duration::seconds(10)
        );
    }

    #[tokio::test]
    async fn test_expire_requires_grace_period() {
        let mut reg = registry();
        reg.register(ConnectionHandle(1), addr());

        assert_eq!(
            reg.expire(ConnectionHandle(1)),
            Err(RegistryError::ExpireWhileActive(ConnectionHandle(1)))
        );
        assert_eq!(reg.len(), 1);

        assert!(reg.mark_grace_period(ConnectionHandle(1)));
        assert!(!reg.mark_grace_period(ConnectionHandle(1)));
        assert_eq!(
            reg.snapshot()[0].connection_state,
            ConnectionState::GracePeriod
        );

        assert!(reg.expire(ConnectionHandle(1)).unwrap().is_some());
        assert_eq!(reg.len(), 0);
        // A late second expiry is harmless.
        assert_eq!(reg.expire(ConnectionHandle(1)), Ok(None));
    }

    #[tokio::test]
    async fn test_resolve() {
        let mut reg = registry();
        let record = reg.register(ConnectionHandle(3), addr());

        assert_eq!(reg.resolve(&record.id), Some(ConnectionHandle(3)));
        assert_eq!(reg.find(&record.id).unwrap().id, record.id);
        assert_eq!(reg.resolve(&PeerId::new()), None);

        reg.mark_grace_period(ConnectionHandle(3));
        reg.expire(ConnectionHandle(3)).unwrap();
        assert_eq!(reg.resolve(&record.id), None);
    }

    #[tokio::test]
    async fn test_snapshot_ids_unique_under_churn() {
        let mut reg = registry();
        for round in 0..20u64 {
            for i in 0..5u64 {
                let handle = ConnectionHandle(round * 10 + i);
                reg.register(handle, addr());
                reg.rename(handle, &format!("peer-{round}-{i}"));
                if i % 2 == 0 {
                    reg.mark_grace_period(handle);
                    reg.expire(handle).unwrap();
                }
            }
            let snapshot = reg.snapshot();
            let ids: HashSet<PeerId> = snapshot.iter().map(|r| r.id).collect();
            assert_eq!(ids.len(), snapshot.len());
        }
    }

    #[tokio::test]
    async fn test_version_tracks_mutations() {
        let mut reg = registry();
        assert_eq!(reg.version(), 0);
        reg.register(ConnectionHandle(1), addr());
        reg.rename(ConnectionHandle(1), "A");
        assert_eq!(reg.version(), 2);
        // A heartbeat changes `last_seen_at`, so it is a new version too.
        reg.touch(ConnectionHandle(1));
        assert_eq!(reg.version(), 3);
        reg.touch(ConnectionHandle(7));
        assert_eq!(reg.version(), 3);
        reg.mark_grace_period(ConnectionHandle(1));
        reg.mark_grace_period(ConnectionHandle(1));
        reg.expire(ConnectionHandle(1)).unwrap();
        assert_eq!(reg.version(), 5);
    }
}
