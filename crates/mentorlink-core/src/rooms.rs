//! Room membership for mentorlink.
//!
//! Rooms are ephemeral named groups of identities: created implicitly on
//! first join, deleted as soon as the last member leaves. The manager holds
//! only identity references; connection lifetime belongs to the registry,
//! and removing a connection purges it from every room, never the reverse.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use mentorlink_protocol::Envelope;

use crate::registry::{ConnectionRegistry, SendOutcome};

/// Membership manager for named rooms.
///
/// Keeps a forward map (room to members) and a reverse map (identity to
/// rooms) so that purging a departed identity does not scan every room.
#[derive(Debug, Default)]
pub struct RoomManager {
    rooms: DashMap<String, HashSet<String>>,
    memberships: DashMap<String, HashSet<String>>,
}

impl RoomManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity to a room, creating the room if absent.
    pub fn join(&self, room: &str, identity: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(identity.to_string());
        self.memberships
            .entry(identity.to_string())
            .or_default()
            .insert(room.to_string());

        debug!(room = %room, identity = %identity, "Joined room");
    }

    /// Remove an identity from a room, deleting the room if it empties.
    ///
    /// Returns `true` if the identity was a member.
    pub fn leave(&self, room: &str, identity: &str) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(identity),
            None => false,
        };

        if removed {
            self.rooms.remove_if(room, |_, members| members.is_empty());
            if let Some(mut joined) = self.memberships.get_mut(identity) {
                joined.remove(room);
            }
            self.memberships.remove_if(identity, |_, joined| joined.is_empty());
            debug!(room = %room, identity = %identity, "Left room");
        }

        removed
    }

    /// Check whether a room currently exists.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Check whether an identity is a member of a room.
    #[must_use]
    pub fn is_member(&self, room: &str, identity: &str) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(identity))
            .unwrap_or(false)
    }

    /// Get a snapshot of a room's members.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Deliver an envelope to every current member of a room.
    ///
    /// The member set is snapshotted before any delivery. Members whose
    /// send fails are skipped; their own disconnect handling evicts them.
    /// Partial delivery is expected, not an error. Returns the number of
    /// members the envelope reached.
    pub fn broadcast(
        &self,
        registry: &ConnectionRegistry,
        room: &str,
        envelope: Arc<Envelope>,
        exclude: Option<&str>,
    ) -> usize {
        let members = self.members(room);

        let mut delivered = 0;
        for member in &members {
            if Some(member.as_str()) == exclude {
                continue;
            }
            if registry.send(member, envelope.clone()) == SendOutcome::Delivered {
                delivered += 1;
            }
        }

        trace!(room = %room, delivered, "Room broadcast");
        delivered
    }

    /// Remove an identity from every room it belongs to, deleting rooms
    /// that empty out. Called when a connection is evicted.
    pub fn purge(&self, identity: &str) {
        let Some((_, joined)) = self.memberships.remove(identity) else {
            return;
        };

        for room in joined {
            if let Some(mut members) = self.rooms.get_mut(&room) {
                members.remove(identity);
            }
            self.rooms.remove_if(&room, |_, members| members.is_empty());
        }

        debug!(identity = %identity, "Purged from all rooms");
    }

    /// Delete every room and membership.
    pub fn clear(&self) {
        self.rooms.clear();
        self.memberships.clear();
    }

    /// Get the number of active rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get the total number of memberships across all rooms.
    #[must_use]
    pub fn membership_count(&self) -> usize {
        self.rooms.iter().map(|members| members.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use mentorlink_protocol::SystemAction;
    use tokio::sync::mpsc;

    #[test]
    fn test_join_leave_deletes_empty_room() {
        let rooms = RoomManager::new();

        rooms.join("physics-help", "u1");
        rooms.join("physics-help", "u2");
        assert!(rooms.room_exists("physics-help"));
        assert_eq!(rooms.membership_count(), 2);

        assert!(rooms.leave("physics-help", "u1"));
        assert!(rooms.room_exists("physics-help"));

        assert!(rooms.leave("physics-help", "u2"));
        // A room with zero members does not persist.
        assert!(!rooms.room_exists("physics-help"));
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn test_leave_non_member_is_noop() {
        let rooms = RoomManager::new();
        rooms.join("essay-review", "u1");

        assert!(!rooms.leave("essay-review", "u2"));
        assert!(!rooms.leave("no-such-room", "u1"));
        assert!(rooms.room_exists("essay-review"));
    }

    #[test]
    fn test_purge_removes_from_all_rooms() {
        let rooms = RoomManager::new();
        rooms.join("physics-help", "u1");
        rooms.join("essay-review", "u1");
        rooms.join("essay-review", "u2");

        rooms.purge("u1");

        assert!(!rooms.is_member("physics-help", "u1"));
        assert!(!rooms.is_member("essay-review", "u1"));
        // Room that still has members survives; the emptied one is gone.
        assert!(!rooms.room_exists("physics-help"));
        assert!(rooms.room_exists("essay-review"));
        assert_eq!(rooms.membership_count(), 1);

        // Purging an unknown identity is a no-op.
        rooms.purge("u1");
    }

    #[test]
    fn test_broadcast_counts_and_excludes_sender() {
        let registry = ConnectionRegistry::new();
        let rooms = RoomManager::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.admit("u1", Role::Student, tx1);
        registry.admit("u2", Role::Student, tx2);
        rooms.join("physics-help", "u1");
        rooms.join("physics-help", "u2");

        let envelope = Arc::new(Envelope::system(SystemAction::Ping));
        let delivered = rooms.broadcast(&registry, "physics-help", envelope, Some("u1"));

        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_skips_failed_members() {
        let registry = ConnectionRegistry::new();
        let rooms = RoomManager::new();

        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.admit("u1", Role::Student, tx1);
        registry.admit("u2", Role::Student, tx2);
        rooms.join("physics-help", "u1");
        rooms.join("physics-help", "u2");

        // u1's writer is gone; the broadcast still reaches u2.
        drop(rx1);
        let envelope = Arc::new(Envelope::system(SystemAction::Ping));
        let delivered = rooms.broadcast(&registry, "physics-help", envelope, None);

        assert_eq!(delivered, 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_to_absent_room() {
        let registry = ConnectionRegistry::new();
        let rooms = RoomManager::new();

        let envelope = Arc::new(Envelope::system(SystemAction::Ping));
        assert_eq!(rooms.broadcast(&registry, "ghost", envelope, None), 0);
    }

    #[test]
    fn test_clear() {
        let rooms = RoomManager::new();
        rooms.join("a", "u1");
        rooms.join("b", "u2");

        rooms.clear();

        assert_eq!(rooms.room_count(), 0);
        assert_eq!(rooms.membership_count(), 0);
    }
}
