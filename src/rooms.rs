//! Room registry.
//!
//! Tracks which rooms the application wants to be in and which of them the
//! current physical connection has actually joined. The desired set is the
//! source of truth; after every successful (re)connection it is replayed so
//! the physical memberships match it again.
//!
//! # Holders
//!
//! Membership is reference counted. Two consumers joining the same room
//! share one physical membership, and the `leave_room` frame goes out only
//! when the last of them leaves.
//!
//! The registry never touches the network. Operations return the control
//! [`Frame`]s to send; the connection manager sends them under its state
//! lock so membership changes and connection changes cannot interleave.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::identifiers::RoomId;
use crate::protocol::Frame;

// ============================================================================
// RoomSubscription
// ============================================================================

/// One desired room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSubscription {
    /// Room name.
    pub room: RoomId,
    /// Outstanding joins not yet matched by a leave. Always at least 1.
    pub holders: u32,
    /// Whether the current physical connection has sent `join_room`.
    pub physically_joined: bool,
}

// ============================================================================
// RoomRegistry
// ============================================================================

/// Desired rooms and their physical state.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: FxHashMap<RoomId, RoomSubscription>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a holder for `room`.
    ///
    /// Returns the `join_room` frame to send when the room becomes desired
    /// while `connected`. Otherwise the join is deferred to the next
    /// [`on_reconnected`](Self::on_reconnected).
    pub fn join(&mut self, room: RoomId, connected: bool) -> Option<Frame> {
        let entry = self
            .rooms
            .entry(room.clone())
            .or_insert_with(|| RoomSubscription {
                room,
                holders: 0,
                physically_joined: false,
            });

        entry.holders = entry.holders.saturating_add(1);

        if connected && !entry.physically_joined {
            entry.physically_joined = true;
            debug!(room = %entry.room, holders = entry.holders, "Joining room");
            return Some(Frame::join_room(&entry.room));
        }

        debug!(
            room = %entry.room,
            holders = entry.holders,
            joined = entry.physically_joined,
            "Room holder added"
        );
        None
    }

    /// Removes a holder for `room`.
    ///
    /// When the last holder leaves the room stops being desired, and the
    /// `leave_room` frame is returned if the room was physically joined on
    /// a live connection. Leaving a room that is not desired does nothing.
    pub fn leave(&mut self, room: &RoomId, connected: bool) -> Option<Frame> {
        let Some(entry) = self.rooms.get_mut(room) else {
            debug!(room = %room, "Leave for unknown room ignored");
            return None;
        };

        entry.holders = entry.holders.saturating_sub(1);
        if entry.holders > 0 {
            debug!(room = %room, holders = entry.holders, "Room holder removed");
            return None;
        }

        let joined = entry.physically_joined;
        self.rooms.remove(room);

        debug!(room = %room, "Room no longer desired");
        (joined && connected).then(|| Frame::leave_room(room))
    }

    /// Marks every desired room as joined on a fresh connection.
    ///
    /// Returns one `join_room` frame per desired room, ordered by room id.
    pub fn on_reconnected(&mut self) -> Vec<Frame> {
        let mut rooms: Vec<&mut RoomSubscription> = self.rooms.values_mut().collect();
        rooms.sort_by(|a, b| a.room.cmp(&b.room));

        rooms
            .into_iter()
            .map(|entry| {
                entry.physically_joined = true;
                Frame::join_room(&entry.room)
            })
            .collect()
    }

    /// Forgets all physical memberships. Desired rooms are kept.
    pub fn on_disconnected(&mut self) {
        for entry in self.rooms.values_mut() {
            entry.physically_joined = false;
        }
    }

    /// Returns the desired rooms, ordered by id.
    #[must_use]
    pub fn desired_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.rooms.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Returns the holder count for `room` (0 if not desired).
    #[inline]
    #[must_use]
    pub fn holders(&self, room: &RoomId) -> u32 {
        self.rooms.get(room).map_or(0, |e| e.holders)
    }

    /// Returns `true` if `room` is physically joined.
    #[inline]
    #[must_use]
    pub fn is_joined(&self, room: &RoomId) -> bool {
        self.rooms.get(room).is_some_and(|e| e.physically_joined)
    }

    /// Returns `true` if `room` is desired.
    #[inline]
    #[must_use]
    pub fn is_desired(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    /// Returns the number of desired rooms.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Returns `true` if no room is desired.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::{JOIN_ROOM, LEAVE_ROOM};

    fn room(id: &str) -> RoomId {
        RoomId::new(id)
    }

    #[test]
    fn test_join_while_connected_sends_once() {
        let mut registry = RoomRegistry::new();

        let frame = registry.join(room("game:42"), true).expect("join frame");
        assert_eq!(frame.event, JOIN_ROOM);
        assert_eq!(frame.room(), Some(room("game:42")));

        assert!(registry.join(room("game:42"), true).is_none());
        assert_eq!(registry.holders(&room("game:42")), 2);
        assert!(registry.is_joined(&room("game:42")));
    }

    #[test]
    fn test_holder_count_saturates() {
        let mut registry = RoomRegistry::new();
        registry.join(room("game:42"), true);
        if let Some(entry) = registry.rooms.get_mut(&room("game:42")) {
            entry.holders = u32::MAX;
        }

        assert!(registry.join(room("game:42"), true).is_none());
        assert_eq!(registry.holders(&room("game:42")), u32::MAX);
        assert!(registry.leave(&room("game:42"), true).is_none());
    }

    #[test]
    fn test_join_while_disconnected_is_deferred() {
        let mut registry = RoomRegistry::new();

        for _ in 0..3 {
            assert!(registry.join(room("team:7"), false).is_none());
        }
        assert!(registry.is_desired(&room("team:7")));
        assert!(!registry.is_joined(&room("team:7")));

        let frames = registry.on_reconnected();
        assert_eq!(frames, vec![Frame::join_room(&room("team:7"))]);
        assert!(registry.is_joined(&room("team:7")));
    }

    #[test]
    fn test_reference_counted_leave() {
        // Two consumers share one room; only the last leave reaches the server.
        let mut registry = RoomRegistry::new();
        assert!(registry.join(room("game:42"), true).is_some());
        assert!(registry.join(room("game:42"), true).is_none());

        assert!(registry.leave(&room("game:42"), true).is_none());
        assert!(registry.is_desired(&room("game:42")));

        let frame = registry.leave(&room("game:42"), true).expect("leave frame");
        assert_eq!(frame.event, LEAVE_ROOM);
        assert!(!registry.is_desired(&room("game:42")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_leave_unknown_room_is_noop() {
        let mut registry = RoomRegistry::new();
        assert!(registry.leave(&room("nowhere"), true).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_leave_while_disconnected_sends_nothing() {
        let mut registry = RoomRegistry::new();
        registry.join(room("court:3"), true);
        registry.on_disconnected();

        assert!(registry.leave(&room("court:3"), false).is_none());
        assert!(!registry.is_desired(&room("court:3")));
        assert!(registry.on_reconnected().is_empty());
    }

    #[test]
    fn test_disconnect_then_reconnect_replays_all() {
        let mut registry = RoomRegistry::new();
        registry.join(room("b"), true);
        registry.join(room("a"), true);

        registry.on_disconnected();
        assert!(!registry.is_joined(&room("a")));
        assert!(!registry.is_joined(&room("b")));
        assert_eq!(registry.desired_rooms(), vec![room("a"), room("b")]);

        let frames = registry.on_reconnected();
        assert_eq!(
            frames,
            vec![Frame::join_room(&room("a")), Frame::join_room(&room("b"))]
        );
    }

    #[test]
    fn test_join_after_disconnect_is_deferred_even_if_held() {
        let mut registry = RoomRegistry::new();
        registry.join(room("chat"), true);
        registry.on_disconnected();

        // Still desired, not joined, and connection is down.
        assert!(registry.join(room("chat"), false).is_none());
        assert_eq!(registry.holders(&room("chat")), 2);
        assert_eq!(registry.on_reconnected().len(), 1);
    }
}
