//! Type-safe identifiers.
//!
//! Newtype wrappers keep handler tokens, room names and connection ids
//! from being mixed up.
//!
//! | Type | Wraps | Source |
//! |------|-------|--------|
//! | [`HandlerToken`] | `u64` | Process-wide counter |
//! | [`RoomId`] | `String` | Application (e.g. `"game:42"`) |
//! | [`ConnectionId`] | `Uuid` | Minted per physical connection |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// HandlerToken
// ============================================================================

/// Next token value. Starts at 1 so zero never names a live handler.
static NEXT_HANDLER_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque handle returned when a handler is registered.
///
/// Passing it back to `off` is the only way to remove the handler, so
/// removal never depends on comparing closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerToken(u64);

impl HandlerToken {
    /// Allocates a fresh, never-reused token.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_HANDLER_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw token value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

// ============================================================================
// RoomId
// ============================================================================

/// Name of a logical channel on the shared connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Creates a room id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the room id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Identifies one physical connection for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a random connection id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_tokens_are_unique() {
        let a = HandlerToken::next();
        let b = HandlerToken::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
        assert!(a.as_u64() > 0);
    }

    #[test]
    fn test_room_id_conversions() {
        let from_str: RoomId = "game:42".into();
        let from_string: RoomId = String::from("game:42").into();
        assert_eq!(from_str, from_string);
        assert_eq!(from_str.as_str(), "game:42");
        assert_eq!(from_str.to_string(), "game:42");
    }

    #[test]
    fn test_room_id_serializes_as_string() {
        let json = serde_json::to_string(&RoomId::new("court:7")).expect("serialize");
        assert_eq!(json, "\"court:7\"");
    }

    #[test]
    fn test_connection_ids_differ() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }
}
