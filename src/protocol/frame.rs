//! Wire frame types.
//!
//! Every message in either direction is one JSON text frame.
//!
//! # Format
//!
//! ```json
//! { "event": "score:update", "payload": { "home": 12, "away": 9 } }
//! ```
//!
//! Room membership uses two reserved control events carrying
//! `{ "room": "<id>" }`.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::identifiers::RoomId;

// ============================================================================
// Constants
// ============================================================================

/// Control event asking the server to add this connection to a room.
pub const JOIN_ROOM: &str = "join_room";

/// Control event asking the server to remove this connection from a room.
pub const LEAVE_ROOM: &str = "leave_room";

// ============================================================================
// Frame
// ============================================================================

/// A named event with an opaque payload.
///
/// Payload interpretation belongs to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name.
    pub event: String,

    /// Event data. Missing payloads decode as `null`.
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    /// Creates a frame.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Creates a `join_room` control frame.
    #[inline]
    #[must_use]
    pub fn join_room(room: &RoomId) -> Self {
        Self::new(JOIN_ROOM, json!({ "room": room.as_str() }))
    }

    /// Creates a `leave_room` control frame.
    #[inline]
    #[must_use]
    pub fn leave_room(room: &RoomId) -> Self {
        Self::new(LEAVE_ROOM, json!({ "room": room.as_str() }))
    }

    /// Returns `true` for room control frames.
    #[inline]
    #[must_use]
    pub fn is_control(&self) -> bool {
        is_control_event(&self.event)
    }

    /// Returns the room carried by a control frame.
    #[must_use]
    pub fn room(&self) -> Option<RoomId> {
        if !self.is_control() {
            return None;
        }

        self.payload
            .get("room")
            .and_then(|v| v.as_str())
            .map(RoomId::new)
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload cannot be serialized.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a frame from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the text is not a frame or the
    /// event name is empty.
    pub fn from_json(text: &str) -> Result<Self> {
        let frame: Self = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("Malformed frame: {e}")))?;

        if frame.event.is_empty() {
            return Err(Error::protocol("Frame has empty event name"));
        }

        Ok(frame)
    }
}

/// Returns `true` if `name` is a reserved room control event.
#[inline]
#[must_use]
pub fn is_control_event(name: &str) -> bool {
    name == JOIN_ROOM || name == LEAVE_ROOM
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_parsing() {
        let json_str = r#"{"event": "score:update", "payload": {"home": 12, "away": 9}}"#;

        let frame = Frame::from_json(json_str).expect("parse frame");
        assert_eq!(frame.event, "score:update");
        assert_eq!(frame.payload.get("home").and_then(|v| v.as_u64()), Some(12));
        assert!(!frame.is_control());
    }

    #[test]
    fn test_missing_payload_is_null() {
        let frame = Frame::from_json(r#"{"event": "ping"}"#).expect("parse frame");
        assert_eq!(frame.payload, Value::Null);
    }

    #[test]
    fn test_malformed_frame_rejected() {
        let err = Frame::from_json(r#"{"payload": 1}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));

        let err = Frame::from_json("not json").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_empty_event_rejected() {
        let err = Frame::from_json(r#"{"event": ""}"#).unwrap_err();
        assert!(err.to_string().contains("empty event name"));
    }

    #[test]
    fn test_join_room_frame() {
        let frame = Frame::join_room(&RoomId::new("game:42"));
        let json = frame.to_json().expect("serialize");

        assert!(json.contains(r#""event":"join_room""#));
        assert!(json.contains(r#""room":"game:42""#));
        assert!(frame.is_control());
        assert_eq!(frame.room(), Some(RoomId::new("game:42")));
    }

    #[test]
    fn test_leave_room_frame() {
        let frame = Frame::leave_room(&RoomId::new("chat:lobby"));
        assert_eq!(frame.event, LEAVE_ROOM);
        assert_eq!(frame.room(), Some(RoomId::new("chat:lobby")));
    }

    #[test]
    fn test_room_on_regular_frame_is_none() {
        let frame = Frame::new("chat:message", json!({ "room": "chat:lobby" }));
        assert_eq!(frame.room(), None);
    }
}
