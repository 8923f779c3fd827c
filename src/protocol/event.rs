//! Inbound event types.
//!
//! Server frames and connectivity pseudo-events reach handlers as the same
//! [`InboundEvent`] type, so consumers never poll connection state.
//!
//! # Pseudo-Events
//!
//! | Name | Payload |
//! |------|---------|
//! | `connected` | `{ "transport": "websocket", "connectionId": "..." }` |
//! | `disconnected` | `{ "reason": "..." }` |
//! | `reconnecting` | `{ "attempt": 2, "delayMs": 2150 }` |
//! | `reconnect_failed` | `{ "attempts": 5 }` |

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};

use crate::identifiers::ConnectionId;
use crate::transport::TransportKind;

use super::Frame;
use super::frame::is_control_event;

// ============================================================================
// Constants
// ============================================================================

/// Emitted after every successful connection or reconnection.
pub const CONNECTED: &str = "connected";

/// Emitted when the connection goes down, for any reason.
pub const DISCONNECTED: &str = "disconnected";

/// Emitted when an automatic reconnect attempt is scheduled.
pub const RECONNECTING: &str = "reconnecting";

/// Emitted when automatic reconnection gives up.
pub const RECONNECT_FAILED: &str = "reconnect_failed";

/// All pseudo-event names.
pub const PSEUDO_EVENTS: [&str; 4] = [CONNECTED, DISCONNECTED, RECONNECTING, RECONNECT_FAILED];

// ============================================================================
// InboundEvent
// ============================================================================

/// An event delivered to handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Event name.
    pub name: String,

    /// Opaque event data.
    pub payload: Value,

    /// Position in the manager-wide delivery sequence.
    pub arrival_order: u64,
}

impl InboundEvent {
    /// Creates an event from a server frame.
    #[inline]
    #[must_use]
    pub fn from_frame(frame: Frame, arrival_order: u64) -> Self {
        Self {
            name: frame.event,
            payload: frame.payload,
            arrival_order,
        }
    }

    /// Creates an event from a pseudo-event.
    #[inline]
    #[must_use]
    pub fn from_pseudo(event: &PseudoEvent, arrival_order: u64) -> Self {
        Self {
            name: event.name().to_string(),
            payload: event.payload(),
            arrival_order,
        }
    }

    /// Returns `true` if this is a connectivity pseudo-event.
    #[inline]
    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        is_pseudo_event(&self.name)
    }

    /// Gets a string from the payload.
    ///
    /// Returns an empty string if the key is missing or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Gets a u64 from the payload.
    ///
    /// Returns 0 if the key is missing or not a number.
    #[inline]
    #[must_use]
    pub fn get_u64(&self, key: &str) -> u64 {
        self.payload
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or_default()
    }
}

// ============================================================================
// PseudoEvent
// ============================================================================

/// Connectivity change synthesized by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoEvent {
    /// A physical connection is up.
    Connected {
        /// Transport that won negotiation.
        transport: TransportKind,
        /// Id of the new physical connection.
        connection_id: ConnectionId,
    },

    /// The physical connection is down.
    Disconnected {
        /// Close reason.
        reason: String,
    },

    /// An automatic reconnect attempt is scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt, jitter included.
        delay_ms: u64,
    },

    /// Automatic reconnection stopped.
    ReconnectFailed {
        /// Consecutive failed attempts.
        attempts: u32,
    },
}

impl PseudoEvent {
    /// Returns the event name handlers subscribe to.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => CONNECTED,
            Self::Disconnected { .. } => DISCONNECTED,
            Self::Reconnecting { .. } => RECONNECTING,
            Self::ReconnectFailed { .. } => RECONNECT_FAILED,
        }
    }

    /// Returns the JSON payload delivered with the event.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Connected {
                transport,
                connection_id,
            } => json!({
                "transport": transport.as_str(),
                "connectionId": connection_id.to_string(),
            }),
            Self::Disconnected { reason } => json!({ "reason": reason }),
            Self::Reconnecting { attempt, delay_ms } => {
                json!({ "attempt": attempt, "delayMs": delay_ms })
            }
            Self::ReconnectFailed { attempts } => json!({ "attempts": attempts }),
        }
    }

    /// Reads a delivered event back into a typed pseudo-event.
    ///
    /// Returns `None` for server events. `Connected` is not recoverable
    /// this way because the connection id is only a string in the payload;
    /// use the payload directly for it.
    #[must_use]
    pub fn parse(event: &InboundEvent) -> Option<Self> {
        match event.name.as_str() {
            DISCONNECTED => Some(Self::Disconnected {
                reason: event.get_string("reason"),
            }),
            RECONNECTING => Some(Self::Reconnecting {
                attempt: event.get_u64("attempt") as u32,
                delay_ms: event.get_u64("delayMs"),
            }),
            RECONNECT_FAILED => Some(Self::ReconnectFailed {
                attempts: event.get_u64("attempts") as u32,
            }),
            _ => None,
        }
    }
}

/// Returns `true` if `name` is a connectivity pseudo-event.
#[inline]
#[must_use]
pub fn is_pseudo_event(name: &str) -> bool {
    PSEUDO_EVENTS.contains(&name)
}

/// Returns `true` if consumers may not emit an event with this name.
#[inline]
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    is_pseudo_event(name) || is_control_event(name)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_frame_keeps_payload() {
        let frame = Frame::new("score:update", json!({ "home": 3 }));
        let event = InboundEvent::from_frame(frame, 7);

        assert_eq!(event.name, "score:update");
        assert_eq!(event.get_u64("home"), 3);
        assert_eq!(event.arrival_order, 7);
        assert!(!event.is_pseudo());
    }

    #[test]
    fn test_pseudo_event_names() {
        let connected = PseudoEvent::Connected {
            transport: TransportKind::WebSocket,
            connection_id: ConnectionId::generate(),
        };
        assert_eq!(connected.name(), "connected");
        assert_eq!(connected.payload()["transport"], "websocket");

        let failed = PseudoEvent::ReconnectFailed { attempts: 3 };
        assert_eq!(failed.name(), "reconnect_failed");
        assert_eq!(failed.payload()["attempts"], 3);
    }

    #[test]
    fn test_pseudo_event_parse_back() {
        let original = PseudoEvent::Reconnecting {
            attempt: 2,
            delay_ms: 2150,
        };
        let event = InboundEvent::from_pseudo(&original, 1);

        assert!(event.is_pseudo());
        assert_eq!(PseudoEvent::parse(&event), Some(original));
    }

    #[test]
    fn test_parse_server_event_is_none() {
        let event = InboundEvent::from_frame(Frame::new("chat:message", Value::Null), 1);
        assert_eq!(PseudoEvent::parse(&event), None);
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("connected"));
        assert!(is_reserved("reconnect_failed"));
        assert!(is_reserved("join_room"));
        assert!(is_reserved("leave_room"));
        assert!(!is_reserved("chat:message"));
    }
}
