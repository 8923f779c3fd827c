//! Connection state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the logical connection.
///
/// ```text
///                 connect()
/// Disconnected ─────────────► Connecting ──ok──► Connected
///      ▲                          │                  │
///      │                          └──all failed──► Failed
///      │ disconnect()                                │ unexpected close
///      │                                             ▼
///      └────────────────────────────────────── Reconnecting ──exhausted──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection and no retry pending.
    #[default]
    Disconnected,
    /// An explicit `connect()` is negotiating a transport.
    Connecting,
    /// A transport is open and events flow.
    Connected,
    /// The connection dropped and a retry is pending or running.
    Reconnecting,
    /// Negotiation or reconnection gave up. Only `connect()` leaves this.
    Failed,
}

impl ConnectionState {
    /// Returns the lowercase state name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` if events flow.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` while a connection is being established.
    #[inline]
    #[must_use]
    pub const fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
