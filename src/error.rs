//! Error types for the realtime link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Only connection establishment and configuration return errors to the
//! caller. Everything that goes wrong on an established connection is
//! reported through pseudo-events and logs instead.
//!
//! ```ignore
//! use realtime_link::{Error, Result};
//!
//! async fn example(client: &RealtimeClient) -> Result<()> {
//!     match client.connect(None).await {
//!         Err(Error::TransportNegotiation { failures }) => { /* show offline banner */ }
//!         other => other?,
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::TransportNegotiation`], [`Error::AlreadyConnecting`], [`Error::Cancelled`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Steady state | [`Error::UnexpectedDisconnect`], [`Error::ReconnectExhausted`], [`Error::Handler`] |
//! | Protocol | [`Error::Protocol`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::transport::TransportKind;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// NegotiationFailure
// ============================================================================

/// Why one transport candidate failed to open during negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationFailure {
    /// Transport that was tried.
    pub kind: TransportKind,
    /// Failure description.
    pub message: String,
    /// Whether the failure was the negotiation timeout elapsing.
    pub timed_out: bool,
}

impl fmt::Display for NegotiationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            write!(f, "{}: timed out ({})", self.kind, self.message)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Joins failures into one line for the error message.
fn join_failures(failures: &[NegotiationFailure]) -> String {
    if failures.is_empty() {
        return "no transport candidates".to_string();
    }

    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// No transport candidate opened during an explicit connect.
    #[error("Transport negotiation failed: {}", join_failures(.failures))]
    TransportNegotiation {
        /// One entry per candidate tried, in order.
        failures: Vec<NegotiationFailure>,
    },

    /// A connect is already in flight.
    #[error("Connection attempt already in progress")]
    AlreadyConnecting,

    /// The connect was superseded by a disconnect before it finished.
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// A transport did not open within the negotiation timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The transport is closed.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Steady-State Errors
    // ========================================================================
    /// An established connection dropped without the caller asking.
    ///
    /// Never returned from a call; drives the reconnection state machine.
    #[error("Unexpected disconnect: {reason}")]
    UnexpectedDisconnect {
        /// Close reason reported by the transport.
        reason: String,
    },

    /// Automatic reconnection gave up.
    ///
    /// Only observable through the `reconnect_failed` pseudo-event.
    #[error("Reconnection gave up after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of consecutive failed attempts.
        attempts: u32,
    },

    /// A consumer handler failed during dispatch.
    #[error("Handler for '{event}' failed: {message}")]
    Handler {
        /// Event being dispatched.
        event: String,
        /// Error or panic message.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected message from the server.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP error from the long-polling transport.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint URL could not be parsed.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport negotiation error.
    #[inline]
    pub fn transport_negotiation(failures: Vec<NegotiationFailure>) -> Self {
        Self::TransportNegotiation { failures }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates an unexpected disconnect error.
    #[inline]
    pub fn unexpected_disconnect(reason: impl Into<String>) -> Self {
        Self::UnexpectedDisconnect {
            reason: reason.into(),
        }
    }

    /// Creates a reconnect exhausted error.
    #[inline]
    pub fn reconnect_exhausted(attempts: u32) -> Self {
        Self::ReconnectExhausted { attempts }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            event: event.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ConnectionTimeout { .. } => true,
            Self::TransportNegotiation { failures } => {
                !failures.is_empty() && failures.iter().all(|f| f.timed_out)
            }
            _ => false,
        }
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::TransportNegotiation { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::UnexpectedDisconnect { .. }
                | Self::ReconnectExhausted { .. }
                | Self::WebSocket(_)
                | Self::Http(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on a later `connect()`.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportNegotiation { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::UnexpectedDisconnect { .. }
                | Self::Cancelled
                | Self::AlreadyConnecting
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("endpoint is required");
        assert_eq!(err.to_string(), "Configuration error: endpoint is required");
    }

    #[test]
    fn test_negotiation_error_lists_failures() {
        let err = Error::transport_negotiation(vec![
            NegotiationFailure {
                kind: TransportKind::WebSocket,
                message: "refused".into(),
                timed_out: false,
            },
            NegotiationFailure {
                kind: TransportKind::LongPolling,
                message: "10000ms".into(),
                timed_out: true,
            },
        ]);

        let text = err.to_string();
        assert!(text.contains("websocket: refused"));
        assert!(text.contains("polling: timed out"));
    }

    #[test]
    fn test_negotiation_error_without_candidates() {
        let err = Error::transport_negotiation(Vec::new());
        assert!(err.to_string().contains("no transport candidates"));
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::connection_timeout(5000);
        let all_timed_out = Error::transport_negotiation(vec![NegotiationFailure {
            kind: TransportKind::WebSocket,
            message: "5000ms".into(),
            timed_out: true,
        }]);
        let other_err = Error::config("test");

        assert!(timeout_err.is_timeout());
        assert!(all_timed_out.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::unexpected_disconnect("reset").is_connection_error());
        assert!(Error::reconnect_exhausted(3).is_connection_error());
        assert!(!Error::handler("score", "boom").is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::transport_negotiation(Vec::new()).is_recoverable());
        assert!(Error::Cancelled.is_recoverable());
        assert!(!Error::reconnect_exhausted(3).is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}
