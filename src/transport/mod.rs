//! Transport layer.
//!
//! A transport carries [`Frame`]s between this process and the server. The
//! connection manager only sees the narrow [`Transport`] /
//! [`TransportHandle`] contract, so tests swap in a scripted transport and
//! applications can bring their own.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   open(kind, request)   ┌────────────────────┐
//! │ ConnectionManager  │────────────────────────►│ Transport          │
//! │                    │◄────────────────────────│ (WebSocket / Poll) │
//! │  handle.send()     │      TransportLink      │                    │
//! │  events.recv()     │  = handle + event rx    │   I/O task         │
//! └────────────────────┘                         └────────────────────┘
//! ```
//!
//! # Link Lifecycle
//!
//! 1. `Transport::open` resolves once the transport is open
//! 2. Frames flow through `TransportHandle::send` in call order
//! 3. Inbound frames, errors and the final close arrive on the event channel
//! 4. `TransportHandle::close` (or dropping the handle) ends the link
//!
//! Transports never reconnect on their own. Retry policy belongs to the
//! connection manager alone.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | Persistent duplex socket (preferred) |
//! | `polling` | HTTP long-polling (fallback) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Frame;

// ============================================================================
// Submodules
// ============================================================================

/// HTTP long-polling transport.
pub mod polling;

/// WebSocket transport.
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use polling::LongPollingTransport;
pub use websocket::WebSocketTransport;

// ============================================================================
// TransportKind
// ============================================================================

/// Concrete mechanism carrying frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportKind {
    /// Persistent duplex socket.
    WebSocket,
    /// Repeated long-held HTTP requests.
    LongPolling,
}

impl TransportKind {
    /// Returns the lowercase name used in logs and payloads.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::LongPolling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TransportCandidate
// ============================================================================

/// A transport tried during negotiation.
///
/// Lower `priority` values are tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCandidate {
    /// Transport to open.
    pub kind: TransportKind,
    /// Negotiation order.
    pub priority: u8,
}

impl TransportCandidate {
    /// Creates a candidate.
    #[inline]
    #[must_use]
    pub const fn new(kind: TransportKind, priority: u8) -> Self {
        Self { kind, priority }
    }

    /// WebSocket first, long-polling as fallback.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(TransportKind::WebSocket, 0),
            Self::new(TransportKind::LongPolling, 1),
        ]
    }
}

// ============================================================================
// OpenRequest
// ============================================================================

/// Parameters for opening a transport.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Server base address.
    pub endpoint: Url,
    /// Bearer token passed through to the server, if any.
    pub auth_token: Option<String>,
}

// ============================================================================
// CloseReason
// ============================================================================

/// Why a transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Human-readable description.
    pub message: String,
    /// Close code, when the transport has one (e.g. 1006 = abnormal).
    pub code: Option<u16>,
}

impl CloseReason {
    /// Creates a close reason with a message.
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Creates a close reason with a message and close code.
    #[inline]
    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code: {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Notification from an open transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A frame arrived from the server.
    Message(Frame),
    /// A non-fatal error. The link may still be usable.
    Error(String),
    /// The link is gone. Always the last event.
    Closed(CloseReason),
}

// ============================================================================
// TransportHandle
// ============================================================================

/// Write side of an open link.
pub trait TransportHandle: Send + Sync {
    /// Returns the transport kind.
    fn kind(&self) -> TransportKind;

    /// Queues a frame for sending. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the link is gone.
    fn send(&self, frame: Frame) -> Result<()>;

    /// Closes the link. Safe to call more than once.
    fn close(&self);
}

// ============================================================================
// TransportLink
// ============================================================================

/// An open transport: write handle plus inbound event stream.
pub struct TransportLink {
    /// Write side.
    pub handle: Arc<dyn TransportHandle>,
    /// Inbound frames, errors and the final close.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    /// Creates a link.
    #[inline]
    #[must_use]
    pub fn new(
        handle: Arc<dyn TransportHandle>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { handle, events }
    }
}

impl fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLink")
            .field("kind", &self.handle.kind())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Opens links of a given kind.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a link, resolving once it is ready to carry frames.
    ///
    /// The caller bounds this with its own negotiation timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened.
    async fn open(&self, kind: TransportKind, request: &OpenRequest) -> Result<TransportLink>;
}

// ============================================================================
// DefaultTransport
// ============================================================================

/// Routes each kind to the built-in implementation.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransport {
    /// WebSocket implementation.
    websocket: WebSocketTransport,
    /// Long-polling implementation.
    polling: LongPollingTransport,
}

impl DefaultTransport {
    /// Creates the default transport set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn open(&self, kind: TransportKind, request: &OpenRequest) -> Result<TransportLink> {
        match kind {
            TransportKind::WebSocket => self.websocket.open(kind, request).await,
            TransportKind::LongPolling => self.polling.open(kind, request).await,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Returns `endpoint` with `segment` appended to its path and the scheme
/// mapped into the given family (`ws` or `http`).
pub(crate) fn endpoint_url(endpoint: &Url, segment: &str, websocket: bool) -> Result<Url> {
    let scheme = match (endpoint.scheme(), websocket) {
        ("http" | "ws", true) => "ws",
        ("https" | "wss", true) => "wss",
        ("http" | "ws", false) => "http",
        ("https" | "wss", false) => "https",
        (other, _) => {
            return Err(Error::config(format!("Unsupported endpoint scheme: {other}")));
        }
    };

    // `Url::set_scheme` refuses to cross between special schemes that
    // differ in default ports, so rebuild from text instead.
    let rest = &endpoint.as_str()[endpoint.scheme().len()..];
    let mut url = Url::parse(&format!("{scheme}{rest}"))?;

    url.path_segments_mut()
        .map_err(|()| Error::config(format!("Endpoint cannot be a base: {endpoint}")))?
        .pop_if_empty()
        .push(segment);

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TransportKind::WebSocket.to_string(), "websocket");
        assert_eq!(TransportKind::LongPolling.to_string(), "polling");
    }

    #[test]
    fn test_default_candidates_prefer_websocket() {
        let candidates = TransportCandidate::defaults();
        assert_eq!(candidates[0].kind, TransportKind::WebSocket);
        assert!(candidates[0].priority < candidates[1].priority);
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::new("gone").to_string(), "gone");
        assert_eq!(
            CloseReason::with_code("abnormal", 1006).to_string(),
            "abnormal (code: 1006)"
        );
    }

    #[test]
    fn test_endpoint_url_websocket() {
        let ws = endpoint_url(&url("http://localhost:4000"), "ws", true).expect("ws url");
        assert_eq!(ws.as_str(), "ws://localhost:4000/ws");

        let wss = endpoint_url(&url("https://api.example.com/live/"), "ws", true).expect("wss url");
        assert_eq!(wss.as_str(), "wss://api.example.com/live/ws");
    }

    #[test]
    fn test_endpoint_url_polling() {
        let http = endpoint_url(&url("ws://localhost:4000/rt"), "poll", false).expect("http url");
        assert_eq!(http.as_str(), "http://localhost:4000/rt/poll");
    }

    #[test]
    fn test_endpoint_url_rejects_other_schemes() {
        let err = endpoint_url(&url("ftp://localhost"), "ws", true).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
