//! Realtime Link - single-connection real-time client.
//!
//! This library keeps one logical connection to a real-time server alive
//! and fans inbound events out to independent consumers (live scores,
//! notifications, chat).
//!
//! # Architecture
//!
//! ```text
//! Transport ──► ConnectionManager ──► RoomRegistry replay ──► EventRouter ──► handlers
//!     ▲                │
//!     └── emit/join ◄──┘
//! ```
//!
//! Key design principles:
//!
//! - One physical connection at a time, WebSocket first with long-polling
//!   fallback
//! - Transports never retry on their own; the manager owns all backoff
//! - The desired room set is replayed after every (re)connection
//! - A failing or panicking handler never affects other handlers
//!
//! # Quick Start
//!
//! ```no_run
//! use realtime_link::{ClientConfig, RealtimeClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfig::builder()
//!         .endpoint("https://api.example.com/live")
//!         .build()?;
//!
//!     let client = RealtimeClient::new(config);
//!
//!     client.on("reconnecting", |event| {
//!         println!("Retry {} in {}ms", event.get_u64("attempt"), event.get_u64("delayMs"));
//!         Ok(())
//!     });
//!     client.join_room("game:42");
//!
//!     client.connect(None).await?;
//!     client.emit("chat:message", &serde_json::json!({ "text": "hi" }));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`RealtimeClient`], [`ConnectionManager`], configuration, backoff |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire frames and pseudo-events |
//! | [`rooms`] | Desired room set and replay |
//! | [`router`] | Handler registry and isolated dispatch |
//! | [`transport`] | Transport trait, WebSocket and long-polling |
//!
//! # Pseudo-events
//!
//! | Event | Payload |
//! |-------|---------|
//! | `connected` | `{ transport, connectionId }` |
//! | `disconnected` | `{ reason }` |
//! | `reconnecting` | `{ attempt, delayMs }` |
//! | `reconnect_failed` | `{ attempts }` |

// ============================================================================
// Modules
// ============================================================================

/// Connection management and the public client.
///
/// Use [`ClientConfig::builder()`] and [`RealtimeClient::new`] to start.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire frame and event types.
pub mod protocol;

/// Room registry.
pub mod rooms;

/// Event router.
pub mod router;

/// Transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    ClientConfig, ClientConfigBuilder, ConnectionManager, ConnectionState, RealtimeClient,
    ReconnectPolicy, RoomMembership, Subscription,
};

// Error types
pub use error::{Error, NegotiationFailure, Result};

// Identifier types
pub use identifiers::{ConnectionId, HandlerToken, RoomId};

// Protocol types
pub use protocol::{Frame, InboundEvent, PseudoEvent};

// Router types
pub use router::{DispatchReport, EventHandler, EventRouter, HandlerResult};

// Transport types
pub use transport::{
    CloseReason, DefaultTransport, LongPollingTransport, OpenRequest, Transport,
    TransportCandidate, TransportEvent, TransportHandle, TransportKind, TransportLink,
    WebSocketTransport,
};
