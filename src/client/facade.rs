//! Public client façade.
//!
//! [`RealtimeClient`] is what application code holds. It wraps the
//! [`ConnectionManager`] with typed payloads and guard objects that undo a
//! subscription or room membership when dropped.
//!
//! # Example
//!
//! ```no_run
//! use realtime_link::{ClientConfig, RealtimeClient};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Score {
//!     home: u32,
//!     away: u32,
//! }
//!
//! # async fn example() -> realtime_link::Result<()> {
//! let config = ClientConfig::builder()
//!     .endpoint("https://api.example.com/live")
//!     .build()?;
//!
//! let client = RealtimeClient::new(config);
//!
//! let _scores = client.subscribe_json("score:update", |score: Score| {
//!     println!("{} - {}", score.home, score.away);
//!     Ok(())
//! });
//! let _game = client.membership("game:42");
//!
//! client.connect(Some("token".to_string())).await?;
//! client.emit("chat:message", &serde_json::json!({ "text": "hello" }));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::Result;
use crate::identifiers::{HandlerToken, RoomId};
use crate::protocol::InboundEvent;
use crate::router::HandlerResult;
use crate::transport::{DefaultTransport, Transport, TransportKind};

use super::config::ClientConfig;
use super::manager::ConnectionManager;
use super::state::ConnectionState;

// ============================================================================
// RealtimeClient
// ============================================================================

/// Application-facing real-time client.
///
/// Construct one in the composition root and clone it into consumers;
/// clones share one connection.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    manager: ConnectionManager,
}

impl RealtimeClient {
    /// Creates a client using the built-in WebSocket and long-polling
    /// transports.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, DefaultTransport::new())
    }

    /// Creates a client using a custom transport.
    #[must_use]
    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self {
            manager: ConnectionManager::new(config, Arc::new(transport)),
        }
    }

    /// Returns the underlying connection manager.
    #[inline]
    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connects, passing `auth_token` through to the server.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::connect`].
    pub async fn connect(&self, auth_token: Option<String>) -> Result<()> {
        self.manager.connect(auth_token).await
    }

    /// Disconnects and stops reconnecting.
    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Returns `true` if events flow.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Returns the transport of the open connection.
    #[must_use]
    pub fn active_transport(&self) -> Option<TransportKind> {
        self.manager.active_transport()
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Serializes `payload` and sends it as `event`.
    ///
    /// Returns `false` if not connected, the name is reserved, or the
    /// payload does not serialize.
    pub fn emit<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> bool {
        match serde_json::to_value(payload) {
            Ok(value) => self.manager.emit(event, value),
            Err(e) => {
                warn!(event, error = %e, "Failed to serialize payload");
                false
            }
        }
    }

    /// Registers a handler and returns its removal token.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> HandlerToken
    where
        F: Fn(&InboundEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.manager.on(event, handler)
    }

    /// Removes a handler by token.
    pub fn off(&self, token: HandlerToken) -> bool {
        self.manager.off(token)
    }

    /// Registers a handler removed when the returned guard drops.
    #[must_use = "dropping the guard removes the handler immediately"]
    pub fn subscribe<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) -> HandlerResult + Send + Sync + 'static,
    {
        Subscription {
            manager: self.manager.clone(),
            token: Some(self.manager.on(event, handler)),
        }
    }

    /// Registers a handler that receives the payload decoded as `T`.
    ///
    /// A payload that does not decode counts as a handler failure and is
    /// logged like one.
    #[must_use = "dropping the guard removes the handler immediately"]
    pub fn subscribe_json<T, F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(event, move |e: &InboundEvent| {
            let value: T = serde_json::from_value(e.payload.clone())?;
            handler(value)
        })
    }

    // ========================================================================
    // Rooms
    // ========================================================================

    /// Joins `room`. See [`ConnectionManager::join_room`].
    pub fn join_room(&self, room: impl Into<RoomId>) {
        self.manager.join_room(room);
    }

    /// Leaves `room`. See [`ConnectionManager::leave_room`].
    pub fn leave_room(&self, room: impl Into<RoomId>) {
        self.manager.leave_room(room);
    }

    /// Joins `room` until the returned guard drops.
    #[must_use = "dropping the guard leaves the room immediately"]
    pub fn membership(&self, room: impl Into<RoomId>) -> RoomMembership {
        let room = room.into();
        self.manager.join_room(room.clone());
        RoomMembership {
            manager: self.manager.clone(),
            room,
        }
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handler registration that ends when dropped.
#[derive(Debug)]
pub struct Subscription {
    manager: ConnectionManager,
    /// `None` once detached.
    token: Option<HandlerToken>,
}

impl Subscription {
    /// Returns the handler token.
    #[inline]
    #[must_use]
    pub fn token(&self) -> Option<HandlerToken> {
        self.token
    }

    /// Keeps the handler registered past the guard's lifetime.
    ///
    /// Returns the token for a later [`RealtimeClient::off`].
    pub fn detach(mut self) -> Option<HandlerToken> {
        self.token.take()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.manager.off(token);
        }
    }
}

// ============================================================================
// RoomMembership
// ============================================================================

/// One holder of a room, released when dropped.
#[derive(Debug)]
pub struct RoomMembership {
    manager: ConnectionManager,
    room: RoomId,
}

impl RoomMembership {
    /// Returns the room.
    #[inline]
    #[must_use]
    pub fn room(&self) -> &RoomId {
        &self.room
    }
}

impl Drop for RoomMembership {
    fn drop(&mut self) {
        self.manager.leave_room(self.room.clone());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use crate::protocol::{Frame, JOIN_ROOM, LEAVE_ROOM};
    use crate::transport::mock::MockTransport;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Score {
        home: u32,
        away: u32,
    }

    fn client(mock: &MockTransport) -> RealtimeClient {
        let config = ClientConfig::builder()
            .endpoint("http://localhost:4000")
            .only_transport(TransportKind::WebSocket)
            .build()
            .expect("valid config");
        RealtimeClient::with_transport(config, mock.clone())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_subscription() {
        let mock = MockTransport::new();
        let client = client(&mock);
        let scores = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&scores);

        let guard = client.subscribe_json("score:update", move |score: Score| {
            sink.lock().push(score);
            Ok(())
        });
        client.connect(None).await.expect("connect");

        mock.push(Frame::new("score:update", json!({ "home": 12, "away": 9 })));
        mock.push(Frame::new("score:update", json!({ "home": "bad" })));
        settle().await;
        assert_eq!(*scores.lock(), vec![Score { home: 12, away: 9 }]);

        drop(guard);
        mock.push(Frame::new("score:update", json!({ "home": 13, "away": 9 })));
        settle().await;
        assert_eq!(scores.lock().len(), 1);
        assert_eq!(client.manager().handler_count("score:update"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_subscription_survives_guard() {
        let mock = MockTransport::new();
        let client = client(&mock);

        let token = client
            .subscribe("notify", |_: &InboundEvent| Ok(()))
            .detach()
            .expect("token");

        assert_eq!(client.manager().handler_count("notify"), 1);
        assert!(client.off(token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_guard_leaves_on_drop() {
        let mock = MockTransport::new();
        let client = client(&mock);
        client.connect(None).await.expect("connect");

        let first = client.membership("game:42");
        let second = client.membership("game:42");
        assert_eq!(first.room(), &RoomId::new("game:42"));
        assert_eq!(mock.sent_named(JOIN_ROOM).len(), 1);

        drop(first);
        assert!(mock.sent_named(LEAVE_ROOM).is_empty());
        drop(second);
        assert_eq!(mock.sent_named(LEAVE_ROOM).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_serializes_payload() {
        let mock = MockTransport::new();
        let client = client(&mock);

        assert!(!client.emit("chat:message", &json!({ "text": "early" })));
        assert_ok!(client.connect(None).await);
        assert!(client.emit("chat:message", &json!({ "text": "hi" })));
        assert!(client.is_connected());
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.active_transport(), Some(TransportKind::WebSocket));

        let sent = mock.sent_named("chat:message");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, json!({ "text": "hi" }));

        client.disconnect();
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_surfaces_to_caller() {
        let mock = MockTransport::new();
        mock.set_default(TransportKind::WebSocket, crate::transport::mock::Outcome::Fail("refused"));
        let client = client(&mock);

        let err = assert_err!(client.connect(None).await);
        assert!(err.is_recoverable());
        assert_eq!(client.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_and_join_without_guards() {
        let mock = MockTransport::new();
        let client = client(&mock);
        let token = client.on("tick", |_: &InboundEvent| Ok(()));
        client.join_room("court:3");
        client.connect(None).await.expect("connect");

        assert_eq!(mock.sent_named(JOIN_ROOM).len(), 1);
        client.leave_room("court:3");
        assert_eq!(mock.sent_named(LEAVE_ROOM).len(), 1);
        assert!(client.off(token));
    }
}
