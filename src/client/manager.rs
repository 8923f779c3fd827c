//! Connection manager.
//!
//! Owns the single physical connection, negotiates transports, drives
//! reconnection and feeds the event router.
//!
//! # Concurrency
//!
//! | Lock | Protects |
//! |------|----------|
//! | `state` | lifecycle state, generation, backoff, active link, retry task, token, degraded kinds |
//! | `registry` | event router and room registry |
//!
//! Locks are always taken in the order `state` then `registry`, and no lock
//! is held while a handler runs.
//!
//! # Generations
//!
//! Every transition into `Connecting`, `Connected`, `Disconnected` and every
//! unexpected drop bumps a generation counter. Retry timers, reader tasks
//! and in-flight negotiations carry the generation they were started under
//! and do nothing once it has moved on, so a late timer can never revive a
//! connection the caller already shut down.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, NegotiationFailure, Result};
use crate::identifiers::{ConnectionId, HandlerToken, RoomId};
use crate::protocol::{Frame, InboundEvent, PseudoEvent, is_reserved};
use crate::rooms::RoomRegistry;
use crate::router::{EventRouter, HandlerResult, run_handlers};
use crate::transport::{
    CloseReason, OpenRequest, Transport, TransportEvent, TransportHandle, TransportKind,
    TransportLink,
};

use super::backoff::ReconnectPolicy;
use super::config::ClientConfig;
use super::state::ConnectionState;

// ============================================================================
// Constants
// ============================================================================

/// Reason reported when the caller disconnects.
const CLIENT_DISCONNECT_REASON: &str = "Client disconnect";

// ============================================================================
// Types
// ============================================================================

/// The open physical connection.
struct ActiveConnection {
    /// Log correlation id.
    id: ConnectionId,
    /// Transport that carries it.
    kind: TransportKind,
    /// Write side.
    handle: Arc<dyn TransportHandle>,
    /// Task reading the event stream. `None` until `connected` is dispatched.
    reader: Option<JoinHandle<()>>,
}

impl ActiveConnection {
    /// Closes the link and stops its reader.
    fn close(self) {
        self.handle.close();
        if let Some(reader) = self.reader {
            reader.abort();
        }
        debug!(connection_id = %self.id, transport = %self.kind, "Connection closed");
    }
}

/// Everything behind the `state` lock.
struct ManagerState {
    state: ConnectionState,
    generation: u64,
    policy: ReconnectPolicy,
    active: Option<ActiveConnection>,
    retry_task: Option<JoinHandle<()>>,
    /// Reused for automatic reconnects.
    auth_token: Option<String>,
    /// Kinds skipped until the next `disconnect()`.
    degraded: FxHashSet<TransportKind>,
}

/// Everything behind the `registry` lock.
#[derive(Default)]
struct Registry {
    router: EventRouter,
    rooms: RoomRegistry,
}

/// A transport that won negotiation.
struct Negotiated {
    kind: TransportKind,
    link: TransportLink,
    /// Higher-priority kinds that failed first.
    failed: Vec<TransportKind>,
}

/// Shared manager internals.
struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<ManagerState>,
    registry: Mutex<Registry>,
    /// Last assigned arrival order.
    arrival: AtomicU64,
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Manages one logical connection to the server.
///
/// Cheap to clone; clones share the same connection, handlers and rooms.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.config.endpoint().as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager that opens links through `transport`.
    ///
    /// Nothing is opened until [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let policy = ReconnectPolicy::from_config(&config);

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                state: Mutex::new(ManagerState {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    policy,
                    active: None,
                    retry_task: None,
                    auth_token: None,
                    degraded: FxHashSet::default(),
                }),
                registry: Mutex::new(Registry::default()),
                arrival: AtomicU64::new(0),
            }),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Establishes the connection.
    ///
    /// Cancels any pending automatic retry and tries each transport
    /// candidate in priority order, each bounded by the negotiation
    /// timeout. On success desired rooms are rejoined and `connected` is
    /// dispatched. The token is kept for automatic reconnects.
    ///
    /// Returns `Ok(())` at once if already connected.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnecting`] if another `connect` is in flight
    /// - [`Error::TransportNegotiation`] if every candidate failed; the
    ///   state becomes `Failed`
    /// - [`Error::Cancelled`] if [`disconnect`](Self::disconnect) ran
    ///   before negotiation finished, or from a `connected` handler
    pub async fn connect(&self, auth_token: Option<String>) -> Result<()> {
        let (generation, request) = {
            let mut st = self.inner.state.lock();

            match st.state {
                ConnectionState::Connecting => return Err(Error::AlreadyConnecting),
                ConnectionState::Connected => return Ok(()),
                _ => {}
            }

            if let Some(task) = st.retry_task.take() {
                task.abort();
            }

            st.generation += 1;
            st.state = ConnectionState::Connecting;
            st.auth_token = auth_token;

            (st.generation, self.inner.open_request(&st))
        };

        info!(endpoint = %request.endpoint, generation, "Connecting");

        match self.inner.negotiate(&request).await {
            Ok(negotiated) => {
                if self.inner.install(generation, negotiated) {
                    Ok(())
                } else {
                    Err(Error::Cancelled)
                }
            }
            Err(failures) => {
                {
                    let mut st = self.inner.state.lock();
                    if st.generation != generation {
                        return Err(Error::Cancelled);
                    }
                    st.state = ConnectionState::Failed;
                }

                let err = Error::transport_negotiation(failures);
                error!(error = %err, "Connect failed");
                Err(err)
            }
        }
    }

    /// Closes the connection and stops any reconnection.
    ///
    /// Clears the attempt counter and transport degradation. Always safe
    /// to call. Dispatches `disconnected` only if a connection was up or a
    /// reconnect was pending.
    pub fn disconnect(&self) {
        let was_live = {
            let mut st = self.inner.state.lock();

            let was_live = matches!(
                st.state,
                ConnectionState::Connected | ConnectionState::Reconnecting
            );

            st.generation += 1;
            st.state = ConnectionState::Disconnected;
            st.policy.reset();
            st.degraded.clear();

            if let Some(task) = st.retry_task.take() {
                task.abort();
            }
            if let Some(active) = st.active.take() {
                active.close();
            }

            self.inner.registry.lock().rooms.on_disconnected();
            was_live
        };

        info!("Disconnected by client");

        if was_live {
            self.inner.dispatch_pseudo(&PseudoEvent::Disconnected {
                reason: CLIENT_DISCONNECT_REASON.to_string(),
            });
        }
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Sends an event to the server.
    ///
    /// Returns `true` if the frame was handed to the transport. While not
    /// connected the event is dropped and `false` returned; nothing is
    /// queued. Reserved event names are refused.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        if is_reserved(event) {
            warn!(event, "Refusing to emit reserved event");
            return false;
        }

        let st = self.inner.state.lock();
        let Some(active) = st.active.as_ref().filter(|_| st.state.is_connected()) else {
            debug!(event, state = %st.state, "Dropping event while not connected");
            return false;
        };

        match active.handle.send(Frame::new(event, payload)) {
            Ok(()) => {
                trace!(event, connection_id = %active.id, "Event emitted");
                true
            }
            Err(e) => {
                debug!(event, error = %e, "Transport refused event");
                false
            }
        }
    }

    /// Registers a handler for `event` (server event or pseudo-event).
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> HandlerToken
    where
        F: Fn(&InboundEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.registry.lock().router.subscribe(event, handler)
    }

    /// Removes the handler registered under `token`.
    ///
    /// Returns `false` if it was already removed.
    pub fn off(&self, token: HandlerToken) -> bool {
        self.inner.registry.lock().router.unsubscribe(token)
    }

    // ========================================================================
    // Rooms
    // ========================================================================

    /// Adds a holder for `room`, joining it now if connected and not
    /// already joined. While disconnected the join waits for the next
    /// connection.
    pub fn join_room(&self, room: impl Into<RoomId>) {
        let room = room.into();
        let st = self.inner.state.lock();
        let active = st.active.as_ref().filter(|_| st.state.is_connected());

        let frame = self
            .inner
            .registry
            .lock()
            .rooms
            .join(room, active.is_some());

        if let (Some(frame), Some(active)) = (frame, active) {
            send_control(active, frame);
        }
    }

    /// Removes a holder for `room`. The server is told only when the last
    /// holder leaves.
    pub fn leave_room(&self, room: impl Into<RoomId>) {
        let room = room.into();
        let st = self.inner.state.lock();
        let active = st.active.as_ref().filter(|_| st.state.is_connected());

        let frame = self
            .inner
            .registry
            .lock()
            .rooms
            .leave(&room, active.is_some());

        if let (Some(frame), Some(active)) = (frame, active) {
            send_control(active, frame);
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    /// Returns `true` if events flow.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns the number of reconnect attempts since the last success.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.state.lock().policy.attempt()
    }

    /// Returns the transport of the open connection.
    #[must_use]
    pub fn active_transport(&self) -> Option<TransportKind> {
        self.inner.state.lock().active.as_ref().map(|a| a.kind)
    }

    /// Returns the id of the open connection.
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.inner.state.lock().active.as_ref().map(|a| a.id)
    }

    /// Returns the transports skipped until the next `disconnect()`.
    #[must_use]
    pub fn degraded_transports(&self) -> Vec<TransportKind> {
        let mut kinds: Vec<_> = self.inner.state.lock().degraded.iter().copied().collect();
        kinds.sort();
        kinds
    }

    /// Returns the desired rooms, ordered by id.
    #[must_use]
    pub fn desired_rooms(&self) -> Vec<RoomId> {
        self.inner.registry.lock().rooms.desired_rooms()
    }

    /// Returns the number of handlers registered for `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.inner.registry.lock().router.handler_count(event)
    }
}

/// Sends a room control frame on the active link.
fn send_control(active: &ActiveConnection, frame: Frame) {
    let event = frame.event.clone();
    if let Err(e) = active.handle.send(frame) {
        warn!(event = %event, connection_id = %active.id, error = %e, "Failed to send control frame");
    }
}

// ============================================================================
// Inner: Negotiation
// ============================================================================

impl Inner {
    /// Builds the open request from the remembered token.
    fn open_request(&self, st: &ManagerState) -> OpenRequest {
        OpenRequest {
            endpoint: self.config.endpoint().clone(),
            auth_token: st.auth_token.clone(),
        }
    }

    /// Tries the non-degraded candidates in priority order.
    async fn negotiate(
        &self,
        request: &OpenRequest,
    ) -> std::result::Result<Negotiated, Vec<NegotiationFailure>> {
        let candidates: Vec<TransportKind> = {
            let st = self.state.lock();
            let usable: Vec<_> = self
                .config
                .transports()
                .iter()
                .map(|c| c.kind)
                .filter(|kind| !st.degraded.contains(kind))
                .collect();

            if usable.is_empty() {
                self.config.transports().iter().map(|c| c.kind).collect()
            } else {
                usable
            }
        };

        let limit = self.config.negotiation_timeout();
        let mut failures = Vec::new();

        for kind in candidates {
            debug!(transport = %kind, "Trying transport");

            match timeout(limit, self.transport.open(kind, request)).await {
                Ok(Ok(link)) => {
                    let failed = failures.iter().map(|f: &NegotiationFailure| f.kind).collect();
                    return Ok(Negotiated { kind, link, failed });
                }
                Ok(Err(e)) => {
                    warn!(transport = %kind, error = %e, "Transport failed to open");
                    failures.push(NegotiationFailure {
                        kind,
                        message: e.to_string(),
                        timed_out: false,
                    });
                }
                Err(_) => {
                    let err = Error::connection_timeout(limit.as_millis() as u64);
                    warn!(transport = %kind, error = %err, "Transport timed out");
                    failures.push(NegotiationFailure {
                        kind,
                        message: err.to_string(),
                        timed_out: true,
                    });
                }
            }
        }

        Err(failures)
    }

    /// Makes a negotiated link the active connection.
    ///
    /// Returns `false` and closes the link if `expected` is no longer the
    /// current generation. Also returns `false` if a `connected` handler
    /// moved the manager on before the reader started.
    fn install(self: &Arc<Self>, expected: u64, negotiated: Negotiated) -> bool {
        let Negotiated { kind, link, failed } = negotiated;
        let TransportLink { handle, events } = link;
        let connection_id = ConnectionId::generate();

        let generation = {
            let mut st = self.state.lock();

            if st.generation != expected {
                drop(st);
                handle.close();
                debug!(transport = %kind, "Discarding link from superseded negotiation");
                return false;
            }

            if let Some(previous) = st.active.take() {
                previous.close();
            }

            st.generation += 1;
            st.state = ConnectionState::Connected;
            st.policy.reset();
            st.retry_task = None;

            for degraded in failed {
                if st.degraded.insert(degraded) {
                    warn!(transport = %degraded, fallback = %kind, "Transport degraded for this session");
                }
            }

            let replay = self.registry.lock().rooms.on_reconnected();
            if !replay.is_empty() {
                debug!(count = replay.len(), %connection_id, "Replaying room joins");
            }
            for frame in replay {
                if let Err(e) = handle.send(frame) {
                    warn!(%connection_id, error = %e, "Failed to replay room join");
                }
            }

            st.active = Some(ActiveConnection {
                id: connection_id,
                kind,
                handle,
                reader: None,
            });

            st.generation
        };

        info!(%connection_id, transport = %kind, generation, "Connected");

        self.dispatch_pseudo(&PseudoEvent::Connected {
            transport: kind,
            connection_id,
        });

        // A `connected` handler may already have disconnected.
        let mut st = self.state.lock();
        if st.generation == generation
            && let Some(active) = st.active.as_mut()
        {
            active.reader = Some(tokio::spawn(read_loop(
                Arc::downgrade(self),
                generation,
                events,
            )));
            return true;
        }

        debug!(%connection_id, "Connection superseded during connected dispatch");
        false
    }
}

// ============================================================================
// Inner: Steady State
// ============================================================================

impl Inner {
    /// Dispatches a server frame if it belongs to the live connection.
    fn deliver(&self, generation: u64, frame: Frame) {
        {
            let st = self.state.lock();
            if st.generation != generation || !st.state.is_connected() {
                trace!(event = %frame.event, "Dropping frame from stale connection");
                return;
            }
        }

        let event = InboundEvent::from_frame(frame, self.next_order());
        let handlers = self.registry.lock().router.handlers_for(&event.name);
        run_handlers(&event, &handlers);
    }

    /// Dispatches a synthesized connectivity event.
    ///
    /// Must be called without the `state` lock.
    fn dispatch_pseudo(&self, pseudo: &PseudoEvent) {
        let event = InboundEvent::from_pseudo(pseudo, self.next_order());
        let handlers = self.registry.lock().router.handlers_for(&event.name);
        run_handlers(&event, &handlers);
    }

    /// Allocates the next arrival order.
    fn next_order(&self) -> u64 {
        self.arrival.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reacts to the live connection closing without the caller asking.
    fn handle_unexpected_close(self: &Arc<Self>, generation: u64, reason: CloseReason) {
        let (reconnect, generation) = {
            let mut st = self.state.lock();

            if st.generation != generation {
                trace!(reason = %reason, "Ignoring close of stale connection");
                return;
            }

            st.generation += 1;
            if let Some(active) = st.active.take() {
                // Called from this connection's reader; closing the handle
                // is enough.
                active.handle.close();
            }

            self.registry.lock().rooms.on_disconnected();

            let reconnect = self.config.reconnection();
            st.state = if reconnect {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            };

            (reconnect, st.generation)
        };

        let err = Error::unexpected_disconnect(reason.to_string());
        warn!(error = %err, reconnect, "Connection lost");

        self.dispatch_pseudo(&PseudoEvent::Disconnected {
            reason: reason.to_string(),
        });

        if reconnect {
            self.schedule_next_attempt(generation);
        }
    }

    /// Schedules the next reconnect attempt, or gives up.
    fn schedule_next_attempt(self: &Arc<Self>, generation: u64) {
        let (attempt, delay) = {
            let mut st = self.state.lock();
            if st.generation != generation {
                trace!("Skipping reconnect scheduling for stale generation");
                return;
            }

            let Some(attempt) = st.policy.next_attempt() else {
                let attempts = st.policy.attempt();
                st.state = ConnectionState::Failed;
                st.retry_task = None;
                drop(st);

                let err = Error::reconnect_exhausted(attempts);
                error!(error = %err, "Giving up on reconnection");
                self.dispatch_pseudo(&PseudoEvent::ReconnectFailed { attempts });
                return;
            };

            let delay = st.policy.delay_for(attempt);
            let weak = Arc::downgrade(self);

            st.retry_task = Some(tokio::spawn(async move {
                sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    inner.run_attempt(generation, attempt).await;
                }
            }));

            (attempt, delay)
        };

        let delay_ms = delay.as_millis() as u64;
        info!(attempt, delay_ms, "Reconnect scheduled");

        self.dispatch_pseudo(&PseudoEvent::Reconnecting { attempt, delay_ms });
    }

    /// Runs one reconnect attempt when its timer fires.
    async fn run_attempt(self: Arc<Self>, generation: u64, attempt: u32) {
        let request = {
            let st = self.state.lock();
            if st.generation != generation || st.state != ConnectionState::Reconnecting {
                debug!(attempt, "Ignoring stale reconnect timer");
                return;
            }
            self.open_request(&st)
        };

        info!(attempt, "Reconnect attempt");

        match self.negotiate(&request).await {
            Ok(negotiated) => {
                self.install(generation, negotiated);
            }
            Err(failures) => {
                let err = Error::transport_negotiation(failures);
                warn!(attempt, error = %err, "Reconnect attempt failed");
                self.schedule_next_attempt(generation);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if let Some(task) = st.retry_task.take() {
            task.abort();
        }
        if let Some(active) = st.active.take() {
            active.close();
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Forwards one connection's transport events until it closes.
///
/// Holds only a weak reference so a dropped manager ends the loop.
async fn read_loop(
    weak: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };

        match event {
            TransportEvent::Message(frame) => inner.deliver(generation, frame),
            TransportEvent::Error(message) => {
                warn!(generation, error = %message, "Transport error");
            }
            TransportEvent::Closed(reason) => {
                inner.handle_unexpected_close(generation, reason);
                return;
            }
        }
    }

    if let Some(inner) = weak.upgrade() {
        inner.handle_unexpected_close(generation, CloseReason::new("Transport event stream ended"));
    }
}

// ============================================================================
// Tests
// ============================================================================
