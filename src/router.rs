//! Event router.
//!
//! Demultiplexes inbound events to the handlers registered for their name.
//!
//! # Isolation
//!
//! Handlers run in registration order. A handler that returns `Err` or
//! panics is logged and skipped; the remaining handlers for the same event
//! still run, and nothing is propagated back into the connection manager.
//!
//! # Locking
//!
//! The connection manager keeps the router behind a mutex. It takes a
//! snapshot with [`EventRouter::handlers_for`], releases the lock, then
//! calls [`run_handlers`]. Handlers may therefore register, unregister,
//! emit or join rooms from inside a callback.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::error::Error as StdError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{error, trace, warn};

use crate::error::Error;
use crate::identifiers::HandlerToken;
use crate::protocol::InboundEvent;

// ============================================================================
// Types
// ============================================================================

/// Value returned by a handler. `Err` is logged, never propagated.
pub type HandlerResult = Result<(), Box<dyn StdError + Send + Sync>>;

/// Event handler callback type.
pub type EventHandler = Arc<dyn Fn(&InboundEvent) -> HandlerResult + Send + Sync>;

/// One registered handler.
struct Registration {
    /// Removal handle.
    token: HandlerToken,
    /// Callback.
    handler: EventHandler,
}

// ============================================================================
// DispatchReport
// ============================================================================

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers called.
    pub invoked: usize,
    /// Handlers that returned `Err` or panicked.
    pub failed: usize,
}

// ============================================================================
// EventRouter
// ============================================================================

/// Handler registry keyed by event name.
#[derive(Default)]
pub struct EventRouter {
    /// Handlers per event, in registration order.
    handlers: FxHashMap<String, Vec<Registration>>,
    /// Event name for each live token.
    tokens: FxHashMap<HandlerToken, String>,
}

impl EventRouter {
    /// Creates an empty router.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `event` and returns its removal token.
    pub fn subscribe<F>(&mut self, event: impl Into<String>, handler: F) -> HandlerToken
    where
        F: Fn(&InboundEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let event = event.into();
        let token = HandlerToken::next();

        self.handlers
            .entry(event.clone())
            .or_default()
            .push(Registration {
                token,
                handler: Arc::new(handler),
            });

        trace!(%token, event = %event, "Handler registered");
        self.tokens.insert(token, event);

        token
    }

    /// Removes the handler registered under `token`.
    ///
    /// Returns `false` if the token is unknown or already removed.
    pub fn unsubscribe(&mut self, token: HandlerToken) -> bool {
        let Some(event) = self.tokens.remove(&token) else {
            return false;
        };

        if let Some(list) = self.handlers.get_mut(&event) {
            list.retain(|r| r.token != token);
            if list.is_empty() {
                self.handlers.remove(&event);
            }
        }

        trace!(%token, event = %event, "Handler removed");
        true
    }

    /// Returns the handlers for `event` in registration order.
    #[must_use]
    pub fn handlers_for(&self, event: &str) -> Vec<EventHandler> {
        self.handlers
            .get(event)
            .map(|list| list.iter().map(|r| Arc::clone(&r.handler)).collect())
            .unwrap_or_default()
    }

    /// Returns the number of handlers registered for `event`.
    #[inline]
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map_or(0, Vec::len)
    }

    /// Returns the total number of registered handlers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no handler is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Dispatches `event` to its handlers.
    ///
    /// For a router shared behind a lock, snapshot with
    /// [`handlers_for`](Self::handlers_for) and call [`run_handlers`]
    /// after releasing the lock instead.
    pub fn dispatch(&self, event: &InboundEvent) -> DispatchReport {
        run_handlers(event, &self.handlers_for(&event.name))
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Calls each handler with `event`, isolating failures.
pub fn run_handlers(event: &InboundEvent, handlers: &[EventHandler]) -> DispatchReport {
    let mut report = DispatchReport::default();

    for handler in handlers {
        report.invoked += 1;

        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                report.failed += 1;
                let err = Error::handler(&event.name, e.to_string());
                warn!(error = %err, order = event.arrival_order, "Handler returned error");
            }
            Err(panic) => {
                report.failed += 1;
                let err = Error::handler(&event.name, panic_message(panic.as_ref()));
                error!(error = %err, order = event.arrival_order, "Handler panicked");
            }
        }
    }

    trace!(
        event = %event.name,
        invoked = report.invoked,
        failed = report.failed,
        "Event dispatched"
    );

    report
}

/// Extracts the message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
