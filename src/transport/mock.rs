//! Scripted in-memory transport for tests.
//!
//! Each `open` consumes the next scripted [`Outcome`] for its kind (or the
//! kind's default) and records the attempt. Every frame sent through any
//! link is captured, so tests can assert exact send counts.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::Frame;

use super::{
    CloseReason, OpenRequest, Transport, TransportEvent, TransportHandle, TransportKind,
    TransportLink,
};

/// What the next `open` of a kind does.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    /// Opens successfully.
    Open,
    /// Fails immediately with a connection error.
    Fail(&'static str),
    /// Never resolves, so the negotiation timeout fires.
    Hang,
}

#[derive(Default)]
struct MockState {
    scripts: FxHashMap<TransportKind, VecDeque<Outcome>>,
    defaults: FxHashMap<TransportKind, Outcome>,
    opens: Vec<TransportKind>,
    tokens: Vec<Option<String>>,
    sent: Vec<Frame>,
    links: Vec<mpsc::UnboundedSender<TransportEvent>>,
    closed: usize,
}

/// Cloneable handle to the shared mock state.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues outcomes for the next opens of `kind`.
    pub(crate) fn script(&self, kind: TransportKind, outcomes: impl IntoIterator<Item = Outcome>) {
        self.state
            .lock()
            .scripts
            .entry(kind)
            .or_default()
            .extend(outcomes);
    }

    /// Sets what `kind` does once its script runs out. Defaults to `Open`.
    pub(crate) fn set_default(&self, kind: TransportKind, outcome: Outcome) {
        self.state.lock().defaults.insert(kind, outcome);
    }

    pub(crate) fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    pub(crate) fn opens(&self) -> Vec<TransportKind> {
        self.state.lock().opens.clone()
    }

    pub(crate) fn tokens(&self) -> Vec<Option<String>> {
        self.state.lock().tokens.clone()
    }

    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.state.lock().sent.clone()
    }

    /// Frames sent with the given event name.
    pub(crate) fn sent_named(&self, event: &str) -> Vec<Frame> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|f| f.event == event)
            .cloned()
            .collect()
    }

    pub(crate) fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Number of `close()` calls across all links.
    pub(crate) fn closed_count(&self) -> usize {
        self.state.lock().closed
    }

    /// Delivers a frame on the most recent link.
    pub(crate) fn push(&self, frame: Frame) -> bool {
        let state = self.state.lock();
        state
            .links
            .last()
            .is_some_and(|tx| tx.send(TransportEvent::Message(frame)).is_ok())
    }

    /// Reports a non-fatal error on the most recent link.
    pub(crate) fn push_error(&self, message: &str) -> bool {
        let state = self.state.lock();
        state
            .links
            .last()
            .is_some_and(|tx| tx.send(TransportEvent::Error(message.to_string())).is_ok())
    }

    /// Simulates the server dropping the most recent link.
    pub(crate) fn drop_connection(&self, reason: &str) -> bool {
        let state = self.state.lock();
        state
            .links
            .last()
            .is_some_and(|tx| tx.send(TransportEvent::Closed(CloseReason::new(reason))).is_ok())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, kind: TransportKind, request: &OpenRequest) -> Result<TransportLink> {
        let outcome = {
            let mut state = self.state.lock();
            state.opens.push(kind);
            state.tokens.push(request.auth_token.clone());
            let scripted = state.scripts.get_mut(&kind).and_then(VecDeque::pop_front);
            scripted
                .or_else(|| state.defaults.get(&kind).cloned())
                .unwrap_or(Outcome::Open)
        };

        match outcome {
            Outcome::Open => {
                let (event_tx, event_rx) = mpsc::unbounded_channel();
                self.state.lock().links.push(event_tx);
                let handle = MockHandle {
                    kind,
                    state: Arc::clone(&self.state),
                    closed: Mutex::new(false),
                };
                Ok(TransportLink::new(Arc::new(handle), event_rx))
            }
            Outcome::Fail(message) => Err(Error::protocol(message)),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

struct MockHandle {
    kind: TransportKind,
    state: Arc<Mutex<MockState>>,
    closed: Mutex<bool>,
}

impl TransportHandle for MockHandle {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn send(&self, frame: Frame) -> Result<()> {
        if *self.closed.lock() {
            return Err(Error::ConnectionClosed);
        }
        self.state.lock().sent.push(frame);
        Ok(())
    }

    fn close(&self) {
        let mut closed = self.closed.lock();
        if !*closed {
            *closed = true;
            self.state.lock().closed += 1;
        }
    }
}
