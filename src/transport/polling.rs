//! HTTP long-polling transport.
//!
//! Fallback for networks where WebSockets cannot be negotiated.
//!
//! # Exchange
//!
//! | Step | Request | Response |
//! |------|---------|----------|
//! | Handshake | `GET {endpoint}/poll` | `{ "sid": "..." }` |
//! | Receive | `GET {endpoint}/poll?sid=...` (held by server) | `[frame, ...]` |
//! | Send | `POST {endpoint}/poll?sid=...` with one frame | any 2xx |
//!
//! A `404` or `410` on the receive request means the server dropped the
//! session and ends the link.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Frame;

use super::{
    CloseReason, OpenRequest, Transport, TransportEvent, TransportHandle, TransportKind,
    TransportLink, endpoint_url,
};

// ============================================================================
// Constants
// ============================================================================

/// Path segment appended to the endpoint.
const POLLING_PATH: &str = "poll";

// ============================================================================
// Types
// ============================================================================

/// Handshake response body.
#[derive(Debug, Deserialize)]
struct Handshake {
    /// Server-assigned session id.
    sid: String,
}

/// Internal commands for the writer task.
enum PollCommand {
    /// POST a frame.
    Send(Frame),
    /// End the session.
    Close,
}

/// How a receive request ended without frames.
enum PollEnd {
    /// Server no longer knows the session.
    Gone(StatusCode),
    /// Request failed.
    Failed(String),
}

// ============================================================================
// LongPollingTransport
// ============================================================================

/// Opens long-polling links.
#[derive(Debug, Clone, Default)]
pub struct LongPollingTransport {
    /// Shared HTTP client.
    client: Client,
}

impl LongPollingTransport {
    /// Creates the transport with a default HTTP client.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the transport with a preconfigured HTTP client.
    #[inline]
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Performs the handshake and starts the poll and writer tasks.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the endpoint cannot be used
    /// - [`Error::Http`] if the handshake request fails
    pub async fn connect(&self, request: &OpenRequest) -> Result<TransportLink> {
        let base = endpoint_url(&request.endpoint, POLLING_PATH, false)?;
        let token = request.auth_token.clone();

        let handshake: Handshake = authorize(self.client.get(base.clone()), token.as_deref())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if handshake.sid.is_empty() {
            return Err(Error::protocol("Polling handshake returned empty sid"));
        }

        let mut session_url = base;
        session_url
            .query_pairs_mut()
            .append_pair("sid", &handshake.sid);

        debug!(sid = %handshake.sid, "Long-polling session established");

        let session = Session {
            client: self.client.clone(),
            url: session_url,
            token,
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(poll_loop(session.clone(), event_tx.clone()));
        tokio::spawn(write_loop(session, command_rx, event_tx, reader));

        Ok(TransportLink::new(
            Arc::new(PollingHandle { command_tx }),
            event_rx,
        ))
    }
}

#[async_trait]
impl Transport for LongPollingTransport {
    async fn open(&self, kind: TransportKind, request: &OpenRequest) -> Result<TransportLink> {
        if kind != TransportKind::LongPolling {
            return Err(Error::config(format!(
                "Long-polling transport cannot open {kind}"
            )));
        }

        self.connect(request).await
    }
}

// ============================================================================
// PollingHandle
// ============================================================================

/// Write side of a long-polling link.
struct PollingHandle {
    /// Channel to the writer task.
    command_tx: mpsc::UnboundedSender<PollCommand>,
}

impl TransportHandle for PollingHandle {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
    }

    fn send(&self, frame: Frame) -> Result<()> {
        self.command_tx
            .send(PollCommand::Send(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn close(&self) {
        let _ = self.command_tx.send(PollCommand::Close);
    }
}

// ============================================================================
// Session Tasks
// ============================================================================

/// Everything a session request needs.
#[derive(Clone)]
struct Session {
    /// HTTP client.
    client: Client,
    /// Poll URL including `sid`.
    url: Url,
    /// Bearer token.
    token: Option<String>,
}

/// Adds the bearer token, if any.
fn authorize(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

/// Issues receive requests back to back until the session ends.
async fn poll_loop(session: Session, event_tx: mpsc::UnboundedSender<TransportEvent>) {
    let reason = loop {
        match poll_once(&session).await {
            Ok(frames) => {
                trace!(count = frames.len(), "Poll returned");
                for frame in frames {
                    if event_tx.send(TransportEvent::Message(frame)).is_err() {
                        return;
                    }
                }
            }
            Err(PollEnd::Gone(status)) => {
                break CloseReason::with_code("Polling session expired", status.as_u16());
            }
            Err(PollEnd::Failed(message)) => {
                let _ = event_tx.send(TransportEvent::Error(message.clone()));
                break CloseReason::new(format!("Poll failed: {message}"));
            }
        }
    };

    debug!(reason = %reason, "Long-polling receive loop terminated");
    let _ = event_tx.send(TransportEvent::Closed(reason));
}

/// One held receive request.
async fn poll_once(session: &Session) -> std::result::Result<Vec<Frame>, PollEnd> {
    let response = authorize(session.client.get(session.url.clone()), session.token.as_deref())
        .send()
        .await
        .map_err(|e| PollEnd::Failed(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Err(PollEnd::Gone(status));
    }
    if !status.is_success() {
        return Err(PollEnd::Failed(format!("Unexpected status {status}")));
    }
    if status == StatusCode::NO_CONTENT {
        return Ok(Vec::new());
    }

    response
        .json::<Vec<Frame>>()
        .await
        .map_err(|e| PollEnd::Failed(format!("Malformed poll body: {e}")))
}

/// POSTs frames in call order until closed.
async fn write_loop(
    session: Session,
    mut command_rx: mpsc::UnboundedReceiver<PollCommand>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    reader: JoinHandle<()>,
) {
    let reason = loop {
        match command_rx.recv().await {
            Some(PollCommand::Send(frame)) => {
                let result = authorize(
                    session.client.post(session.url.clone()),
                    session.token.as_deref(),
                )
                .json(&frame)
                .send()
                .await
                .and_then(|r| r.error_for_status());

                if let Err(e) = result {
                    warn!(event = %frame.event, error = %e, "Polling send failed");
                    break CloseReason::new(format!("Send failed: {e}"));
                }

                trace!(event = %frame.event, "Frame posted");
            }

            Some(PollCommand::Close) | None => {
                break CloseReason::new("Closed by client");
            }
        }
    };

    reader.abort();
    debug!(reason = %reason, "Long-polling session closed");
    let _ = event_tx.send(TransportEvent::Closed(reason));
}

// ============================================================================
// Tests
// ============================================================================
