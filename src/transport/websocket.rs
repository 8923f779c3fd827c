//! WebSocket transport.
//!
//! Opens a client WebSocket to `{endpoint}/ws` and spawns an I/O task that
//! owns both halves of the stream. `https`/`wss` endpoints are dialed over
//! rustls with the ring provider and the webpki root set unless a client
//! config is supplied with [`WebSocketTransport::with_tls_config`].
//!
//! # Event Loop
//!
//! The spawned task handles:
//!
//! - Incoming text frames, parsed into [`Frame`]s
//! - Outgoing frames from [`TransportHandle::send`], written in call order
//! - Ping replies
//! - Close detection, reported once as [`TransportEvent::Closed`]

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::{debug, trace, warn};

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
const WEBSOCKET_PATH: &str = "ws";

/// Process-wide TLS client config, built on first `wss` dial.
static DEFAULT_TLS: OnceLock<Arc<ClientConfig>> = OnceLock::new();

// ============================================================================
// Types
// ============================================================================

/// Client-side WebSocket stream.
type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// SocketCommand
// ============================================================================

/// Internal commands for the event loop.
enum SocketCommand {
    /// Write a frame.
    Send(Frame),
    /// Close the socket.
    Close,
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Opens WebSocket links.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    /// Client config for `wss` dials. `None` uses the shared default.
    tls: Option<Arc<ClientConfig>>,
}

impl WebSocketTransport {
    /// Creates the transport.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the transport with a custom TLS client config, e.g. one
    /// trusting a private CA.
    #[inline]
    #[must_use]
    pub fn with_tls_config(config: Arc<ClientConfig>) -> Self {
        Self { tls: Some(config) }
    }

    /// Opens a WebSocket link.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the endpoint or token cannot be used
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn connect(&self, request: &OpenRequest) -> Result<TransportLink> {
        let url = endpoint_url(&request.endpoint, WEBSOCKET_PATH, true)?;

        let mut ws_request = url.as_str().into_client_request()?;
        if let Some(token) = &request.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::config(format!("Invalid auth token: {e}")))?;
            ws_request.headers_mut().insert(AUTHORIZATION, value);
        }

        let connector = if url.scheme() == "wss" {
            let config = match &self.tls {
                Some(config) => Arc::clone(config),
                None => default_tls_config()?,
            };
            Some(Connector::Rustls(config))
        } else {
            None
        };

        let (ws_stream, _response) =
            connect_async_tls_with_config(ws_request, None, false, connector).await?;

        debug!(url = %url, "WebSocket connection established");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_event_loop(ws_stream, command_rx, event_tx));

        Ok(TransportLink::new(
            Arc::new(WebSocketHandle { command_tx }),
            event_rx,
        ))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, kind: TransportKind, request: &OpenRequest) -> Result<TransportLink> {
        if kind != TransportKind::WebSocket {
            return Err(Error::config(format!(
                "WebSocket transport cannot open {kind}"
            )));
        }

        self.connect(request).await
    }
}

/// Returns the shared rustls config trusting the webpki roots.
fn default_tls_config() -> Result<Arc<ClientConfig>> {
    if let Some(config) = DEFAULT_TLS.get() {
        return Ok(Arc::clone(config));
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::config(format!("TLS setup failed: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(Arc::clone(DEFAULT_TLS.get_or_init(|| Arc::new(config))))
}

// ============================================================================
// WebSocketHandle
// ============================================================================

/// Write side of a WebSocket link.
struct WebSocketHandle {
    /// Channel to the event loop.
    command_tx: mpsc::UnboundedSender<SocketCommand>,
}

impl TransportHandle for WebSocketHandle {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn send(&self, frame: Frame) -> Result<()> {
        self.command_tx
            .send(SocketCommand::Send(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn close(&self) {
        let _ = self.command_tx.send(SocketCommand::Close);
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Owns the socket until either side closes it.
async fn run_event_loop(
    ws_stream: ClientStream,
    mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            // Incoming messages from server
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match Frame::from_json(&text) {
                            Ok(frame) => {
                                if event_tx.send(TransportEvent::Message(frame)).is_err() {
                                    let _ = ws_write.close().await;
                                    break CloseReason::new("Event receiver dropped");
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Dropping malformed frame");
                            }
                        }
                    }

                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws_write.send(Message::Pong(payload)).await;
                    }

                    Some(Ok(Message::Close(frame))) => {
                        debug!("WebSocket closed by remote");
                        break match frame {
                            Some(f) => CloseReason::with_code(f.reason.to_string(), f.code.into()),
                            None => CloseReason::new("Server closed connection"),
                        };
                    }

                    Some(Err(e)) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                        break CloseReason::new(format!("WebSocket error: {e}"));
                    }

                    None => {
                        break CloseReason::new("WebSocket stream ended");
                    }

                    // Ignore Binary, Pong, raw frames
                    _ => {}
                }
            }

            // Commands from the connection manager
            command = command_rx.recv() => {
                match command {
                    Some(SocketCommand::Send(frame)) => {
                        let json = match frame.to_json() {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(event = %frame.event, error = %e, "Failed to serialize frame");
                                continue;
                            }
                        };

                        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                            break CloseReason::new(format!("Send failed: {e}"));
                        }

                        trace!(event = %frame.event, "Frame sent");
                    }

                    Some(SocketCommand::Close) | None => {
                        let _ = ws_write.close().await;
                        break CloseReason::with_code("Closed by client", 1000);
                    }
                }
            }
        }
    };

    debug!(reason = %reason, "WebSocket event loop terminated");
    let _ = event_tx.send(TransportEvent::Closed(reason));
}

// ============================================================================
// Tests
// ============================================================================
