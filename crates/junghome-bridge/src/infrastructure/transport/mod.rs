//! WebSocket transport to the gateway.
//!
//! [`WsConnector`] performs the upgrade handshake and then hands the socket
//! to two background tasks:
//!
//! ```text
//!                   ┌──────────── writer task ────────────┐
//!  Connection.outbound ──► Message::Text ──► WebSocket sink │ + keepalive Ping
//!                   └─────────────────────────────────────┘
//!                   ┌──────────── reader task ────────────┐
//!  Connection.inbound ◄── TransportEvent ◄── WebSocket stream
//!                   └─────────────────────────────────────┘
//! ```
//!
//! Neither task interprets frames.  Decoding, liveness and reconnects are the
//! session actor's job; the tasks only move bytes and report the close.
//!
//! # Authentication
//!
//! The Jung Home gateway expects the bearer token as a `token` header on the
//! upgrade request and answers 401/403 if it is not confirmed.  That answer is
//! mapped to [`TransportError::Unauthorized`] so the session can treat it as
//! a fatal credential error instead of retrying.

pub mod mock;
pub mod tls;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector as TlsConnector};
use tracing::{debug, trace, warn};

use crate::application::ports::{Connection, Connector, TransportError, TransportEvent};
use crate::domain::{Dialect, GatewayConfig};

/// Name of the handshake header that carries the bearer token.
pub const TOKEN_HEADER: &str = "token";

/// Opens WebSocket connections to a Jung Home gateway.
pub struct WsConnector {
    url: String,
    token: String,
    /// Token goes in the handshake header (Jung Home) or in an
    /// `authenticate` frame (logical dialect).
    token_in_header: bool,
    tls: Option<Arc<rustls::ClientConfig>>,
    keepalive: Duration,
}

impl WsConnector {
    /// Builds a connector from the gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if the TLS configuration cannot be
    /// built.
    pub fn new(config: &GatewayConfig) -> Result<Self, TransportError> {
        let tls = if config.tls {
            Some(tls::client_config(config.verify_tls)?)
        } else {
            None
        };
        Ok(Self {
            url: config.ws_url(),
            token: config.token.clone(),
            token_in_header: config.dialect == Dialect::JungHome,
            tls,
            keepalive: config.keepalive_interval,
        })
    }
}

impl std::fmt::Debug for WsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnector")
            .field("url", &self.url)
            .field("token_in_header", &self.token_in_header)
            .field("tls", &self.tls.is_some())
            .field("keepalive", &self.keepalive)
            .finish()
    }
}

/// Maps handshake failures to transport errors.  401/403 are credential
/// problems; every other failure is transient.
fn map_handshake_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                TransportError::Unauthorized { status }
            } else {
                TransportError::Http { status }
            }
        }
        WsError::Tls(e) => TransportError::Tls(e.to_string()),
        other => TransportError::Connect(other.to_string()),
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if self.token_in_header {
            let value = HeaderValue::from_str(&self.token)
                .map_err(|_| TransportError::Connect("token is not a valid header value".to_string()))?;
            request.headers_mut().insert(TOKEN_HEADER, value);
        }

        let connector = self.tls.clone().map(TlsConnector::Rustls);
        let (stream, response) = connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(map_handshake_error)?;
        debug!(url = %self.url, status = %response.status(), "websocket upgraded");

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        // ── Writer task ───────────────────────────────────────────────────────
        let keepalive = self.keepalive;
        tokio::spawn(async move {
            let mut ping = time::interval_at(Instant::now() + keepalive, keepalive);
            loop {
                tokio::select! {
                    text = outbound_rx.recv() => match text {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                warn!(error = %e, "websocket send failed");
                                break;
                            }
                        }
                        None => {
                            // Session dropped: close politely.
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    _ = ping.tick() => {
                        trace!("keepalive ping");
                        if sink.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("websocket writer finished");
        });

        // ── Reader task ───────────────────────────────────────────────────────
        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text.into_bytes()),
                    Ok(Message::Binary(bytes)) => TransportEvent::Frame(bytes),
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => TransportEvent::Alive,
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = inbound_tx.send(TransportEvent::Closed(reason));
                        return;
                    }
                    Ok(Message::Frame(_)) => continue,
                    Err(e) => {
                        let _ = inbound_tx.send(TransportEvent::Closed(Some(e.to_string())));
                        return;
                    }
                };
                if inbound_tx.send(event).is_err() {
                    return;
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed(None));
        });

        Ok(Connection { outbound, inbound })
    }
}
