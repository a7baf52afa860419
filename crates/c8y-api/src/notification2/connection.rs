//! Connection management for the notification channel.
//!
//! [`Connector`] / [`Connection`] abstract the push transport so the
//! listener's state machine can run over an in-memory channel in tests.
//! [`WsConnector`] is the production implementation on `tokio-tungstenite`.
//! [`ConnectionManager`] combines a token provider with a connector and
//! bounds every attempt by the configured timeout.

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use strum::Display;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::channel::ChannelSubscription;
use super::config::ListenerConfig;
use super::tokens::{TokenProvider, redacted};
use crate::error::Error;

// ── Transport traits ─────────────────────────────────────────────────

/// A live, bidirectional text-frame session.
pub trait Connection: Send + 'static {
    /// Next text frame.
    ///
    /// `None` means the stream ended. `Some(Err(Error::Protocol { .. }))`
    /// reports an undecodable frame without ending the stream; any other
    /// error ends it.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, Error>>> + Send;

    /// Send one text frame.
    fn send(&mut self, frame: String) -> impl Future<Output = Result<(), Error>> + Send;

    /// Close the session (best-effort).
    fn close(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Factory for [`Connection`]s.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(&self, url: &Url) -> impl Future<Output = Result<Self::Connection, Error>> + Send;
}

// ── WebSocket implementation ─────────────────────────────────────────

/// Opens WebSocket connections with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

/// A WebSocket session.
#[derive(Debug)]
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connector for WsConnector {
    type Connection = WsConnection;

    async fn connect(&self, url: &Url) -> Result<WsConnection, Error> {
        info!(url = %redacted(url), "Connecting to notification channel");

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                info!("WebSocket connected");
                Ok(WsConnection { stream })
            }
            Err(tungstenite::Error::Http(response))
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                Err(Error::Authentication {
                    message: format!("WebSocket handshake rejected (HTTP {})", response.status()),
                })
            }
            Err(e) => Err(Error::WebSocketConnect(e.to_string())),
        }
    }
}

impl Connection for WsConnection {
    async fn recv(&mut self) -> Option<Result<String, Error>> {
        loop {
            match self.stream.next().await? {
                Ok(tungstenite::Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(tungstenite::Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                        Error::Protocol {
                            reason: format!("binary frame is not UTF-8: {e}"),
                        }
                    }));
                }
                Ok(tungstenite::Message::Close(frame)) => {
                    let (code, reason) = frame.map_or_else(
                        || (u16::from(CloseCode::Status), String::new()),
                        |cf| (u16::from(cf.code), cf.reason.to_string()),
                    );
                    info!(code, reason = %reason, "WebSocket close frame received");
                    return Some(Err(Error::WebSocketClosed { code, reason }));
                }
                Ok(tungstenite::Message::Ping(_)) => {
                    // tungstenite queues the pong; it goes out with the next write/flush
                    trace!("WebSocket ping");
                }
                Ok(_) => {
                    // Pong, raw Frame -- ignore
                }
                Err(e) => return Some(Err(Error::WebSocketConnect(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, frame: String) -> Result<(), Error> {
        self.stream
            .send(tungstenite::Message::Text(frame.into()))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), Error> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(Error::WebSocketConnect(e.to_string())),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────

/// Lifecycle of one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

/// A connection plus its lifecycle state. Never reused across reconnects.
#[derive(Debug)]
pub(crate) struct Session<C> {
    conn: C,
    state: ConnectionState,
}

impl<C: Connection> Session<C> {
    fn open(conn: C) -> Self {
        Self {
            conn,
            state: ConnectionState::Open,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) async fn recv(&mut self) -> Option<Result<String, Error>> {
        self.conn.recv().await
    }

    pub(crate) async fn send(&mut self, frame: String) -> Result<(), Error> {
        self.conn.send(frame).await.inspect_err(|_| {
            self.state = ConnectionState::Failed;
        })
    }

    /// Graceful close, bounded by `timeout`.
    pub(crate) async fn close(mut self, timeout: Duration) {
        self.state = ConnectionState::Closing;
        match tokio::time::timeout(timeout, self.conn.close()).await {
            Ok(Ok(())) => debug!("connection closed"),
            Ok(Err(e)) => debug!(error = %e, "error while closing connection"),
            Err(_) => warn!("timed out closing connection"),
        }
        self.state = ConnectionState::Closed;
        trace!(state = %self.state, "session finished");
    }

    /// Tear down a session that already failed; the peer is gone.
    pub(crate) async fn abandon(mut self) {
        self.state = ConnectionState::Failed;
        // Only a short courtesy close: the transport is most likely dead.
        let _ = tokio::time::timeout(Duration::from_millis(250), self.conn.close()).await;
        trace!(state = %self.state, "session abandoned");
    }
}

// ── Connection manager ───────────────────────────────────────────────

/// Opens sessions for one channel: token, consumer URL, handshake.
pub(crate) struct ConnectionManager<'a, T, C> {
    tokens: &'a T,
    connector: &'a C,
    channel: &'a ChannelSubscription,
    config: &'a ListenerConfig,
    token: Option<SecretString>,
}

impl<'a, T: TokenProvider, C: Connector> ConnectionManager<'a, T, C> {
    pub(crate) fn new(
        tokens: &'a T,
        connector: &'a C,
        channel: &'a ChannelSubscription,
        config: &'a ListenerConfig,
    ) -> Self {
        Self {
            tokens,
            connector,
            channel,
            config,
            token: None,
        }
    }

    /// One connection attempt, bounded by `connect_timeout`.
    pub(crate) async fn connect(&mut self) -> Result<Session<C::Connection>, Error> {
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.open()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn open(&mut self) -> Result<Session<C::Connection>, Error> {
        trace!(state = %ConnectionState::Connecting, "opening session");
        let request = self.channel.token_request(self.config);
        let token = self.tokens.issue(&request).await?;
        info!(
            subscription = %self.channel.name(),
            subscriber = %self.channel.subscriber(),
            "Notification 2.0 token requested"
        );

        let url = self.tokens.consumer_url(&token, self.channel.consumer())?;
        self.token = Some(token);

        let conn = self.connector.connect(&url).await?;
        Ok(Session::open(conn))
    }

    /// Unsubscribe the subscriber using the most recent token, if any.
    pub(crate) async fn unsubscribe(&self) {
        let Some(ref token) = self.token else {
            debug!("no token issued, nothing to unsubscribe");
            return;
        };
        let subscriber = self.channel.subscriber();
        match tokio::time::timeout(self.config.connect_timeout, self.tokens.unsubscribe(token))
            .await
        {
            Ok(Ok(())) => info!(subscriber, "Subscriber unsubscribed."),
            Ok(Err(e)) => warn!(
                subscriber,
                error = %e,
                "Subscriber could not be unsubscribed (assuming it was already unsubscribed)"
            ),
            Err(_) => warn!(subscriber, "Timed out unsubscribing subscriber"),
        }
    }
}
