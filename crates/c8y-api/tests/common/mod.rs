// Shared test doubles: a scripted in-memory transport and a static token provider.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use c8y_api::Error;
use c8y_api::notification2::{
    ChannelSubscription, Connection, Connector, TokenProvider, TokenRequest, build_websocket_uri,
};

// ── Frames ──────────────────────────────────────────────────────────

/// A well-formed notification frame.
pub fn frame(id: &str, action: &str, body: &str) -> String {
    format!("{id}\n/t100/managedobjects/4711\n{action}\n\n{body}")
}

pub fn channel() -> ChannelSubscription {
    ChannelSubscription::new("PumpSubscription")
}

// ── Token provider ──────────────────────────────────────────────────

/// Issues `token-<n>` without any HTTP round-trip.
#[derive(Debug, Clone)]
pub struct StaticTokens {
    base: Url,
    reject: bool,
    issued: Arc<AtomicUsize>,
    unsubscribed: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<TokenRequest>>>,
}

impl Default for StaticTokens {
    fn default() -> Self {
        Self::with_base(Url::parse("http://localhost:8111/").unwrap())
    }
}

impl StaticTokens {
    pub fn with_base(base: Url) -> Self {
        Self {
            base,
            reject: false,
            issued: Arc::new(AtomicUsize::new(0)),
            unsubscribed: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A provider whose every request fails with HTTP 401.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn unsubscribed(&self) -> usize {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TokenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl TokenProvider for StaticTokens {
    async fn issue(&self, request: &TokenRequest) -> Result<SecretString, Error> {
        if self.reject {
            return Err(Error::Authentication {
                message: "invalid or expired credentials (HTTP 401)".into(),
            });
        }
        self.requests.lock().unwrap().push(request.clone());
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SecretString::from(format!("token-{n}")))
    }

    fn consumer_url(&self, token: &SecretString, consumer: Option<&str>) -> Result<Url, Error> {
        build_websocket_uri(&self.base, token, consumer)
    }

    async fn unsubscribe(&self, token: &SecretString) -> Result<(), Error> {
        assert!(token.expose_secret().starts_with("token-"));
        self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Scripted transport ──────────────────────────────────────────────

/// Outcome of one scripted connection attempt. Attempts beyond the
/// script are accepted.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Accept,
    Refuse,
    RejectAuth,
    /// The handshake never completes.
    Hang,
}

enum Inbound {
    Frame(String),
    Undecodable,
    Drop,
}

pub struct MockConnector {
    script: Mutex<VecDeque<Step>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

/// Test-side view of a [`MockConnector`].
pub struct MockControl {
    attempts: Arc<Mutex<Vec<Instant>>>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockConnector {
    pub fn new(script: impl IntoIterator<Item = Step>) -> (Self, MockControl) {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: Arc::clone(&attempts),
            peers: tx,
        };
        (connector, MockControl { attempts, peers: rx })
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, url: &Url) -> Result<MockConnection, Error> {
        assert_eq!(url.path(), "/notification2/consumer/");
        self.attempts.lock().unwrap().push(Instant::now());
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Accept);
        match step {
            Step::Refuse => Err(Error::WebSocketConnect("connection refused".into())),
            Step::RejectAuth => Err(Error::Authentication {
                message: "WebSocket handshake rejected (HTTP 401)".into(),
            }),
            Step::Hang => std::future::pending().await,
            Step::Accept => {
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let unread = Arc::new(AtomicUsize::new(0));
                let closed = Arc::new(AtomicBool::new(false));
                let stalled = Arc::new(AtomicBool::new(false));
                let peer = MockPeer {
                    inbound: inbound_tx,
                    outbound: outbound_rx,
                    unread: Arc::clone(&unread),
                    closed: Arc::clone(&closed),
                    stalled: Arc::clone(&stalled),
                };
                self.peers.send(peer).unwrap();
                Ok(MockConnection {
                    inbound: inbound_rx,
                    outbound: outbound_tx,
                    unread,
                    closed,
                    stalled,
                })
            }
        }
    }
}

impl MockControl {
    /// The next accepted connection.
    pub async fn next_peer(&mut self) -> MockPeer {
        self.peers.recv().await.unwrap()
    }

    pub fn blocking_next_peer(&mut self) -> MockPeer {
        self.peers.blocking_recv().unwrap()
    }

    /// When each connection attempt started.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

pub struct MockConnection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
    unread: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl Connection for MockConnection {
    async fn recv(&mut self) -> Option<Result<String, Error>> {
        match self.inbound.recv().await? {
            Inbound::Frame(frame) => {
                self.unread.fetch_sub(1, Ordering::SeqCst);
                Some(Ok(frame))
            }
            Inbound::Undecodable => Some(Err(Error::Protocol {
                reason: "binary frame is not UTF-8".into(),
            })),
            Inbound::Drop => Some(Err(Error::WebSocketClosed {
                code: 1001,
                reason: "going away".into(),
            })),
        }
    }

    async fn send(&mut self, frame: String) -> Result<(), Error> {
        if self.stalled.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        self.outbound
            .send(frame)
            .map_err(|_| Error::WebSocketConnect("peer gone".into()))
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The server side of one accepted mock connection.
pub struct MockPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<String>,
    unread: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl MockPeer {
    pub fn push(&self, frame: impl Into<String>) {
        self.unread.fetch_add(1, Ordering::SeqCst);
        // The listener may already have moved on; frames to a dead connection are lost.
        let _ = self.inbound.send(Inbound::Frame(frame.into()));
    }

    pub fn push_undecodable(&self) {
        let _ = self.inbound.send(Inbound::Undecodable);
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        let _ = self.inbound.send(Inbound::Drop);
    }

    /// Next frame the listener sent (acks).
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    pub fn blocking_next_outbound(&mut self) -> Option<String> {
        self.outbound.blocking_recv()
    }

    pub fn try_outbound(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Frames pushed but not yet read by the listener.
    pub fn unread(&self) -> usize {
        self.unread.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop reading: every later send from the listener blocks forever.
    pub fn stall_sends(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}
