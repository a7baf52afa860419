use thiserror::Error;

/// Error returned by a user-supplied message handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type for the `c8y-api` crate.
///
/// Covers every failure mode across the REST surface (tokens,
/// subscriptions) and the notification channel (WebSocket transport,
/// frame decoding, handler invocation, reconnect budget).
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credentials rejected (bad password, expired token, missing role).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A connection attempt or request did not finish in time.
    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST API ────────────────────────────────────────────────────
    /// Non-success HTTP status from the platform.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the peer or the stream ended.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Notification channel ────────────────────────────────────────
    /// A frame that does not follow the notification wire format.
    #[error("Malformed notification frame: {reason}")]
    Protocol { reason: String },

    /// A message handler reported a failure.
    #[error("Message handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// The reconnect budget was spent without reaching the server.
    #[error("Reconnection limit reached after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    /// `listen`/`start` called on a listener that already ran.
    #[error("Listener cannot start from state {state}")]
    NotIdle { state: String },

    /// The background listener task panicked or was aborted.
    #[error("Listener task aborted: {0}")]
    TaskAborted(String),

    /// Runtime or thread setup failed (blocking listener).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the error is caused by rejected credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if retrying cannot help.
    ///
    /// Authentication failures, malformed URLs and client-side API errors
    /// (4xx other than 408/429) are fatal for the listener's reconnect loop;
    /// every other error is retried within the reconnect budget.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Authentication { .. } | Self::InvalidUrl(_) | Self::NotIdle { .. } => true,
            Self::Api { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }
}
