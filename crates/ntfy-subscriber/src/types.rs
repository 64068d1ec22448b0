//! Public types for the ntfy-subscriber crate.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio_tungstenite::tungstenite;

/// A boxed error type returned by handler callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A notification received on the subscribed topic.
///
/// Built by [`decode`](crate::decode) and handed to every handler by
/// reference; handlers never see a record they could mutate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Server-assigned message ID.
    pub id: String,
    /// Topic the message was published to.
    pub topic: String,
    /// Message body; empty when the server sent none.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Server event time (unix seconds).
    #[serde(rename = "time", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Message priority, 1 (min) to 5 (max).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// URL opened when the notification is clicked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click: Option<String>,
    /// Every field this crate does not model, preserved as received.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Notification {
    /// Server event time as a UTC date-time.
    pub fn datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timestamp
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
    }
}

/// Lifecycle of the connection to the ntfy server.
///
/// Only the connection manager moves between states; observe them with
/// [`Client::watch_state`](crate::Client::watch_state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
    /// The server rejected the credential. Terminal until the next `start()`.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Credential sent in the `Authorization` header of the WebSocket upgrade.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Access token, sent as `Bearer <token>`.
    Token(String),
    /// Username and password, sent as HTTP basic auth.
    Basic { username: String, password: String },
}

impl Credential {
    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Credential::Token(token) => token.trim().is_empty(),
            Credential::Basic { username, .. } => username.trim().is_empty(),
        }
    }
}

// Keep secrets out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Token(_) => f.write_str("Token(***)"),
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Timeouts, backoff and queue sizes. The defaults suit ntfy.sh.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Budget for TCP connect, WebSocket upgrade and the `open` event.
    pub connect_timeout: Duration,
    /// How often the server sends `keepalive` events.
    pub keepalive_interval: Duration,
    /// Extra silence tolerated past `keepalive_interval` before reconnecting.
    pub keepalive_margin: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub backoff_jitter: bool,
    /// A session subscribed at least this long resets the backoff.
    pub stable_after: Duration,
    /// Per-handler time limit. `None` waits for handlers indefinitely.
    pub handler_timeout: Option<Duration>,
    /// Upper bound on handler invocations running at once, including
    /// abandoned ones that outlived `handler_timeout`.
    pub max_in_flight_handlers: usize,
    /// Records buffered between the receive loop and the dispatch worker.
    pub dispatch_queue_capacity: usize,
    /// How long `stop()` lets queued records finish dispatching.
    pub drain_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(45),
            keepalive_margin: Duration::from_secs(15),
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            backoff_jitter: true,
            stable_after: Duration::from_secs(30),
            handler_timeout: Some(Duration::from_secs(30)),
            max_in_flight_handlers: 16,
            dispatch_queue_capacity: 64,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for [`Client::new`](crate::Client::new).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// ntfy server: a bare hostname (`ntfy.sh`, implies `wss`) or a URL
    /// with scheme `ws`, `wss`, `http` or `https`.
    pub server: String,
    /// Topic to subscribe to.
    pub topic: String,
    pub credential: Credential,
    /// Extra query parameters (server-side filters such as `priority` or `tags`).
    pub params: Option<HashMap<String, String>>,
    /// Ask the server to replay messages published since the last one
    /// received when reconnecting.
    pub resume: bool,
    pub timing: TimingConfig,
}

impl ClientConfig {
    /// Create a config with default timing, token auth, and resume enabled.
    pub fn new(server: impl Into<String>, topic: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            topic: topic.into(),
            credential: Credential::Token(token.into()),
            params: None,
            resume: true,
            timing: TimingConfig::default(),
        }
    }

    /// Check the server/topic/credential triple before any connection attempt.
    pub fn validate(&self) -> Result<(), Error> {
        if self.server.trim().is_empty() {
            return Err(Error::Config("server is required".to_string()));
        }
        if self.topic.is_empty() {
            return Err(Error::Config("topic is required".to_string()));
        }
        if self.topic.len() > 64
            || !self
                .topic
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Config(format!(
                "invalid topic {:?}: use 1-64 characters from [A-Za-z0-9_-]",
                self.topic
            )));
        }
        if self.credential.is_empty() {
            return Err(Error::Config("credential is required".to_string()));
        }
        if self.timing.max_in_flight_handlers == 0 || self.timing.dispatch_queue_capacity == 0 {
            return Err(Error::Config(
                "max_in_flight_handlers and dispatch_queue_capacity must be positive".to_string(),
            ));
        }
        // Surfaces scheme and URL errors now rather than on the first connect.
        crate::connection::build_ws_url(self, None)?;
        crate::connection::authorization_value(&self.credential)?;
        Ok(())
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("authentication rejected by server (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("client is already running")]
    AlreadyRunning,

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("shell handler error: {0}")]
    Shell(String),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

/// A frame that could not be turned into a [`Notification`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing or invalid field `{0}`")]
    MissingField(&'static str),

    #[error("`{0}` event is not a message")]
    NotAMessage(String),
}
