//! Connection management: handshake, receive loop, and reconnection.

use std::sync::Once;
use std::time::Duration;

use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::protocol::{Frame, decode_frame};
use crate::types::{ClientConfig, ConnectionState, Credential, Error, Notification};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const AGENT_STRING: &str = "ntfy-subscriber-rs/0.1";
/// Upper bound for sending our close frame on stop.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Type aliases for WebSocket split halves
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) type WsRead = futures_util::stream::SplitStream<WsStream>;
pub(crate) type WsWrite = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

// ---------------------------------------------------------------------------
// WebSocket URL and auth header construction
// ---------------------------------------------------------------------------

/// `<scheme>://<server>/<topic>/ws[?since=..&filters..]`
pub(crate) fn build_ws_url(config: &ClientConfig, since: Option<&str>) -> Result<url::Url, Error> {
    let server = config.server.trim().trim_end_matches('/');
    let raw = if server.contains("://") {
        server.to_string()
    } else {
        format!("wss://{server}")
    };
    let mut u = url::Url::parse(&raw)?;
    let scheme = match u.scheme() {
        "wss" | "https" => "wss",
        "ws" | "http" => "ws",
        other => {
            return Err(Error::Config(format!(
                "unsupported scheme {other:?} in server {:?}",
                config.server
            )));
        }
    };
    u.set_scheme(scheme)
        .map_err(|()| Error::Config(format!("cannot use {scheme} for {:?}", config.server)))?;
    u.path_segments_mut()
        .map_err(|()| Error::Config(format!("server {:?} is not a base URL", config.server)))?
        .pop_if_empty()
        .push(&config.topic)
        .push("ws");

    let mut params: Vec<(&str, &str)> = config
        .params
        .iter()
        .flatten()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    params.sort_unstable();
    if since.is_some() || !params.is_empty() {
        let mut q = u.query_pairs_mut();
        if let Some(id) = since {
            q.append_pair("since", id);
        }
        for (k, v) in params {
            q.append_pair(k, v);
        }
    }
    Ok(u)
}

pub(crate) fn authorization_value(credential: &Credential) -> Result<HeaderValue, Error> {
    let raw = match credential {
        Credential::Token(token) => format!("Bearer {}", token.trim()),
        Credential::Basic { username, password } => {
            let pair = format!("{username}:{password}");
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(pair)
            )
        }
    };
    let mut value = HeaderValue::from_str(&raw)
        .map_err(|_| Error::Config("credential contains invalid header characters".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

// ---------------------------------------------------------------------------
// Connect + handshake + subscribe
// ---------------------------------------------------------------------------

/// 401 and 403 on the upgrade mean the credential was refused; every other
/// failure is worth retrying.
fn classify_handshake_error(e: tungstenite::Error) -> Error {
    if let tungstenite::Error::Http(ref resp) = e {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let message = resp
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).trim().to_string())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("rejected").to_string());
            return Error::Auth {
                status: status.as_u16(),
                message,
            };
        }
    }
    e.into()
}

/// rustls needs a process-wide provider before the first `wss://` handshake.
/// An application that installed its own keeps it.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::CryptoProvider::get_default().is_none() {
            let _ = rustls::crypto::ring::default_provider().install_default();
        }
    });
}

async fn connect_and_split(
    config: &ClientConfig,
    since: Option<&str>,
) -> Result<(WsWrite, WsRead), Error> {
    let url = build_ws_url(config, since)?;
    let mut request = url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(header::AUTHORIZATION, authorization_value(&config.credential)?);
    headers.insert(header::USER_AGENT, HeaderValue::from_static(AGENT_STRING));

    install_crypto_provider();
    tracing::debug!(url = %url, "Connecting");
    let (ws, _resp) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(classify_handshake_error)?;
    Ok(ws.split())
}

/// Wait for the `open` event that confirms the subscription.
///
/// A message arriving first also proves the subscription is live; it is
/// returned so the caller can dispatch it.
async fn wait_for_open(ws_read: &mut WsRead, topic: &str) -> Result<Option<Notification>, Error> {
    while let Some(frame) = ws_read.next().await {
        match frame? {
            tungstenite::Message::Text(text) => match decode_frame(text.as_str()) {
                Ok(Frame::Open { topic: opened }) => {
                    if let Some(opened) = opened
                        && !opened.split(',').any(|t| t == topic)
                    {
                        tracing::warn!(expected = topic, opened = %opened, "Server opened unexpected topic");
                    }
                    return Ok(None);
                }
                Ok(Frame::Message(notification)) => return Ok(Some(notification)),
                Ok(other) => {
                    tracing::debug!(frame = ?other, "Ignoring pre-open frame");
                }
                Err(e) => {
                    tracing::warn!("Failed to decode pre-open frame: {e}");
                }
            },
            tungstenite::Message::Close(frame) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .unwrap_or_default();
                return Err(Error::Handshake(format!(
                    "server closed the connection before the open event: {reason}"
                )));
            }
            _ => {}
        }
    }
    Err(Error::Handshake(
        "Connection closed before open event received".to_string(),
    ))
}

pub(crate) struct Session {
    pub ws_write: WsWrite,
    pub ws_read: WsRead,
    /// A message that arrived before the `open` event.
    pub pending: Option<Notification>,
}

pub(crate) async fn connect_and_subscribe(
    config: &ClientConfig,
    since: Option<&str>,
) -> Result<Session, Error> {
    let (ws_write, mut ws_read) = connect_and_split(config, since).await?;
    let pending = wait_for_open(&mut ws_read, &config.topic).await?;
    Ok(Session {
        ws_write,
        ws_read,
        pending,
    })
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Publish a state transition. No-op when the state is unchanged.
pub(crate) fn set_state(tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let prev = tx.send_replace(next);
    if prev != next {
        tracing::info!(from = %prev, to = %next, "Connection state changed");
    }
}

// ---------------------------------------------------------------------------
// Background event loop
// ---------------------------------------------------------------------------

pub(crate) struct EventLoopState {
    pub config: ClientConfig,
    pub state_tx: watch::Sender<ConnectionState>,
    pub queue: mpsc::Sender<Notification>,
    /// ID of the last message queued, used as `since` on reconnect.
    pub last_id: Option<String>,
    pub dropped_messages: u64,
}

enum SessionEnd {
    /// Stop was requested or the dispatch worker is gone.
    Stopped,
    /// The transport failed; reconnect.
    Dropped,
}

/// Drive connect, receive, and reconnect until stopped.
///
/// Returns `Err` only for a rejected credential; every other failure is
/// retried with backoff.
pub(crate) async fn run_event_loop(
    mut p: EventLoopState,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let mut backoff = Backoff::new(&p.config.timing);

    loop {
        set_state(&p.state_tx, ConnectionState::Connecting);
        let since = if p.config.resume {
            p.last_id.clone()
        } else {
            None
        };
        let attempt = tokio::select! {
            result = tokio::time::timeout(
                p.config.timing.connect_timeout,
                connect_and_subscribe(&p.config, since.as_deref()),
            ) => result,
            _ = shutdown.cancelled() => {
                tracing::info!("Stop requested while connecting");
                return Ok(());
            }
        };

        match attempt {
            Ok(Ok(session)) => {
                set_state(&p.state_tx, ConnectionState::Subscribed);
                let subscribed_at = Instant::now();
                match receive(&mut p, session, &shutdown).await {
                    SessionEnd::Stopped => return Ok(()),
                    SessionEnd::Dropped => backoff.on_session_end(subscribed_at.elapsed()),
                }
            }
            Ok(Err(e @ Error::Auth { .. })) => {
                tracing::error!("{e}; not retrying");
                return Err(e);
            }
            Ok(Err(e)) => {
                tracing::warn!(attempt = backoff.attempts() + 1, "Connect attempt failed: {e}");
            }
            Err(_) => {
                tracing::warn!(attempt = backoff.attempts() + 1, "Connect attempt timed out");
            }
        }

        // --- Reconnection ---
        set_state(&p.state_tx, ConnectionState::Reconnecting);
        let delay = backoff.next_delay();
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            attempt = backoff.attempts(),
            "Reconnecting after backoff"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Stop requested during reconnect");
                return Ok(());
            }
        }
    }
}

async fn receive(
    p: &mut EventLoopState,
    session: Session,
    shutdown: &CancellationToken,
) -> SessionEnd {
    let Session {
        mut ws_write,
        mut ws_read,
        pending,
    } = session;

    if let Some(notification) = pending
        && let Some(end) = enqueue(p, notification)
    {
        return end;
    }

    let idle_timeout = p.config.timing.keepalive_interval + p.config.timing.keepalive_margin;

    loop {
        let idle_deadline = Instant::now() + idle_timeout;

        tokio::select! {
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(end) = handle_text(p, text.as_str()) {
                            return end;
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        tracing::info!(
                            reason = ?frame.as_ref().map(|f| f.reason.as_str()),
                            "Server closed the connection"
                        );
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {
                        // Ignore binary, ping, pong frames
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {e}");
                        return SessionEnd::Dropped;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        return SessionEnd::Dropped;
                    }
                }
            }

            _ = tokio::time::sleep_until(idle_deadline) => {
                tracing::warn!(
                    idle_ms = idle_timeout.as_millis() as u64,
                    "Keepalive timeout"
                );
                return SessionEnd::Dropped;
            }

            _ = shutdown.cancelled() => {
                tracing::info!("Close requested");
                let _ = tokio::time::timeout(
                    CLOSE_TIMEOUT,
                    ws_write.send(tungstenite::Message::Close(None)),
                )
                .await;
                return SessionEnd::Stopped;
            }
        }
    }
}

fn handle_text(p: &mut EventLoopState, text: &str) -> Option<SessionEnd> {
    if text.trim().is_empty() {
        tracing::trace!("Ignoring empty frame");
        return None;
    }
    match decode_frame(text) {
        Ok(Frame::Keepalive) => {
            tracing::trace!("Keepalive received");
        }
        Ok(Frame::Message(notification)) => return enqueue(p, notification),
        Ok(Frame::Open { topic }) => {
            tracing::debug!(?topic, "Subscription re-confirmed");
        }
        Ok(Frame::Other { event }) => {
            tracing::debug!(event = %event, "Ignoring event");
        }
        Err(e) => {
            tracing::warn!("Failed to decode frame, skipping: {e}");
        }
    }
    None
}

fn enqueue(p: &mut EventLoopState, notification: Notification) -> Option<SessionEnd> {
    if notification.topic != p.config.topic {
        tracing::warn!(
            record_id = %notification.id,
            topic = %notification.topic,
            "Ignoring message for another topic"
        );
        return None;
    }
    let id = notification.id.clone();

    // try_send keeps the receive loop reading (and answering keepalives)
    // even when handlers fall behind; overflow is dropped and counted.
    // Only queued records advance the resume point.
    match p.queue.try_send(notification) {
        Ok(()) => {
            p.last_id = Some(id);
            None
        }
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            p.dropped_messages += 1;
            tracing::warn!(
                record_id = %dropped.id,
                total_dropped = p.dropped_messages,
                "dispatch queue full, dropping message"
            );
            None
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::warn!("Dispatch worker is gone, stopping");
            Some(SessionEnd::Stopped)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
