//! Public entry point: [`Client`].

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::connection::{EventLoopState, run_event_loop, set_state};
use crate::dispatch::Dispatcher;
use crate::registry::Registry;
use crate::types::{ClientConfig, ConnectionState, Error, Notification};

/// A long-lived subscription to one ntfy topic that routes every received
/// notification through a [`Registry`] of handlers.
///
/// `Client` is a cheap handle: clone it to call [`stop`](Client::stop) from
/// another task while [`start`](Client::start) is running.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    registry: Registry,
    state_tx: watch::Sender<ConnectionState>,
    /// Cancellation token of the running session, `None` when idle.
    session: Mutex<Option<CancellationToken>>,
}

impl Client {
    /// Validate `config` and create an idle client with an empty registry.
    ///
    /// Missing or malformed server, topic or credential fail here, before
    /// any connection attempt.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        Self::with_registry(config, Registry::new())
    }

    /// Like [`new`](Client::new), sharing an existing registry.
    pub fn with_registry(config: ClientConfig, registry: Registry) -> Result<Self, Error> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                state_tx,
                session: Mutex::new(None),
            }),
        })
    }

    /// Handlers for this client. Registration is allowed at any time and
    /// applies from the next received notification.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Connect, subscribe, and dispatch notifications until [`stop`] is
    /// called or the server rejects the credential.
    ///
    /// Transient failures (refused connections, dropped sockets, keepalive
    /// timeouts) are retried with exponential backoff and never returned.
    /// Returns `Ok(())` after a graceful stop, [`Error::Auth`] when the
    /// credential is rejected (state becomes [`ConnectionState::Failed`]),
    /// and [`Error::AlreadyRunning`] if this client is already started.
    ///
    /// On stop, records already queued get `drain_timeout` to finish
    /// dispatching; handlers still running after that are left to finish in
    /// the background.
    ///
    /// [`stop`]: Client::stop
    pub async fn start(&self) -> Result<(), Error> {
        let shutdown = self.begin_session()?;
        let guard = SessionGuard { inner: &self.inner };

        let timing = &self.inner.config.timing;
        let (queue_tx, mut queue_rx) =
            mpsc::channel::<Notification>(timing.dispatch_queue_capacity);
        let dispatcher = Dispatcher::new(
            self.inner.registry.clone(),
            timing.handler_timeout,
            timing.max_in_flight_handlers,
        );

        // Single worker: records are dispatched strictly in arrival order.
        let mut worker = tokio::spawn(async move {
            while let Some(record) = queue_rx.recv().await {
                let record_id = record.id.clone();
                let summary = dispatcher.dispatch(record).await;
                tracing::debug!(
                    record_id = %record_id,
                    parsers = summary.parsers_run,
                    parsers_failed = summary.parsers_failed,
                    command = ?summary.command,
                    command_failed = summary.command_failed,
                    "Dispatched notification"
                );
            }
        });

        tracing::info!(
            server = %self.inner.config.server,
            topic = %self.inner.config.topic,
            "Starting client"
        );
        let result = run_event_loop(
            EventLoopState {
                config: self.inner.config.clone(),
                state_tx: self.inner.state_tx.clone(),
                queue: queue_tx,
                last_id: None,
                dropped_messages: 0,
            },
            shutdown,
        )
        .await;

        // The loop owned the only sender, so the worker ends once the queue drains.
        match tokio::time::timeout(timing.drain_timeout, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Dispatch worker failed: {e}"),
            Err(_) => {
                tracing::warn!(
                    drain_ms = timing.drain_timeout.as_millis() as u64,
                    "Dispatch did not drain in time, abandoning queued notifications"
                );
                worker.abort();
            }
        }

        let final_state = match result {
            Err(Error::Auth { .. }) => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        };
        set_state(&self.inner.state_tx, final_state);
        drop(guard);
        result
    }

    /// Request a graceful stop. Idempotent; a no-op when not running.
    ///
    /// Cancels a pending backoff timer or receive wait immediately; `start()`
    /// returns once the queue drains or `drain_timeout` elapses.
    pub fn stop(&self) {
        let session = self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = session.as_ref() {
            tracing::info!("Stop requested");
            token.cancel();
        }
    }

    fn begin_session(&self) -> Result<CancellationToken, Error> {
        let mut session = self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if session.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let token = CancellationToken::new();
        *session = Some(token.clone());
        Ok(token)
    }
}

/// Clears the session slot when `start()` returns or its future is dropped.
struct SessionGuard<'a> {
    inner: &'a Inner,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let token = self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            // Covers a dropped start() future: stop the loop's remaining work
            // and make sure the state does not claim a live connection.
            token.cancel();
            let state = *self.inner.state_tx.borrow();
            if !matches!(
                state,
                ConnectionState::Disconnected | ConnectionState::Failed
            ) {
                set_state(&self.inner.state_tx, ConnectionState::Disconnected);
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("server", &self.inner.config.server)
            .field("topic", &self.inner.config.topic)
            .field("state", &self.state())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new("ws://127.0.0.1:9", "alerts", "tk_abc")
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut c = config();
        c.topic = String::new();
        assert!(matches!(Client::new(c), Err(Error::Config(_))));
    }

    #[test]
    fn new_client_is_idle() {
        let client = Client::new(config()).unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_running());
        // Stopping an idle client is harmless.
        client.stop();
        client.stop();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn with_registry_shares_handlers() {
        let registry = Registry::new();
        let client = Client::with_registry(config(), registry.clone()).unwrap();
        registry.register_command("ping", |_, _| Ok(()));
        assert_eq!(client.registry().command_names(), vec!["ping"]);
    }

    #[tokio::test]
    async fn second_start_is_rejected_and_stop_ends_first() {
        let mut c = config();
        c.timing.backoff_min = std::time::Duration::from_millis(10);
        c.timing.backoff_jitter = false;
        let client = Client::new(c).unwrap();

        let runner = client.clone();
        let handle = tokio::spawn(async move { runner.start().await });
        while !client.is_running() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(client.start().await, Err(Error::AlreadyRunning)));
        client.stop();
        handle.await.unwrap().unwrap();
        assert!(!client.is_running());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
