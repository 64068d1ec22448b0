//! Dispatch engine: fans one notification out to parsers, then to the
//! matching command.
//!
//! Every handler call runs on tokio's blocking pool so a slow callback (a
//! child process, a desktop notifier) never blocks the runtime. Calls are
//! awaited one at a time, which keeps the order deterministic: all parsers
//! in registration order, then the command. A handler that fails, panics or
//! exceeds the timeout is logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::registry::Registry;
use crate::tokenize::tokenize;
use crate::types::{BoxError, Notification};

/// What happened while dispatching one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub parsers_run: usize,
    pub parsers_failed: usize,
    /// Name of the command that matched, if any.
    pub command: Option<String>,
    pub command_failed: bool,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    handler_timeout: Option<Duration>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// `max_in_flight` bounds concurrently running handler calls, including
    /// ones abandoned after `handler_timeout`. Values below 1 are raised to 1.
    pub fn new(registry: Registry, handler_timeout: Option<Duration>, max_in_flight: usize) -> Self {
        Self {
            registry,
            handler_timeout,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Run all parsers for `record`, then its command if the first word of
    /// the message names one. Handler failures never propagate.
    pub async fn dispatch(&self, record: Notification) -> DispatchSummary {
        let handlers = self.registry.snapshot();
        let record = Arc::new(record);
        let mut summary = DispatchSummary::default();

        for entry in &handlers.parsers {
            let parser = Arc::clone(&entry.parser);
            let rec = Arc::clone(&record);
            let ok = self
                .invoke("parser", &entry.name, &record.id, move || parser.parse(&rec))
                .await;
            summary.parsers_run += 1;
            if !ok {
                summary.parsers_failed += 1;
            }
        }

        let line = tokenize(&record.message);
        let Some(name) = line.name else {
            return summary;
        };
        let Some(command) = handlers.commands.get(&name).cloned() else {
            tracing::trace!(command = %name, record_id = %record.id, "no command registered");
            return summary;
        };

        let rec = Arc::clone(&record);
        let args = line.args;
        let ok = self
            .invoke("command", &name, &record.id, move || command.run(&args, &rec))
            .await;
        summary.command = Some(name);
        summary.command_failed = !ok;
        summary
    }

    /// Run one handler call off the async runtime. Returns `true` on success.
    ///
    /// `handler_timeout` covers waiting for a free slot as well as the call,
    /// so abandoned handlers that still hold every slot cannot stall dispatch.
    async fn invoke<F>(&self, kind: &'static str, name: &str, record_id: &str, call: F) -> bool
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        let deadline = self.handler_timeout.map(|limit| Instant::now() + limit);
        let timeout_ms = self.handler_timeout.map_or(0, |limit| limit.as_millis() as u64);

        let permit = match within(deadline, Arc::clone(&self.permits).acquire_owned()).await {
            Some(Ok(permit)) => permit,
            Some(Err(_)) => return false,
            None => {
                tracing::warn!(
                    handler = kind,
                    name,
                    record_id,
                    timeout_ms,
                    "no handler slot free before timeout, skipping"
                );
                return false;
            }
        };
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            call()
        });

        let Some(outcome) = within(deadline, task).await else {
            tracing::warn!(
                handler = kind,
                name,
                record_id,
                timeout_ms,
                "handler timed out, continuing without it"
            );
            return false;
        };

        match outcome {
            Ok(Ok(())) => {
                tracing::trace!(handler = kind, name, record_id, "handler finished");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(handler = kind, name, record_id, error = %e, "handler failed");
                false
            }
            Err(e) if e.is_panic() => {
                tracing::error!(handler = kind, name, record_id, "handler panicked");
                false
            }
            Err(e) => {
                tracing::warn!(handler = kind, name, record_id, error = %e, "handler task cancelled");
                false
            }
        }
    }
}

/// Await `fut` until `deadline`. `None` means the deadline passed first.
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}
