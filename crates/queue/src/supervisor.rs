//! Ownership of the process-wide broker connection.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, Transport};
use crate::retry::RetryPolicy;
use crate::{QueueError, Result};

/// Lifecycle of the supervised connection.
///
/// ```text
/// Disconnected ──► Connecting ──► Ready
///      ▲               │            │
///      └───────────────┴────────────┘  (failure / loss)
/// ```
#[derive(Clone, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Connected, with every supervised queue declared.
    Ready(Arc<dyn Channel>),
}

impl ConnectionState {
    /// Returns the channel if the state is `Ready` and the channel is open.
    pub fn ready_channel(&self) -> Option<Arc<dyn Channel>> {
        match self {
            ConnectionState::Ready(channel) if channel.is_open() => Some(channel.clone()),
            _ => None,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Ready(_) => "Ready",
        }
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cheap, cloneable view of the supervised connection.
///
/// Producers and consumers hold this instead of a raw channel, so a
/// reconnection is picked up without any of them noticing.
#[derive(Clone)]
pub struct QueueHandle {
    state: watch::Receiver<ConnectionState>,
}

impl QueueHandle {
    /// A handle that never becomes ready. Every publish fails with
    /// `Unavailable`.
    pub fn unavailable() -> Self {
        let (_, state) = watch::channel(ConnectionState::Disconnected);
        Self { state }
    }

    /// Returns a snapshot of the connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Returns true if a ready, open channel exists right now.
    pub fn is_ready(&self) -> bool {
        self.state.borrow().ready_channel().is_some()
    }

    /// Returns the current channel without waiting.
    pub fn current(&self) -> Result<Arc<dyn Channel>> {
        self.state
            .borrow()
            .ready_channel()
            .ok_or(QueueError::Unavailable)
    }

    /// Waits until a ready channel exists.
    ///
    /// Fails with `Unavailable` once the supervisor has gone away.
    pub async fn ready(&self) -> Result<Arc<dyn Channel>> {
        let mut state = self.state.clone();
        loop {
            let ready = state.borrow_and_update().ready_channel();
            if let Some(channel) = ready {
                return Ok(channel);
            }
            state
                .changed()
                .await
                .map_err(|_| QueueError::Unavailable)?;
        }
    }

    /// Serializes and publishes a message, failing fast when not connected.
    #[tracing::instrument(skip(self, message))]
    pub async fn publish<T: Serialize + Sync>(&self, queue: &str, message: &T) -> Result<()> {
        let channel = self.current()?;
        let payload = serde_json::to_vec(message)?;
        channel.publish(queue, payload).await?;
        metrics::counter!("queue_published_total", "queue" => queue.to_string()).increment(1);
        Ok(())
    }
}

/// Establishes and re-establishes the broker connection.
///
/// A single supervising task owns the connection. It retries forever using
/// the [`RetryPolicy`], declares every supervised queue before publishing the
/// channel as `Ready`, and goes back to connecting as soon as the channel is
/// lost. Cancelling the shutdown token ends the task.
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    queues: Vec<String>,
    retry: RetryPolicy,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionSupervisor {
    /// Creates a supervisor for the given transport and queues.
    pub fn new(transport: Arc<dyn Transport>, queues: &[&str], retry: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            queues: queues.iter().map(|q| q.to_string()).collect(),
            retry,
            state,
        }
    }

    /// Returns a handle onto the supervised connection.
    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            state: self.state.subscribe(),
        }
    }

    /// Spawns the supervising task.
    pub fn spawn(self, shutdown: CancellationToken) -> (QueueHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run(shutdown));
        (handle, task)
    }

    /// Runs until the shutdown token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let transport = self.transport.describe();
        tracing::info!(%transport, "queue supervisor started");

        while let Some(channel) = self.establish(&shutdown).await {
            self.state.send_replace(ConnectionState::Ready(channel.clone()));
            tracing::info!(%transport, queues = ?self.queues, "queue connection ready");

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = channel.closed() => {
                    metrics::counter!("queue_reconnects_total").increment(1);
                    tracing::warn!(%transport, "queue connection lost, reconnecting");
                    self.state.send_replace(ConnectionState::Disconnected);
                }
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!(%transport, "queue supervisor stopped");
    }

    /// Connects and declares the queues, retrying until it succeeds or the
    /// token is cancelled.
    async fn establish(&self, shutdown: &CancellationToken) -> Option<Arc<dyn Channel>> {
        let mut failures: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return None;
            }

            self.state.send_replace(ConnectionState::Connecting);
            match self.connect_and_declare().await {
                Ok(channel) => return Some(channel),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.retry.delay(failures);
                    tracing::warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "queue connection failed, retrying"
                    );
                    self.state.send_replace(ConnectionState::Disconnected);

                    tokio::select! {
                        () = shutdown.cancelled() => return None,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_declare(&self) -> Result<Arc<dyn Channel>> {
        let channel = self.transport.connect().await?;
        for queue in &self.queues {
            channel.declare_queue(queue).await?;
        }
        Ok(channel)
    }
}
