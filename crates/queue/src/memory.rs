use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, watch};

use crate::channel::{Channel, Delivery, Transport};
use crate::{QueueError, Result};

#[derive(Debug)]
struct StoredMessage {
    id: u64,
    payload: Vec<u8>,
    attempts: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    /// Delivered but not yet acked, keyed by tag, with the owning connection.
    unacked: HashMap<u64, (u64, StoredMessage)>,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    connections: HashMap<u64, watch::Sender<bool>>,
    unavailable: bool,
    next_message_id: u64,
    next_connection_id: u64,
    connect_attempts: u64,
}

impl BrokerState {
    /// Closes a connection and returns its unacked messages to the front of
    /// their queues, oldest first.
    fn close_connection(&mut self, connection: u64) {
        if let Some(closed) = self.connections.remove(&connection) {
            let _ = closed.send(true);
        }

        for queue in self.queues.values_mut() {
            let mut orphaned: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, (owner, _))| *owner == connection)
                .map(|(tag, _)| *tag)
                .collect();
            orphaned.sort_unstable_by(|a, b| b.cmp(a));

            for tag in orphaned {
                if let Some((_, message)) = queue.unacked.remove(&tag) {
                    queue.ready.push_front(message);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-process at-least-once broker.
///
/// Behaves like a single AMQP node: queues must be declared, unacked
/// messages go back to their queue when the owning connection is lost, and
/// the broker can be taken down and brought back to exercise reconnection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Creates a new, available broker with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the broker down or brings it back.
    ///
    /// Going down closes every open connection and refuses new ones.
    pub async fn set_available(&self, available: bool) {
        let mut state = self.inner.state.lock().await;
        state.unavailable = !available;
        if !available {
            let connections: Vec<u64> = state.connections.keys().copied().collect();
            for connection in connections {
                state.close_connection(connection);
            }
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }

    /// Drops every open connection but keeps accepting new ones.
    pub async fn sever_connections(&self) {
        let mut state = self.inner.state.lock().await;
        let connections: Vec<u64> = state.connections.keys().copied().collect();
        for connection in connections {
            state.close_connection(connection);
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }

    /// Number of messages waiting to be delivered.
    pub async fn ready_count(&self, queue: &str) -> usize {
        let state = self.inner.state.lock().await;
        state.queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Number of messages delivered but not yet acknowledged.
    pub async fn unacked_count(&self, queue: &str) -> usize {
        let state = self.inner.state.lock().await;
        state.queues.get(queue).map_or(0, |q| q.unacked.len())
    }

    /// Returns true if the queue has been declared.
    pub async fn has_queue(&self, queue: &str) -> bool {
        self.inner.state.lock().await.queues.contains_key(queue)
    }

    /// Total number of connection attempts, successful or not.
    pub async fn connect_attempts(&self) -> u64 {
        self.inner.state.lock().await.connect_attempts
    }

    /// Number of currently open connections.
    pub async fn open_connections(&self) -> usize {
        self.inner.state.lock().await.connections.len()
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    fn describe(&self) -> String {
        "in-memory broker".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn Channel>> {
        let mut state = self.inner.state.lock().await;
        state.connect_attempts += 1;

        if state.unavailable {
            return Err(QueueError::Transport(
                "in-memory broker is unavailable".to_string(),
            ));
        }

        state.next_connection_id += 1;
        let connection = state.next_connection_id;
        let (closed_tx, closed_rx) = watch::channel(false);
        state.connections.insert(connection, closed_tx);

        Ok(Arc::new(InMemoryChannel {
            broker: self.inner.clone(),
            connection,
            closed: closed_rx,
        }))
    }
}

/// A channel onto an [`InMemoryBroker`].
struct InMemoryChannel {
    broker: Arc<Inner>,
    connection: u64,
    closed: watch::Receiver<bool>,
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}

impl InMemoryChannel {
    fn ensure_open(&self, state: &BrokerState) -> Result<()> {
        if state.connections.contains_key(&self.connection) {
            Ok(())
        } else {
            Err(QueueError::Closed)
        }
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let mut state = self.broker.state.lock().await;
        self.ensure_open(&state)?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let mut state = self.broker.state.lock().await;
        self.ensure_open(&state)?;

        state.next_message_id += 1;
        let id = state.next_message_id;
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        queue_state.ready.push_back(StoredMessage {
            id,
            payload,
            attempts: 0,
        });
        drop(state);

        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Delivery> {
        loop {
            // Registered before checking so a publish in between is not missed.
            let notified = self.broker.notify.notified();

            {
                let mut state = self.broker.state.lock().await;
                self.ensure_open(&state)?;
                let queue_state = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

                if let Some(mut message) = queue_state.ready.pop_front() {
                    message.attempts += 1;
                    let delivery = Delivery {
                        tag: message.id,
                        queue: queue.to_string(),
                        payload: message.payload.clone(),
                        attempt: message.attempts,
                    };
                    queue_state
                        .unacked
                        .insert(message.id, (self.connection, message));
                    return Ok(delivery);
                }
            }

            tokio::select! {
                () = notified => {}
                () = wait_closed(self.closed.clone()) => return Err(QueueError::Closed),
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.broker.state.lock().await;
        self.ensure_open(&state)?;
        let queue_state = state
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| QueueError::UnknownQueue(delivery.queue.clone()))?;

        match queue_state.unacked.get(&delivery.tag) {
            Some((owner, _)) if *owner == self.connection => {
                queue_state.unacked.remove(&delivery.tag);
                Ok(())
            }
            _ => Err(QueueError::Closed),
        }
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let mut state = self.broker.state.lock().await;
        self.ensure_open(&state)?;
        let queue_state = state
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| QueueError::UnknownQueue(delivery.queue.clone()))?;

        let owned = matches!(
            queue_state.unacked.get(&delivery.tag),
            Some((owner, _)) if *owner == self.connection
        );
        if !owned {
            return Err(QueueError::Closed);
        }

        if let Some((_, message)) = queue_state.unacked.remove(&delivery.tag)
            && requeue
        {
            queue_state.ready.push_front(message);
        }
        drop(state);

        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn closed(&self) {
        wait_closed(self.closed.clone()).await;
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}
