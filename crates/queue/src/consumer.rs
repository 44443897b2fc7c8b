//! Subscriber loop shared by every queue consumer.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, Delivery};
use crate::retry::RetryPolicy;
use crate::supervisor::QueueHandle;

/// Delay before a requeued message goes back to its queue: 250 ms after the
/// first delivery, doubling up to 5 s. Must stay below the Postgres
/// visibility timeout.
pub const DEFAULT_REDELIVERY: RetryPolicy = RetryPolicy::Exponential {
    initial: Duration::from_millis(250),
    max: Duration::from_secs(5),
};

/// What to do with a delivery once the handler is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing finished; remove the message.
    Ack,
    /// Processing did not finish; deliver the message again.
    Requeue,
    /// The message can never be processed; discard it.
    Reject,
}

/// Processes messages from one queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// Drives a [`MessageHandler`] from a supervised queue.
///
/// The loop never ends on a transport error: it drops the lost channel,
/// waits for the supervisor to publish a new one, and resumes. A message
/// whose ack was lost with the channel is redelivered by the broker.
///
/// A [`Disposition::Requeue`] is held for the redelivery delay of its attempt
/// before it is nacked.
pub struct Consumer<H> {
    queue: String,
    handle: QueueHandle,
    handler: H,
    error_backoff: Duration,
    redelivery: RetryPolicy,
}

impl<H: MessageHandler> Consumer<H> {
    /// Creates a consumer for a queue.
    pub fn new(queue: impl Into<String>, handle: QueueHandle, handler: H) -> Self {
        Self {
            queue: queue.into(),
            handle,
            handler,
            error_backoff: Duration::from_secs(1),
            redelivery: DEFAULT_REDELIVERY,
        }
    }

    /// Sets the pause after a receive error on a channel that still looks open.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Sets how long a requeued message waits before it is redelivered.
    pub fn with_redelivery(mut self, redelivery: RetryPolicy) -> Self {
        self.redelivery = redelivery;
        self
    }

    /// Runs until the shutdown token is cancelled or the supervisor is gone.
    #[tracing::instrument(skip_all, fields(queue = %self.queue))]
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("consumer started");

        loop {
            let channel = tokio::select! {
                () = shutdown.cancelled() => break,
                ready = self.handle.ready() => match ready {
                    Ok(channel) => channel,
                    Err(_) => {
                        tracing::warn!("queue supervisor gone, consumer exiting");
                        break;
                    }
                },
            };

            let received = tokio::select! {
                () = shutdown.cancelled() => break,
                received = channel.receive(&self.queue) => received,
            };

            match received {
                Ok(delivery) => self.dispatch(channel.as_ref(), delivery, &shutdown).await,
                Err(e) if e.is_connection_loss() => {
                    tracing::warn!(error = %e, "consumer lost its channel, waiting for reconnect");
                }
                Err(e) => {
                    tracing::error!(error = %e, "receive failed");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("consumer stopped");
    }

    async fn dispatch(
        &self,
        channel: &dyn Channel,
        delivery: Delivery,
        shutdown: &CancellationToken,
    ) {
        let disposition = self.handler.handle(&delivery).await;
        tracing::debug!(
            tag = delivery.tag,
            attempt = delivery.attempt,
            ?disposition,
            "delivery handled"
        );

        let settled = match disposition {
            Disposition::Ack => channel.ack(&delivery).await,
            Disposition::Requeue => {
                // Still unacked while waiting; a lost channel hands it back anyway.
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = tokio::time::sleep(self.redelivery.delay(delivery.attempt)) => {}
                }
                channel.nack(&delivery, true).await
            }
            Disposition::Reject => channel.nack(&delivery, false).await,
        };

        if let Err(e) = settled {
            // The broker still owns the message and will redeliver it.
            tracing::warn!(error = %e, tag = delivery.tag, ?disposition, "failed to settle delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Transport;
    use crate::memory::InMemoryBroker;
    use crate::retry::RetryPolicy;
    use crate::supervisor::ConnectionSupervisor;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    const QUEUE: &str = "jobs";

    /// Records payloads; requeues a payload until it has been seen `fail_times`.
    #[derive(Clone, Default)]
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<(String, u32)>>>,
        fail_times: u32,
        poison: Option<String>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, delivery: &Delivery) -> Disposition {
            let body = String::from_utf8_lossy(&delivery.payload).to_string();
            self.seen.lock().await.push((body.clone(), delivery.attempt));

            if self.poison.as_deref() == Some(body.as_str()) {
                Disposition::Reject
            } else if delivery.attempt <= self.fail_times {
                Disposition::Requeue
            } else {
                Disposition::Ack
            }
        }
    }

    async fn wait_for_seen(handler: &RecordingHandler, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.seen.lock().await.len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler did not see enough deliveries");
    }

    fn start(
        broker: &InMemoryBroker,
        handler: RecordingHandler,
    ) -> (CancellationToken, QueueHandle) {
        start_with_redelivery(broker, handler, RetryPolicy::Fixed(Duration::ZERO))
    }

    fn start_with_redelivery(
        broker: &InMemoryBroker,
        handler: RecordingHandler,
        redelivery: RetryPolicy,
    ) -> (CancellationToken, QueueHandle) {
        let shutdown = CancellationToken::new();
        let supervisor = ConnectionSupervisor::new(
            Arc::new(broker.clone()),
            &[QUEUE],
            RetryPolicy::Fixed(Duration::from_millis(10)),
        );
        let (handle, _) = supervisor.spawn(shutdown.clone());
        let consumer = Consumer::new(QUEUE, handle.clone(), handler).with_redelivery(redelivery);
        tokio::spawn(consumer.run(shutdown.clone()));
        (shutdown, handle)
    }

    #[tokio::test]
    async fn test_acked_messages_are_removed() {
        let broker = InMemoryBroker::new();
        let handler = RecordingHandler::default();
        let (shutdown, handle) = start(&broker, handler.clone());

        let channel = handle.ready().await.unwrap();
        channel.publish(QUEUE, b"one".to_vec()).await.unwrap();
        channel.publish(QUEUE, b"two".to_vec()).await.unwrap();

        wait_for_seen(&handler, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let seen = handler.seen.lock().await.clone();
        assert_eq!(seen, vec![("one".to_string(), 1), ("two".to_string(), 1)]);
        assert_eq!(broker.ready_count(QUEUE).await, 0);
        assert_eq!(broker.unacked_count(QUEUE).await, 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_requeued_message_is_redelivered() {
        let broker = InMemoryBroker::new();
        let handler = RecordingHandler {
            fail_times: 2,
            ..Default::default()
        };
        let (shutdown, handle) = start(&broker, handler.clone());

        let channel = handle.ready().await.unwrap();
        channel.publish(QUEUE, b"flaky".to_vec()).await.unwrap();

        wait_for_seen(&handler, 3).await;
        let attempts: Vec<u32> = handler.seen.lock().await.iter().map(|(_, a)| *a).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_requeue_waits_before_redelivery() {
        let broker = InMemoryBroker::new();
        let handler = RecordingHandler {
            fail_times: 1,
            ..Default::default()
        };
        let (shutdown, handle) = start_with_redelivery(
            &broker,
            handler.clone(),
            RetryPolicy::Fixed(Duration::from_millis(200)),
        );

        let channel = handle.ready().await.unwrap();
        channel.publish(QUEUE, b"later".to_vec()).await.unwrap();

        wait_for_seen(&handler, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.seen.lock().await.len(), 1);
        assert_eq!(broker.unacked_count(QUEUE).await, 1);

        wait_for_seen(&handler, 2).await;
        let attempts: Vec<u32> = handler.seen.lock().await.iter().map(|(_, a)| *a).collect();
        assert_eq!(attempts, vec![1, 2]);
        shutdown.cancel();
    }

    #[test]
    fn test_default_redelivery_backs_off() {
        assert_eq!(DEFAULT_REDELIVERY.delay(1), Duration::from_millis(250));
        assert_eq!(DEFAULT_REDELIVERY.delay(3), Duration::from_secs(1));
        assert_eq!(DEFAULT_REDELIVERY.delay(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_rejected_message_is_discarded() {
        let broker = InMemoryBroker::new();
        let handler = RecordingHandler {
            poison: Some("bad".to_string()),
            ..Default::default()
        };
        let (shutdown, handle) = start(&broker, handler.clone());

        let channel = handle.ready().await.unwrap();
        channel.publish(QUEUE, b"bad".to_vec()).await.unwrap();
        channel.publish(QUEUE, b"good".to_vec()).await.unwrap();

        wait_for_seen(&handler, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.ready_count(QUEUE).await, 0);
        assert_eq!(handler.seen.lock().await.len(), 2);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_consumer_survives_broker_outage() {
        let broker = InMemoryBroker::new();
        let handler = RecordingHandler::default();
        let (shutdown, handle) = start(&broker, handler.clone());
        handle.ready().await.unwrap();

        broker.set_available(false).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        broker.set_available(true).await;

        let producer = broker.connect().await.unwrap();
        producer.declare_queue(QUEUE).await.unwrap();
        producer.publish(QUEUE, b"after".to_vec()).await.unwrap();

        wait_for_seen(&handler, 1).await;
        assert_eq!(handler.seen.lock().await[0].0, "after");
        shutdown.cancel();
    }
}
