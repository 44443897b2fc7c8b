use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::Result;

/// A message handed to a consumer, pending acknowledgment.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned tag used to ack or nack this delivery.
    pub tag: u64,
    /// Queue the message was received from.
    pub queue: String,
    /// Raw message body.
    pub payload: Vec<u8>,
    /// Delivery attempt, starting at 1. Greater than 1 means redelivery.
    pub attempt: u32,
}

impl Delivery {
    /// Decodes the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Returns true if this message has been delivered before.
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// An open broker channel.
///
/// Delivery is at-least-once: a message that is received but never acked
/// (because the consumer crashed, the channel was lost, or it was nacked
/// with `requeue`) is delivered again. Ordering is FIFO per queue.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Creates the queue if it does not already exist.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Appends a message to a declared queue.
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()>;

    /// Waits for the next message on the queue.
    ///
    /// Fails with `Closed` once the channel has been lost.
    async fn receive(&self, queue: &str) -> Result<Delivery>;

    /// Acknowledges a delivery, removing the message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Negatively acknowledges a delivery. With `requeue` the message becomes
    /// available again; without it the message is discarded.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()>;

    /// Resolves once the channel has been lost.
    async fn closed(&self);

    /// Returns false once the channel is known to be lost.
    fn is_open(&self) -> bool;
}

/// Something that can open broker channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short human-readable description used in logs.
    fn describe(&self) -> String;

    /// Opens a new channel.
    async fn connect(&self) -> Result<Arc<dyn Channel>>;
}
