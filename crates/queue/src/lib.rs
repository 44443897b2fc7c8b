//! Work queue abstraction for deferred fulfillment.
//!
//! This crate provides:
//! - [`Channel`] and [`Transport`] traits describing an at-least-once broker
//! - An in-process broker ([`InMemoryBroker`]) and a PostgreSQL-backed
//!   durable queue ([`PgTransport`])
//! - [`ConnectionSupervisor`], which owns the process-wide connection and
//!   re-establishes it after any loss
//! - [`Consumer`], the subscriber loop shared by every queue consumer

pub mod channel;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod supervisor;

pub use channel::{Channel, Delivery, Transport};
pub use consumer::{Consumer, DEFAULT_REDELIVERY, Disposition, MessageHandler};
pub use error::{QueueError, Result};
pub use memory::InMemoryBroker;
pub use postgres::{PgQueueOptions, PgTransport};
pub use retry::RetryPolicy;
pub use supervisor::{ConnectionState, ConnectionSupervisor, QueueHandle};
