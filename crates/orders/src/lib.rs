//! Order side of the fulfillment protocol.
//!
//! This crate provides:
//! - [`OrderStatus`], the order state machine
//! - Order stores: an in-memory single-owner task and PostgreSQL
//! - [`FulfillmentClient`] and its HTTP implementation
//! - [`OrderLifecycleManager`], which places orders under a deadline and
//!   falls back to the work queue
//! - [`CompletionHandler`], the `completion-events` consumer

pub mod client;
pub mod error;
pub mod handler;
pub mod manager;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod state;
pub mod store;

pub use client::{FulfillmentClient, HttpFulfillmentClient};
pub use error::{CallError, FailureKind, OrderError, PlacementError, StoreError};
pub use handler::CompletionHandler;
pub use manager::{
    CompletionOutcome, DEFAULT_FULFILLMENT_DEADLINE, OrderLifecycleManager, PlaceOrder, Placement,
};
pub use memory::InMemoryOrderStore;
pub use model::Order;
pub use postgres::PostgresOrderStore;
pub use state::OrderStatus;
pub use store::OrderStore;
