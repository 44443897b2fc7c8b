//! Inventory side of the fulfillment protocol.
//!
//! This crate provides:
//! - The Stock Ledger and Idempotency Register ([`StockLedger`],
//!   [`IdempotencyRegister`]) and the atomic unit joining them
//!   ([`InventoryStore::reserve_once`])
//! - In-memory and PostgreSQL stores
//! - [`FulfillmentExecutor`], which applies a fulfillment at most once per order
//! - [`FulfillmentWorker`], the `pending-work` consumer which reports back on
//!   `completion-events`

pub mod error;
pub mod executor;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;
pub mod worker;

pub use error::{FulfillmentError, StoreError};
pub use executor::{DEFAULT_FAULT_DELAY, FulfillmentExecutor, FulfillmentOutcome};
pub use memory::InMemoryInventoryStore;
pub use model::{IdempotencyRecord, StockItem};
pub use postgres::PostgresInventoryStore;
pub use store::{IdempotencyRegister, InventoryStore, ReserveOutcome, StockLedger};
pub use worker::{DEFAULT_MAX_DELIVERIES, FulfillmentWorker};
