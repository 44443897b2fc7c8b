//! Shared types for the order and inventory services.
//!
//! Both services and both queues agree on these identifiers and message
//! shapes, so they live in one place.

pub mod messages;
pub mod types;

pub use messages::{
    COMPLETION_EVENTS, CompletionEvent, FulfillmentReply, FulfillmentRequest, FulfillmentStatus,
    Outcome, PENDING_WORK, WorkItem,
};
pub use types::{ItemId, OrderId};
