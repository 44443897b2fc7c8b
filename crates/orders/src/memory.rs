//! In-memory order store.
//!
//! The order map is owned by a single task; callers talk to it over a
//! channel, so each request is applied whole before the next one starts.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use tokio::sync::{mpsc, oneshot};

use crate::error::{OrderError, StoreError};
use crate::model::Order;
use crate::state::OrderStatus;
use crate::store::OrderStore;

type Reply<T> = oneshot::Sender<Result<T, OrderError>>;

enum Command {
    Insert(Order, Reply<()>),
    Get(OrderId, Reply<Option<Order>>),
    List(Reply<Vec<Order>>),
    Transition {
        id: OrderId,
        to: OrderStatus,
        failure_reason: Option<String>,
        reply: Reply<Order>,
    },
}

#[derive(Default)]
struct OrderTable {
    orders: HashMap<OrderId, Order>,
    // Insertion order, for listing.
    sequence: Vec<OrderId>,
}

impl OrderTable {
    fn apply(&mut self, command: Command) {
        match command {
            Command::Insert(order, reply) => {
                if !self.orders.contains_key(&order.id) {
                    self.sequence.push(order.id);
                }
                self.orders.insert(order.id, order);
                let _ = reply.send(Ok(()));
            }
            Command::Get(id, reply) => {
                let _ = reply.send(Ok(self.orders.get(&id).cloned()));
            }
            Command::List(reply) => {
                let orders = self
                    .sequence
                    .iter()
                    .filter_map(|id| self.orders.get(id).cloned())
                    .collect();
                let _ = reply.send(Ok(orders));
            }
            Command::Transition {
                id,
                to,
                failure_reason,
                reply,
            } => {
                let _ = reply.send(self.transition(id, to, failure_reason));
            }
        }
    }

    fn transition(
        &mut self,
        id: OrderId,
        to: OrderStatus,
        failure_reason: Option<String>,
    ) -> Result<Order, OrderError> {
        let order = self.orders.get_mut(&id).ok_or(OrderError::NotFound(id))?;
        if !order.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition {
                order_id: id,
                from: order.status,
                to,
            });
        }

        order.status = to;
        if failure_reason.is_some() {
            order.failure_reason = failure_reason;
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

/// In-memory order store for single-process deployments and tests.
///
/// Must be created inside a Tokio runtime. The owning task ends when the
/// last clone is dropped.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    commands: mpsc::Sender<Command>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates an empty store and spawns its owning task.
    pub fn new() -> Self {
        let (commands, mut rx) = mpsc::channel::<Command>(256);
        tokio::spawn(async move {
            let mut table = OrderTable::default();
            while let Some(command) = rx.recv().await {
                table.apply(command);
            }
        });

        Self {
            commands,
            unavailable: Arc::default(),
        }
    }

    /// Makes every operation fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, OrderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable("in-memory order store is offline"));
        }

        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| unavailable("order store task has stopped"))?;
        rx.await
            .map_err(|_| unavailable("order store task dropped the request"))?
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable(reason: &str) -> OrderError {
    OrderError::Store(StoreError::Unavailable(reason.to_string()))
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), OrderError> {
        self.request(|reply| Command::Insert(order, reply)).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderError> {
        self.request(|reply| Command::Get(id, reply)).await
    }

    async fn list(&self) -> Result<Vec<Order>, OrderError> {
        self.request(Command::List).await
    }

    async fn transition(
        &self,
        id: OrderId,
        to: OrderStatus,
        failure_reason: Option<String>,
    ) -> Result<Order, OrderError> {
        self.request(|reply| Command::Transition {
            id,
            to,
            failure_reason,
            reply,
        })
        .await
    }

    async fn ping(&self) -> Result<(), OrderError> {
        if self.unavailable.load(Ordering::SeqCst) || self.commands.is_closed() {
            return Err(unavailable("in-memory order store is offline"));
        }
        Ok(())
    }
}
