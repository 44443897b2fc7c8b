use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{ItemId, OrderId};
use tokio::sync::Mutex;

use crate::StoreError;
use crate::model::{IdempotencyRecord, StockItem};
use crate::store::{IdempotencyRegister, InventoryStore, ReserveOutcome, StockLedger};

#[derive(Debug, Default)]
struct InventoryState {
    items: HashMap<ItemId, StockItem>,
    records: HashMap<OrderId, IdempotencyRecord>,
}

/// In-memory inventory store.
///
/// The ledger and the register sit behind one lock, so holding it is the
/// atomic unit `reserve_once` requires.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<InventoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the given quantities.
    pub fn with_items<I, K>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, u32)>,
        K: Into<ItemId>,
    {
        let now = Utc::now();
        let items = items
            .into_iter()
            .map(|(id, quantity)| {
                let id = id.into();
                let item = StockItem {
                    id: id.clone(),
                    available_quantity: quantity,
                    updated_at: now,
                };
                (id, item)
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(InventoryState {
                items,
                records: HashMap::new(),
            })),
            unavailable: Arc::default(),
        }
    }

    /// Makes every operation fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of idempotency records.
    pub async fn record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(
                "in-memory inventory store is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StockLedger for InMemoryInventoryStore {
    async fn get_item(&self, item_id: &ItemId) -> Result<Option<StockItem>, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.items.get(item_id).cloned())
    }

    async fn list_items(&self) -> Result<Vec<StockItem>, StoreError> {
        self.check_available()?;
        let mut items: Vec<StockItem> = self.state.lock().await.items.values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn set_quantity(&self, item_id: &ItemId, quantity: u32) -> Result<StockItem, StoreError> {
        self.check_available()?;
        let item = StockItem {
            id: item_id.clone(),
            available_quantity: quantity,
            updated_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .items
            .insert(item_id.clone(), item.clone());
        Ok(item)
    }
}

#[async_trait]
impl IdempotencyRegister for InMemoryInventoryStore {
    async fn find_record(
        &self,
        order_id: OrderId,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.records.get(&order_id).cloned())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn reserve_once(
        &self,
        order_id: OrderId,
        item_id: &ItemId,
        quantity: u32,
    ) -> Result<ReserveOutcome, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if let Some(record) = state.records.get(&order_id) {
            return Ok(ReserveOutcome::AlreadyApplied(record.clone()));
        }

        let now = Utc::now();
        let Some(item) = state.items.get_mut(item_id) else {
            return Ok(ReserveOutcome::ItemNotFound);
        };

        if item.available_quantity < quantity {
            return Ok(ReserveOutcome::InsufficientStock {
                available: item.available_quantity,
            });
        }

        item.available_quantity -= quantity;
        item.updated_at = now;

        let record = IdempotencyRecord {
            order_id,
            item_id: item_id.clone(),
            quantity,
            applied_at: now,
        };
        state.records.insert(order_id, record.clone());

        Ok(ReserveOutcome::Applied(record))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
