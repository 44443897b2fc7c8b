use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ItemId, OrderId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::StoreError;
use crate::model::{IdempotencyRecord, StockItem};
use crate::store::{IdempotencyRegister, InventoryStore, ReserveOutcome, StockLedger};

/// PostgreSQL-backed inventory store.
///
/// `reserve_once` runs in one transaction that locks the item row first, so
/// reservations on the same item serialize and the register check inside the
/// transaction sees every committed record.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_item(row: PgRow) -> Result<StockItem, StoreError> {
        let quantity: i64 = row.try_get("available_quantity")?;
        Ok(StockItem {
            id: ItemId::new(row.try_get::<String, _>("id")?),
            available_quantity: quantity.clamp(0, u32::MAX as i64) as u32,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_record(row: PgRow) -> Result<IdempotencyRecord, StoreError> {
        let quantity: i64 = row.try_get("quantity")?;
        Ok(IdempotencyRecord {
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            item_id: ItemId::new(row.try_get::<String, _>("item_id")?),
            quantity: quantity.clamp(0, u32::MAX as i64) as u32,
            applied_at: row.try_get::<DateTime<Utc>, _>("applied_at")?,
        })
    }
}

#[async_trait]
impl StockLedger for PostgresInventoryStore {
    async fn get_item(&self, item_id: &ItemId) -> Result<Option<StockItem>, StoreError> {
        let row = sqlx::query(
            "SELECT id, available_quantity, updated_at FROM stock_items WHERE id = $1",
        )
        .bind(item_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn list_items(&self) -> Result<Vec<StockItem>, StoreError> {
        let rows =
            sqlx::query("SELECT id, available_quantity, updated_at FROM stock_items ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn set_quantity(&self, item_id: &ItemId, quantity: u32) -> Result<StockItem, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO stock_items (id, available_quantity, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (id) DO UPDATE
                SET available_quantity = EXCLUDED.available_quantity,
                    updated_at = EXCLUDED.updated_at
            RETURNING id, available_quantity, updated_at
            "#,
        )
        .bind(item_id.as_str())
        .bind(i64::from(quantity))
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_item(row)
    }
}

#[async_trait]
impl IdempotencyRegister for PostgresInventoryStore {
    async fn find_record(
        &self,
        order_id: OrderId,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT order_id, item_id, quantity, applied_at FROM fulfillment_records WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn reserve_once(
        &self,
        order_id: OrderId,
        item_id: &ItemId,
        quantity: u32,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock first: every reserver of this item waits here.
        let available: Option<i64> = sqlx::query_scalar(
            "SELECT available_quantity FROM stock_items WHERE id = $1 FOR UPDATE",
        )
        .bind(item_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let existing = sqlx::query(
            "SELECT order_id, item_id, quantity, applied_at FROM fulfillment_records WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            return Ok(ReserveOutcome::AlreadyApplied(Self::row_to_record(row)?));
        }

        let Some(available) = available else {
            return Ok(ReserveOutcome::ItemNotFound);
        };
        let requested = i64::from(quantity);
        if available < requested {
            return Ok(ReserveOutcome::InsufficientStock {
                available: available.clamp(0, u32::MAX as i64) as u32,
            });
        }

        sqlx::query(
            "UPDATE stock_items SET available_quantity = available_quantity - $2, updated_at = now() WHERE id = $1",
        )
        .bind(item_id.as_str())
        .bind(requested)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO fulfillment_records (order_id, item_id, quantity, applied_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (order_id) DO NOTHING
            RETURNING order_id, item_id, quantity, applied_at
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(item_id.as_str())
        .bind(requested)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = inserted else {
            // Same order raced in on another item; undo the decrement.
            tx.rollback().await?;
            return match self.find_record(order_id).await? {
                Some(record) => Ok(ReserveOutcome::AlreadyApplied(record)),
                None => Err(StoreError::Unavailable(format!(
                    "fulfillment record for order {order_id} vanished"
                ))),
            };
        };
        let record = Self::row_to_record(row)?;

        tx.commit().await?;
        Ok(ReserveOutcome::Applied(record))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
