use async_trait::async_trait;
use common::{ItemId, OrderId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{OrderError, StoreError};
use crate::model::Order;
use crate::state::OrderStatus;
use crate::store::OrderStore;

const ORDER_COLUMNS: &str =
    "id, item_id, quantity, status, failure_reason, created_at, updated_at";

/// PostgreSQL-backed order store.
///
/// Transitions are a single conditional `UPDATE` guarded by the allowed
/// predecessor states, so concurrent writers cannot both move an order.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
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

    fn row_to_order(row: PgRow) -> Result<Order, OrderError> {
        let status: String = row.try_get("status").map_err(StoreError::from)?;
        let status = status
            .parse::<OrderStatus>()
            .map_err(StoreError::Corrupt)?;
        let quantity: i64 = row.try_get("quantity").map_err(StoreError::from)?;
        let quantity = u32::try_from(quantity)
            .map_err(|_| StoreError::Corrupt(format!("quantity out of range: {quantity}")))?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id").map_err(StoreError::from)?),
            item_id: ItemId::new(row.try_get::<String, _>("item_id").map_err(StoreError::from)?),
            quantity,
            status,
            failure_reason: row.try_get("failure_reason").map_err(StoreError::from)?,
            created_at: row.try_get("created_at").map_err(StoreError::from)?,
            updated_at: row.try_get("updated_at").map_err(StoreError::from)?,
        })
    }
}

fn db(e: sqlx::Error) -> OrderError {
    OrderError::Store(StoreError::Database(e))
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, order: Order) -> Result<(), OrderError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, item_id, quantity, status, failure_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.item_id.as_str())
        .bind(i64::from(order.quantity))
        .bind(order.status.as_str())
        .bind(order.failure_reason.as_deref())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list(&self) -> Result<Vec<Order>, OrderError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn transition(
        &self,
        id: OrderId,
        to: OrderStatus,
        failure_reason: Option<String>,
    ) -> Result<Order, OrderError> {
        let predecessors: Vec<String> = to
            .predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let updated = sqlx::query(&format!(
            r#"
            UPDATE orders
            SET status = $2,
                failure_reason = COALESCE($3, failure_reason),
                updated_at = now()
            WHERE id = $1 AND status = ANY($4)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(to.as_str())
        .bind(failure_reason.as_deref())
        .bind(&predecessors)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        if let Some(row) = updated {
            return Self::row_to_order(row);
        }

        match self.get(id).await? {
            Some(current) => Err(OrderError::InvalidTransition {
                order_id: id,
                from: current.status,
                to,
            }),
            None => Err(OrderError::NotFound(id)),
        }
    }

    async fn ping(&self) -> Result<(), OrderError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }
}
