use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::watch;

use crate::channel::{Channel, Delivery, Transport};
use crate::{QueueError, Result};

/// Tuning for the PostgreSQL-backed queue.
#[derive(Debug, Clone)]
pub struct PgQueueOptions {
    /// Pool size per channel.
    pub max_connections: u32,
    /// How long a received message stays invisible before it is redelivered
    /// if not acked.
    pub visibility_timeout: Duration,
    /// Delay between polls when a queue is empty.
    pub poll_interval: Duration,
    /// Interval of the liveness probe that detects a lost database.
    pub heartbeat_interval: Duration,
    /// Upper bound on acquiring a pooled connection.
    pub acquire_timeout: Duration,
}

impl Default for PgQueueOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Durable queue transport backed by the `queues` and `queue_messages`
/// tables (see `migrations/003_create_queue_tables.sql`).
///
/// Consumers claim messages with `FOR UPDATE SKIP LOCKED` and hide them for
/// the visibility timeout; a message that is not acked in time becomes
/// visible again, which is what gives at-least-once delivery.
#[derive(Debug, Clone)]
pub struct PgTransport {
    url: String,
    options: PgQueueOptions,
}

impl PgTransport {
    /// Creates a transport for the given connection string.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: PgQueueOptions::default(),
        }
    }

    /// Overrides the default tuning.
    pub fn with_options(mut self, options: PgQueueOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Transport for PgTransport {
    fn describe(&self) -> String {
        // Credentials stay out of the logs.
        match self.url.rsplit_once('@') {
            Some((_, host)) => format!("postgres://{host}"),
            None => "postgres".to_string(),
        }
    }

    async fn connect(&self) -> Result<Arc<dyn Channel>> {
        let pool = PgPoolOptions::new()
            .max_connections(self.options.max_connections)
            .acquire_timeout(self.options.acquire_timeout)
            .connect(&self.url)
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        let (closed_tx, _) = watch::channel(false);
        Ok(Arc::new(PgChannel {
            pool,
            options: self.options.clone(),
            closed: closed_tx,
        }))
    }
}

/// A channel holding its own pool onto the queue tables.
struct PgChannel {
    pool: PgPool,
    options: PgQueueOptions,
    closed: watch::Sender<bool>,
}

impl PgChannel {
    /// Marks the channel lost if the error means the database is gone.
    fn observe<T>(&self, result: std::result::Result<T, sqlx::Error>) -> Result<T> {
        result.map_err(|e| {
            let err = QueueError::Database(e);
            if err.is_connection_loss() {
                tracing::warn!(error = %err, "postgres queue channel lost");
                self.closed.send_replace(true);
            }
            err
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(QueueError::Closed)
        }
    }

    async fn try_claim(&self, queue: &str) -> Result<Option<Delivery>> {
        let row = self.observe(
            sqlx::query(
                r#"
                UPDATE queue_messages
                SET attempts = attempts + 1,
                    visible_at = now() + make_interval(secs => $2)
                WHERE id = (
                    SELECT id FROM queue_messages
                    WHERE queue = $1 AND visible_at <= now()
                    ORDER BY id
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                )
                RETURNING id, payload, attempts
                "#,
            )
            .bind(queue)
            .bind(self.options.visibility_timeout.as_secs_f64())
            .fetch_optional(&self.pool)
            .await,
        )?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let attempts: i32 = row.try_get("attempts")?;
        Ok(Some(Delivery {
            tag: id as u64,
            queue: queue.to_string(),
            payload: row.try_get("payload")?,
            attempt: attempts.max(1) as u32,
        }))
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}

#[async_trait]
impl Channel for PgChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.ensure_open()?;
        self.observe(
            sqlx::query("INSERT INTO queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                .bind(queue)
                .execute(&self.pool)
                .await,
        )?;
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.observe(
            sqlx::query("INSERT INTO queue_messages (queue, payload) VALUES ($1, $2)")
                .bind(queue)
                .bind(payload)
                .execute(&self.pool)
                .await,
        )
        .map_err(|e| match e {
            QueueError::Database(sqlx::Error::Database(ref db_err))
                if db_err.is_foreign_key_violation() =>
            {
                QueueError::UnknownQueue(queue.to_string())
            }
            other => other,
        })?;
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Delivery> {
        loop {
            self.ensure_open()?;
            if let Some(delivery) = self.try_claim(queue).await? {
                return Ok(delivery);
            }

            tokio::select! {
                () = tokio::time::sleep(self.options.poll_interval) => {}
                () = wait_closed(self.closed.subscribe()) => return Err(QueueError::Closed),
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.ensure_open()?;
        self.observe(
            sqlx::query("DELETE FROM queue_messages WHERE id = $1")
                .bind(delivery.tag as i64)
                .execute(&self.pool)
                .await,
        )?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        self.ensure_open()?;
        let query = if requeue {
            "UPDATE queue_messages SET visible_at = now() WHERE id = $1"
        } else {
            "DELETE FROM queue_messages WHERE id = $1"
        };
        self.observe(
            sqlx::query(query)
                .bind(delivery.tag as i64)
                .execute(&self.pool)
                .await,
        )?;
        Ok(())
    }

    async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return;
            }
            tokio::select! {
                _ = closed.changed() => {}
                () = tokio::time::sleep(self.options.heartbeat_interval) => {
                    let probe = sqlx::query("SELECT 1").execute(&self.pool).await;
                    if let Err(e) = probe {
                        tracing::warn!(error = %e, "postgres queue heartbeat failed");
                        self.closed.send_replace(true);
                        return;
                    }
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}
