use thiserror::Error;

/// Errors that can occur when talking to the work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No ready connection exists; the caller should not wait for one.
    #[error("Work queue unavailable")]
    Unavailable,

    /// The transport could not be reached or refused the connection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The channel was lost while the operation was in flight.
    #[error("Channel closed")]
    Closed,

    /// The queue has not been declared on this broker.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// A message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A database error occurred in the PostgreSQL transport.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl QueueError {
    /// Returns true if the error means the connection itself is gone.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            QueueError::Closed | QueueError::Transport(_) => true,
            QueueError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
