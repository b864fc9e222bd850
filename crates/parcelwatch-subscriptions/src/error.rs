use thiserror::Error;

/// Errors that can occur during subscription operations.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// No active subscription matches the request.
    #[error("no active subscription for {tracking_number}")]
    NotFound { tracking_number: String },

    /// No subscription row has this id.
    #[error("subscription not found: {id}")]
    UnknownId { id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The stored history column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another thread panicked while holding the connection.
    #[error("database connection lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SubscriptionError>;
