//! Storage layer for Chatlog.
//!
//! Provides:
//! - Bounded connection pool over SQLite
//! - Schema bootstrap and connection pragmas
//! - The [`MessageStore`] contract with relational and in-memory backends

pub mod memory;
pub mod pool;
pub mod schema;
pub mod sqlite;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use self::pool::PoolError;

/// Row cap applied by the read path.
pub const DEFAULT_RECENT_LIMIT: u32 = 100;

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Store-assigned, strictly increasing identifier.
    pub id: i64,
    pub nickname: String,
    pub message: String,
    pub client_id: String,
    /// Insertion time in Unix milliseconds.
    pub created_at: i64,
}

/// A validated message ready to be inserted.
///
/// Produced only by the dispatch path, so `message` is non-empty and the
/// other fields are already truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub nickname: String,
    pub message: String,
    pub client_id: String,
}

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool exhausted: {max_size} connections busy for {waited:?}")]
    PoolExhausted { max_size: u32, waited: Duration },

    #[error("failed to connect to store: {0}")]
    ConnectFailure(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store task failed: {0}")]
    Task(String),
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { max_size, timeout } => StoreError::PoolExhausted {
                max_size,
                waited: timeout,
            },
            other => StoreError::ConnectFailure(other.to_string()),
        }
    }
}

/// Persistence operations used by the subscriber and the query service.
///
/// Implementations acquire whatever resources they need per call and release
/// them before returning, on success and on error. No operation retries.
pub trait MessageStore: Send + Sync {
    /// Insert one message and return its assigned id.
    fn insert(&self, message: &NewChatMessage) -> Result<i64, StoreError>;

    /// Return up to `limit` messages, most recent first.
    fn select_recent(&self, limit: u32) -> Result<Vec<ChatMessage>, StoreError>;
}
