//! SQLite-backed message store.
//!
//! Every operation checks a connection out of the [`ConnectionPool`], runs one
//! parameterized statement and returns the connection when the guard drops.

use rusqlite::params;
use std::time::Instant;

use super::pool::ConnectionPool;
use super::schema::initialize_schema;
use super::{ChatMessage, MessageStore, NewChatMessage, StoreError};
use crate::now_millis;
use crate::observability::metrics::record_store_latency;

const INSERT_MESSAGE: &str = r#"
    INSERT INTO messages (nickname, message, client_id, created_at)
    VALUES (?1, ?2, ?3, ?4)
"#;

const SELECT_RECENT: &str = r#"
    SELECT id, nickname, message, client_id, created_at
    FROM messages
    ORDER BY id DESC
    LIMIT ?1
"#;

/// Relational message store over a shared connection pool.
#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: ConnectionPool,
}

impl SqliteMessageStore {
    /// Create a store on top of an existing pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Create the `messages` table if it does not exist yet.
    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.pool.acquire()?;
        initialize_schema(&conn)?;
        Ok(())
    }

    /// Verify the store is reachable by running a trivial query.
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.pool.acquire()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// The pool backing this store.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl MessageStore for SqliteMessageStore {
    fn insert(&self, message: &NewChatMessage) -> Result<i64, StoreError> {
        let start = Instant::now();
        let conn = self.pool.acquire()?;

        // Autocommit: the row is committed when execute returns.
        conn.execute(
            INSERT_MESSAGE,
            params![
                message.nickname,
                message.message,
                message.client_id,
                now_millis()
            ],
        )?;
        let id = conn.last_insert_rowid();

        record_store_latency("insert", start.elapsed().as_secs_f64());
        Ok(id)
    }

    fn select_recent(&self, limit: u32) -> Result<Vec<ChatMessage>, StoreError> {
        let start = Instant::now();
        let conn = self.pool.acquire()?;

        let mut stmt = conn.prepare_cached(SELECT_RECENT)?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ChatMessage {
                    id: row.get(0)?,
                    nickname: row.get(1)?,
                    message: row.get(2)?,
                    client_id: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        record_store_latency("select", start.elapsed().as_secs_f64());
        Ok(rows)
    }
}
