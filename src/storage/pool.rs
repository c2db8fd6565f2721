//! Bounded connection pool for store access.
//!
//! Uses r2d2 with r2d2_sqlite. Connections are opened lazily, at most
//! `max_size` are ever outstanding, and a checkout waits at most
//! `connection_timeout`. A checked-out connection goes back to the pool when
//! its guard is dropped, so every exit path releases it.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::schema::apply_pragmas;

/// A connection checked out of the pool. Dropping it releases it.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Error type for pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no connection freed up within {timeout:?} ({max_size} in use)")]
    Exhausted { max_size: u32, timeout: Duration },

    #[error("failed to open store connection: {0}")]
    Connect(r2d2::Error),

    #[error("failed to create connection pool: {0}")]
    Build(r2d2::Error),

    #[error("pool size must be positive")]
    ZeroSize,
}

/// Pool sizing and wait settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of concurrently outstanding connections.
    pub max_size: u32,
    /// Bounded wait for a free connection.
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Shared pool of store connections.
///
/// Cloning is cheap; clones share the same underlying free-list.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<SqliteConnectionManager>,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Create a pool for the database at `db_path`.
    ///
    /// No connection is opened here; use the store's ping to check
    /// connectivity up front.
    pub fn open<P: AsRef<Path>>(db_path: P, config: PoolConfig) -> Result<Self, PoolError> {
        if config.max_size == 0 {
            return Err(PoolError::ZeroSize);
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(0))
            .connection_timeout(config.connection_timeout.max(Duration::from_millis(1)))
            .connection_customizer(Box::new(StoreConnectionCustomizer))
            .error_handler(Box::new(TracingErrorHandler))
            .build(manager)
            .map_err(PoolError::Build)?;

        Ok(Self { pool, config })
    }

    /// Check a connection out of the pool, waiting up to the configured timeout.
    ///
    /// Fails with [`PoolError::Exhausted`] when every connection stayed busy,
    /// or [`PoolError::Connect`] when a new connection could not be opened.
    pub fn acquire(&self) -> Result<PooledConnection, PoolError> {
        self.pool.get().map_err(|e| {
            let state = self.pool.state();
            if state.connections >= self.config.max_size && state.idle_connections == 0 {
                PoolError::Exhausted {
                    max_size: self.config.max_size,
                    timeout: self.config.connection_timeout,
                }
            } else {
                PoolError::Connect(e)
            }
        })
    }

    /// Get the current pool state for monitoring.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }

    /// Configured maximum number of outstanding connections.
    pub fn max_size(&self) -> u32 {
        self.config.max_size
    }
}

/// Connection customizer that applies store pragmas.
#[derive(Debug)]
struct StoreConnectionCustomizer;

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error>
    for StoreConnectionCustomizer
{
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        apply_pragmas(conn)
    }
}

/// Routes r2d2 connection errors into tracing.
#[derive(Debug)]
struct TracingErrorHandler;

impl r2d2::HandleError<rusqlite::Error> for TracingErrorHandler {
    fn handle_error(&self, error: rusqlite::Error) {
        tracing::error!(error = %error, "Store connection error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_pool(dir: &TempDir, max_size: u32) -> ConnectionPool {
        ConnectionPool::open(
            dir.path().join("pool.db"),
            PoolConfig {
                max_size,
                connection_timeout: Duration::from_millis(100),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_pool_opens_lazily() {
        let temp_dir = TempDir::new().unwrap();
        let pool = small_pool(&temp_dir, 5);

        assert_eq!(pool.state().connections, 0);
        assert_eq!(pool.max_size(), 5);

        let conn = pool.acquire().unwrap();
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(one, 1);
        assert_eq!(pool.state().connections, 1);
    }

    #[test]
    fn test_dropped_connection_is_reused() {
        let temp_dir = TempDir::new().unwrap();
        let pool = small_pool(&temp_dir, 1);

        for _ in 0..3 {
            let conn = pool.acquire().unwrap();
            drop(conn);
        }

        assert_eq!(pool.state().connections, 1);
        assert_eq!(pool.state().idle_connections, 1);
    }

    #[test]
    fn test_acquire_times_out_when_exhausted() {
        let temp_dir = TempDir::new().unwrap();
        let pool = small_pool(&temp_dir, 2);

        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();

        let err = pool.acquire().err().unwrap();
        assert!(
            matches!(err, PoolError::Exhausted { max_size: 2, .. }),
            "unexpected error: {err}"
        );
        assert_eq!(pool.state().connections, 2);
    }

    #[test]
    fn test_released_connection_unblocks_waiter() {
        let temp_dir = TempDir::new().unwrap();
        let pool = small_pool(&temp_dir, 1);

        let held = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());

        drop(held);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_unreachable_store_is_connect_failure() {
        let temp_dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(
            temp_dir.path().join("missing").join("nested").join("db.sqlite"),
            PoolConfig {
                max_size: 2,
                connection_timeout: Duration::from_millis(50),
            },
        )
        .unwrap();

        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, PoolError::Connect(_)), "unexpected error: {err}");
        assert_eq!(pool.state().connections, 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let result = ConnectionPool::open(
            temp_dir.path().join("pool.db"),
            PoolConfig {
                max_size: 0,
                connection_timeout: Duration::from_millis(50),
            },
        );
        assert!(matches!(result, Err(PoolError::ZeroSize)));
    }
}
