//! Schema bootstrap and per-connection pragmas.
//!
//! The `messages` table is created if missing; there is no migration
//! machinery. Length caps are enforced by the dispatch path, since SQLite
//! ignores VARCHAR lengths. The CHECK constraints measure bytes: `length()`
//! on TEXT stops at the first NUL, so a character-based check would misjudge
//! values with embedded NULs. A cap of N characters allows 4N UTF-8 bytes.

use rusqlite::Connection;
use std::time::Duration;

/// How long a connection waits on a locked database before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    nickname    VARCHAR(50)  NOT NULL CHECK (length(CAST(nickname AS BLOB)) <= 200),
    message     TEXT         NOT NULL CHECK (message <> ''),
    client_id   VARCHAR(100) NOT NULL DEFAULT '' CHECK (length(CAST(client_id AS BLOB)) <= 400),
    created_at  INTEGER      NOT NULL
);
"#;

/// Apply pragmas to a freshly opened connection.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Create the `messages` table if it does not exist.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
