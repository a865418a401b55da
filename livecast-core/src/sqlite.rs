use std::time::Duration;

use rusqlite::Connection;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const WRITER_PRAGMAS: &str = "PRAGMA journal_mode = WAL;\n\
     PRAGMA synchronous = NORMAL;\n\
     PRAGMA foreign_keys = ON;\n";

/// Pragmas applied to every overlay store connection. Read-only handles
/// cannot switch the journal mode, so they only get the busy timeout.
pub fn configure_connection(conn: &Connection, read_only: bool) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if !read_only {
        conn.execute_batch(WRITER_PRAGMAS)?;
    }
    Ok(())
}
