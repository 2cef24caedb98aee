// Database schema: table creation and migrations.
//
// A `schema_version` table tracks which migrations have run, and each
// migration is a function that executes SQL statements.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent and safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per relayed item; the primary key is the dedup check
        CREATE TABLE IF NOT EXISTS relay_records (
            id TEXT PRIMARY KEY,               -- content id (exceeds 53 bits, kept as text)
            likes INTEGER NOT NULL DEFAULT 0,
            reposts INTEGER NOT NULL DEFAULT 0,
            replies INTEGER NOT NULL DEFAULT 0,
            media_urls TEXT NOT NULL DEFAULT '', -- pipe-joined
            text TEXT NOT NULL DEFAULT '',
            posted_at TEXT NOT NULL,
            url TEXT NOT NULL,
            author_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Authors the operator unfollowed; their reposts are never relayed
        CREATE TABLE IF NOT EXISTS suppressed_authors (
            author_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Perceptual hashes of photos posted in the scoped channel
        CREATE TABLE IF NOT EXISTS image_fingerprints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hash_a TEXT NOT NULL,
            hash_b TEXT NOT NULL,
            hash_c TEXT NOT NULL,
            hash_d TEXT NOT NULL,
            chat_id INTEGER NOT NULL,
            message_id INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_fingerprints_a ON image_fingerprints(hash_a);
        CREATE INDEX IF NOT EXISTS idx_fingerprints_b ON image_fingerprints(hash_b);
        CREATE INDEX IF NOT EXISTS idx_fingerprints_c ON image_fingerprints(hash_c);
        CREATE INDEX IF NOT EXISTS idx_fingerprints_d ON image_fingerprints(hash_d);
        CREATE INDEX IF NOT EXISTS idx_fingerprints_chat ON image_fingerprints(chat_id);
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: index relay and fingerprint creation times so the
    // retention sweep doesn't scan the whole table.
    run_migration(conn, 2, |c| {
        c.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_relay_created ON relay_records(created_at);
             CREATE INDEX IF NOT EXISTS idx_fingerprints_created ON image_fingerprints(created_at);",
        )
    })?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
