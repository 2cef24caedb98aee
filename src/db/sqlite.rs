// SqliteDatabase: rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The free functions in queries.rs do the actual SQL.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{ImageFingerprint, RelayRecord, RelayStats};
use super::queries;
use super::traits::Database;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn relay_exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::relay_exists(&conn, id)
    }

    async fn persist_relay(&self, record: &RelayRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::insert_relay(&conn, record, Utc::now())
    }

    async fn sweep_relays_older_than(&self, max_age: Duration) -> Result<u64> {
        let conn = self.conn.lock().await;
        queries::delete_relays_before(&conn, Utc::now() - max_age)
    }

    async fn is_suppressed(&self, author_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::is_suppressed(&conn, author_id)
    }

    async fn suppress(&self, author_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::suppress(&conn, author_id)
    }

    async fn unsuppress(&self, author_id: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        queries::unsuppress(&conn, author_id)
    }

    async fn insert_fingerprint(
        &self,
        chat_id: i64,
        message_id: i64,
        segments: &[String; 4],
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::insert_fingerprint(&conn, chat_id, message_id, segments, Utc::now())
    }

    async fn fingerprint_candidates(
        &self,
        chat_id: i64,
        segments: &[String; 4],
    ) -> Result<Vec<ImageFingerprint>> {
        let conn = self.conn.lock().await;
        queries::fingerprint_candidates(&conn, chat_id, segments)
    }

    async fn sweep_fingerprints_older_than(&self, max_age: Duration) -> Result<u64> {
        let conn = self.conn.lock().await;
        queries::delete_fingerprints_before(&conn, Utc::now() - max_age)
    }

    async fn stats(&self) -> Result<RelayStats> {
        let conn = self.conn.lock().await;
        queries::stats(&conn)
    }
}
