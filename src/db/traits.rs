// Database trait: backend-agnostic async interface for all DB operations.
//
// Implementors: SqliteDatabase (wraps rusqlite), PgDatabase (wraps sqlx).
// All methods are async so both sync (rusqlite via Mutex) and native async
// (sqlx) backends fit behind a single interface.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;

use super::models::{ImageFingerprint, RelayRecord, RelayStats};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Relay history ---

    /// Whether a relay record exists for this content id.
    async fn relay_exists(&self, id: &str) -> Result<bool>;

    /// Insert a relay record. Fails with `RelayError::DuplicateKey` when the
    /// id is already present.
    async fn persist_relay(&self, record: &RelayRecord) -> Result<()>;

    /// Delete relay records created more than `max_age` ago.
    async fn sweep_relays_older_than(&self, max_age: Duration) -> Result<u64>;

    // --- Suppressed authors ---

    async fn is_suppressed(&self, author_id: &str) -> Result<bool>;

    /// Suppress an author (upsert).
    async fn suppress(&self, author_id: &str) -> Result<()>;

    /// Lift a suppression. Returns the number of rows removed (0 or 1).
    async fn unsuppress(&self, author_id: &str) -> Result<u64>;

    // --- Image fingerprints ---

    /// Store a fingerprint and return its row id.
    async fn insert_fingerprint(
        &self,
        chat_id: i64,
        message_id: i64,
        segments: &[String; 4],
    ) -> Result<i64>;

    /// Fingerprints in `chat_id` sharing at least one segment.
    async fn fingerprint_candidates(
        &self,
        chat_id: i64,
        segments: &[String; 4],
    ) -> Result<Vec<ImageFingerprint>>;

    /// Delete fingerprints created more than `max_age` ago.
    async fn sweep_fingerprints_older_than(&self, max_age: Duration) -> Result<u64>;

    // --- Status ---

    async fn stats(&self) -> Result<RelayStats>;
}
