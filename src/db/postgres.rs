// PgDatabase: PostgreSQL backend implementing the Database trait.
//
// Uses sqlx PgPool for native async queries. All queries use runtime
// parameter binding (not compile-time macros) to avoid requiring
// DATABASE_URL at compile time.
//
// Differences from SQLite: TIMESTAMPTZ instead of TEXT for timestamps,
// $1/$2 parameter syntax, GENERATED ALWAYS AS IDENTITY for auto-increment.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx_core::error::Error as SqlxError;
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_postgres::Postgres;

use super::models::{ImageFingerprint, RelayRecord, RelayStats};
use super::traits::Database;
use crate::error::RelayError;

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = Pool<Postgres>;

pub struct PgDatabase {
    pool: PgPool,
}

fn classify(err: SqlxError, what: &str) -> anyhow::Error {
    let unique = matches!(&err, SqlxError::Database(db) if db.is_unique_violation());
    let unavailable = matches!(
        err,
        SqlxError::Io(_) | SqlxError::Tls(_) | SqlxError::PoolTimedOut | SqlxError::PoolClosed
    );

    if unique {
        anyhow::Error::new(RelayError::DuplicateKey(what.to_string()))
    } else if unavailable {
        anyhow::Error::new(RelayError::StoreUnavailable(format!("{what}: {err}")))
    } else {
        anyhow::Error::new(err).context(format!("Query failed: {what}"))
    }
}

impl PgDatabase {
    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| classify(e, "connect"))
            .context("Failed to connect to PostgreSQL")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    ///
    /// Holds a session-level advisory lock on a dedicated connection so two
    /// instances starting together don't race to apply the same migration.
    /// The unlock always runs, even if a migration fails.
    async fn run_migrations(&self) -> Result<()> {
        // ASCII "TLRELAY\0" as a big-endian i64.
        const MIGRATION_LOCK_KEY: i64 = 0x544C_5245_4C41_5900_u64 as i64;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let migrations = [
                (
                    1,
                    include_str!("../../migrations/postgres/0001_initial.sql"),
                ),
                (
                    2,
                    include_str!("../../migrations/postgres/0002_retention_indexes.sql"),
                ),
            ];

            for (version, sql) in migrations {
                let applied: bool = sqlx_core::query::query(
                    "SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1",
                )
                .bind(version)
                .fetch_one(&self.pool)
                .await
                .map(|row| row.get::<bool, _>(0))
                .unwrap_or(false);

                if !applied {
                    // Schema change and schema_version insert commit together
                    let mut tx = self.pool.begin().await?;
                    sqlx_core::raw_sql::raw_sql(sql).execute(&mut *tx).await?;
                    tx.commit().await?;
                }
            }

            Ok(())
        }
        .await;

        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        // Migration error takes priority over unlock error.
        migration_result?;
        unlock_result?;

        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn table_count(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "table_count"))?;
        Ok(row.get::<i64, _>(0))
    }

    async fn relay_exists(&self, id: &str) -> Result<bool> {
        let row = sqlx_core::query::query("SELECT EXISTS(SELECT 1 FROM relay_records WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, "relay_exists"))?;
        Ok(row.get::<bool, _>(0))
    }

    async fn persist_relay(&self, record: &RelayRecord) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO relay_records
                (id, likes, reposts, replies, media_urls, text, posted_at, url, author_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&record.id)
        .bind(record.likes)
        .bind(record.reposts)
        .bind(record.replies)
        .bind(record.media_column())
        .bind(&record.text)
        .bind(record.posted_at)
        .bind(&record.url)
        .bind(&record.author_id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, &record.id))?;
        Ok(())
    }

    async fn sweep_relays_older_than(&self, max_age: Duration) -> Result<u64> {
        let result = sqlx_core::query::query("DELETE FROM relay_records WHERE created_at < $1")
            .bind(Utc::now() - max_age)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "sweep_relays"))?;
        Ok(result.rows_affected())
    }

    async fn is_suppressed(&self, author_id: &str) -> Result<bool> {
        let row = sqlx_core::query::query(
            "SELECT EXISTS(SELECT 1 FROM suppressed_authors WHERE author_id = $1)",
        )
        .bind(author_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "is_suppressed"))?;
        Ok(row.get::<bool, _>(0))
    }

    async fn suppress(&self, author_id: &str) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO suppressed_authors (author_id) VALUES ($1)
             ON CONFLICT(author_id) DO NOTHING",
        )
        .bind(author_id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "suppress"))?;
        Ok(())
    }

    async fn unsuppress(&self, author_id: &str) -> Result<u64> {
        let result = sqlx_core::query::query("DELETE FROM suppressed_authors WHERE author_id = $1")
            .bind(author_id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "unsuppress"))?;
        Ok(result.rows_affected())
    }

    async fn insert_fingerprint(
        &self,
        chat_id: i64,
        message_id: i64,
        segments: &[String; 4],
    ) -> Result<i64> {
        let row = sqlx_core::query::query(
            "INSERT INTO image_fingerprints (hash_a, hash_b, hash_c, hash_d, chat_id, message_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(&segments[0])
        .bind(&segments[1])
        .bind(&segments[2])
        .bind(&segments[3])
        .bind(chat_id)
        .bind(message_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "insert_fingerprint"))?;
        Ok(row.get::<i64, _>(0))
    }

    async fn fingerprint_candidates(
        &self,
        chat_id: i64,
        segments: &[String; 4],
    ) -> Result<Vec<ImageFingerprint>> {
        let rows = sqlx_core::query::query(
            "SELECT id, hash_a, hash_b, hash_c, hash_d, chat_id, message_id,
                    to_char(created_at, 'YYYY-MM-DD HH24:MI:SS') AS created_at
             FROM image_fingerprints
             WHERE chat_id = $1 AND (hash_a = $2 OR hash_b = $3 OR hash_c = $4 OR hash_d = $5)
             ORDER BY id",
        )
        .bind(chat_id)
        .bind(&segments[0])
        .bind(&segments[1])
        .bind(&segments[2])
        .bind(&segments[3])
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, "fingerprint_candidates"))?;

        Ok(rows
            .into_iter()
            .map(|r| ImageFingerprint {
                id: r.get(0),
                segments: [r.get(1), r.get(2), r.get(3), r.get(4)],
                chat_id: r.get(5),
                message_id: r.get(6),
                created_at: r.get(7),
            })
            .collect())
    }

    async fn sweep_fingerprints_older_than(&self, max_age: Duration) -> Result<u64> {
        let result =
            sqlx_core::query::query("DELETE FROM image_fingerprints WHERE created_at < $1")
                .bind(Utc::now() - max_age)
                .execute(&self.pool)
                .await
                .map_err(|e| classify(e, "sweep_fingerprints"))?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<RelayStats> {
        let row = sqlx_core::query::query(
            "SELECT
                (SELECT COUNT(*)::bigint FROM relay_records),
                (SELECT COUNT(*)::bigint FROM suppressed_authors),
                (SELECT COUNT(*)::bigint FROM image_fingerprints),
                (SELECT to_char(MAX(created_at), 'YYYY-MM-DD HH24:MI:SS') FROM relay_records)",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "stats"))?;

        Ok(RelayStats {
            relay_count: row.get(0),
            suppressed_count: row.get(1),
            fingerprint_count: row.get(2),
            last_relay_at: row.get(3),
        })
    }
}
