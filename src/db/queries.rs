// Database queries: CRUD operations for all tables.
//
// Every SQLite interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};

use super::models::{format_timestamp, ImageFingerprint, RelayRecord, RelayStats};
use crate::error::RelayError;

/// Attach the typed error callers branch on to a rusqlite failure.
fn classify(err: rusqlite::Error, what: &str) -> anyhow::Error {
    let code = match &err {
        rusqlite::Error::SqliteFailure(e, _) => Some(e.code),
        _ => None,
    };
    match code {
        Some(ErrorCode::ConstraintViolation) => {
            anyhow::Error::new(RelayError::DuplicateKey(what.to_string()))
        }
        Some(ErrorCode::DatabaseBusy)
        | Some(ErrorCode::DatabaseLocked)
        | Some(ErrorCode::CannotOpen)
        | Some(ErrorCode::SystemIoFailure) => {
            anyhow::Error::new(RelayError::StoreUnavailable(format!("{what}: {err}")))
        }
        _ => anyhow::Error::new(err).context(format!("Query failed: {what}")),
    }
}

// --- Relay records ---

pub fn relay_exists(conn: &Connection, id: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM relay_records WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .map_err(|e| classify(e, "relay_exists"))
}

/// Insert a relay record. Fails with `RelayError::DuplicateKey` if the id
/// is already present.
pub fn insert_relay(conn: &Connection, record: &RelayRecord, now: DateTime<Utc>) -> Result<()> {
    let now = format_timestamp(now);
    conn.execute(
        "INSERT INTO relay_records
            (id, likes, reposts, replies, media_urls, text, posted_at, url, author_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            record.id,
            record.likes,
            record.reposts,
            record.replies,
            record.media_column(),
            record.text,
            record.posted_at.to_rfc3339(),
            record.url,
            record.author_id,
            now,
        ],
    )
    .map_err(|e| classify(e, &record.id))?;
    Ok(())
}

/// Delete relay records created before `cutoff`. Returns the number removed.
pub fn delete_relays_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<u64> {
    let n = conn
        .execute(
            "DELETE FROM relay_records WHERE created_at < ?1",
            params![format_timestamp(cutoff)],
        )
        .map_err(|e| classify(e, "delete_relays_before"))?;
    Ok(n as u64)
}

// --- Suppressed authors ---

pub fn is_suppressed(conn: &Connection, author_id: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM suppressed_authors WHERE author_id = ?1",
        params![author_id],
        |row| row.get(0),
    )
    .map_err(|e| classify(e, "is_suppressed"))
}

/// Mark an author as suppressed (upsert).
pub fn suppress(conn: &Connection, author_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO suppressed_authors (author_id) VALUES (?1)
         ON CONFLICT(author_id) DO NOTHING",
        params![author_id],
    )
    .map_err(|e| classify(e, "suppress"))?;
    Ok(())
}

pub fn unsuppress(conn: &Connection, author_id: &str) -> Result<u64> {
    let n = conn
        .execute(
            "DELETE FROM suppressed_authors WHERE author_id = ?1",
            params![author_id],
        )
        .map_err(|e| classify(e, "unsuppress"))?;
    Ok(n as u64)
}

// --- Image fingerprints ---

pub fn insert_fingerprint(
    conn: &Connection,
    chat_id: i64,
    message_id: i64,
    segments: &[String; 4],
    now: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO image_fingerprints (hash_a, hash_b, hash_c, hash_d, chat_id, message_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            segments[0],
            segments[1],
            segments[2],
            segments[3],
            chat_id,
            message_id,
            format_timestamp(now),
        ],
    )
    .map_err(|e| classify(e, "insert_fingerprint"))?;
    Ok(conn.last_insert_rowid())
}

/// Fingerprints in `chat_id` sharing at least one segment with `segments`.
pub fn fingerprint_candidates(
    conn: &Connection,
    chat_id: i64,
    segments: &[String; 4],
) -> Result<Vec<ImageFingerprint>> {
    let mut stmt = conn.prepare(
        "SELECT id, hash_a, hash_b, hash_c, hash_d, chat_id, message_id, created_at
         FROM image_fingerprints
         WHERE chat_id = ?1 AND (hash_a = ?2 OR hash_b = ?3 OR hash_c = ?4 OR hash_d = ?5)
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map(
            params![chat_id, segments[0], segments[1], segments[2], segments[3]],
            |row| {
                Ok(ImageFingerprint {
                    id: row.get(0)?,
                    segments: [row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?],
                    chat_id: row.get(5)?,
                    message_id: row.get(6)?,
                    created_at: row.get(7)?,
                })
            },
        )
        .map_err(|e| classify(e, "fingerprint_candidates"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| classify(e, "fingerprint_candidates"))?;
    Ok(rows)
}

pub fn delete_fingerprints_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<u64> {
    let n = conn
        .execute(
            "DELETE FROM image_fingerprints WHERE created_at < ?1",
            params![format_timestamp(cutoff)],
        )
        .map_err(|e| classify(e, "delete_fingerprints_before"))?;
    Ok(n as u64)
}

// --- Status ---

pub fn stats(conn: &Connection) -> Result<RelayStats> {
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };
    Ok(RelayStats {
        relay_count: count("SELECT COUNT(*) FROM relay_records")?,
        suppressed_count: count("SELECT COUNT(*) FROM suppressed_authors")?,
        fingerprint_count: count("SELECT COUNT(*) FROM image_fingerprints")?,
        last_relay_at: conn.query_row("SELECT MAX(created_at) FROM relay_records", [], |row| {
            row.get(0)
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;
    use crate::error::is_duplicate_key;
    use chrono::Duration;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn record(id: &str) -> RelayRecord {
        RelayRecord {
            id: id.to_string(),
            likes: 120,
            reposts: 4,
            replies: 2,
            media_urls: vec![
                "https://pbs.twimg.com/media/a.jpg".into(),
                "https://pbs.twimg.com/media/b.jpg".into(),
            ],
            text: "hello".into(),
            posted_at: "2024-05-01T12:00:00Z".parse().unwrap(),
            url: format!("https://x.com/artist/status/{id}"),
            author_id: "7".into(),
        }
    }

    #[test]
    fn test_insert_and_exists() {
        let conn = test_db();
        assert!(!relay_exists(&conn, "1790000000000000001").unwrap());
        insert_relay(&conn, &record("1790000000000000001"), Utc::now()).unwrap();
        assert!(relay_exists(&conn, "1790000000000000001").unwrap());
        assert!(!relay_exists(&conn, "1790000000000000002").unwrap());
    }

    #[test]
    fn test_duplicate_insert_is_typed() {
        let conn = test_db();
        insert_relay(&conn, &record("5"), Utc::now()).unwrap();
        let err = insert_relay(&conn, &record("5"), Utc::now()).unwrap_err();
        assert!(is_duplicate_key(&err));
    }

    #[test]
    fn test_sweep_removes_only_old_relays() {
        let conn = test_db();
        let now = Utc::now();
        insert_relay(&conn, &record("old"), now - Duration::days(91)).unwrap();
        insert_relay(&conn, &record("new"), now - Duration::days(1)).unwrap();

        let removed = delete_relays_before(&conn, now - Duration::days(90)).unwrap();
        assert_eq!(removed, 1);
        assert!(!relay_exists(&conn, "old").unwrap());
        assert!(relay_exists(&conn, "new").unwrap());
    }

    #[test]
    fn test_suppress_is_upsert_and_unsuppress_counts() {
        let conn = test_db();
        assert!(!is_suppressed(&conn, "7").unwrap());
        suppress(&conn, "7").unwrap();
        suppress(&conn, "7").unwrap();
        assert!(is_suppressed(&conn, "7").unwrap());
        assert_eq!(unsuppress(&conn, "7").unwrap(), 1);
        assert_eq!(unsuppress(&conn, "7").unwrap(), 0);
        assert!(!is_suppressed(&conn, "7").unwrap());
    }

    #[test]
    fn test_fingerprint_candidates_scoped_by_chat_and_segment() {
        let conn = test_db();
        let now = Utc::now();
        let seg = |s: [&str; 4]| s.map(String::from);

        insert_fingerprint(&conn, -100, 1, &seg(["aaaa", "bbbb", "cccc", "dddd"]), now).unwrap();
        insert_fingerprint(&conn, -100, 2, &seg(["0000", "0000", "0000", "dddd"]), now).unwrap();
        insert_fingerprint(&conn, -100, 3, &seg(["1111", "2222", "3333", "4444"]), now).unwrap();
        insert_fingerprint(&conn, -200, 4, &seg(["aaaa", "bbbb", "cccc", "dddd"]), now).unwrap();

        let found = fingerprint_candidates(&conn, -100, &seg(["aaaa", "ffff", "ffff", "dddd"])).unwrap();
        let ids: Vec<i64> = found.iter().map(|f| f.message_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_stats() {
        let conn = test_db();
        assert_eq!(stats(&conn).unwrap(), RelayStats::default());
        insert_relay(&conn, &record("1"), Utc::now()).unwrap();
        suppress(&conn, "9").unwrap();
        let s = stats(&conn).unwrap();
        assert_eq!(s.relay_count, 1);
        assert_eq!(s.suppressed_count, 1);
        assert!(s.last_relay_at.is_some());
    }
}
