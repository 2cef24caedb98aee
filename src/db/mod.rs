// Database layer: relay history, suppressed authors and image fingerprints.
//
// SQLite (rusqlite, bundled) is the default backend; PostgreSQL is available
// behind the `postgres` feature. DATABASE_URL picks one: a `postgres://` URL
// selects PostgreSQL, anything else is treated as a SQLite path (an optional
// `sqlite://` prefix is stripped).

pub mod models;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod queries;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use anyhow::Result;

pub use traits::Database;

/// Which backend a DATABASE_URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Sqlite(String),
    Postgres(String),
}

impl Backend {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Backend::Postgres(url.to_string())
        } else {
            let path = url
                .strip_prefix("sqlite://")
                .or_else(|| url.strip_prefix("sqlite:"))
                .unwrap_or(url);
            Backend::Sqlite(path.to_string())
        }
    }
}

/// Open (or create) the database and run migrations.
///
/// Called by `init` and by every command that writes.
pub async fn initialize(url: &str) -> Result<Arc<dyn Database>> {
    match Backend::from_url(url) {
        Backend::Sqlite(path) => initialize_sqlite(&path),
        Backend::Postgres(url) => connect_postgres(&url).await,
    }
}

/// Open an existing database (SQLite fails if the file doesn't exist yet).
pub async fn open(url: &str) -> Result<Arc<dyn Database>> {
    match Backend::from_url(url) {
        Backend::Sqlite(path) => open_sqlite(&path),
        Backend::Postgres(url) => connect_postgres(&url).await,
    }
}

#[cfg(feature = "sqlite")]
pub fn initialize_sqlite(db_path: &str) -> Result<Arc<dyn Database>> {
    use anyhow::Context;
    use std::path::Path;

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {}", db_path))?;
        }
    }

    let conn = rusqlite::Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    // WAL lets the status command read while the bot writes
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    schema::create_tables(&conn)?;

    Ok(Arc::new(sqlite::SqliteDatabase::new(conn)))
}

#[cfg(feature = "sqlite")]
pub fn open_sqlite(db_path: &str) -> Result<Arc<dyn Database>> {
    use anyhow::Context;
    use std::path::Path;

    if !Path::new(db_path).exists() {
        anyhow::bail!(
            "Database not found at {}. Run `timeline-relay init` first.",
            db_path
        );
    }

    let conn = rusqlite::Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    // Pick up migrations added since the file was created
    schema::create_tables(&conn)?;

    Ok(Arc::new(sqlite::SqliteDatabase::new(conn)))
}

#[cfg(not(feature = "sqlite"))]
pub fn initialize_sqlite(_db_path: &str) -> Result<Arc<dyn Database>> {
    anyhow::bail!("SQLite support not compiled in. Rebuild with --features sqlite.")
}

#[cfg(not(feature = "sqlite"))]
pub fn open_sqlite(db_path: &str) -> Result<Arc<dyn Database>> {
    initialize_sqlite(db_path)
}

#[cfg(feature = "postgres")]
pub async fn connect_postgres(url: &str) -> Result<Arc<dyn Database>> {
    let db = postgres::PgDatabase::connect(url).await?;
    Ok(Arc::new(db))
}

#[cfg(not(feature = "postgres"))]
pub async fn connect_postgres(_url: &str) -> Result<Arc<dyn Database>> {
    anyhow::bail!("PostgreSQL support not compiled in. Rebuild with --features postgres.")
}
