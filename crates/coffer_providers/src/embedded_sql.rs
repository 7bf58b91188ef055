//! The embedded SQL storage provider: a single-file SQLite database with
//! write-ahead logging, each operation executing as a short transaction
//! through a small connection pool.

use std::path::PathBuf;
use std::sync::{Condvar, Mutex as StdMutex};
use std::thread;
use std::time::Duration;

use coffer_provider::{
    Capabilities, Capability, OpContext, ProviderError, ProviderResult, ProviderSettings, Record,
    StorageProvider,
};
use rusqlite::{Connection, Error as SqliteError, OpenFlags};
use tracing::debug;

/// Whether the database is opened read-write (creating it if absent) or
/// read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOpenMode {
    /// Open for read/write, creating the file if it does not exist.
    ReadWriteCreate,
    /// Open for reads only; writes fail with `BackendUnavailable`.
    ReadOnly,
}

/// Whether connections in the pool share SQLite's page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlCacheMode {
    /// Connections share a cache, reducing memory use for many readers.
    Shared,
    /// Each connection has its own private cache.
    Private,
}

/// Settings for [`EmbeddedSqlProvider`].
#[derive(Debug, Clone)]
pub struct EmbeddedSqlSettings {
    /// Fields shared by every provider variant.
    pub common: ProviderSettings,
    /// Path to the SQLite database file.
    pub data_source: PathBuf,
    /// Name of the table backing this collection; defaults to the entity
    /// type name if not set when the provider is opened.
    pub schema: Option<String>,
    /// Read/write mode.
    pub mode: SqlOpenMode,
    /// Page cache sharing mode.
    pub cache: SqlCacheMode,
    /// SQLite `journal_mode` pragma value (`WAL`, `DELETE`, ...).
    pub journal_mode: String,
    /// SQLite `synchronous` pragma value (`FULL`, `NORMAL`, `OFF`).
    pub synchronous_mode: String,
    /// SQLite `page_size` pragma value, in bytes.
    pub page_size: u32,
    /// SQLite `cache_size` pragma value, in pages (negative means KiB).
    pub cache_size: i32,
    /// Busy timeout applied to every connection before `SQLITE_BUSY` is
    /// surfaced as `BackendUnavailable`.
    pub command_timeout: Duration,
    /// Whether to create the backing table if it doesn't already exist.
    pub create_table_if_not_exists: bool,
    /// Number of pooled connections.
    pub pool_size: usize,
    /// Retries for a transient `SQLITE_BUSY`/`SQLITE_LOCKED` failure once
    /// the busy timeout itself has elapsed.
    pub retry_count: u32,
}

impl EmbeddedSqlSettings {
    /// Settings for a provider named `name` backed by the SQLite file at
    /// `data_source`, with the engine's common defaults (WAL journal mode,
    /// `NORMAL` synchronous, shared cache, 4 connections).
    #[must_use]
    pub fn new(name: impl Into<String>, data_source: impl Into<PathBuf>) -> Self {
        Self {
            common: ProviderSettings::new(name),
            data_source: data_source.into(),
            schema: None,
            mode: SqlOpenMode::ReadWriteCreate,
            cache: SqlCacheMode::Shared,
            journal_mode: "WAL".to_string(),
            synchronous_mode: "NORMAL".to_string(),
            page_size: 4096,
            cache_size: -2000,
            command_timeout: Duration::from_secs(5),
            create_table_if_not_exists: true,
            pool_size: 4,
            retry_count: 3,
        }
    }

    /// Overrides the read/write mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SqlOpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Overrides the pool size. Clamped to at least 1.
    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }
}

struct ConnectionPool {
    conns: StdMutex<Vec<Connection>>,
    cv: Condvar,
}

impl ConnectionPool {
    fn acquire(&self) -> PooledConnection<'_> {
        let mut conns = self.conns.lock().unwrap_or_else(|e| e.into_inner());
        while conns.is_empty() {
            conns = self.cv.wait(conns).unwrap_or_else(|e| e.into_inner());
        }
        let conn = conns.pop().expect("non-empty under lock");
        PooledConnection {
            pool: self,
            conn: Some(conn),
        }
    }

    fn release(&self, conn: Connection) {
        self.conns.lock().unwrap_or_else(|e| e.into_inner()).push(conn);
        self.cv.notify_one();
    }
}

struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl std::ops::Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// A [`StorageProvider`] backed by a single-file SQLite database.
///
/// Every operation runs as its own short transaction; readers and writers
/// alike draw a connection from a small fixed-size pool sized by
/// `pool_size`, so concurrent callers serialize only on SQLite's own
/// locking (WAL mode lets readers proceed while a single writer commits).
pub struct EmbeddedSqlProvider {
    settings: EmbeddedSqlSettings,
    table: String,
    pool: ConnectionPool,
}

impl EmbeddedSqlProvider {
    /// Opens (creating if configured) the provider for `entity_type`
    /// backed by `settings.data_source`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::BackendUnavailable` if the database file or
    /// any pooled connection cannot be opened, or `ProviderError::Fatal`
    /// if the backing table cannot be created.
    pub fn open(settings: EmbeddedSqlSettings, entity_type: impl Into<String>) -> ProviderResult<Self> {
        let table = quote_ident(settings.schema.clone().unwrap_or_else(|| entity_type.into()).as_str());

        if let Some(parent) = settings.data_source.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ProviderError::backend_unavailable(format!("failed to create database directory: {e}"))
            })?;
        }

        let mut conns = Vec::with_capacity(settings.pool_size);
        for _ in 0..settings.pool_size {
            conns.push(open_connection(&settings)?);
        }

        if settings.create_table_if_not_exists && settings.mode == SqlOpenMode::ReadWriteCreate {
            conns[0]
                .execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} (key TEXT PRIMARY KEY, data BLOB NOT NULL)"
                ))
                .map_err(map_sqlite)?;
        }

        Ok(Self {
            settings,
            table,
            pool: ConnectionPool {
                conns: StdMutex::new(conns),
                cv: Condvar::new(),
            },
        })
    }

    fn with_retry<T>(&self, mut op: impl FnMut() -> ProviderResult<T>) -> ProviderResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.settings.retry_count => {
                    attempt += 1;
                    debug!(attempt, "retrying transient SQLite busy/locked error");
                    thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn ensure_writable(&self) -> ProviderResult<()> {
        if self.settings.mode == SqlOpenMode::ReadOnly {
            return Err(ProviderError::backend_unavailable(
                "provider opened read-only",
            ));
        }
        Ok(())
    }
}

fn open_connection(settings: &EmbeddedSqlSettings) -> ProviderResult<Connection> {
    let mut flags = match settings.mode {
        SqlOpenMode::ReadWriteCreate => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        SqlOpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
    };
    flags |= match settings.cache {
        SqlCacheMode::Shared => OpenFlags::SQLITE_OPEN_SHARED_CACHE,
        SqlCacheMode::Private => OpenFlags::SQLITE_OPEN_PRIVATE_CACHE,
    };
    flags |= OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let conn = Connection::open_with_flags(&settings.data_source, flags).map_err(map_sqlite)?;
    conn.busy_timeout(settings.command_timeout).map_err(map_sqlite)?;
    conn.pragma_update(None, "journal_mode", &settings.journal_mode)
        .map_err(map_sqlite)?;
    conn.pragma_update(None, "synchronous", &settings.synchronous_mode)
        .map_err(map_sqlite)?;
    conn.pragma_update(None, "page_size", settings.page_size)
        .map_err(map_sqlite)?;
    conn.pragma_update(None, "cache_size", settings.cache_size)
        .map_err(map_sqlite)?;
    Ok(conn)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn map_sqlite(e: SqliteError) -> ProviderError {
    match e {
        SqliteError::QueryReturnedNoRows => ProviderError::not_found("<sqlite row>"),
        SqliteError::SqliteFailure(err, ref message)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) =>
        {
            ProviderError::backend_unavailable(message.clone().unwrap_or_else(|| err.to_string()))
        }
        other => ProviderError::corrupt(other.to_string()),
    }
}

impl StorageProvider for EmbeddedSqlProvider {
    fn name(&self) -> &str {
        &self.settings.common.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with(Capability::BatchAtomic).with(Capability::RangeScan)
    }

    fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<Vec<u8>> {
        ctx.check()?;
        self.with_retry(|| {
            let conn = self.pool.acquire();
            conn.query_row(
                &format!("SELECT data FROM {} WHERE key = ?1", self.table),
                [key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .map_err(|e| match e {
                SqliteError::QueryReturnedNoRows => ProviderError::not_found(key),
                other => map_sqlite(other),
            })
        })
    }

    fn get_all(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        ctx.check()?;
        self.with_retry(|| {
            let conn = self.pool.acquire();
            let mut stmt = conn
                .prepare(&format!("SELECT key, data FROM {}", self.table))
                .map_err(map_sqlite)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Record {
                        key: row.get(0)?,
                        value: row.get(1)?,
                    })
                })
                .map_err(map_sqlite)?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite)
                .map(|records: Vec<Record>| {
                    records
                        .into_iter()
                        .filter(|r| filter.map_or(true, |f| f(r)))
                        .collect()
                })
        })
    }

    fn range(&self, start: &str, end: &str, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        ctx.check()?;
        self.with_retry(|| {
            let conn = self.pool.acquire();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT key, data FROM {} WHERE key >= ?1 AND key < ?2",
                    self.table
                ))
                .map_err(map_sqlite)?;
            let rows = stmt
                .query_map([start, end], |row| {
                    Ok(Record {
                        key: row.get(0)?,
                        value: row.get(1)?,
                    })
                })
                .map_err(map_sqlite)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite)
        })
    }

    fn save(&self, key: &str, value: &[u8], ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.ensure_writable()?;
        self.with_retry(|| {
            let conn = self.pool.acquire();
            conn.execute(
                &format!(
                    "INSERT INTO {} (key, data) VALUES (?1, ?2) \
                     ON CONFLICT(key) DO UPDATE SET data = excluded.data",
                    self.table
                ),
                rusqlite::params![key, value],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
    }

    fn save_many(&self, records: &[Record], ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.ensure_writable()?;
        self.with_retry(|| {
            let mut conn = self.pool.acquire();
            let tx = conn.transaction().map_err(map_sqlite)?;
            for r in records {
                tx.execute(
                    &format!(
                        "INSERT INTO {} (key, data) VALUES (?1, ?2) \
                         ON CONFLICT(key) DO UPDATE SET data = excluded.data",
                        self.table
                    ),
                    rusqlite::params![r.key, r.value],
                )
                .map_err(map_sqlite)?;
            }
            tx.commit().map_err(map_sqlite)?;
            Ok(())
        })
    }

    fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.ensure_writable()?;
        self.with_retry(|| {
            let conn = self.pool.acquire();
            conn.execute(&format!("DELETE FROM {} WHERE key = ?1", self.table), [key])
                .map_err(map_sqlite)?;
            Ok(())
        })
    }

    fn exists(&self, key: &str, ctx: &OpContext) -> ProviderResult<bool> {
        ctx.check()?;
        self.with_retry(|| {
            let conn = self.pool.acquire();
            conn.query_row(
                &format!("SELECT 1 FROM {} WHERE key = ?1", self.table),
                [key],
                |_| Ok(()),
            )
            .optional()
            .map_err(map_sqlite)
            .map(|row| row.is_some())
        })
    }

    fn count(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<usize> {
        ctx.check()?;
        if filter.is_none() {
            return self.with_retry(|| {
                let conn = self.pool.acquire();
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(map_sqlite)
                .map(|n| n as usize)
            });
        }
        Ok(self.get_all(filter, ctx)?.len())
    }

    fn clear(&self, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.ensure_writable()?;
        self.with_retry(|| {
            let conn = self.pool.acquire();
            conn.execute(&format!("DELETE FROM {}", self.table), [])
                .map_err(map_sqlite)?;
            Ok(())
        })
    }
}

use rusqlite::OptionalExtension;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx() -> OpContext {
        OpContext::none()
    }

    fn provider(path: &std::path::Path) -> EmbeddedSqlProvider {
        let settings = EmbeddedSqlSettings::new("sqlite", path);
        EmbeddedSqlProvider::open(settings, "widgets").unwrap()
    }

    #[test]
    fn save_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let p = provider(&dir.path().join("db.sqlite3"));
        p.save("w1", b"payload", &ctx()).unwrap();
        assert_eq!(p.get("w1", &ctx()).unwrap(), b"payload");
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let p = provider(&dir.path().join("db.sqlite3"));
        let err = p.get("missing", &ctx()).unwrap_err();
        assert_eq!(err.kind(), coffer_provider::ErrorKind::NotFound);
    }

    #[test]
    fn overwrite_replaces_value() {
        let dir = tempdir().unwrap();
        let p = provider(&dir.path().join("db.sqlite3"));
        p.save("w1", b"first", &ctx()).unwrap();
        p.save("w1", b"second", &ctx()).unwrap();
        assert_eq!(p.get("w1", &ctx()).unwrap(), b"second");
        assert_eq!(p.count(None, &ctx()).unwrap(), 1);
    }

    #[test]
    fn delete_then_exists_false() {
        let dir = tempdir().unwrap();
        let p = provider(&dir.path().join("db.sqlite3"));
        p.save("w1", b"v", &ctx()).unwrap();
        p.delete("w1", &ctx()).unwrap();
        assert!(!p.exists("w1", &ctx()).unwrap());
    }

    #[test]
    fn save_many_is_one_transaction() {
        let dir = tempdir().unwrap();
        let p = provider(&dir.path().join("db.sqlite3"));
        let records = vec![
            Record { key: "a".into(), value: b"1".to_vec() },
            Record { key: "b".into(), value: b"2".to_vec() },
        ];
        p.save_many(&records, &ctx()).unwrap();
        assert_eq!(p.count(None, &ctx()).unwrap(), 2);
    }

    #[test]
    fn clear_removes_all_rows() {
        let dir = tempdir().unwrap();
        let p = provider(&dir.path().join("db.sqlite3"));
        p.save("a", b"1", &ctx()).unwrap();
        p.save("b", b"2", &ctx()).unwrap();
        p.clear(&ctx()).unwrap();
        assert_eq!(p.count(None, &ctx()).unwrap(), 0);
    }

    #[test]
    fn reopen_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.sqlite3");
        {
            let p = provider(&path);
            p.save("persist", b"V", &ctx()).unwrap();
        }
        let p = provider(&path);
        assert_eq!(p.get("persist", &ctx()).unwrap(), b"V");
    }
}
