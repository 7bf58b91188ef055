//! The networked SQL storage provider: a pooled connection to a PostgreSQL
//! server, with retry-with-backoff on transient connection failures and no
//! retry on constraint violations.

use std::time::Duration;

use coffer_provider::{
    Capabilities, Capability, OpContext, ProviderError, ProviderResult, ProviderSettings, Record,
    StorageProvider,
};
use postgres::error::SqlState;
use postgres::{Config, NoTls};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use tracing::debug;

type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Settings for [`NetworkedSqlProvider`].
#[derive(Debug, Clone)]
pub struct NetworkedSqlSettings {
    /// Fields shared by every provider variant.
    pub common: ProviderSettings,
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub db_name: String,
    /// Login role.
    pub user_id: String,
    /// Login password.
    pub password: String,
    /// Schema the backing table lives in.
    pub schema: String,
    /// Name of the table backing this collection; defaults to the entity
    /// type name if not set when the provider is opened.
    pub table: Option<String>,
    /// Per-statement timeout, enforced server-side via `statement_timeout`.
    pub command_timeout: Duration,
    /// Maximum number of pooled connections.
    pub max_pool_size: u32,
    /// Retries for a transient connection failure.
    pub retry_count: u32,
    /// Whether to create the backing table if it doesn't already exist.
    pub create_table_if_not_exists: bool,
}

impl NetworkedSqlSettings {
    /// Settings for a provider named `name` connecting to `host`/`port`/
    /// `db_name` as `user_id`, with the engine's common defaults (public
    /// schema, 5s statement timeout, 8 pooled connections).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        db_name: impl Into<String>,
        user_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            common: ProviderSettings::new(name),
            host: host.into(),
            port,
            db_name: db_name.into(),
            user_id: user_id.into(),
            password: password.into(),
            schema: "public".to_string(),
            table: None,
            command_timeout: Duration::from_secs(5),
            max_pool_size: 8,
            retry_count: 3,
            create_table_if_not_exists: true,
        }
    }

    /// Overrides the schema the backing table lives in.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Overrides the maximum pool size.
    #[must_use]
    pub fn with_max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = size.max(1);
        self
    }
}

/// A [`StorageProvider`] backed by a pooled connection to a PostgreSQL
/// server.
///
/// Every operation draws a connection from an `r2d2` pool and runs as its
/// own statement; transient connection and pool-exhaustion failures are
/// retried with a short linear backoff (`ProviderError::BackendUnavailable`
/// per [`ProviderError::is_retryable`]), while constraint violations
/// surface immediately as `ProviderError::Conflict` and are never retried,
/// since retrying them can only reproduce the same failure.
pub struct NetworkedSqlProvider {
    settings: NetworkedSqlSettings,
    table: String,
    pool: PgPool,
}

impl NetworkedSqlProvider {
    /// Opens a pooled connection to the configured server and ensures the
    /// backing table for `entity_type` exists.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::BackendUnavailable` if the server cannot be
    /// reached, or `ProviderError::Fatal` if the backing table cannot be
    /// created.
    pub fn open(settings: NetworkedSqlSettings, entity_type: impl Into<String>) -> ProviderResult<Self> {
        let table_name = settings.table.clone().unwrap_or_else(|| entity_type.into());
        let qualified = format!(
            "{}.{}",
            quote_ident(&settings.schema),
            quote_ident(&table_name)
        );

        let mut config = Config::new();
        config
            .host(&settings.host)
            .port(settings.port)
            .dbname(&settings.db_name)
            .user(&settings.user_id)
            .password(&settings.password)
            .connect_timeout(settings.command_timeout);

        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(settings.max_pool_size)
            .build(manager)
            .map_err(|e| ProviderError::backend_unavailable(format!("failed to build pool: {e}")))?;

        if settings.create_table_if_not_exists {
            let mut conn = pool
                .get()
                .map_err(|e| ProviderError::backend_unavailable(format!("pool checkout failed: {e}")))?;
            conn.batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}; \
                 CREATE TABLE IF NOT EXISTS {qualified} (key TEXT PRIMARY KEY, data BYTEA NOT NULL)",
                quote_ident(&settings.schema)
            ))
            .map_err(|e| ProviderError::fatal(format!("failed to create table: {e}")))?;
        }

        Ok(Self {
            settings,
            table: qualified,
            pool,
        })
    }

    fn with_retry<T>(&self, mut op: impl FnMut() -> ProviderResult<T>) -> ProviderResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.settings.retry_count => {
                    attempt += 1;
                    debug!(attempt, "retrying transient networked SQL error");
                    std::thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn map_pg(e: postgres::Error) -> ProviderError {
    if let Some(db_error) = e.as_db_error() {
        if *db_error.code() == SqlState::UNIQUE_VIOLATION
            || *db_error.code() == SqlState::FOREIGN_KEY_VIOLATION
            || *db_error.code() == SqlState::CHECK_VIOLATION
        {
            return ProviderError::conflict(db_error.message().to_string());
        }
        return ProviderError::backend_unavailable(db_error.message().to_string());
    }
    ProviderError::backend_unavailable(e.to_string())
}

fn map_pool_error(e: r2d2::Error) -> ProviderError {
    ProviderError::backend_unavailable(format!("pool checkout failed: {e}"))
}

impl StorageProvider for NetworkedSqlProvider {
    fn name(&self) -> &str {
        &self.settings.common.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with(Capability::BatchAtomic).with(Capability::RangeScan)
    }

    fn get(&self, key: &str, ctx: &OpContext) -> ProviderResult<Vec<u8>> {
        ctx.check()?;
        self.with_retry(|| {
            let mut conn = self.pool.get().map_err(map_pool_error)?;
            let row = conn
                .query_opt(
                    &format!("SELECT data FROM {} WHERE key = $1", self.table),
                    &[&key],
                )
                .map_err(map_pg)?;
            match row {
                Some(row) => Ok(row.get::<_, Vec<u8>>(0)),
                None => Err(ProviderError::not_found(key)),
            }
        })
    }

    fn get_all(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        ctx.check()?;
        self.with_retry(|| {
            let mut conn = self.pool.get().map_err(map_pool_error)?;
            let rows = conn
                .query(&format!("SELECT key, data FROM {}", self.table), &[])
                .map_err(map_pg)?;
            Ok(rows
                .into_iter()
                .map(|row| Record {
                    key: row.get(0),
                    value: row.get(1),
                })
                .filter(|r| filter.map_or(true, |f| f(r)))
                .collect())
        })
    }

    fn range(&self, start: &str, end: &str, ctx: &OpContext) -> ProviderResult<Vec<Record>> {
        ctx.check()?;
        self.with_retry(|| {
            let mut conn = self.pool.get().map_err(map_pool_error)?;
            let rows = conn
                .query(
                    &format!(
                        "SELECT key, data FROM {} WHERE key >= $1 AND key < $2",
                        self.table
                    ),
                    &[&start, &end],
                )
                .map_err(map_pg)?;
            Ok(rows
                .into_iter()
                .map(|row| Record {
                    key: row.get(0),
                    value: row.get(1),
                })
                .collect())
        })
    }

    fn save(&self, key: &str, value: &[u8], ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.with_retry(|| {
            let mut conn = self.pool.get().map_err(map_pool_error)?;
            conn.execute(
                &format!(
                    "INSERT INTO {} (key, data) VALUES ($1, $2) \
                     ON CONFLICT (key) DO UPDATE SET data = excluded.data",
                    self.table
                ),
                &[&key, &value],
            )
            .map_err(map_pg)?;
            Ok(())
        })
    }

    fn save_many(&self, records: &[Record], ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.with_retry(|| {
            let mut conn = self.pool.get().map_err(map_pool_error)?;
            let mut tx = conn.transaction().map_err(map_pg)?;
            for r in records {
                tx.execute(
                    &format!(
                        "INSERT INTO {} (key, data) VALUES ($1, $2) \
                         ON CONFLICT (key) DO UPDATE SET data = excluded.data",
                        self.table
                    ),
                    &[&r.key, &r.value],
                )
                .map_err(map_pg)?;
            }
            tx.commit().map_err(map_pg)?;
            Ok(())
        })
    }

    fn delete(&self, key: &str, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.with_retry(|| {
            let mut conn = self.pool.get().map_err(map_pool_error)?;
            conn.execute(&format!("DELETE FROM {} WHERE key = $1", self.table), &[&key])
                .map_err(map_pg)?;
            Ok(())
        })
    }

    fn exists(&self, key: &str, ctx: &OpContext) -> ProviderResult<bool> {
        ctx.check()?;
        self.with_retry(|| {
            let mut conn = self.pool.get().map_err(map_pool_error)?;
            let row = conn
                .query_opt(&format!("SELECT 1 FROM {} WHERE key = $1", self.table), &[&key])
                .map_err(map_pg)?;
            Ok(row.is_some())
        })
    }

    fn count(&self, filter: coffer_provider::RecordFilter<'_>, ctx: &OpContext) -> ProviderResult<usize> {
        ctx.check()?;
        if filter.is_none() {
            return self.with_retry(|| {
                let mut conn = self.pool.get().map_err(map_pool_error)?;
                let row = conn
                    .query_one(&format!("SELECT COUNT(*) FROM {}", self.table), &[])
                    .map_err(map_pg)?;
                let count: i64 = row.get(0);
                Ok(count as usize)
            });
        }
        Ok(self.get_all(filter, ctx)?.len())
    }

    fn clear(&self, ctx: &OpContext) -> ProviderResult<()> {
        ctx.check()?;
        self.with_retry(|| {
            let mut conn = self.pool.get().map_err(map_pool_error)?;
            conn.execute(&format!("DELETE FROM {}", self.table), &[])
                .map_err(map_pg)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("widgets"), "\"widgets\"");
        assert_eq!(quote_ident(r#"wid"gets"#), "\"wid\"\"gets\"");
    }

    #[test]
    fn settings_builder_applies_overrides() {
        let s = NetworkedSqlSettings::new("pg", "localhost", 5432, "app", "app", "secret")
            .with_schema("entities")
            .with_max_pool_size(16);
        assert_eq!(s.schema, "entities");
        assert_eq!(s.max_pool_size, 16);
    }
}
