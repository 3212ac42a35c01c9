//! MySQL connection pool lifecycle and statement execution.
//!
//! # Security Features
//! - Credentials go straight from [`Credentials`](crate::security::Credentials)
//!   into the driver options and never into a URL or a log line
//! - Every session gets `MAX_EXECUTION_TIME` before the statement runs
//! - All caller values are bound as parameters
//! - Connections are returned to the pool on every exit path

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::models::{ColumnMetadata, QueryParam, RawOutcome, Row};
use crate::Result;
use async_trait::async_trait;
use base64::Engine as _;
use futures::TryStreamExt;
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column as _, Connection as _, Either, Executor as _, MySqlConnection, MySqlPool};
use sqlx::{Row as _, TypeInfo as _};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Extra time the client waits past the server-side budget before giving up.
pub const BACKSTOP_GRACE: Duration = Duration::from_secs(5);

/// Executes statements on behalf of the [`QueryExecutor`](crate::executor::QueryExecutor).
///
/// [`ConnectionGateway`] is the production implementation. The trait exists
/// so the executor pipeline can run against an in-memory backend in tests.
#[async_trait]
pub trait QueryBackend: Send + Sync + std::fmt::Debug {
    /// Opens the backend. Failure is fatal.
    async fn connect(&self) -> Result<()>;

    /// Closes the backend. Best-effort; never fails.
    async fn disconnect(&self);

    /// Whether statements can be run right now.
    fn is_ready(&self) -> bool;

    /// Runs one statement with bound parameters, keeping at most `row_limit`
    /// rows while counting all of them.
    async fn run(&self, sql: &str, params: &[QueryParam], row_limit: usize) -> Result<RawOutcome>;
}

/// Pooled connection to the target MySQL database.
#[derive(Debug)]
pub struct ConnectionGateway {
    config: Arc<GatewayConfig>,
    pool: RwLock<Option<MySqlPool>>,
}

impl ConnectionGateway {
    /// Creates an unconnected gateway. Call [`QueryBackend::connect`] next.
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    /// The configuration this gateway was built from.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn current_pool(&self) -> Result<MySqlPool> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|pool| !pool.is_closed())
            .cloned()
            .ok_or(GatewayError::NotConnected)
    }

    fn target(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.config.credentials.username(),
            self.config.host,
            self.config.port,
            self.config.database
        )
    }

    /// Runs `f` on a pooled connection that already has the session
    /// execution budget applied.
    ///
    /// The connection goes back to the pool when `f` finishes, fails, or is
    /// dropped mid-flight.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotConnected`] before `connect()`, an
    /// execution error if no connection frees up within the acquire timeout,
    /// or whatever `f` returns.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut MySqlConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let pool = self.current_pool()?;
        let mut conn = pool.acquire().await.map_err(GatewayError::execution_failed)?;

        let budget = format!(
            "SET SESSION MAX_EXECUTION_TIME={}",
            self.config.query_timeout_ms()
        );
        (&mut *conn)
            .execute(budget.as_str())
            .await
            .map_err(GatewayError::execution_failed)?;

        f(&mut *conn).await
    }
}

/// Driver options built from the config, password included.
pub(crate) fn connect_options(config: &GatewayConfig) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(config.credentials.username())
        .database(&config.database);

    match config.credentials.password() {
        Some(password) => options.password(password),
        None => options,
    }
}

#[async_trait]
impl QueryBackend for ConnectionGateway {
    async fn connect(&self) -> Result<()> {
        if self.current_pool().is_ok() {
            tracing::debug!("Connection pool already open");
            return Ok(());
        }

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            pool_size = self.config.pool_size,
            "Connecting to MySQL"
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(self.config.pool_size)
            .acquire_timeout(self.config.connect_timeout)
            .test_before_acquire(true)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    // Set timezone to UTC for consistent timestamps
                    conn.execute("SET time_zone = '+00:00'").await?;
                    Ok(())
                })
            })
            .connect_with(connect_options(&self.config))
            .await
            .map_err(|e| {
                GatewayError::connection_failed(format!("Failed to connect to {}", self.target()), e)
            })?;

        let mut conn = pool.acquire().await.map_err(|e| {
            GatewayError::connection_failed(
                format!("Failed to acquire a connection to {}", self.target()),
                e,
            )
        })?;
        conn.ping().await.map_err(|e| {
            GatewayError::connection_failed(format!("Ping to {} failed", self.target()), e)
        })?;
        drop(conn);

        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Some(pool);
        tracing::info!("Database connection established");
        Ok(())
    }

    async fn disconnect(&self) {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match pool {
            Some(pool) => {
                pool.close().await;
                tracing::info!("Database connection closed");
            }
            None => tracing::debug!("Disconnect requested with no open pool"),
        }
    }

    fn is_ready(&self) -> bool {
        self.current_pool().is_ok()
    }

    async fn run(&self, sql: &str, params: &[QueryParam], row_limit: usize) -> Result<RawOutcome> {
        let sql = sql.to_owned();
        let params = params.to_vec();
        let deadline = self.config.query_timeout + BACKSTOP_GRACE;

        let work = self.with_connection(move |conn| {
            Box::pin(async move { drain_statement(conn, &sql, &params, row_limit).await })
        });

        match tokio::time::timeout(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    "Statement abandoned after client-side deadline"
                );
                Err(GatewayError::timed_out(self.config.query_timeout))
            }
        }
    }
}

fn bind_param<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    param: &QueryParam,
) -> Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(b) => query.bind(*b),
        QueryParam::Int(i) => query.bind(*i),
        QueryParam::Float(f) => query.bind(*f),
        QueryParam::Text(s) => query.bind(s.clone()),
    }
}

/// Streams every result of one statement into a [`RawOutcome`].
///
/// Statements without parameters use the text protocol so that statements
/// MySQL cannot prepare still run.
async fn drain_statement(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[QueryParam],
    row_limit: usize,
) -> Result<RawOutcome> {
    let mut stream = if params.is_empty() {
        conn.fetch_many(sql)
    } else {
        let query = params.iter().fold(sqlx::query(sql), bind_param);
        conn.fetch_many(query)
    };

    let mut outcome = RawOutcome::default();
    while let Some(step) = stream
        .try_next()
        .await
        .map_err(GatewayError::execution_failed)?
    {
        match step {
            Either::Left(done) => {
                outcome.rows_affected += done.rows_affected();
                if done.last_insert_id() != 0 {
                    outcome.last_insert_id = done.last_insert_id();
                }
            }
            Either::Right(row) => {
                if outcome.columns.is_empty() {
                    outcome.columns = column_metadata(&row);
                }
                outcome.total_rows += 1;
                if outcome.rows.len() < row_limit {
                    outcome.rows.push(row_to_json(&row));
                }
            }
        }
    }

    Ok(outcome)
}

fn column_metadata(row: &MySqlRow) -> Vec<ColumnMetadata> {
    row.columns()
        .iter()
        .map(|column| ColumnMetadata::new(column.name(), column.type_info().name()))
        .collect()
}

/// Convert a database row to JSON.
fn row_to_json(row: &MySqlRow) -> Row {
    let mut map = Row::new();
    for column in row.columns() {
        let value = typed_value(row, column.ordinal(), column.type_info().name())
            .unwrap_or_else(|| extract_column_value(row, column.ordinal()));
        map.insert(column.name().to_string(), value);
    }
    map
}

/// Decodes types whose JSON form differs from what the generic chain would
/// produce.
fn typed_value(row: &MySqlRow, index: usize, type_name: &str) -> Option<JsonValue> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    let value = match type_name {
        "JSON" => row
            .try_get::<Option<sqlx::types::Json<JsonValue>>, _>(index)
            .ok()?
            .map(|json| json.0),
        "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .ok()?
            .map(|v| JsonValue::String(v.to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .ok()?
            .map(|v| JsonValue::String(v.to_rfc3339())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .ok()?
            .map(|v| JsonValue::String(v.to_string())),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(index)
            .ok()?
            .map(|v| JsonValue::String(v.to_string())),
        "BOOLEAN" => row.try_get::<Option<bool>, _>(index).ok()?.map(JsonValue::Bool),
        // Exact decimals stay strings so no precision is lost
        "DECIMAL" => row
            .try_get_unchecked::<Option<String>, _>(index)
            .ok()?
            .map(JsonValue::String),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()?
            .map(|bytes| JsonValue::String(base64::engine::general_purpose::STANDARD.encode(bytes))),
        _ => return None,
    };

    Some(value.unwrap_or(JsonValue::Null))
}

/// Extract a column value as a JSON value.
fn extract_column_value(row: &MySqlRow, index: usize) -> JsonValue {
    // Try different types in order of likelihood
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::String);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map_or(JsonValue::Null, |n| JsonValue::Number(n.into()));
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
        return v.map_or(JsonValue::Null, |n| JsonValue::Number(n.into()));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(index) {
        return v
            .and_then(|f| serde_json::Number::from_f64(f64::from(f)))
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::Bool);
    }
    if let Ok(v) = row.try_get_unchecked::<Option<String>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::String);
    }

    // Default to null for unsupported types
    JsonValue::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> ConnectionGateway {
        let config = GatewayConfig::new("shop")
            .with_host("db.internal")
            .with_port(3307)
            .with_credentials("reporter", Some("s3cret".to_string()));
        ConnectionGateway::new(Arc::new(config))
    }

    #[test]
    fn test_connect_options_follow_config() {
        let gateway = gateway();
        let options = connect_options(gateway.config());
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 3307);
        assert_eq!(options.get_username(), "reporter");
        assert_eq!(options.get_database(), Some("shop"));
    }

    #[test]
    fn test_target_omits_password() {
        let target = gateway().target();
        assert_eq!(target, "reporter@db.internal:3307/shop");
        assert!(!target.contains("s3cret"));
    }

    #[test]
    fn test_not_ready_before_connect() {
        assert!(!gateway().is_ready());
    }

    #[tokio::test]
    async fn test_run_before_connect_is_not_connected() {
        let error = gateway().run("SELECT 1", &[], 10).await.unwrap_err();
        assert!(matches!(error, GatewayError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_without_pool_is_harmless() {
        let gateway = gateway();
        gateway.disconnect().await;
        assert!(!gateway.is_ready());
    }
}
