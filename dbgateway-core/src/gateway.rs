//! The single entry point the MCP layer and the CLI talk to.

use crate::audit::AuditSink;
use crate::config::GatewayConfig;
use crate::connection::{ConnectionGateway, QueryBackend};
use crate::error::GatewayError;
use crate::executor::QueryExecutor;
use crate::introspect::SchemaIntrospector;
use crate::models::{
    ColumnDescriptor, DatabaseSummary, IndexDescriptor, QueryParam, QueryResult, TableConstraints,
};
use crate::rate_limit::{RateLimitStats, RateLimiter};
use crate::statements::{self, AlterColumn, AlterKind, Assignments, ColumnDefinition, Statement};
use crate::Result;
use std::sync::Arc;

const WRITE_DISABLED: &str = "Write operations are not enabled. Set ALLOW_WRITE_OPERATIONS=true";

/// Database access gateway: connection lifecycle, caller SQL, schema
/// introspection, and the structured write operations.
///
/// Cheap to clone; clones share the pool, the rate limiter, and the audit
/// sink.
#[derive(Debug, Clone)]
pub struct Gateway {
    executor: QueryExecutor,
    introspector: SchemaIntrospector,
}

impl Gateway {
    /// Builds a gateway backed by a MySQL pool. Nothing is opened until
    /// [`Gateway::connect`].
    ///
    /// # Errors
    /// Returns a configuration error if `config` fails validation.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let backend = Arc::new(ConnectionGateway::new(Arc::clone(&config)));
        Ok(Self::with_backend(config, backend))
    }

    /// Builds a gateway over any [`QueryBackend`].
    pub fn with_backend(config: Arc<GatewayConfig>, backend: Arc<dyn QueryBackend>) -> Self {
        Self::from_executor(QueryExecutor::new(config, backend))
    }

    fn from_executor(executor: QueryExecutor) -> Self {
        Self {
            introspector: SchemaIntrospector::new(executor.clone()),
            executor,
        }
    }

    /// Sends audit records to `sink` instead of the `audit` tracing target.
    #[must_use]
    pub fn with_audit_sink(self, sink: Arc<dyn AuditSink>) -> Self {
        Self::from_executor(self.executor.with_audit_sink(sink))
    }

    /// Replaces the rate limiter (for example one on a manual clock).
    #[must_use]
    pub fn with_rate_limiter(self, limiter: RateLimiter) -> Self {
        Self::from_executor(self.executor.with_rate_limiter(limiter))
    }

    /// Configuration the gateway was built with.
    pub fn config(&self) -> &GatewayConfig {
        self.executor.config()
    }

    /// Whether write operations are enabled.
    pub fn write_mode(&self) -> bool {
        self.executor.policy().write_mode()
    }

    /// Current rate limiter counters.
    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.executor.rate_limiter().stats()
    }

    /// Opens the pool and verifies it with a ping.
    ///
    /// # Errors
    /// Returns [`GatewayError::Connection`] if the server is unreachable.
    pub async fn connect(&self) -> Result<()> {
        self.executor.backend().connect().await
    }

    /// Closes the pool. Failures are logged, never returned.
    pub async fn disconnect(&self) {
        self.executor.backend().disconnect().await;
    }

    /// Whether the pool is open.
    pub fn is_ready(&self) -> bool {
        self.executor.backend().is_ready()
    }

    /// Runs caller SQL through the full pipeline.
    ///
    /// # Errors
    /// See [`QueryExecutor::execute_query`].
    pub async fn execute_query(&self, sql: &str, params: &[QueryParam]) -> Result<QueryResult> {
        self.executor.execute_query(sql, params).await
    }

    /// # Errors
    /// Propagates executor errors.
    pub async fn get_table_list(&self) -> Result<Vec<String>> {
        self.introspector.list_tables().await
    }

    /// # Errors
    /// Fails with an invalid-identifier error before reaching the database.
    pub async fn get_table_schema(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.introspector.describe_table(table).await
    }

    /// # Errors
    /// Propagates executor errors.
    pub async fn get_database_info(&self) -> Result<DatabaseSummary> {
        self.introspector.database_summary().await
    }

    /// # Errors
    /// Propagates executor errors.
    pub async fn show_indexes(&self, table: &str) -> Result<Vec<IndexDescriptor>> {
        self.introspector.show_indexes(table).await
    }

    /// # Errors
    /// Propagates executor errors.
    pub async fn show_constraints(&self, table: &str) -> Result<TableConstraints> {
        self.introspector.show_constraints(table).await
    }

    /// # Errors
    /// Returns the policy rejection of `sql` itself, if any.
    pub async fn explain(&self, sql: &str, params: &[QueryParam]) -> Result<QueryResult> {
        self.introspector.explain(sql, params).await
    }

    /// Inserts one row.
    ///
    /// # Errors
    /// Fails outside write-mode, on invalid input, or with any executor error.
    pub async fn insert(&self, table: &str, data: &Assignments) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::insert(table, data)?).await
    }

    /// # Errors
    /// Fails outside write-mode or when `filter` is empty.
    pub async fn update(
        &self,
        table: &str,
        data: &Assignments,
        filter: &Assignments,
    ) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::update(table, data, filter)?).await
    }

    /// # Errors
    /// Fails outside write-mode or when `filter` is empty.
    pub async fn delete(&self, table: &str, filter: &Assignments) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::delete(table, filter)?).await
    }

    /// # Errors
    /// Fails outside write-mode or when a row does not match `columns`.
    pub async fn bulk_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<QueryParam>],
    ) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::bulk_insert(table, columns, rows)?).await
    }

    /// # Errors
    /// Fails outside write-mode or on an unsupported column type.
    pub async fn create_table(&self, table: &str, columns: &[ColumnDefinition]) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::create_table(table, columns)?).await
    }

    /// # Errors
    /// Fails outside write-mode or when `column` lacks what `kind` needs.
    pub async fn alter_table(
        &self,
        table: &str,
        kind: AlterKind,
        column: Option<&AlterColumn>,
    ) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::alter_table(table, kind, column)?).await
    }

    /// # Errors
    /// Fails outside write-mode or unless `confirm` is true.
    pub async fn drop_table(&self, table: &str, confirm: bool) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::drop_table(table, confirm)?).await
    }

    /// # Errors
    /// Fails outside write-mode or on an invalid identifier.
    pub async fn add_index(
        &self,
        table: &str,
        name: &str,
        columns: &[String],
        unique: bool,
    ) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::add_index(table, name, columns, unique)?).await
    }

    /// # Errors
    /// Fails outside write-mode or on an invalid identifier.
    pub async fn drop_index(&self, table: &str, name: &str) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::drop_index(table, name)?).await
    }

    /// # Errors
    /// Fails outside write-mode or on an invalid identifier.
    pub async fn rename_table(&self, old_name: &str, new_name: &str) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::rename_table(old_name, new_name)?).await
    }

    /// # Errors
    /// Fails outside write-mode or on an invalid procedure name.
    pub async fn call_procedure(&self, name: &str, params: &[QueryParam]) -> Result<QueryResult> {
        self.ensure_write_mode()?;
        self.run(statements::call_procedure(name, params)?).await
    }

    fn ensure_write_mode(&self) -> Result<()> {
        if self.write_mode() {
            Ok(())
        } else {
            Err(GatewayError::invalid_request(WRITE_DISABLED))
        }
    }

    async fn run(&self, statement: Statement) -> Result<QueryResult> {
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "Running generated statement");
        self.executor
            .execute_query(&statement.sql, &statement.params)
            .await
    }
}
