//! Schema introspection built on top of [`QueryExecutor`].
//!
//! Every statement issued here goes through the same rate limit and policy
//! checks as caller SQL.

use crate::error::IdentifierKind;
use crate::executor::QueryExecutor;
use crate::models::{
    ColumnDescriptor, ConnectionSummary, DatabaseSummary, ForeignKey, IndexDescriptor,
    QueryParam, QueryResult, TableConstraints, UniqueConstraint, text,
};
use crate::security::validate_identifier;
use crate::Result;

const FOREIGN_KEYS_SQL: &str = "SELECT CONSTRAINT_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
     FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL";

const UNIQUE_CONSTRAINTS_SQL: &str = "SELECT CONSTRAINT_NAME, COLUMN_NAME \
     FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
     AND CONSTRAINT_NAME != 'PRIMARY' AND REFERENCED_TABLE_NAME IS NULL";

const DATABASE_SIZE_SQL: &str = "SELECT CAST(ROUND(SUM(data_length + index_length) / 1024 / 1024, 2) AS CHAR) AS size_mb \
     FROM information_schema.tables WHERE table_schema = ?";

const VERSION_SQL: &str = "SELECT VERSION() AS version";

/// Read-only views of the target schema.
#[derive(Debug, Clone)]
pub struct SchemaIntrospector {
    executor: QueryExecutor,
}

impl SchemaIntrospector {
    /// Wraps an executor; every introspection query goes through its pipeline.
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// Names of all tables in the target database.
    ///
    /// # Errors
    /// Propagates executor errors.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let result = self.executor.execute_query("SHOW TABLES", &[]).await?;
        let key = format!("Tables_in_{}", self.executor.config().database);

        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                text(row, &key).or_else(|| row.values().next().and_then(|v| v.as_str().map(str::to_string)))
            })
            .collect())
    }

    /// Column descriptors of one table.
    ///
    /// # Errors
    /// Returns an invalid-identifier error for a bad table name, before any
    /// statement is issued.
    pub async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let table = validate_identifier(table, IdentifierKind::Table)?;
        let sql = format!("DESCRIBE {}", table.quoted());
        let result = self.executor.execute_query(&sql, &[]).await?;
        Ok(result.rows.iter().map(ColumnDescriptor::from_row).collect())
    }

    /// Table count, size, and server version, fetched concurrently.
    ///
    /// # Errors
    /// Fails if any of the three lookups fails.
    pub async fn database_summary(&self) -> Result<DatabaseSummary> {
        let config = self.executor.config();
        let database_param = [QueryParam::Text(config.database.clone())];

        let (tables, size, version) = tokio::try_join!(
            self.list_tables(),
            self.executor.execute_query(DATABASE_SIZE_SQL, &database_param),
            self.executor.execute_query(VERSION_SQL, &[]),
        )?;

        let size_mb = first_text(&size, "size_mb")
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let version = first_text(&version, "version").unwrap_or_default();

        Ok(DatabaseSummary {
            database: config.database.clone(),
            tables: tables.len(),
            size_mb,
            version,
            connection: ConnectionSummary {
                host: config.host.clone(),
                port: config.port,
                user: config.credentials.username().to_string(),
            },
        })
    }

    /// Index entries of one table.
    ///
    /// # Errors
    /// Returns an invalid-identifier error for a bad table name.
    pub async fn show_indexes(&self, table: &str) -> Result<Vec<IndexDescriptor>> {
        let table = validate_identifier(table, IdentifierKind::Table)?;
        let sql = format!("SHOW INDEX FROM {}", table.quoted());
        let result = self.executor.execute_query(&sql, &[]).await?;
        Ok(result.rows.iter().map(IndexDescriptor::from_row).collect())
    }

    /// Foreign keys and unique constraints of one table.
    ///
    /// # Errors
    /// Returns an invalid-identifier error for a bad table name.
    pub async fn show_constraints(&self, table: &str) -> Result<TableConstraints> {
        let table = validate_identifier(table, IdentifierKind::Table)?;
        let param = [QueryParam::Text(table.as_str().to_string())];

        let (foreign, unique) = tokio::try_join!(
            self.executor.execute_query(FOREIGN_KEYS_SQL, &param),
            self.executor.execute_query(UNIQUE_CONSTRAINTS_SQL, &param),
        )?;

        Ok(TableConstraints {
            table: table.as_str().to_string(),
            foreign_keys: foreign
                .rows
                .iter()
                .map(|row| ForeignKey {
                    constraint: text(row, "CONSTRAINT_NAME").unwrap_or_default(),
                    column: text(row, "COLUMN_NAME").unwrap_or_default(),
                    referenced_table: text(row, "REFERENCED_TABLE_NAME").unwrap_or_default(),
                    referenced_column: text(row, "REFERENCED_COLUMN_NAME").unwrap_or_default(),
                })
                .collect(),
            unique_constraints: unique
                .rows
                .iter()
                .map(|row| UniqueConstraint {
                    constraint: text(row, "CONSTRAINT_NAME").unwrap_or_default(),
                    column: text(row, "COLUMN_NAME").unwrap_or_default(),
                })
                .collect(),
        })
    }

    /// Execution plan of `sql`.
    ///
    /// The inner statement is classified on its own first, since
    /// `EXPLAIN ANALYZE` runs the statement it explains.
    ///
    /// # Errors
    /// Returns the policy rejection of the inner statement, if any.
    pub async fn explain(&self, sql: &str, params: &[QueryParam]) -> Result<QueryResult> {
        self.executor.policy().classify(sql).into_result()?;
        let explain = format!("EXPLAIN {sql}");
        self.executor.execute_query(&explain, params).await
    }
}

fn first_text(result: &QueryResult, key: &str) -> Option<String> {
    result.rows.first().and_then(|row| text(row, key))
}
