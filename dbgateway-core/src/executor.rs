//! The query pipeline: rate limit, classify, audit, execute, shape, release.

use crate::audit::{AuditRecord, AuditSink, TracingAuditSink};
use crate::config::GatewayConfig;
use crate::connection::QueryBackend;
use crate::error::GatewayError;
use crate::models::{QueryParam, QueryResult};
use crate::rate_limit::RateLimiter;
use crate::security::{SecurityPolicy, excerpt};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;

/// Runs caller SQL through every gateway control.
///
/// A request is refused by the rate limiter before it is classified, and by
/// the policy before any connection is acquired. The rate-limit slot is
/// released on every path after admission, including cancellation.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    config: Arc<GatewayConfig>,
    backend: Arc<dyn QueryBackend>,
    limiter: RateLimiter,
    policy: SecurityPolicy,
    audit: Arc<dyn AuditSink>,
}

impl QueryExecutor {
    /// Creates an executor with a limiter built from the config and audit
    /// records going to the `audit` tracing target.
    pub fn new(config: Arc<GatewayConfig>, backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            limiter: RateLimiter::new(config.rate_limit),
            policy: SecurityPolicy::new(config.write_mode),
            audit: Arc::new(TracingAuditSink),
            config,
            backend,
        }
    }

    /// Replaces the audit destination.
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replaces the rate limiter (for example one on a manual clock).
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Configuration the executor was built with.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The statement policy, fixed at construction.
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// The limiter shared by every clone of this executor.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The backend statements run against.
    pub fn backend(&self) -> &Arc<dyn QueryBackend> {
        &self.backend
    }

    /// Executes one statement.
    ///
    /// # Errors
    /// - [`GatewayError::NotConnected`] if the backend is not ready
    /// - [`GatewayError::RateLimited`] if a ceiling is reached
    /// - [`GatewayError::Validation`] if the policy rejects the statement
    /// - [`GatewayError::Execution`] if the database fails it
    pub async fn execute_query(&self, sql: &str, params: &[QueryParam]) -> Result<QueryResult> {
        if !self.backend.is_ready() {
            return Err(GatewayError::NotConnected);
        }

        let mut admission = self.limiter.try_admit().map_err(|e| {
            let stats = self.limiter.stats();
            tracing::warn!(
                per_minute = stats.per_minute,
                per_hour = stats.per_hour,
                in_flight = stats.in_flight,
                "{e}"
            );
            GatewayError::from(e)
        })?;

        let outcome = self.run_admitted(sql, params).await;
        admission.release();
        outcome
    }

    async fn run_admitted(&self, sql: &str, params: &[QueryParam]) -> Result<QueryResult> {
        let clearance = self.policy.classify(sql).into_result()?;

        if clearance.audit_required {
            self.audit.record(&AuditRecord::write_operation(
                sql,
                self.config.credentials.username(),
                &self.config.database,
                clearance.sensitive_patterns,
            ));
        }

        let started = Instant::now();
        let raw = self
            .backend
            .run(sql, params, self.config.max_results)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    error = %e,
                    query = excerpt(sql, 100),
                    "Query execution failed"
                );
            })?;

        let result = QueryResult::shape(raw, self.config.max_results);
        tracing::debug!(
            rows = result.row_count,
            affected = result.affected_rows,
            truncated = result.truncated,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Query executed"
        );
        if result.truncated {
            tracing::warn!(
                total_rows = result.total_rows,
                max_results = self.config.max_results,
                "Result truncated"
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::RateLimitPolicy;
    use crate::error::{RateLimitError, ValidationError};
    use crate::models::{ColumnMetadata, RawOutcome, Row};
    use crate::rate_limit::ManualClock;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct ScriptedBackend {
        ready: AtomicBool,
        rows: usize,
        fail: bool,
        calls: Mutex<Vec<(String, Vec<QueryParam>)>>,
    }

    impl ScriptedBackend {
        fn new(rows: usize) -> Self {
            Self {
                ready: AtomicBool::new(true),
                rows,
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl QueryBackend for ScriptedBackend {
        async fn connect(&self) -> Result<()> {
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) {
            self.ready.store(false, Ordering::SeqCst);
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn run(&self, sql: &str, params: &[QueryParam], row_limit: usize) -> Result<RawOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            if self.fail {
                return Err(GatewayError::timed_out(std::time::Duration::from_millis(5)));
            }
            let rows: Vec<Row> = (0..self.rows.min(row_limit))
                .map(|i| {
                    let mut row = Row::new();
                    row.insert("id".to_string(), i.into());
                    row
                })
                .collect();
            let mut raw = RawOutcome::rows(vec![ColumnMetadata::new("id", "BIGINT")], rows);
            raw.total_rows = self.rows as u64;
            Ok(raw)
        }
    }

    fn executor(config: GatewayConfig, backend: Arc<ScriptedBackend>) -> QueryExecutor {
        QueryExecutor::new(Arc::new(config), backend)
    }

    #[tokio::test]
    async fn test_select_passes_through() {
        let backend = Arc::new(ScriptedBackend::new(3));
        let executor = executor(GatewayConfig::new("shop"), backend.clone());

        let result = executor
            .execute_query("SELECT id FROM orders WHERE id > ?", &[QueryParam::Int(0)])
            .await
            .unwrap();

        assert_eq!(result.row_count, 3);
        assert!(!result.truncated);
        assert_eq!(backend.calls(), 1);
        assert_eq!(executor.rate_limiter().stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_results_are_truncated_to_max_results() {
        let backend = Arc::new(ScriptedBackend::new(1500));
        let executor = executor(GatewayConfig::new("shop"), backend);

        let result = executor.execute_query("SELECT id FROM big", &[]).await.unwrap();
        assert_eq!(result.rows.len(), 1000);
        assert!(result.truncated);
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_not_ready_consumes_nothing() {
        let backend = Arc::new(ScriptedBackend::new(1));
        backend.disconnect().await;
        let executor = executor(GatewayConfig::new("shop"), backend.clone());

        let error = executor.execute_query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(error, GatewayError::NotConnected));
        assert_eq!(executor.rate_limiter().stats().per_minute, 0);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_query_never_reaches_backend() {
        let backend = Arc::new(ScriptedBackend::new(1));
        let config = GatewayConfig::new("shop")
            .with_rate_limit(RateLimitPolicy::default().with_max_per_minute(2));
        let limiter = RateLimiter::with_clock(config.rate_limit, Arc::new(ManualClock::new()));
        let executor = executor(config, backend.clone()).with_rate_limiter(limiter);

        executor.execute_query("SELECT 1", &[]).await.unwrap();
        executor.execute_query("SELECT 1", &[]).await.unwrap();
        let error = executor.execute_query("SELECT 1", &[]).await.unwrap_err();

        assert!(matches!(
            error,
            GatewayError::RateLimited(RateLimitError::PerMinuteExceeded { limit: 2, .. })
        ));
        assert!(error.is_retryable());
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_rejected_query_releases_slot_and_skips_backend() {
        let backend = Arc::new(ScriptedBackend::new(1));
        let executor = executor(GatewayConfig::new("shop"), backend.clone());

        let error = executor
            .execute_query("DROP TABLE customers", &[])
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            GatewayError::Validation(ValidationError::WriteInReadOnlyMode)
        ));
        assert_eq!(backend.calls(), 0);
        assert_eq!(executor.rate_limiter().stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_write_mode_audits_exactly_once() {
        let backend = Arc::new(ScriptedBackend::new(0));
        let sink = Arc::new(MemoryAuditSink::new());
        let executor = executor(
            GatewayConfig::new("shop")
                .with_write_mode(true)
                .with_credentials("admin", None),
            backend.clone(),
        )
        .with_audit_sink(sink.clone());

        executor
            .execute_query("DROP TABLE customers", &[])
            .await
            .unwrap();
        executor.execute_query("SELECT 1", &[]).await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].query, "DROP TABLE customers");
        assert_eq!(records[0].user, "admin");
        assert_eq!(records[0].database, "shop");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_audit_record_survives_failed_write() {
        let backend = Arc::new(ScriptedBackend {
            fail: true,
            ..ScriptedBackend::new(0)
        });
        let sink = Arc::new(MemoryAuditSink::new());
        let executor = executor(GatewayConfig::new("shop").with_write_mode(true), backend.clone())
            .with_audit_sink(sink.clone());

        let error = executor
            .execute_query("DROP TABLE customers", &[])
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::Execution { .. }));
        assert_eq!(backend.calls(), 1);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].query, "DROP TABLE customers");
        assert_eq!(executor.rate_limiter().stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_blocked_table_in_write_mode() {
        let backend = Arc::new(ScriptedBackend::new(1));
        let sink = Arc::new(MemoryAuditSink::new());
        let executor = executor(GatewayConfig::new("shop").with_write_mode(true), backend.clone())
            .with_audit_sink(sink.clone());

        let error = executor
            .execute_query("SELECT * FROM mysql.user", &[])
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "Access to table mysql.user is not allowed");
        assert!(sink.is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_execution_releases_slot() {
        let backend = Arc::new(ScriptedBackend {
            fail: true,
            ..ScriptedBackend::new(0)
        });
        let executor = executor(GatewayConfig::new("shop"), backend);

        let error = executor.execute_query("SELECT SLEEP(60)", &[]).await.unwrap_err();
        assert!(error.is_retryable());
        assert_eq!(executor.rate_limiter().stats().in_flight, 0);
    }
}
