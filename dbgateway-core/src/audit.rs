//! Audit records for statements that change data or schema.
//!
//! Every write allowed in write-mode produces exactly one [`AuditRecord`],
//! handed to the configured [`AuditSink`] before the statement runs.

use crate::security::excerpt;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Characters of SQL kept in an audit record.
pub const AUDIT_EXCERPT_CHARS: usize = 200;

/// One audited statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    /// Unique per record
    pub id: Uuid,
    /// When the record was taken
    pub timestamp: DateTime<Utc>,
    /// Always `WRITE_OPERATION` today
    pub action: &'static str,
    /// First 200 characters of the statement
    pub query: String,
    /// Database user the gateway connects as
    pub user: String,
    /// Target database name
    pub database: String,
    /// Advisory sensitive-pattern matches
    pub sensitive_patterns: Vec<&'static str>,
}

impl AuditRecord {
    /// Builds a write-operation record stamped with a fresh id and the
    /// current time.
    pub fn write_operation(
        sql: &str,
        user: &str,
        database: &str,
        sensitive_patterns: Vec<&'static str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: "WRITE_OPERATION",
            query: excerpt(sql, AUDIT_EXCERPT_CHARS).to_string(),
            user: user.to_string(),
            database: database.to_string(),
            sensitive_patterns,
        }
    }
}

/// Destination for audit records. Recording must not fail the statement.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Stores or emits one record.
    fn record(&self, record: &AuditRecord);
}

/// Emits each record as a structured event on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        tracing::warn!(
            target: "audit",
            id = %record.id,
            timestamp = %record.timestamp.to_rfc3339(),
            action = record.action,
            user = %record.user,
            database = %record.database,
            query = %record.query,
            sensitive = ?record.sensitive_patterns,
            "AUDIT"
        );
    }
}

/// Keeps records in memory; useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records so far, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records so far.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_operation_record() {
        let record = AuditRecord::write_operation("DROP TABLE customers", "admin", "shop", vec![]);
        assert_eq!(record.action, "WRITE_OPERATION");
        assert_eq!(record.query, "DROP TABLE customers");
        assert_eq!(record.user, "admin");
        assert_eq!(record.database, "shop");
        assert_eq!(record.id.get_version_num(), 4);
    }

    #[test]
    fn test_query_is_truncated_to_excerpt() {
        let sql = format!("INSERT INTO t VALUES ('{}')", "é".repeat(300));
        let record = AuditRecord::write_operation(&sql, "u", "d", vec![]);
        assert_eq!(record.query.chars().count(), AUDIT_EXCERPT_CHARS);
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        assert!(sink.is_empty());

        sink.record(&AuditRecord::write_operation("DELETE FROM a", "u", "d", vec![]));
        sink.record(&AuditRecord::write_operation("DELETE FROM b", "u", "d", vec![]));

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].query, "DELETE FROM a");
        assert_eq!(records[1].query, "DELETE FROM b");
    }

    #[test]
    fn test_record_serializes() {
        let record =
            AuditRecord::write_operation("UPDATE t SET token = ?", "u", "d", vec!["token"]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["action"], "WRITE_OPERATION");
        assert_eq!(json["sensitive_patterns"][0], "token");
    }
}
