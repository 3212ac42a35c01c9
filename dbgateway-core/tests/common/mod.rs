//! In-memory backend shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dbgateway_core::{ColumnMetadata, QueryBackend, QueryParam, RawOutcome, Result, Row};
use serde_json::Value as JsonValue;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;

/// Answers statements from canned outcomes matched by SQL prefix and
/// records everything it is asked to run.
#[derive(Debug)]
pub struct FakeBackend {
    ready: AtomicBool,
    hold: AtomicBool,
    gate: Semaphore,
    responses: Mutex<Vec<(String, RawOutcome)>>,
    calls: Mutex<Vec<(String, Vec<QueryParam>)>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            hold: AtomicBool::new(false),
            gate: Semaphore::new(0),
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    /// Answers statements starting with `prefix` with `outcome`.
    pub fn respond(self, prefix: &str, outcome: RawOutcome) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push((prefix.to_string(), outcome));
        self
    }

    /// Makes every statement wait for [`FakeBackend::open_gate`].
    pub fn held(self) -> Self {
        self.hold.store(true, Ordering::SeqCst);
        self
    }

    pub fn open_gate(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn calls(&self) -> Vec<(String, Vec<QueryParam>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls().into_iter().map(|(sql, _)| sql).collect()
    }
}

#[async_trait]
impl QueryBackend for FakeBackend {
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

        if self.hold.load(Ordering::SeqCst) {
            self.gate.acquire().await.unwrap().forget();
        }

        let mut outcome = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_default();
        outcome.rows.truncate(row_limit);
        Ok(outcome)
    }
}

/// Builds a row from a JSON object literal.
pub fn row(value: JsonValue) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

/// A single-column row set.
pub fn single_column(name: &str, values: &[&str]) -> RawOutcome {
    RawOutcome::rows(
        vec![ColumnMetadata::new(name, "VARCHAR")],
        values
            .iter()
            .map(|v| Row::from_iter([(name.to_string(), JsonValue::from(*v))]))
            .collect(),
    )
}

/// `DESCRIBE` output for a two-column table.
pub fn describe_orders() -> RawOutcome {
    RawOutcome::rows(
        vec![ColumnMetadata::new("Field", "VARCHAR")],
        vec![
            row(serde_json::json!({
                "Field": "id", "Type": "int", "Null": "NO", "Key": "PRI", "Default": null, "Extra": "auto_increment"
            })),
            row(serde_json::json!({
                "Field": "total", "Type": "decimal(10,2)", "Null": "YES", "Key": "", "Default": null, "Extra": ""
            })),
        ],
    )
}
