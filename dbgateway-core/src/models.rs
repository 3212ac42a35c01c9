//! Data carried across the gateway: bound parameters, raw backend output,
//! shaped results, and schema descriptors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One row as column name → JSON value.
pub type Row = Map<String, JsonValue>;

/// A value bound to a `?` placeholder.
///
/// Deserializes untagged from a JSON scalar: `null`, a boolean, an integer,
/// a float, or a string. Arrays and objects are rejected.
///
/// # Example
/// ```rust
/// use dbgateway_core::models::QueryParam;
///
/// let params: Vec<QueryParam> = serde_json::from_str(r#"[1, "a", null, 2.5, true]"#).unwrap();
/// assert_eq!(params[0], QueryParam::Int(1));
/// assert_eq!(params[2], QueryParam::Null);
/// assert_eq!(params[3], QueryParam::Float(2.5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// SQL `NULL`
    Null,
    /// Boolean, sent as `TINYINT(1)`
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Double-precision float
    Float(f64),
    /// String
    Text(String),
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for QueryParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for QueryParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Name and server type of a result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name or alias
    pub name: String,
    /// Server-reported type name
    #[serde(rename = "type")]
    pub type_name: String,
}

impl ColumnMetadata {
    /// Creates metadata for one column.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// What a backend produced for one statement, before shaping.
///
/// `rows` may already be capped by the backend; `total_rows` counts every
/// row the server sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutcome {
    /// Result columns; empty for mutations
    pub columns: Vec<ColumnMetadata>,
    /// Rows kept by the backend
    pub rows: Vec<Row>,
    /// Rows the server sent
    pub total_rows: u64,
    /// Rows changed by a mutation
    pub rows_affected: u64,
    /// Auto-increment id of the last inserted row
    pub last_insert_id: u64,
}

impl RawOutcome {
    /// An outcome carrying a row set.
    pub fn rows(columns: Vec<ColumnMetadata>, rows: Vec<Row>) -> Self {
        let total_rows = rows.len() as u64;
        Self {
            columns,
            rows,
            total_rows,
            ..Self::default()
        }
    }

    /// An outcome of a mutation.
    pub fn mutation(rows_affected: u64, last_insert_id: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id,
            ..Self::default()
        }
    }
}

/// Result of one statement as returned to callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Returned rows, at most `max_results`
    pub rows: Vec<Row>,
    /// Number of entries in `rows`
    pub row_count: usize,
    /// Result columns
    pub columns: Vec<ColumnMetadata>,
    /// Rows changed by a mutation
    pub affected_rows: u64,
    /// Auto-increment id of the last inserted row
    pub insert_id: u64,
    /// Rows the server produced, including any dropped by truncation
    pub total_rows: u64,
    /// Whether rows were dropped to honor `max_results`
    pub truncated: bool,
    /// Notes for the caller, such as truncation
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl QueryResult {
    /// Applies the row cap. Mutation counters pass through untouched.
    pub fn shape(raw: RawOutcome, max_results: usize) -> Self {
        let RawOutcome {
            columns,
            mut rows,
            total_rows,
            rows_affected,
            last_insert_id,
        } = raw;

        let total_rows = total_rows.max(rows.len() as u64);
        let truncated = total_rows > max_results as u64;
        let mut warnings = Vec::new();
        if truncated {
            rows.truncate(max_results);
            warnings.push(format!(
                "Result truncated to {max_results} rows ({total_rows} rows returned by the server)"
            ));
        }

        Self {
            row_count: rows.len(),
            rows,
            columns,
            affected_rows: rows_affected,
            insert_id: last_insert_id,
            total_rows,
            truncated,
            warnings,
        }
    }

    /// Whether the statement produced a row set.
    pub fn has_rows(&self) -> bool {
        !self.columns.is_empty() || !self.rows.is_empty()
    }
}

/// One line of `DESCRIBE <table>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnDescriptor {
    /// Column name
    pub field: String,
    /// Declared column type
    #[serde(rename = "Type")]
    pub column_type: String,
    /// `YES` or `NO`
    pub null: String,
    /// `PRI`, `UNI`, `MUL` or empty
    pub key: String,
    /// Default value, if any
    pub default: Option<String>,
    /// Extra attributes such as `auto_increment`
    pub extra: String,
}

impl ColumnDescriptor {
    /// Reads a descriptor from a `DESCRIBE` row.
    pub fn from_row(row: &Row) -> Self {
        Self {
            field: text(row, "Field").unwrap_or_default(),
            column_type: text(row, "Type").unwrap_or_default(),
            null: text(row, "Null").unwrap_or_default(),
            key: text(row, "Key").unwrap_or_default(),
            default: text(row, "Default"),
            extra: text(row, "Extra").unwrap_or_default(),
        }
    }

    /// Whether the column accepts NULL.
    pub fn is_nullable(&self) -> bool {
        self.null.eq_ignore_ascii_case("YES")
    }
}

/// One column of one index, from `SHOW INDEX`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDescriptor {
    /// Index name
    pub name: String,
    /// Indexed column
    pub column: String,
    /// Whether the index enforces uniqueness
    pub unique: bool,
    /// 1-based position of the column in the index
    pub sequence: u64,
    /// Index method, e.g. `BTREE`
    pub index_type: String,
}

impl IndexDescriptor {
    /// Reads a descriptor from a `SHOW INDEX` row.
    pub fn from_row(row: &Row) -> Self {
        Self {
            name: text(row, "Key_name").unwrap_or_default(),
            column: text(row, "Column_name").unwrap_or_default(),
            unique: integer(row, "Non_unique") == Some(0),
            sequence: integer(row, "Seq_in_index").unwrap_or(0),
            index_type: text(row, "Index_type").unwrap_or_default(),
        }
    }
}

/// A column that references another table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    /// Constraint name
    pub constraint: String,
    /// Referencing column
    pub column: String,
    /// Referenced table
    pub referenced_table: String,
    /// Referenced column
    pub referenced_column: String,
}

/// A column covered by a non-primary, non-foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueConstraint {
    /// Constraint name
    pub constraint: String,
    /// Constrained column
    pub column: String,
}

/// Constraints of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableConstraints {
    /// Table name
    pub table: String,
    /// Foreign keys declared on the table
    pub foreign_keys: Vec<ForeignKey>,
    /// Unique constraints declared on the table
    pub unique_constraints: Vec<UniqueConstraint>,
}

/// Where the gateway is connected, without credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database user
    pub user: String,
}

/// Summary of the target database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSummary {
    /// Database name
    pub database: String,
    /// Number of base tables
    pub tables: usize,
    /// Data plus index size in megabytes
    pub size_mb: f64,
    /// Server version string
    pub version: String,
    /// Connection target
    pub connection: ConnectionSummary,
}

/// Reads a column as text, accepting numbers too.
pub(crate) fn text(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Reads a column as an unsigned integer, accepting numeric strings too.
pub(crate) fn integer(row: &Row, key: &str) -> Option<u64> {
    match row.get(key)? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Bool(b) => Some(u64::from(*b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    fn numbered_rows(n: usize) -> Vec<Row> {
        (0..n).map(|i| row(json!({ "id": i }))).collect()
    }

    #[test]
    fn test_query_param_rejects_compound_values() {
        assert!(serde_json::from_str::<QueryParam>("[1]").is_err());
        assert!(serde_json::from_str::<QueryParam>(r#"{"a":1}"#).is_err());
    }

    #[test]
    fn test_query_param_from_option() {
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some("x")), QueryParam::Text("x".into()));
    }

    #[test]
    fn test_shape_truncates_to_max_results() {
        let raw = RawOutcome::rows(vec![ColumnMetadata::new("id", "BIGINT")], numbered_rows(1500));
        let result = QueryResult::shape(raw, 1000);

        assert_eq!(result.rows.len(), 1000);
        assert_eq!(result.row_count, 1000);
        assert_eq!(result.total_rows, 1500);
        assert!(result.truncated);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("1000"));
    }

    #[test]
    fn test_shape_keeps_small_results() {
        let raw = RawOutcome::rows(vec![ColumnMetadata::new("id", "BIGINT")], numbered_rows(3));
        let result = QueryResult::shape(raw, 1000);

        assert_eq!(result.rows.len(), 3);
        assert!(!result.truncated);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_shape_counts_rows_dropped_by_backend() {
        let mut raw = RawOutcome::rows(vec![ColumnMetadata::new("id", "BIGINT")], numbered_rows(10));
        raw.total_rows = 25;
        let result = QueryResult::shape(raw, 10);

        assert_eq!(result.rows.len(), 10);
        assert!(result.truncated);
        assert_eq!(result.total_rows, 25);
    }

    #[test]
    fn test_shape_leaves_mutations_alone() {
        let result = QueryResult::shape(RawOutcome::mutation(5000, 42), 10);
        assert_eq!(result.affected_rows, 5000);
        assert_eq!(result.insert_id, 42);
        assert!(!result.truncated);
        assert!(!result.has_rows());
    }

    #[test]
    fn test_column_descriptor_from_describe_row() {
        let descriptor = ColumnDescriptor::from_row(&row(json!({
            "Field": "id",
            "Type": "int",
            "Null": "NO",
            "Key": "PRI",
            "Default": null,
            "Extra": "auto_increment",
        })));

        assert_eq!(descriptor.field, "id");
        assert_eq!(descriptor.column_type, "int");
        assert!(!descriptor.is_nullable());
        assert_eq!(descriptor.default, None);

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["Type"], "int");
        assert_eq!(json["Extra"], "auto_increment");
    }

    #[test]
    fn test_index_descriptor_from_show_index_row() {
        let descriptor = IndexDescriptor::from_row(&row(json!({
            "Key_name": "PRIMARY",
            "Column_name": "id",
            "Non_unique": 0,
            "Seq_in_index": "1",
            "Index_type": "BTREE",
        })));

        assert!(descriptor.unique);
        assert_eq!(descriptor.sequence, 1);
        assert_eq!(descriptor.index_type, "BTREE");
    }
}
