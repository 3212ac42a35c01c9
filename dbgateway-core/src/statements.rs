//! Builders for the structured write operations.
//!
//! Each builder validates every identifier, binds every value as a `?`
//! parameter, and returns a [`Statement`]. DDL cannot bind parameters, so
//! column types are checked against [`column_type_pattern`] and string
//! defaults are escaped with [`escape_string_literal`].

use crate::error::{GatewayError, IdentifierKind};
use crate::models::QueryParam;
use crate::security::{escape_string_literal, safe_identifier};
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Column name → value. Ordered so generated SQL is deterministic.
pub type Assignments = BTreeMap<String, QueryParam>;

/// SQL text with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `?` placeholders
    pub sql: String,
    /// Values bound to the placeholders, in order
    pub params: Vec<QueryParam>,
}

impl Statement {
    fn new(sql: String, params: Vec<QueryParam>) -> Self {
        Self { sql, params }
    }

    fn ddl(sql: String) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Accepts type names like `INT`, `VARCHAR(255)`, `DECIMAL(10, 2) UNSIGNED`,
/// `DOUBLE PRECISION`, or `ENUM('a','b')`.
#[allow(clippy::expect_used)] // static pattern
fn column_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?ix)^
            (?:
                [a-z]+(?:\s+precision)?
                (?:\s*\(\s*\d+\s*(?:,\s*\d+\s*)?\))?
                (?:\s+(?:unsigned|signed|zerofill))*
              | (?:enum|set)\s*\(\s*'[^'\\]*'(?:\s*,\s*'[^'\\]*')*\s*\)
            )$",
        )
        .expect("Invalid column type pattern")
    })
}

fn validate_column_type(column_type: &str) -> Result<&str> {
    let trimmed = column_type.trim();
    if column_type_pattern().is_match(trimmed) {
        Ok(trimmed)
    } else {
        Err(GatewayError::invalid_request(format!(
            "unsupported column type: {column_type}"
        )))
    }
}

/// Distinguishes an explicit `"default": null` from an absent key.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<QueryParam>, D::Error>
where
    D: Deserializer<'de>,
{
    QueryParam::deserialize(deserializer).map(Some)
}

fn default_true() -> bool {
    true
}

/// A column in `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type, e.g. `VARCHAR(255)`
    #[serde(rename = "type")]
    pub column_type: String,
    /// Whether NULL is allowed
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Part of the primary key
    #[serde(default)]
    pub primary: bool,
    /// Adds `AUTO_INCREMENT`
    #[serde(default, alias = "auto_increment")]
    pub auto_increment: bool,
    /// Literal default value
    #[serde(default, deserialize_with = "present")]
    pub default: Option<QueryParam>,
}

impl ColumnDefinition {
    /// A nullable column with no default.
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable: true,
            primary: false,
            auto_increment: false,
            default: None,
        }
    }
}

/// What `ALTER TABLE` should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlterKind {
    /// `ADD COLUMN`
    AddColumn,
    /// `DROP COLUMN`
    DropColumn,
    /// `MODIFY COLUMN`
    ModifyColumn,
    /// `RENAME COLUMN`
    RenameColumn,
}

impl std::fmt::Display for AlterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::AddColumn => "add_column",
            Self::DropColumn => "drop_column",
            Self::ModifyColumn => "modify_column",
            Self::RenameColumn => "rename_column",
        })
    }
}

/// Column details for `ALTER TABLE`; which fields are needed depends on
/// the [`AlterKind`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterColumn {
    /// Existing (or new, for add) column name
    #[serde(default)]
    pub name: String,
    /// SQL type for add and modify
    #[serde(default, rename = "type")]
    pub column_type: Option<String>,
    /// Whether NULL is allowed, for add and modify
    #[serde(default)]
    pub nullable: Option<bool>,
    /// Literal default, for add and modify
    #[serde(default, deserialize_with = "present")]
    pub default: Option<QueryParam>,
    /// Target name for rename
    #[serde(default, alias = "new_name")]
    pub new_name: Option<String>,
}

fn column_list(columns: &[String]) -> Result<String> {
    Ok(columns
        .iter()
        .map(|c| safe_identifier(c, IdentifierKind::Column))
        .collect::<std::result::Result<Vec<_>, _>>()?
        .join(", "))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `WHERE` terms joined by `AND`. A `NULL` value becomes `IS NULL`, since
/// `= NULL` never matches.
fn conditions(conditions: &Assignments) -> Result<(String, Vec<QueryParam>)> {
    let mut terms = Vec::with_capacity(conditions.len());
    let mut params = Vec::new();
    for (column, value) in conditions {
        let column = safe_identifier(column, IdentifierKind::Column)?;
        if matches!(value, QueryParam::Null) {
            terms.push(format!("{column} IS NULL"));
        } else {
            terms.push(format!("{column} = ?"));
            params.push(value.clone());
        }
    }
    Ok((terms.join(" AND "), params))
}

fn default_clause(default: &QueryParam) -> String {
    match default {
        QueryParam::Null => " DEFAULT NULL".to_string(),
        QueryParam::Bool(b) => format!(" DEFAULT {}", if *b { "TRUE" } else { "FALSE" }),
        QueryParam::Int(i) => format!(" DEFAULT {i}"),
        QueryParam::Float(f) => format!(" DEFAULT {f}"),
        QueryParam::Text(s) => format!(" DEFAULT '{}'", escape_string_literal(s)),
    }
}

fn column_clause(
    name: &str,
    column_type: &str,
    not_null: bool,
    auto_increment: bool,
    default: Option<&QueryParam>,
) -> Result<String> {
    let mut clause = format!(
        "{} {}",
        safe_identifier(name, IdentifierKind::Column)?,
        validate_column_type(column_type)?
    );
    if not_null {
        clause.push_str(" NOT NULL");
    }
    if auto_increment {
        clause.push_str(" AUTO_INCREMENT");
    }
    if let Some(default) = default {
        clause.push_str(&default_clause(default));
    }
    Ok(clause)
}

/// `INSERT INTO t (cols) VALUES (?, ...)`.
///
/// # Errors
/// Fails on an empty `data` map or an invalid identifier.
pub fn insert(table: &str, data: &Assignments) -> Result<Statement> {
    if data.is_empty() {
        return Err(GatewayError::invalid_request("insert requires at least one column"));
    }
    let table = safe_identifier(table, IdentifierKind::Table)?;
    let columns: Vec<String> = data.keys().cloned().collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        column_list(&columns)?,
        placeholders(data.len())
    );
    Ok(Statement::new(sql, data.values().cloned().collect()))
}

/// `UPDATE t SET c = ? ... WHERE k = ? AND ...`.
///
/// # Errors
/// Fails if either map is empty, so an update can never touch every row.
pub fn update(table: &str, data: &Assignments, filter: &Assignments) -> Result<Statement> {
    if data.is_empty() {
        return Err(GatewayError::invalid_request("update requires at least one column to set"));
    }
    if filter.is_empty() {
        return Err(GatewayError::invalid_request("update requires at least one WHERE condition"));
    }
    let table = safe_identifier(table, IdentifierKind::Table)?;
    let set = data
        .keys()
        .map(|c| safe_identifier(c, IdentifierKind::Column).map(|c| format!("{c} = ?")))
        .collect::<std::result::Result<Vec<_>, _>>()?
        .join(", ");
    let (clause, filter_params) = conditions(filter)?;

    let mut params: Vec<QueryParam> = data.values().cloned().collect();
    params.extend(filter_params);
    Ok(Statement::new(
        format!("UPDATE {table} SET {set} WHERE {clause}"),
        params,
    ))
}

/// `DELETE FROM t WHERE k = ? AND ...`.
///
/// # Errors
/// Fails on an empty filter, so a delete can never touch every row.
pub fn delete(table: &str, filter: &Assignments) -> Result<Statement> {
    if filter.is_empty() {
        return Err(GatewayError::invalid_request("delete requires at least one WHERE condition"));
    }
    let table = safe_identifier(table, IdentifierKind::Table)?;
    let (clause, params) = conditions(filter)?;
    Ok(Statement::new(format!("DELETE FROM {table} WHERE {clause}"), params))
}

/// Multi-row `INSERT` with one placeholder group per row.
///
/// # Errors
/// Fails on no columns, no rows, or a row whose length differs from the
/// column count.
pub fn bulk_insert(table: &str, columns: &[String], rows: &[Vec<QueryParam>]) -> Result<Statement> {
    if columns.is_empty() {
        return Err(GatewayError::invalid_request("bulk insert requires at least one column"));
    }
    if rows.is_empty() {
        return Err(GatewayError::invalid_request("No rows provided for bulk insert"));
    }
    if let Some((index, row)) = rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != columns.len())
    {
        return Err(GatewayError::invalid_request(format!(
            "row {index} has {} values but {} columns were given",
            row.len(),
            columns.len()
        )));
    }

    let table = safe_identifier(table, IdentifierKind::Table)?;
    let group = format!("({})", placeholders(columns.len()));
    let groups = vec![group.as_str(); rows.len()].join(", ");
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES {groups}",
        column_list(columns)?
    );
    Ok(Statement::new(sql, rows.iter().flatten().cloned().collect()))
}

/// `CREATE TABLE` with an optional composite primary key.
///
/// # Errors
/// Fails on no columns, an invalid identifier, or an unsupported type.
pub fn create_table(table: &str, columns: &[ColumnDefinition]) -> Result<Statement> {
    if columns.is_empty() {
        return Err(GatewayError::invalid_request("create table requires at least one column"));
    }
    let table = safe_identifier(table, IdentifierKind::Table)?;

    let mut clauses = columns
        .iter()
        .map(|col| {
            column_clause(
                &col.name,
                &col.column_type,
                !col.nullable,
                col.auto_increment,
                col.default.as_ref(),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let primary: Vec<String> = columns
        .iter()
        .filter(|col| col.primary)
        .map(|col| col.name.clone())
        .collect();
    if !primary.is_empty() {
        clauses.push(format!("PRIMARY KEY ({})", column_list(&primary)?));
    }

    Ok(Statement::ddl(format!(
        "CREATE TABLE {table} ({})",
        clauses.join(", ")
    )))
}

/// One `ALTER TABLE` column change.
///
/// # Errors
/// Fails when the column details needed by `kind` are missing.
pub fn alter_table(table: &str, kind: AlterKind, column: Option<&AlterColumn>) -> Result<Statement> {
    let table = safe_identifier(table, IdentifierKind::Table)?;
    let missing = |what: &str| GatewayError::invalid_request(format!("{what} required for {kind}"));
    let column = column
        .filter(|c| !c.name.is_empty())
        .ok_or_else(|| missing("Column name"))?;

    let action = match kind {
        AlterKind::AddColumn | AlterKind::ModifyColumn => {
            let column_type = column
                .column_type
                .as_deref()
                .ok_or_else(|| missing("Column definition"))?;
            let clause = column_clause(
                &column.name,
                column_type,
                column.nullable == Some(false),
                false,
                column.default.as_ref(),
            )?;
            if kind == AlterKind::AddColumn {
                format!("ADD COLUMN {clause}")
            } else {
                format!("MODIFY COLUMN {clause}")
            }
        }
        AlterKind::DropColumn => format!(
            "DROP COLUMN {}",
            safe_identifier(&column.name, IdentifierKind::Column)?
        ),
        AlterKind::RenameColumn => {
            let new_name = column
                .new_name
                .as_deref()
                .ok_or_else(|| missing("New column name"))?;
            format!(
                "RENAME COLUMN {} TO {}",
                safe_identifier(&column.name, IdentifierKind::Column)?,
                safe_identifier(new_name, IdentifierKind::Column)?
            )
        }
    };

    Ok(Statement::ddl(format!("ALTER TABLE {table} {action}")))
}

/// `DROP TABLE`, only with explicit confirmation.
///
/// # Errors
/// Fails unless `confirm` is true.
pub fn drop_table(table: &str, confirm: bool) -> Result<Statement> {
    if !confirm {
        return Err(GatewayError::invalid_request(
            "Drop table operation requires confirm: true to proceed",
        ));
    }
    let table = safe_identifier(table, IdentifierKind::Table)?;
    Ok(Statement::ddl(format!("DROP TABLE {table}")))
}

/// `CREATE [UNIQUE] INDEX`.
///
/// # Errors
/// Fails on no columns or an invalid identifier.
pub fn add_index(table: &str, name: &str, columns: &[String], unique: bool) -> Result<Statement> {
    if columns.is_empty() {
        return Err(GatewayError::invalid_request("index requires at least one column"));
    }
    let index = safe_identifier(name, IdentifierKind::Index)?;
    let table = safe_identifier(table, IdentifierKind::Table)?;
    let kind = if unique { "UNIQUE INDEX" } else { "INDEX" };
    Ok(Statement::ddl(format!(
        "CREATE {kind} {index} ON {table} ({})",
        column_list(columns)?
    )))
}

/// `DROP INDEX ... ON ...`.
///
/// # Errors
/// Fails on an invalid identifier.
pub fn drop_index(table: &str, name: &str) -> Result<Statement> {
    let index = safe_identifier(name, IdentifierKind::Index)?;
    let table = safe_identifier(table, IdentifierKind::Table)?;
    Ok(Statement::ddl(format!("DROP INDEX {index} ON {table}")))
}

/// `RENAME TABLE ... TO ...`.
///
/// # Errors
/// Fails on an invalid identifier.
pub fn rename_table(old_name: &str, new_name: &str) -> Result<Statement> {
    let old_name = safe_identifier(old_name, IdentifierKind::Table)?;
    let new_name = safe_identifier(new_name, IdentifierKind::Table)?;
    Ok(Statement::ddl(format!("RENAME TABLE {old_name} TO {new_name}")))
}

/// `CALL proc(?, ...)`.
///
/// # Errors
/// Fails on an invalid procedure name.
pub fn call_procedure(name: &str, params: &[QueryParam]) -> Result<Statement> {
    let procedure = safe_identifier(name, IdentifierKind::Procedure)?;
    Ok(Statement::new(
        format!("CALL {procedure}({})", placeholders(params.len())),
        params.to_vec(),
    ))
}
