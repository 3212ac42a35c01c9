//! Tool catalog and dispatch.

use crate::gateway::Gateway;
use crate::models::{ColumnMetadata, QueryParam, QueryResult, Row};
use crate::statements::{AlterColumn, AlterKind, Assignments, ColumnDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

/// One entry of `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name used in `tools/call`
    pub name: &'static str,
    /// One-line description shown to clients
    pub description: &'static str,
    /// JSON schema of the arguments
    pub input_schema: JsonValue,
}

impl ToolDefinition {
    fn new(name: &'static str, description: &'static str, input_schema: JsonValue) -> Self {
        Self {
            name,
            description,
            input_schema,
        }
    }
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to run
    pub name: String,
    /// Tool arguments; `null` when omitted
    #[serde(default)]
    pub arguments: JsonValue,
}

/// Text result of a tool call. Failures are reported here rather than as
/// JSON-RPC errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Text content returned to the client
    pub text: String,
    /// Whether the call failed
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            text: format!("Error: {message}"),
            is_error: true,
        }
    }

    /// The `tools/call` result object.
    pub fn to_json(&self) -> JsonValue {
        let mut result = json!({ "content": [{ "type": "text", "text": self.text }] });
        if self.is_error {
            result["isError"] = JsonValue::Bool(true);
        }
        result
    }
}

fn scalar() -> JsonValue {
    json!({ "type": ["string", "number", "boolean", "null"] })
}

fn table_only(description: &'static str) -> JsonValue {
    json!({
        "type": "object",
        "properties": { "table": { "type": "string", "description": description } },
        "required": ["table"]
    })
}

fn no_arguments() -> JsonValue {
    json!({ "type": "object", "properties": {} })
}

/// The tool catalog. Write tools are listed only in write-mode.
pub fn tool_definitions(write_mode: bool) -> Vec<ToolDefinition> {
    let mut tools = vec![
        ToolDefinition::new(
            "query",
            "Execute a read-only SQL query on the database",
            json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string", "description": "The SQL query to execute" },
                    "params": {
                        "type": "array",
                        "description": "Optional query parameters for prepared statements",
                        "items": scalar()
                    }
                },
                "required": ["sql"]
            }),
        ),
        ToolDefinition::new("list_tables", "List all tables in the database", no_arguments()),
        ToolDefinition::new(
            "describe_table",
            "Get the schema of a specific table",
            table_only("The name of the table to describe"),
        ),
        ToolDefinition::new(
            "database_info",
            "Get general information about the database",
            no_arguments(),
        ),
    ];

    if write_mode {
        tools.extend(write_tool_definitions());
    }

    tools.extend([
        ToolDefinition::new(
            "show_indexes",
            "Show all indexes for a table",
            table_only("The name of the table to show indexes for"),
        ),
        ToolDefinition::new(
            "explain_query",
            "Get the execution plan for a query",
            json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string", "description": "The SQL query to explain" },
                    "params": { "type": "array", "description": "Optional query parameters", "items": scalar() }
                },
                "required": ["sql"]
            }),
        ),
        ToolDefinition::new(
            "show_constraints",
            "Show all constraints (foreign keys, unique) for a table",
            table_only("The name of the table to show constraints for"),
        ),
    ]);

    tools
}

fn write_tool_definitions() -> Vec<ToolDefinition> {
    let key_values = |description: &str| {
        json!({ "type": "object", "description": description, "additionalProperties": true })
    };
    let string_array = |description: &str| {
        json!({ "type": "array", "description": description, "items": { "type": "string" } })
    };

    vec![
        ToolDefinition::new(
            "insert",
            "Insert data into a table",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string", "description": "The name of the table to insert into" },
                    "data": key_values("Key-value pairs of column names and values to insert")
                },
                "required": ["table", "data"]
            }),
        ),
        ToolDefinition::new(
            "update",
            "Update data in a table",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string", "description": "The name of the table to update" },
                    "data": key_values("Key-value pairs of column names and values to update"),
                    "where": key_values("Key-value pairs for WHERE clause conditions")
                },
                "required": ["table", "data", "where"]
            }),
        ),
        ToolDefinition::new(
            "delete",
            "Delete data from a table",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string", "description": "The name of the table to delete from" },
                    "where": key_values("Key-value pairs for WHERE clause conditions")
                },
                "required": ["table", "where"]
            }),
        ),
        ToolDefinition::new(
            "create_table",
            "Create a new table",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string", "description": "The name of the table to create" },
                    "columns": {
                        "type": "array",
                        "description": "Array of column definitions",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string", "description": "Column name" },
                                "type": { "type": "string", "description": "Column data type (e.g., VARCHAR(255), INT, TEXT)" },
                                "nullable": { "type": "boolean", "description": "Whether the column can be NULL", "default": true },
                                "primary": { "type": "boolean", "description": "Whether this column is a primary key", "default": false },
                                "autoIncrement": { "type": "boolean", "description": "Whether this column auto-increments", "default": false },
                                "default": { "type": ["string", "number", "boolean", "null"], "description": "Default value for the column" }
                            },
                            "required": ["name", "type"]
                        }
                    }
                },
                "required": ["table", "columns"]
            }),
        ),
        ToolDefinition::new(
            "alter_table",
            "Alter an existing table structure",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string", "description": "The name of the table to alter" },
                    "operation": {
                        "type": "string",
                        "enum": ["add_column", "drop_column", "modify_column", "rename_column"],
                        "description": "The type of alteration to perform"
                    },
                    "column": {
                        "type": "object",
                        "description": "Column definition for add/modify operations",
                        "properties": {
                            "name": { "type": "string", "description": "Column name" },
                            "type": { "type": "string", "description": "Column data type" },
                            "nullable": { "type": "boolean", "description": "Whether the column can be NULL" },
                            "default": { "type": ["string", "number", "boolean", "null"], "description": "Default value for the column" },
                            "newName": { "type": "string", "description": "New name for rename operations" }
                        }
                    }
                },
                "required": ["table", "operation"]
            }),
        ),
        ToolDefinition::new(
            "execute_procedure",
            "Execute a stored procedure with parameters",
            json!({
                "type": "object",
                "properties": {
                    "procedure": { "type": "string", "description": "The name of the stored procedure to execute" },
                    "params": { "type": "array", "description": "Parameters to pass to the stored procedure", "items": scalar() }
                },
                "required": ["procedure"]
            }),
        ),
        ToolDefinition::new(
            "bulk_insert",
            "Insert multiple rows into a table efficiently",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string", "description": "The name of the table to insert into" },
                    "columns": string_array("Column names for the insert"),
                    "rows": {
                        "type": "array",
                        "description": "Array of value arrays to insert",
                        "items": { "type": "array", "items": scalar() }
                    }
                },
                "required": ["table", "columns", "rows"]
            }),
        ),
        ToolDefinition::new(
            "drop_table",
            "Drop a table from the database (requires confirmation)",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string", "description": "The name of the table to drop" },
                    "confirm": { "type": "boolean", "description": "Must be true to confirm the drop operation" }
                },
                "required": ["table", "confirm"]
            }),
        ),
        ToolDefinition::new(
            "add_index",
            "Add an index to a table",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string", "description": "The name of the table" },
                    "name": { "type": "string", "description": "The name of the index" },
                    "columns": string_array("Column names to include in the index"),
                    "unique": { "type": "boolean", "description": "Whether this should be a unique index", "default": false }
                },
                "required": ["table", "name", "columns"]
            }),
        ),
        ToolDefinition::new(
            "drop_index",
            "Drop an index from a table",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string", "description": "The name of the table" },
                    "name": { "type": "string", "description": "The name of the index to drop" }
                },
                "required": ["table", "name"]
            }),
        ),
        ToolDefinition::new(
            "rename_table",
            "Rename a table",
            json!({
                "type": "object",
                "properties": {
                    "oldName": { "type": "string", "description": "Current name of the table" },
                    "newName": { "type": "string", "description": "New name for the table" }
                },
                "required": ["oldName", "newName"]
            }),
        ),
    ]
}

#[derive(Deserialize)]
struct SqlArgs {
    sql: String,
    #[serde(default)]
    params: Vec<QueryParam>,
}

#[derive(Deserialize)]
struct TableArgs {
    table: String,
}

#[derive(Deserialize)]
struct InsertArgs {
    table: String,
    data: Assignments,
}

#[derive(Deserialize)]
struct UpdateArgs {
    table: String,
    data: Assignments,
    #[serde(rename = "where")]
    filter: Assignments,
}

#[derive(Deserialize)]
struct DeleteArgs {
    table: String,
    #[serde(rename = "where")]
    filter: Assignments,
}

#[derive(Deserialize)]
struct CreateTableArgs {
    table: String,
    columns: Vec<ColumnDefinition>,
}

#[derive(Deserialize)]
struct AlterTableArgs {
    table: String,
    operation: AlterKind,
    column: Option<AlterColumn>,
}

#[derive(Deserialize)]
struct ProcedureArgs {
    procedure: String,
    #[serde(default)]
    params: Vec<QueryParam>,
}

#[derive(Deserialize)]
struct BulkInsertArgs {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<QueryParam>>,
}

#[derive(Deserialize)]
struct DropTableArgs {
    table: String,
    confirm: bool,
}

#[derive(Deserialize)]
struct AddIndexArgs {
    table: String,
    name: String,
    columns: Vec<String>,
    #[serde(default)]
    unique: bool,
}

#[derive(Deserialize)]
struct DropIndexArgs {
    table: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameTableArgs {
    old_name: String,
    new_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryOutput<'a> {
    rows: &'a [Row],
    row_count: usize,
    fields: &'a [ColumnMetadata],
    affected_rows: u64,
    insert_id: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    truncated: bool,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    warnings: &'a [String],
}

impl<'a> From<&'a QueryResult> for QueryOutput<'a> {
    fn from(result: &'a QueryResult) -> Self {
        Self {
            rows: &result.rows,
            row_count: result.row_count,
            fields: &result.columns,
            affected_rows: result.affected_rows,
            insert_id: result.insert_id,
            truncated: result.truncated,
            warnings: &result.warnings,
        }
    }
}

#[derive(Debug)]
enum ToolFailure {
    Arguments(serde_json::Error),
    Gateway(crate::GatewayError),
    UnknownTool(String),
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arguments(e) => write!(f, "Invalid arguments: {e}"),
            Self::Gateway(e) => write!(f, "{e}"),
            Self::UnknownTool(name) => write!(f, "Unknown tool: {name}"),
        }
    }
}

impl From<crate::GatewayError> for ToolFailure {
    fn from(error: crate::GatewayError) -> Self {
        Self::Gateway(error)
    }
}

fn args<T: DeserializeOwned>(arguments: &JsonValue) -> Result<T, ToolFailure> {
    let arguments = if arguments.is_null() {
        JsonValue::Object(serde_json::Map::new())
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments).map_err(ToolFailure::Arguments)
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> Result<String, ToolFailure> {
    serde_json::to_string_pretty(value).map_err(|source| {
        ToolFailure::Gateway(crate::GatewayError::Serialization {
            context: "tool output".to_string(),
            source,
        })
    })
}

/// Runs one tool call against `gateway`.
///
/// Never fails: policy rejections, invalid arguments, and database errors
/// all come back as an error [`ToolOutput`].
pub async fn call_tool(gateway: &Gateway, call: &ToolCall) -> ToolOutput {
    tracing::info!(tool = %call.name, "Tool called");
    match dispatch(gateway, &call.name, &call.arguments).await {
        Ok(text) => ToolOutput::ok(text),
        Err(failure) => {
            tracing::error!(tool = %call.name, error = %failure, "Tool execution failed");
            ToolOutput::error(failure)
        }
    }
}

async fn dispatch(gateway: &Gateway, name: &str, arguments: &JsonValue) -> Result<String, ToolFailure> {
    match name {
        "query" => {
            let SqlArgs { sql, params } = args(arguments)?;
            let result = gateway.execute_query(&sql, &params).await?;
            pretty(&QueryOutput::from(&result))
        }
        "list_tables" => {
            let tables = gateway.get_table_list().await?;
            Ok(format!("Found {} tables:\n{}", tables.len(), tables.join("\n")))
        }
        "describe_table" => {
            let TableArgs { table } = args(arguments)?;
            let schema = gateway.get_table_schema(&table).await?;
            Ok(format!("Schema for table {table}:\n{}", pretty(&schema)?))
        }
        "database_info" => pretty(&gateway.get_database_info().await?),
        "show_indexes" => {
            let TableArgs { table } = args(arguments)?;
            let indexes = gateway.show_indexes(&table).await?;
            Ok(format!("Indexes for table {table}:\n{}", pretty(&indexes)?))
        }
        "explain_query" => {
            let SqlArgs { sql, params } = args(arguments)?;
            let plan = gateway.explain(&sql, &params).await?;
            Ok(format!("Query execution plan:\n{}", pretty(&plan.rows)?))
        }
        "show_constraints" => {
            let TableArgs { table } = args(arguments)?;
            pretty(&gateway.show_constraints(&table).await?)
        }
        "insert" => {
            let InsertArgs { table, data } = args(arguments)?;
            let result = gateway.insert(&table, &data).await?;
            Ok(format!(
                "Inserted {} row(s) into {table}. Insert ID: {}",
                result.affected_rows, result.insert_id
            ))
        }
        "update" => {
            let UpdateArgs { table, data, filter } = args(arguments)?;
            let result = gateway.update(&table, &data, &filter).await?;
            Ok(format!("Updated {} row(s) in {table}", result.affected_rows))
        }
        "delete" => {
            let DeleteArgs { table, filter } = args(arguments)?;
            let result = gateway.delete(&table, &filter).await?;
            Ok(format!("Deleted {} row(s) from {table}", result.affected_rows))
        }
        "bulk_insert" => {
            let BulkInsertArgs { table, columns, rows } = args(arguments)?;
            let result = gateway.bulk_insert(&table, &columns, &rows).await?;
            Ok(format!(
                "Bulk inserted {} row(s) into {table}. First insert ID: {}",
                result.affected_rows, result.insert_id
            ))
        }
        "create_table" => {
            let CreateTableArgs { table, columns } = args(arguments)?;
            gateway.create_table(&table, &columns).await?;
            Ok(format!("Created table {table} successfully"))
        }
        "alter_table" => {
            let AlterTableArgs {
                table,
                operation,
                column,
            } = args(arguments)?;
            gateway.alter_table(&table, operation, column.as_ref()).await?;
            Ok(format!("Altered table {table}: {operation} completed successfully"))
        }
        "drop_table" => {
            let DropTableArgs { table, confirm } = args(arguments)?;
            gateway.drop_table(&table, confirm).await?;
            Ok(format!("Dropped table {table} successfully"))
        }
        "add_index" => {
            let AddIndexArgs {
                table,
                name,
                columns,
                unique,
            } = args(arguments)?;
            gateway.add_index(&table, &name, &columns, unique).await?;
            let kind = if unique { "unique index" } else { "index" };
            Ok(format!("Created {kind} {name} on table {table}"))
        }
        "drop_index" => {
            let DropIndexArgs { table, name } = args(arguments)?;
            gateway.drop_index(&table, &name).await?;
            Ok(format!("Dropped index {name} from table {table}"))
        }
        "rename_table" => {
            let RenameTableArgs { old_name, new_name } = args(arguments)?;
            gateway.rename_table(&old_name, &new_name).await?;
            Ok(format!("Renamed table from {old_name} to {new_name}"))
        }
        "execute_procedure" => {
            let ProcedureArgs { procedure, params } = args(arguments)?;
            let result = gateway.call_procedure(&procedure, &params).await?;
            pretty(&json!({
                "procedure": procedure,
                "result": result.rows,
                "affectedRows": result.affected_rows,
            }))
        }
        other => Err(ToolFailure::UnknownTool(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(write_mode: bool) -> Vec<&'static str> {
        tool_definitions(write_mode).iter().map(|t| t.name).collect()
    }

    #[test]
    fn test_read_only_catalog() {
        assert_eq!(
            names(false),
            vec![
                "query",
                "list_tables",
                "describe_table",
                "database_info",
                "show_indexes",
                "explain_query",
                "show_constraints"
            ]
        );
    }

    #[test]
    fn test_write_mode_catalog() {
        let names = names(true);
        assert_eq!(names.len(), 18);
        for tool in [
            "insert",
            "update",
            "delete",
            "bulk_insert",
            "create_table",
            "alter_table",
            "drop_table",
            "add_index",
            "drop_index",
            "rename_table",
            "execute_procedure",
        ] {
            assert!(names.contains(&tool), "missing {tool}");
        }
    }

    #[test]
    fn test_definitions_serialize_input_schema_in_camel_case() {
        let value = serde_json::to_value(&tool_definitions(false)[0]).unwrap();
        assert_eq!(value["name"], "query");
        assert_eq!(value["inputSchema"]["required"], json!(["sql"]));
    }

    #[test]
    fn test_output_json() {
        assert_eq!(
            ToolOutput::ok("done").to_json(),
            json!({ "content": [{ "type": "text", "text": "done" }] })
        );

        let failed = ToolOutput::error("nope").to_json();
        assert_eq!(failed["content"][0]["text"], "Error: nope");
        assert_eq!(failed["isError"], true);
    }

    #[test]
    fn test_arguments_default_to_empty_object() {
        let parsed: Result<TableArgs, _> = args(&JsonValue::Null);
        assert!(matches!(parsed, Err(ToolFailure::Arguments(_))));

        let parsed: SqlArgs = args(&json!({ "sql": "SELECT 1" })).unwrap();
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn test_rename_arguments_use_camel_case() {
        let parsed: RenameTableArgs = args(&json!({ "oldName": "a", "newName": "b" })).unwrap();
        assert_eq!(parsed.old_name, "a");
        assert_eq!(parsed.new_name, "b");
    }
}
