//! Table schemas exposed as MCP resources.

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::Result;
use serde::Serialize;
use serde_json::json;

/// URI of the whole-database schema resource.
pub const DATABASE_SCHEMA_URI: &str = "schema://database";
const TABLE_SCHEME: &str = "table://";
const MIME_TYPE: &str = "text/plain";

/// One entry of `resources/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Resource URI
    pub uri: String,
    /// Display name
    pub name: String,
    /// Human-readable summary
    pub description: String,
    /// MIME type of the contents
    pub mime_type: &'static str,
}

/// One entry of a `resources/read` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// URI that was read
    pub uri: String,
    /// MIME type of `text`
    pub mime_type: &'static str,
    /// Resource body
    pub text: String,
}

/// The whole-database schema resource plus one resource per table.
///
/// A failed table listing is logged and yields an empty list.
pub async fn list_resources(gateway: &Gateway) -> Vec<ResourceDescriptor> {
    let tables = match gateway.get_table_list().await {
        Ok(tables) => tables,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list resources");
            return Vec::new();
        }
    };

    std::iter::once(ResourceDescriptor {
        uri: DATABASE_SCHEMA_URI.to_string(),
        name: "Database Schema".to_string(),
        description: "Complete database schema information".to_string(),
        mime_type: MIME_TYPE,
    })
    .chain(tables.into_iter().map(|table| ResourceDescriptor {
        uri: format!("{TABLE_SCHEME}{table}"),
        name: format!("Table: {table}"),
        description: format!("Schema information for table {table}"),
        mime_type: MIME_TYPE,
    }))
    .collect()
}

/// Reads `schema://database` or `table://<name>`.
///
/// # Errors
/// Fails for an unknown URI or when a schema lookup fails.
pub async fn read_resource(gateway: &Gateway, uri: &str) -> Result<ResourceContents> {
    tracing::info!(uri, "Resource read");

    let value = if uri == DATABASE_SCHEMA_URI {
        // One table at a time keeps a large schema under the concurrency ceiling.
        let mut schemas = Vec::new();
        for table in gateway.get_table_list().await? {
            let schema = gateway.get_table_schema(&table).await?;
            schemas.push(json!({ "table": table, "schema": schema }));
        }
        json!(schemas)
    } else if let Some(table) = uri.strip_prefix(TABLE_SCHEME) {
        let schema = gateway.get_table_schema(table).await?;
        json!({ "table": table, "schema": schema })
    } else {
        return Err(GatewayError::invalid_request(format!("Unknown resource: {uri}")));
    };

    let text = serde_json::to_string_pretty(&value).map_err(|source| GatewayError::Serialization {
        context: format!("resource {uri}"),
        source,
    })?;

    Ok(ResourceContents {
        uri: uri.to_string(),
        mime_type: MIME_TYPE,
        text,
    })
}
