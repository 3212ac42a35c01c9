//! JSON-RPC 2.0 message handling over newline-delimited stdio.
//!
//! Each input line is one request or notification, and each response is
//! written as one line on stdout. Logging goes to stderr so it never
//! interleaves with protocol output.

use super::resources::{list_resources, read_resource};
use super::tools::{ToolCall, call_tool, tool_definitions};
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// MCP protocol revision this server speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const SERVER_NAME: &str = "dbgateway";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<JsonValue>,
    method: String,
    #[serde(default)]
    params: JsonValue,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl Response {
    fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: JsonValue, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    uri: String,
}

/// An MCP server bound to one gateway.
#[derive(Debug, Clone)]
pub struct McpServer {
    gateway: Gateway,
}

impl McpServer {
    /// Serves tools and resources backed by `gateway`.
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// The gateway requests are dispatched to.
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Handles one line of input.
    ///
    /// Returns the serialized response, or `None` for notifications and
    /// blank lines.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle_request(request).await?,
            Err(e) => {
                tracing::warn!(error = %e, "Unparsable JSON-RPC message");
                Response::failure(JsonValue::Null, PARSE_ERROR, format!("Parse error: {e}"))
            }
        };

        match serde_json::to_string(&response) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize response");
                None
            }
        }
    }

    async fn handle_request(&self, request: Request) -> Option<Response> {
        let Some(id) = request.id else {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        };

        if request.jsonrpc.as_deref() != Some("2.0") {
            return Some(Response::failure(
                id,
                INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            ));
        }

        tracing::debug!(method = %request.method, "Request received");
        let response = match self.dispatch(&request.method, request.params).await {
            Ok(result) => Response::success(id, result),
            Err((code, message)) => Response::failure(id, code, message),
        };
        Some(response)
    }

    async fn dispatch(&self, method: &str, params: JsonValue) -> std::result::Result<JsonValue, (i64, String)> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {}, "resources": {} },
                "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") }
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tool_definitions(self.gateway.write_mode()) })),
            "tools/call" => {
                let call: ToolCall = parse_params(params)?;
                Ok(call_tool(&self.gateway, &call).await.to_json())
            }
            "resources/list" => Ok(json!({ "resources": list_resources(&self.gateway).await })),
            "resources/read" => {
                let ReadParams { uri } = parse_params(params)?;
                let contents = read_resource(&self.gateway, &uri).await.map_err(|e| {
                    tracing::error!(uri = %uri, error = %e, "Resource read failed");
                    (INTERNAL_ERROR, e.to_string())
                })?;
                Ok(json!({ "contents": [contents] }))
            }
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        }
    }

    /// Serves requests from `reader` until end of input, writing one
    /// response line per request to `writer`.
    ///
    /// # Errors
    /// Returns an I/O error if the transport fails.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await.map_err(|source| GatewayError::Io {
            context: "reading request".to_string(),
            source,
        })? {
            let Some(response) = self.handle_line(&line).await else {
                continue;
            };
            let written = async {
                writer.write_all(response.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await
            }
            .await;
            written.map_err(|source| GatewayError::Io {
                context: "writing response".to_string(),
                source,
            })?;
        }
        tracing::info!("Input closed, stopping MCP server");
        Ok(())
    }

    /// Serves on the process's stdin and stdout.
    ///
    /// # Errors
    /// Returns an I/O error if stdio fails.
    pub async fn serve_stdio(&self) -> Result<()> {
        tracing::info!(write_mode = self.gateway.write_mode(), "MCP server listening on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: JsonValue) -> std::result::Result<T, (i64, String)> {
    serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, format!("Invalid params: {e}")))
}
