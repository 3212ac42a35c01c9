//! Model Context Protocol surface over a [`Gateway`](crate::Gateway).
//!
//! - [`tools`] holds the tool catalog and maps tool calls onto gateway
//!   operations
//! - [`resources`] exposes table schemas as readable resources
//! - [`server`] speaks JSON-RPC 2.0 over newline-delimited stdio

pub mod resources;
pub mod server;
pub mod tools;

pub use resources::{ResourceContents, ResourceDescriptor, list_resources, read_resource};
pub use server::{McpServer, PROTOCOL_VERSION};
pub use tools::{ToolCall, ToolDefinition, ToolOutput, call_tool, tool_definitions};
