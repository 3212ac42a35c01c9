//! Core library of dbgateway, a policy-enforcing MySQL access gateway.
//!
//! Caller SQL reaches the database only after it has been admitted by a
//! sliding-window rate limiter and cleared by a security policy. The same
//! pipeline backs schema introspection, the structured write operations,
//! and the MCP tool surface.
//!
//! # Security Guarantees
//! - Every statement is rate limited and classified before a connection is taken
//! - System tables and privilege-altering statements are always refused
//! - Write intent is refused unless write-mode is enabled, and audited when it is
//! - Values are bound as parameters; identifiers are validated and quoted
//! - Passwords live in zeroizing containers and are redacted from errors
//!
//! # Example
//! ```rust,no_run
//! use dbgateway_core::{Gateway, GatewayConfig, QueryParam};
//!
//! # async fn example() -> dbgateway_core::Result<()> {
//! let gateway = Gateway::new(GatewayConfig::from_url("mysql://reader@localhost/shop")?)?;
//! gateway.connect().await?;
//! let result = gateway.execute_query("SELECT id FROM orders WHERE total > ?", &[QueryParam::Int(100)]).await?;
//! println!("{} rows", result.row_count);
//! gateway.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod introspect;
pub mod logging;
pub mod mcp;
pub mod models;
pub mod rate_limit;
pub mod security;
pub mod statements;

// Re-export commonly used types
pub use audit::{AuditRecord, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::{GatewayConfig, RateLimitPolicy};
pub use connection::{ConnectionGateway, QueryBackend};
pub use error::{GatewayError, RateLimitError, Result, ValidationError};
pub use executor::QueryExecutor;
pub use gateway::Gateway;
pub use introspect::SchemaIntrospector;
pub use logging::{LogFormat, init_logging};
pub use models::{
    ColumnDescriptor, ColumnMetadata, DatabaseSummary, IndexDescriptor, QueryParam, QueryResult,
    RawOutcome, Row, TableConstraints,
};
pub use rate_limit::{Admission, Clock, ManualClock, RateLimitStats, RateLimiter, SystemClock};
pub use security::{Credentials, PolicyVerdict, SecurityPolicy};
