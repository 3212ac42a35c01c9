//! Security controls applied before any SQL reaches the server.
//!
//! # Module Structure
//! - `credentials`: credential container with automatic memory zeroing
//! - `identifier`: validation and backtick quoting of table/column names
//! - `policy`: statement classification (blocked tables, write, file, and
//!   permission intent, sensitive patterns)
//!
//! # Security Guarantees
//! - Credentials are stored in `Zeroizing` containers and masked in `Debug`
//! - Only validated identifiers are ever concatenated into SQL
//! - Permission changes and denylisted system tables are refused in every mode

mod credentials;
mod identifier;
mod policy;

pub use credentials::Credentials;
pub use identifier::{
    MAX_IDENTIFIER_LENGTH, ValidIdentifier, escape_string_literal, quote_identifier,
    safe_identifier, validate_identifier,
};
pub(crate) use policy::excerpt;
pub use policy::{
    BLOCKED_TABLES, Clearance, PolicyVerdict, QueryIntent, Rejection, SecurityPolicy,
    blocked_table, classify, has_file_intent, has_permission_intent, has_write_intent,
    sensitive_patterns,
};
