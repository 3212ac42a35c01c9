//! SQL classification against the gateway's security policy.
//!
//! Classification is heuristic pattern matching, not parsing. Each concern is
//! an independent detector ([`QueryIntent`], [`blocked_table`],
//! [`sensitive_patterns`]) and [`classify`] combines them through a small
//! decision table. Ambiguous input errs toward rejection.

use crate::error::ValidationError;
use regex::Regex;
use std::sync::OnceLock;

/// System tables and views that can never be queried through the gateway.
pub const BLOCKED_TABLES: &[&str] = &[
    "mysql.user",
    "information_schema.user_privileges",
    "performance_schema.users",
    "sys.user_summary",
];

/// Pre-compiled policy patterns, built once.
struct PolicyPatterns {
    sensitive: Vec<(&'static str, Regex)>,
    write: Regex,
    cte_write: Regex,
    plan_prefix: Regex,
    qualifier: Regex,
    file: Regex,
    permission: Regex,
}

impl PolicyPatterns {
    fn instance() -> &'static Self {
        static PATTERNS: OnceLock<PolicyPatterns> = OnceLock::new();
        PATTERNS.get_or_init(Self::compile)
    }

    #[allow(clippy::expect_used)] // static patterns
    fn compile() -> Self {
        let sensitive = [
            "password",
            "token",
            "secret",
            "api_key",
            "private_key",
            "credit_card",
            "ssn",
        ]
        .into_iter()
        .map(|name| (name, Regex::new(name).expect("Invalid sensitive pattern")))
        .collect();

        Self {
            sensitive,
            write: Regex::new(
                r"(?i)^(INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|TRUNCATE|REPLACE|RENAME|CALL|EXEC|EXECUTE)\b",
            )
            .expect("Invalid write pattern"),
            cte_write: Regex::new(r"(?is)^WITH\b.*\b(INSERT|UPDATE|DELETE|REPLACE)\b")
                .expect("Invalid CTE write pattern"),
            plan_prefix: Regex::new(
                r"(?i)^(?:(?:EXPLAIN|DESCRIBE|DESC)\b(?:\s+ANALYZE\b)?|ANALYZE\b)(?:\s+FORMAT\s*=\s*\w+)?",
            )
            .expect("Invalid plan prefix pattern"),
            qualifier: Regex::new(r"\s*\.\s*").expect("Invalid qualifier pattern"),
            file: Regex::new(r"(?i)(INTO\s+OUTFILE|INTO\s+DUMPFILE|LOAD\s+DATA|LOAD_FILE)")
                .expect("Invalid file pattern"),
            permission: Regex::new(
                r"(?i)(GRANT|REVOKE|SET\s+PASSWORD|CREATE\s+USER|DROP\s+USER|RENAME\s+USER|ALTER\s+USER)",
            )
            .expect("Invalid permission pattern"),
        }
    }
}

/// Skips leading whitespace and comments so that `/* hi */ DELETE ...` is
/// seen as a DELETE. Version comments (`/*!80000 ... */`) are executable in
/// MySQL, so only their opening marker is skipped.
fn strip_leading_trivia(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(body) = rest.strip_prefix("/*!") {
            rest = body.trim_start_matches(|c: char| c.is_ascii_digit()).trim_start();
        } else if let Some(body) = rest.strip_prefix("/*") {
            rest = body.find("*/").map_or("", |end| &body[end..][2..]).trim_start();
        } else if rest.starts_with("--") || rest.starts_with('#') {
            rest = rest.find('\n').map_or("", |end| &rest[end..]).trim_start();
        } else {
            return rest;
        }
    }
}

/// The independent intent detectors for one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryIntent {
    /// Leading keyword mutates data or schema, or runs a routine
    pub write: bool,
    /// Reads or writes server-side files
    pub file: bool,
    /// Alters users or privileges
    pub permission: bool,
}

impl QueryIntent {
    /// Runs every detector against `sql`.
    pub fn detect(sql: &str) -> Self {
        Self {
            write: has_write_intent(sql),
            file: has_file_intent(sql),
            permission: has_permission_intent(sql),
        }
    }
}

/// Peels `EXPLAIN`, `DESCRIBE`, `DESC` and `ANALYZE` prefixes (with an
/// optional `FORMAT=...`) off the statement. `EXPLAIN ANALYZE` executes
/// the statement it explains.
fn strip_plan_prefix(sql: &str) -> &str {
    let patterns = PolicyPatterns::instance();
    let mut rest = strip_leading_trivia(sql);
    while let Some(prefix) = patterns.plan_prefix.find(rest) {
        rest = strip_leading_trivia(&rest[prefix.end()..]);
    }
    rest
}

/// Whether the statement's leading keyword is a write, looking through
/// any plan prefix.
pub fn has_write_intent(sql: &str) -> bool {
    let patterns = PolicyPatterns::instance();
    let head = strip_plan_prefix(sql);
    patterns.write.is_match(head) || patterns.cte_write.is_match(head)
}

/// Whether the statement touches server-side files anywhere in its text.
pub fn has_file_intent(sql: &str) -> bool {
    PolicyPatterns::instance().file.is_match(sql)
}

/// Whether the statement alters users or privileges anywhere in its text.
pub fn has_permission_intent(sql: &str) -> bool {
    PolicyPatterns::instance().permission.is_match(sql)
}

/// Returns the first denylisted table the statement mentions.
///
/// Identifier quotes and whitespace around `.` are dropped before matching,
/// so `` `mysql` . `user` `` is caught like `mysql.user`.
pub fn blocked_table(sql: &str) -> Option<&'static str> {
    let unquoted = sql.to_lowercase().replace(['`', '"'], "");
    let normalized = PolicyPatterns::instance()
        .qualifier
        .replace_all(&unquoted, ".");
    BLOCKED_TABLES
        .iter()
        .copied()
        .find(|table| normalized.contains(table))
}

/// Names of the sensitive patterns the statement mentions.
pub fn sensitive_patterns(sql: &str) -> Vec<&'static str> {
    let normalized = sql.to_lowercase();
    PolicyPatterns::instance()
        .sensitive
        .iter()
        .filter(|(_, pattern)| pattern.is_match(&normalized))
        .map(|(name, _)| *name)
        .collect()
}

/// Why a statement was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// References a denylisted system table
    BlockedTable {
        /// The denylist entry that matched
        table: &'static str,
    },
    /// Write intent while write-mode is off
    WriteInReadOnlyMode,
    /// File intent while write-mode is off
    FileOperationForbidden,
    /// Privilege or user management, refused in every mode
    PermissionOperationForbidden,
}

impl From<Rejection> for ValidationError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::BlockedTable { table } => Self::BlockedTable {
                table: table.to_string(),
            },
            Rejection::WriteInReadOnlyMode => Self::WriteInReadOnlyMode,
            Rejection::FileOperationForbidden => Self::FileOperationForbidden,
            Rejection::PermissionOperationForbidden => Self::PermissionOperationForbidden,
        }
    }
}

/// Conditions attached to an allowed statement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Clearance {
    /// A write in write-mode; must be audited before it runs
    pub audit_required: bool,
    /// Advisory matches; logged, never blocking
    pub sensitive_patterns: Vec<&'static str>,
}

/// Outcome of classifying one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    /// The statement may run under these conditions
    Allowed(Clearance),
    /// The statement must not run
    Rejected(Rejection),
}

impl PolicyVerdict {
    /// Whether the statement may run.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// Converts the verdict into the error the caller sees.
    ///
    /// # Errors
    /// Returns the [`ValidationError`] matching the rejection.
    pub fn into_result(self) -> Result<Clearance, ValidationError> {
        match self {
            Self::Allowed(clearance) => Ok(clearance),
            Self::Rejected(rejection) => Err(rejection.into()),
        }
    }
}

/// Classifies `sql` under the given write-mode.
///
/// Decision order:
/// 1. denylisted table → `BlockedTable` (any mode)
/// 2. permission intent → `PermissionOperationForbidden` (any mode)
/// 3. read-only and write intent → `WriteInReadOnlyMode`
/// 4. read-only and file intent → `FileOperationForbidden`
/// 5. write-mode and write intent → allowed, audit required
/// 6. otherwise allowed
pub fn classify(sql: &str, write_mode: bool) -> PolicyVerdict {
    if let Some(table) = blocked_table(sql) {
        tracing::warn!(table, "Attempted access to blocked table");
        return PolicyVerdict::Rejected(Rejection::BlockedTable { table });
    }

    let sensitive = sensitive_patterns(sql);
    for pattern in &sensitive {
        tracing::warn!(pattern, "Query contains sensitive pattern");
    }

    let intent = QueryIntent::detect(sql);

    if intent.permission {
        tracing::error!(
            query = excerpt(sql, 100),
            write_mode,
            "Attempted permission modification"
        );
        return PolicyVerdict::Rejected(Rejection::PermissionOperationForbidden);
    }

    if !write_mode {
        if intent.write {
            return PolicyVerdict::Rejected(Rejection::WriteInReadOnlyMode);
        }
        if intent.file {
            return PolicyVerdict::Rejected(Rejection::FileOperationForbidden);
        }
    } else if intent.write {
        tracing::warn!(query = excerpt(sql, 100), "WRITE OPERATION DETECTED");
    }

    PolicyVerdict::Allowed(Clearance {
        audit_required: write_mode && intent.write,
        sensitive_patterns: sensitive,
    })
}

/// The gateway-wide policy, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct SecurityPolicy {
    write_mode: bool,
}

impl SecurityPolicy {
    /// Creates a policy; `write_mode` cannot change afterwards.
    pub fn new(write_mode: bool) -> Self {
        Self { write_mode }
    }

    /// Whether write-intent statements are permitted.
    pub fn write_mode(&self) -> bool {
        self.write_mode
    }

    /// Classifies `sql` under this policy.
    pub fn classify(&self, sql: &str) -> PolicyVerdict {
        classify(sql, self.write_mode)
    }
}

/// First `max_chars` characters of `text`, for logs and audit records.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(idx, _)| &text[..idx])
}
