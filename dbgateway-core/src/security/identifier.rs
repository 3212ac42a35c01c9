//! Identifier validation and quoting.
//!
//! Table, column, index, and procedure names are the only caller-supplied
//! text ever concatenated into SQL. They must pass [`validate_identifier`]
//! first, and are then emitted through [`ValidIdentifier::quoted`].

use crate::error::{IdentifierKind, ValidationError};
use regex::Regex;
use std::sync::OnceLock;

/// Longest identifier MySQL accepts.
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

#[allow(clippy::expect_used)] // static pattern
fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("Invalid identifier pattern")
    })
}

/// An identifier that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidIdentifier(String);

impl ValidIdentifier {
    /// The identifier as supplied.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier wrapped in backticks with embedded backticks doubled.
    ///
    /// ```rust
    /// use dbgateway_core::error::IdentifierKind;
    /// use dbgateway_core::security::validate_identifier;
    ///
    /// let name = validate_identifier("orders_2024", IdentifierKind::Table)?;
    /// assert_eq!(name.quoted(), "`orders_2024`");
    /// # Ok::<(), dbgateway_core::error::ValidationError>(())
    /// ```
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }
}

impl std::fmt::Display for ValidIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validates a bare identifier.
///
/// Accepts iff the name is 1..=64 characters, starts with an ASCII letter or
/// underscore, and continues with ASCII letters, digits, or underscores.
///
/// # Errors
/// Returns [`ValidationError::InvalidIdentifier`] naming `kind` and the rule
/// that failed.
pub fn validate_identifier(
    name: &str,
    kind: IdentifierKind,
) -> Result<ValidIdentifier, ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::InvalidIdentifier {
            kind,
            reason: "cannot be empty",
        });
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::InvalidIdentifier {
            kind,
            reason: "exceeds 64 character limit",
        });
    }

    if !identifier_pattern().is_match(name) {
        return Err(ValidationError::InvalidIdentifier {
            kind,
            reason: "contains invalid characters or starts with a number",
        });
    }

    Ok(ValidIdentifier(name.to_string()))
}

/// Validates and quotes in one step.
///
/// # Errors
/// Same as [`validate_identifier`].
pub fn safe_identifier(name: &str, kind: IdentifierKind) -> Result<String, ValidationError> {
    validate_identifier(name, kind).map(|id| id.quoted())
}

/// Wraps `identifier` in backticks, doubling any backtick inside it.
///
/// Validated identifiers cannot contain a backtick; the doubling is kept so
/// the quoting is correct for any input.
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Escapes a string for use inside a single-quoted SQL literal.
///
/// Only DDL `DEFAULT` clauses use this, because DDL cannot take bound
/// parameters. Backslashes are doubled as well as quotes since MySQL treats
/// backslash as an escape character unless `NO_BACKSLASH_ESCAPES` is set.
pub fn escape_string_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_plain_identifiers() {
        assert!(validate_identifier("orders_2024", IdentifierKind::Table).is_ok());
        assert!(validate_identifier("_private", IdentifierKind::Column).is_ok());
        assert!(validate_identifier("A", IdentifierKind::Table).is_ok());
        assert!(validate_identifier(&"a".repeat(64), IdentifierKind::Table).is_ok());
    }

    #[test]
    fn test_rejects_leading_digit() {
        let error = validate_identifier("2024_orders", IdentifierKind::Table).unwrap_err();
        assert_eq!(
            error,
            ValidationError::InvalidIdentifier {
                kind: IdentifierKind::Table,
                reason: "contains invalid characters or starts with a number",
            }
        );
    }

    #[test]
    fn test_rejects_overlong() {
        let error = validate_identifier(&"a".repeat(65), IdentifierKind::Table).unwrap_err();
        assert!(error.to_string().contains("64 character limit"));
    }

    #[test]
    fn test_rejects_empty() {
        let error = validate_identifier("", IdentifierKind::Column).unwrap_err();
        assert_eq!(error.to_string(), "Invalid column name: cannot be empty");
    }

    #[test]
    fn test_rejects_injection_attempts() {
        for name in [
            "users; DROP TABLE users",
            "users`",
            "a b",
            "name--",
            "tbl'",
            "mysql.user",
            "naïve",
        ] {
            assert!(
                validate_identifier(name, IdentifierKind::Table).is_err(),
                "accepted {name:?}"
            );
        }
    }

    #[test]
    fn test_quote_identifier_doubles_backticks() {
        assert_eq!(quote_identifier("orders"), "`orders`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_safe_identifier() {
        assert_eq!(
            safe_identifier("customers", IdentifierKind::Table).unwrap(),
            "`customers`"
        );
        assert!(safe_identifier("1x", IdentifierKind::Table).is_err());
    }

    #[test]
    fn test_escape_string_literal() {
        assert_eq!(escape_string_literal("it's"), "it''s");
        assert_eq!(escape_string_literal(r"a\'b"), r"a\\''b");
        assert_eq!(escape_string_literal("plain"), "plain");
    }

    fn reference_accepts(name: &str) -> bool {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        name.len() <= 64
            && (first.is_ascii_alphabetic() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    proptest! {
        #[test]
        fn prop_validation_matches_reference(name in "\\PC{0,70}") {
            let accepted = validate_identifier(&name, IdentifierKind::Table).is_ok();
            prop_assert_eq!(accepted, reference_accepts(&name));
        }

        #[test]
        fn prop_well_formed_names_are_accepted(name in "[A-Za-z_][A-Za-z0-9_]{0,63}") {
            let valid = validate_identifier(&name, IdentifierKind::Column).unwrap();
            prop_assert_eq!(valid.quoted(), format!("`{}`", name));
        }

        #[test]
        fn prop_leading_digit_is_rejected(name in "[0-9][A-Za-z0-9_]{0,40}") {
            prop_assert!(validate_identifier(&name, IdentifierKind::Table).is_err());
        }
    }
}
