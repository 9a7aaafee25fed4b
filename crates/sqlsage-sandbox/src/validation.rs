use sqlsage_common::{Error, Result};

use crate::allowlist::StatementAllowlist;

/// Substrings that reject a statement outright once it is uppercased.
///
/// This is plain substring matching, not parsing. It over-rejects (a column
/// named `CREATED_AT` trips `CREATE`) and cannot see through every
/// obfuscation; the read-only connection underneath is the real backstop.
pub const DENIED_TOKENS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE", "EXEC", "EXECUTE",
    "GRANT", "REVOKE", "COPY", "IMPORT", "EXPORT", "--", ";--", "/*", "*/",
];

/// Validation pipeline applied before any statement reaches the database.
pub struct SqlValidator;

impl SqlValidator {
    /// Run every check in order; the first failure wins.
    pub fn validate(query: &str, allowlist: &StatementAllowlist) -> Result<()> {
        let normalized = query.trim().to_uppercase();

        if normalized.is_empty() {
            return Err(Error::Validation("Query cannot be empty".into()));
        }

        if !allowlist.permits(&normalized) {
            return Err(Error::Validation(format!(
                "Only {} statements are allowed",
                allowlist.describe()
            )));
        }

        if let Some(token) = Self::denied_token(&normalized) {
            tracing::debug!("statement rejected on denied token {token:?}");
            return Err(Error::Validation(
                "Query contains potentially dangerous operations".into(),
            ));
        }

        if Self::statement_count(query) > 1 {
            return Err(Error::Validation(
                "Multiple statements are not allowed".into(),
            ));
        }

        Ok(())
    }

    /// First denied token found in already-normalized text.
    pub fn denied_token(normalized: &str) -> Option<&'static str> {
        DENIED_TOKENS
            .iter()
            .copied()
            .find(|token| normalized.contains(token))
    }

    /// Number of non-blank `;`-separated segments in the raw text.
    pub fn statement_count(query: &str) -> usize {
        query.split(';').filter(|s| !s.trim().is_empty()).count()
    }
}
