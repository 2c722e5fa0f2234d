use std::sync::LazyLock;

use ledgerops_common::{Error, Result};
use regex::Regex;

/// Longest password accepted for hashing. Argon2 itself allows more, but
/// anything past this is almost certainly a pasted file.
const MAX_PASSWORD_LEN: usize = 1024;

static SQL_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex"));

/// Input validation and sanitization for operator-supplied values.
pub struct InputValidator;

impl InputValidator {
    /// Drop the trailing line ending left by `read_line`. Everything else,
    /// inner tabs and whitespace included, is kept as typed.
    pub fn strip_line_ending(input: &str) -> &str {
        input.trim_end_matches(['\r', '\n'])
    }

    pub fn validate_password(password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::Security("password cannot be empty".into()));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(Error::Security("password too long".into()));
        }
        Ok(())
    }

    /// Validate a name that will be interpolated into SQL as a table name.
    /// Only plain identifiers are allowed, so no quoting is ever needed.
    pub fn validate_sql_identifier(name: &str) -> Result<()> {
        if SQL_IDENTIFIER.is_match(name) {
            Ok(())
        } else {
            Err(Error::Security(format!(
                "{name:?} is not a plain SQL identifier"
            )))
        }
    }
}
