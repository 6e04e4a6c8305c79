//! SQL statement validator.
//!
//! Natural-language driven queries may only read. A statement passes when it
//! is a single `SELECT`/`WITH` statement that contains none of the forbidden
//! keywords anywhere in its text.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::AppError;

/// Keywords that modify data or schema. Matched as whole words, case-insensitive.
/// `REPLACE` is rejected even in its string-function form.
const FORBIDDEN_KEYWORDS: [&str; 11] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE",
    "MERGE", "REPLACE",
];

static FORBIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"));
    Regex::new(&pattern).expect("forbidden keyword pattern is valid")
});

/// Validates SQL statements for security.
pub struct SqlValidator;

impl SqlValidator {
    /// Validates that `sql` is a single read-only statement.
    ///
    /// # Errors
    /// Returns `AppError::UnsafeStatement` naming the reason for rejection.
    pub fn validate(sql: &str) -> Result<(), AppError> {
        if let Some(keyword) = Self::forbidden_keyword(sql) {
            return Err(AppError::UnsafeStatement(format!(
                "forbidden operation: {keyword}"
            )));
        }

        let code = strip_literals_and_comments(sql);
        let body = code.trim();
        let body = body.strip_suffix(';').unwrap_or(body).trim_end();

        if body.is_empty() {
            return Err(AppError::UnsafeStatement("empty statement".into()));
        }
        if body.contains(';') {
            return Err(AppError::UnsafeStatement(
                "multiple statements are not allowed".into(),
            ));
        }
        if !Self::is_select(body) {
            return Err(AppError::UnsafeStatement(
                "only SELECT queries are allowed".into(),
            ));
        }
        Ok(())
    }

    /// First forbidden keyword in `text`, uppercased.
    pub fn forbidden_keyword(text: &str) -> Option<String> {
        FORBIDDEN_RE.find(text).map(|m| m.as_str().to_uppercase())
    }

    /// Checks if the SQL starts with a read-only keyword (`SELECT` or `WITH`).
    pub fn is_select(sql: &str) -> bool {
        let first = sql
            .trim_start()
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        first == "SELECT" || first == "WITH"
    }
}

/// Replaces quoted literals, quoted identifiers and comments with spaces so
/// that statement separators inside them are ignored.
fn strip_literals_and_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let quote = c;
                i += 1;
                while i < chars.len() {
                    if chars[i] == quote {
                        // doubled quote is an escape
                        if chars.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                out.push(' ');
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                out.push(' ');
                i += 2;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
