//! Engine-specific SQL rendering: identifier quoting, literals and row limits.

use common::models::Engine;

/// Words that must be quoted when used as identifiers.
const RESERVED: [&str; 24] = [
    "all", "and", "as", "by", "case", "check", "column", "desc", "distinct", "from", "group",
    "having", "in", "index", "key", "limit", "not", "or", "order", "select", "table", "to",
    "user", "where",
];

#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    engine: Engine,
}

impl Dialect {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Renders an identifier, quoting it only when needed.
    pub fn ident(&self, name: &str) -> String {
        let plain = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !RESERVED.contains(&name);
        if plain {
            return name.to_string();
        }
        match self.engine {
            Engine::Mysql => format!("`{}`", name.replace('`', "``")),
            Engine::Mssql => format!("[{}]", name.replace(']', "]]")),
            Engine::Postgresql | Engine::Sqlite | Engine::Oracle => {
                format!("\"{}\"", name.replace('"', "\"\""))
            }
        }
    }

    /// Renders a table-qualified column reference.
    pub fn column(&self, table: &str, column: &str) -> String {
        format!("{}.{}", self.ident(table), self.ident(column))
    }

    /// Renders a string literal.
    pub fn string(&self, value: &str) -> String {
        let escaped = value.replace('\'', "''");
        match self.engine {
            Engine::Mysql => format!("'{}'", escaped.replace('\\', "\\\\")),
            _ => format!("'{escaped}'"),
        }
    }

    /// Prefix placed right after `SELECT` for engines using `TOP n`.
    pub fn limit_prefix(&self, limit: u32) -> Option<String> {
        matches!(self.engine, Engine::Mssql).then(|| format!("TOP {limit}"))
    }

    /// Suffix appended to the statement for engines without `TOP n`.
    pub fn limit_suffix(&self, limit: u32) -> Option<String> {
        match self.engine {
            Engine::Mssql => None,
            Engine::Oracle => Some(format!("FETCH FIRST {limit} ROWS ONLY")),
            Engine::Postgresql | Engine::Mysql | Engine::Sqlite => Some(format!("LIMIT {limit}")),
        }
    }
}
