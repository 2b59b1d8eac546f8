//! SQL dialects.
//!
//! The session only needs a handful of fragments from a dialect: paging
//! clauses and identifier quoting. Placeholders are always positional `?`.

use crate::error::Error;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Keywords reserved by at least one supported dialect. Identifiers spelled
/// like one of these are always quoted.
const RESERVED: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CHECK", "COLUMN",
    "CONSTRAINT", "CREATE", "CROSS", "CURRENT", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP",
    "ELSE", "END", "EXISTS", "FOREIGN", "FROM", "FULL", "GROUP", "HAVING", "IN", "INDEX",
    "INNER", "INSERT", "INTO", "IS", "JOIN", "KEY", "LEFT", "LIKE", "LIMIT", "NOT", "NULL",
    "OFFSET", "ON", "OR", "ORDER", "OUTER", "PRIMARY", "REFERENCES", "RIGHT", "ROW", "SELECT",
    "SET", "TABLE", "THEN", "TO", "UNION", "UNIQUE", "UPDATE", "USER", "USING", "VALUES",
    "WHEN", "WHERE", "WITH",
];

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    /// SQLite
    #[default]
    Sqlite,
    /// H2
    H2,
    /// PostgreSQL
    PostgreSql,
    /// MySQL
    MySql,
}

impl SqlDialect {
    /// Lowercase dialect name as used in configuration.
    pub const fn name(self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::H2 => "h2",
            SqlDialect::PostgreSql => "postgresql",
            SqlDialect::MySql => "mysql",
        }
    }

    /// Clause appended to a query to bound it to `limit` rows.
    pub const fn limit_clause(self, _limit: i64) -> &'static str {
        " LIMIT ?"
    }

    /// Clause appended to a query to fetch `limit` rows after skipping `offset`.
    pub const fn limit_clause_with_offset(self, _limit: i64, offset: i64) -> &'static str {
        if offset == 0 { " LIMIT ?" } else { " LIMIT ? OFFSET ?" }
    }

    /// Parameters bound for a page, matching `limit_clause_with_offset`.
    pub fn page_params(self, limit: i64, offset: i64) -> Vec<Value> {
        if offset == 0 {
            vec![Value::BigInt(limit)]
        } else {
            vec![Value::BigInt(limit), Value::BigInt(offset)]
        }
    }

    /// Quote an identifier for this dialect.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            SqlDialect::MySql => format!("`{}`", name.replace('`', "``")),
            _ => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }
}

impl SqlDialect {
    /// Render an identifier for a statement: plain names pass through,
    /// reserved words and anything else are quoted.
    pub fn identifier(self, name: &str) -> Cow<'_, str> {
        if is_plain_identifier(name) {
            Cow::Borrowed(name)
        } else {
            Cow::Owned(self.quote_identifier(name))
        }
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_well = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    starts_well
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.iter().any(|kw| kw.eq_ignore_ascii_case(name))
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SqlDialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(SqlDialect::Sqlite),
            "h2" => Ok(SqlDialect::H2),
            "postgresql" | "postgres" => Ok(SqlDialect::PostgreSql),
            "mysql" => Ok(SqlDialect::MySql),
            _ => Err(Error::config(format!(
                "Provided SQL dialect < {} > is not supported",
                s
            ))),
        }
    }
}
