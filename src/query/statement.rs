//! CQL statements.
//!
//! A [`Statement`] is either raw query text ([`SimpleStatement`]) or a
//! prepared statement with bound values ([`BoundStatement`]).

use crate::query::binder::BoundStatement;
use crate::types::CqlValue;
use std::fmt;

/// Type of CQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    /// SELECT query
    Select,
    /// INSERT statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// BEGIN BATCH ... APPLY BATCH
    Batch,
    /// Schema statement (CREATE, ALTER, DROP, TRUNCATE)
    Ddl,
    /// USE keyspace
    Use,
    /// Unknown or other statement type
    Other,
}

impl StatementType {
    /// Detect statement type from CQL text.
    pub fn from_cql(cql: &str) -> Self {
        let trimmed = cql.trim_start().to_uppercase();

        if trimmed.starts_with("SELECT") {
            Self::Select
        } else if trimmed.starts_with("INSERT") {
            Self::Insert
        } else if trimmed.starts_with("UPDATE") {
            Self::Update
        } else if trimmed.starts_with("DELETE") {
            Self::Delete
        } else if trimmed.starts_with("BEGIN") {
            Self::Batch
        } else if trimmed.starts_with("CREATE")
            || trimmed.starts_with("ALTER")
            || trimmed.starts_with("DROP")
            || trimmed.starts_with("TRUNCATE")
        {
            Self::Ddl
        } else if trimmed.starts_with("USE") {
            Self::Use
        } else {
            Self::Other
        }
    }

    /// Check if this statement type returns rows.
    pub fn returns_rows(&self) -> bool {
        matches!(self, Self::Select)
    }

    /// Check if this statement type writes data.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete | Self::Batch)
    }
}

/// Count `?` placeholders outside of string literals and comments.
pub fn placeholder_count(cql: &str) -> usize {
    let mut count = 0;
    let mut in_string = false;
    let mut chars = cql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => in_string = !in_string,
            '?' if !in_string => count += 1,
            '-' if !in_string && chars.peek() == Some(&'-') => {
                // line comment
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    count
}

/// Raw CQL text with optional positional values.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleStatement {
    cql: String,
    values: Vec<CqlValue>,
}

impl SimpleStatement {
    /// Create a statement without values.
    pub fn new(cql: impl Into<String>) -> Self {
        Self {
            cql: cql.into(),
            values: Vec::new(),
        }
    }

    /// Attach positional values for `?` placeholders.
    pub fn with_values(mut self, values: Vec<CqlValue>) -> Self {
        self.values = values;
        self
    }

    /// Get the CQL text.
    pub fn cql(&self) -> &str {
        &self.cql
    }

    /// Get the positional values.
    pub fn values(&self) -> &[CqlValue] {
        &self.values
    }

    /// Get the statement type.
    pub fn statement_type(&self) -> StatementType {
        StatementType::from_cql(&self.cql)
    }
}

/// A unit of query work submitted to the session.
#[derive(Debug)]
pub enum Statement {
    /// Raw text
    Simple(SimpleStatement),
    /// Prepared statement with bound values
    Bound(BoundStatement),
}

impl Statement {
    /// Get the CQL text.
    pub fn cql(&self) -> &str {
        match self {
            Statement::Simple(s) => s.cql(),
            Statement::Bound(b) => b.prepared().cql(),
        }
    }

    /// Get the positional values.
    pub fn values(&self) -> &[CqlValue] {
        match self {
            Statement::Simple(s) => s.values(),
            Statement::Bound(b) => b.values(),
        }
    }

    /// Get the statement type.
    pub fn statement_type(&self) -> StatementType {
        StatementType::from_cql(self.cql())
    }

    /// Whether this is a bound prepared statement.
    pub fn is_bound(&self) -> bool {
        matches!(self, Statement::Bound(_))
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cql())
    }
}

impl From<SimpleStatement> for Statement {
    fn from(value: SimpleStatement) -> Self {
        Statement::Simple(value)
    }
}

impl From<BoundStatement> for Statement {
    fn from(value: BoundStatement) -> Self {
        Statement::Bound(value)
    }
}

impl From<&str> for Statement {
    fn from(value: &str) -> Self {
        Statement::Simple(SimpleStatement::new(value))
    }
}

impl From<String> for Statement {
    fn from(value: String) -> Self {
        Statement::Simple(SimpleStatement::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_type_detection() {
        assert_eq!(StatementType::from_cql("SELECT * FROM users"), StatementType::Select);
        assert_eq!(StatementType::from_cql("  select k from t"), StatementType::Select);
        assert_eq!(
            StatementType::from_cql("INSERT INTO t (k, v) VALUES (?, ?)"),
            StatementType::Insert
        );
        assert_eq!(StatementType::from_cql("UPDATE t SET v = 1 WHERE k = 1"), StatementType::Update);
        assert_eq!(StatementType::from_cql("DELETE FROM t WHERE k = 1"), StatementType::Delete);
        assert_eq!(
            StatementType::from_cql("BEGIN BATCH INSERT INTO t (k) VALUES (1) APPLY BATCH"),
            StatementType::Batch
        );
        assert_eq!(StatementType::from_cql("TRUNCATE t"), StatementType::Ddl);
        assert_eq!(StatementType::from_cql("CREATE TABLE t (k int PRIMARY KEY)"), StatementType::Ddl);
        assert_eq!(StatementType::from_cql("USE ks"), StatementType::Use);
        assert_eq!(StatementType::from_cql("LIST ROLES"), StatementType::Other);
    }

    #[test]
    fn test_statement_type_properties() {
        assert!(StatementType::Select.returns_rows());
        assert!(!StatementType::Insert.returns_rows());
        assert!(StatementType::Batch.is_write());
        assert!(!StatementType::Ddl.is_write());
    }

    #[test]
    fn test_placeholder_count() {
        assert_eq!(placeholder_count("INSERT INTO t (k, v) VALUES (?, ?)"), 2);
        assert_eq!(placeholder_count("SELECT * FROM t WHERE v = 'why?'"), 0);
        assert_eq!(placeholder_count("SELECT * FROM t -- any?\nWHERE k = ?"), 1);
        assert_eq!(placeholder_count("SELECT now() FROM system.local"), 0);
    }

    #[test]
    fn test_simple_statement() {
        let stmt = SimpleStatement::new("SELECT * FROM t WHERE k = ?").with_values(vec![1i32.into()]);
        assert_eq!(stmt.values(), &[CqlValue::Int(1)]);
        assert_eq!(stmt.statement_type(), StatementType::Select);

        let stmt: Statement = stmt.into();
        assert!(!stmt.is_bound());
        assert_eq!(stmt.to_string(), "SELECT * FROM t WHERE k = ?");
    }
}
