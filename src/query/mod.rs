//! Statements, options and results.
//!
//! This module provides the statement model handed to the session and the
//! result model that comes back from it.
//!
//! # Overview
//!
//! The query module is organized into:
//! - `options` - Per-call execution options
//! - `statement` - Raw CQL statements and statement classification
//! - `prepared` - Prepared statements and their creation strategies
//! - `binder` - Parameter binding into bound statements
//! - `results` - Result sets, rows and column metadata
//!
//! # Example
//!
//! ```
//! use cqlexec::query::{BoundStatement, ColumnSpec, PreparedStatement, Statement};
//! use cqlexec::types::{CqlType, CqlValue};
//!
//! let prepared = PreparedStatement::new(
//!     vec![1],
//!     "INSERT INTO t (k, v) VALUES (?, ?)",
//!     None,
//!     vec![ColumnSpec::new("k", CqlType::Int), ColumnSpec::new("v", CqlType::Text)],
//! );
//!
//! let bound = BoundStatement::new(prepared.clone(), vec![1i32.into(), "a".into()])?;
//! let statement: Statement = bound.into();
//! assert!(statement.is_bound());
//!
//! // wrong arity never reaches the session
//! assert!(BoundStatement::new(prepared, vec![CqlValue::Int(1)]).is_err());
//! # Ok::<(), cqlexec::error::QueryError>(())
//! ```

pub mod binder;
pub mod options;
pub mod prepared;
pub mod results;
pub mod statement;

// Re-export commonly used types
pub use binder::{BoundStatement, FnBinder, PreparedStatementBinder};
pub use options::{Consistency, ExecuteOptions, RetryPolicy};
pub use prepared::{PreparedStatement, PreparedStatementCreator, SimplePreparedStatementCreator};
pub use results::{
    ColumnDefinitions, ColumnMap, ColumnSpec, ExecutionInfo, PageSource, ResultSet, Row, RowIter,
};
pub use statement::{placeholder_count, SimpleStatement, Statement, StatementType};
