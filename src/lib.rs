//! # cqlexec-rs
//!
//! Execution and result-processing layer over an injected CQL driver session.
//!
//! The crate sits between application code and a Cassandra driver. It
//! dispatches statements in blocking, async or bounded mode, feeds results
//! through row callbacks, row mappers and result set extractors, prepares and
//! binds statements, ingests value tuples through a single prepared statement
//! and describes the token ring. Every driver failure is translated into a
//! stable local [`ErrorKind`](error::ErrorKind).
//!
//! ## Example
//!
//! ```
//! use cqlexec::processor::row_mapper;
//! use cqlexec::{CqlTemplate, InMemorySession};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
//! let template = CqlTemplate::new(Arc::new(InMemorySession::new()), runtime.handle().clone());
//!
//! template.execute_cql("CREATE TABLE users (id int PRIMARY KEY, name text)", None)?;
//! template.ingest(
//!     "INSERT INTO users (id, name) VALUES (?, ?)",
//!     vec![vec![1i32.into(), "ada".into()], vec![2i32.into(), "grace".into()]],
//!     None,
//! )?;
//!
//! let names = template.select_mapped(
//!     "SELECT name FROM users",
//!     row_mapper(|row, _| Ok(row.get_as::<String>(0)?)),
//!     None,
//! )?;
//! assert_eq!(names.count(), 2);
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod future;
mod ingest;
pub mod processor;
pub mod query;
pub mod session;
pub mod template;
pub mod topology;
pub mod types;

// Re-export public API
pub use config::TemplateConfig;
pub use error::{CqlError, DriverError, ErrorKind, QueryError, Result};
pub use future::{CqlFuture, FutureState};
pub use processor::{ResultSetExtractor, RowCallbackHandler, RowMapper};
pub use query::{Consistency, ExecuteOptions, PreparedStatement, ResultSet, Row, Statement};
pub use session::{CqlSession, InMemorySession};
pub use template::CqlTemplate;
pub use topology::{HostMapper, RingMember};
pub use types::{CqlType, CqlValue};
