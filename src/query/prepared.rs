//! Prepared statements and the strategies that create them.
//!
//! Preparation is a network round trip. A [`PreparedStatement`] is cheap to
//! clone and safe to share across threads, so callers prepare once per
//! statement shape and reuse the handle.

use crate::error::DriverError;
use crate::query::results::ColumnSpec;
use crate::session::CqlSession;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// A server-parsed statement template with placeholders.
#[derive(Clone)]
pub struct PreparedStatement {
    inner: Arc<PreparedInner>,
}

struct PreparedInner {
    /// Server-side statement id
    id: Vec<u8>,
    /// Original CQL text
    cql: String,
    /// Keyspace the statement was prepared against
    keyspace: Option<String>,
    /// Placeholder metadata, in declaration order
    variables: Vec<ColumnSpec>,
}

impl PreparedStatement {
    /// Create a prepared statement handle. Called by session implementations.
    pub fn new(
        id: Vec<u8>,
        cql: impl Into<String>,
        keyspace: Option<String>,
        variables: Vec<ColumnSpec>,
    ) -> Self {
        Self {
            inner: Arc::new(PreparedInner {
                id,
                cql: cql.into(),
                keyspace,
                variables,
            }),
        }
    }

    /// Get the server-side statement id.
    pub fn id(&self) -> &[u8] {
        &self.inner.id
    }

    /// Get the CQL text.
    pub fn cql(&self) -> &str {
        &self.inner.cql
    }

    /// Get the keyspace, if the statement was prepared against one.
    pub fn keyspace(&self) -> Option<&str> {
        self.inner.keyspace.as_deref()
    }

    /// Get the placeholder metadata.
    pub fn variables(&self) -> &[ColumnSpec] {
        &self.inner.variables
    }

    /// Get the number of placeholders.
    pub fn parameter_count(&self) -> usize {
        self.inner.variables.len()
    }

    /// Whether two handles refer to the same prepared instance.
    pub fn ptr_eq(&self, other: &PreparedStatement) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("id", &hex::encode(&self.inner.id))
            .field("cql", &self.inner.cql)
            .field("keyspace", &self.inner.keyspace)
            .field("variables", &self.inner.variables)
            .finish()
    }
}

/// Strategy for creating a prepared statement from a session.
pub trait PreparedStatementCreator: Send + Sync {
    /// Prepare the statement.
    fn create(
        &self,
        session: Arc<dyn CqlSession>,
    ) -> BoxFuture<'static, Result<PreparedStatement, DriverError>>;

    /// CQL text for logging.
    fn cql(&self) -> &str;
}

/// Prepares plain CQL text.
#[derive(Debug, Clone)]
pub struct SimplePreparedStatementCreator {
    cql: String,
}

impl SimplePreparedStatementCreator {
    pub fn new(cql: impl Into<String>) -> Self {
        Self { cql: cql.into() }
    }
}

impl PreparedStatementCreator for SimplePreparedStatementCreator {
    fn create(
        &self,
        session: Arc<dyn CqlSession>,
    ) -> BoxFuture<'static, Result<PreparedStatement, DriverError>> {
        let cql = self.cql.clone();
        Box::pin(async move { session.prepare(&cql).await })
    }

    fn cql(&self) -> &str {
        &self.cql
    }
}
