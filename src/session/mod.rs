//! Session abstraction over the underlying CQL driver.
//!
//! This module defines the `CqlSession` trait that the execution core
//! consumes. A session is created and owned outside of this crate (cluster
//! bootstrap, pooling and the wire protocol belong to the driver) and is
//! injected into the template at construction.
//!
//! # Architecture
//!
//! - `CqlSession` - execute, prepare and read cluster metadata
//! - `memory` - an embedded in-process session for tests and demos

pub mod memory;

pub use memory::InMemorySession;

use crate::error::DriverError;
use crate::query::{ExecuteOptions, PreparedStatement, ResultSet, Statement};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Driver session trait.
///
/// Implementations must be safe to share across threads; every call is
/// independent of the others.
#[async_trait]
pub trait CqlSession: Send + Sync {
    /// Execute a statement.
    ///
    /// # Arguments
    ///
    /// * `statement` - Raw or bound statement
    /// * `options` - Effective options for this call
    ///
    /// # Returns
    ///
    /// The result set, which may still be fetching further pages.
    ///
    /// # Errors
    ///
    /// Returns `DriverError` if execution fails.
    async fn execute(
        &self,
        statement: Statement,
        options: ExecuteOptions,
    ) -> Result<ResultSet, DriverError>;

    /// Prepare a statement.
    ///
    /// # Arguments
    ///
    /// * `cql` - CQL text with `?` placeholders
    ///
    /// # Errors
    ///
    /// Returns `DriverError` if the server rejects the statement.
    async fn prepare(&self, cql: &str) -> Result<PreparedStatement, DriverError>;

    /// Read the cluster's host and token metadata.
    ///
    /// # Errors
    ///
    /// Returns `DriverError` if the metadata cannot be read.
    async fn cluster_metadata(&self) -> Result<ClusterMetadata, DriverError>;

    /// The keyspace the session is currently using.
    fn keyspace(&self) -> Option<String>;
}

/// Snapshot of cluster topology.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMetadata {
    /// Cluster name
    pub cluster_name: String,
    /// Partitioner class
    pub partitioner: String,
    /// Known hosts
    pub hosts: Vec<HostDescriptor>,
}

/// Raw descriptor of one cluster node.
#[derive(Debug, Clone, PartialEq)]
pub struct HostDescriptor {
    /// Native transport address
    pub address: SocketAddr,
    /// Resolved host name, if known
    pub host_name: Option<String>,
    /// Data center
    pub datacenter: String,
    /// Rack
    pub rack: String,
    /// Tokens owned by this node
    pub tokens: Vec<String>,
    /// Whether the driver currently considers the node up
    pub is_up: bool,
    /// Cassandra release version
    pub release_version: Option<String>,
}

impl HostDescriptor {
    /// Create a descriptor for an up node without tokens.
    pub fn new(address: SocketAddr, datacenter: impl Into<String>, rack: impl Into<String>) -> Self {
        Self {
            address,
            host_name: None,
            datacenter: datacenter.into(),
            rack: rack.into(),
            tokens: Vec::new(),
            is_up: true,
            release_version: None,
        }
    }

    pub fn with_tokens(mut self, tokens: Vec<String>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }
}
