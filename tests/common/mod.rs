//! Common test utilities for cqlexec-rs integration tests.
//!
//! # Sessions
//!
//! Integration tests run against [`InMemorySession`], the embedded session
//! shipped with the crate, so no Cassandra node is required. Tests that need
//! precise control over driver calls use [`MockSession`] instead.
//!
//! # Logging
//!
//! Call [`init_tracing`] at the start of a test to see the template's log
//! output. The filter is read from `RUST_LOG`:
//!
//! ```bash
//! RUST_LOG=cqlexec=debug cargo test --test template_tests -- --nocapture
//! ```
//!
//! # Runtimes
//!
//! Blocking entry points refuse to run on a current-thread runtime, so
//! blocking tests are plain `#[test]` functions that own a multi-thread
//! runtime through [`Fixture`].

#![allow(dead_code)]

use async_trait::async_trait;
use cqlexec::error::DriverError;
use cqlexec::query::{ExecuteOptions, PreparedStatement, ResultSet, Statement};
use cqlexec::session::{ClusterMetadata, CqlSession, InMemorySession};
use cqlexec::{CqlTemplate, TemplateConfig};
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// Logging
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Fixtures
// ============================================================================

/// A multi-thread runtime with two workers.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to build test runtime")
}

/// Runtime, embedded session and a template over both.
///
/// Field order matters: the template is dropped before the runtime.
pub struct Fixture {
    pub template: CqlTemplate,
    pub session: Arc<InMemorySession>,
    pub runtime: tokio::runtime::Runtime,
}

impl Fixture {
    /// Fixture with the default template configuration.
    pub fn new() -> Self {
        Self::with_config(TemplateConfig::default())
    }

    pub fn with_config(config: TemplateConfig) -> Self {
        Self::with_session(InMemorySession::new(), config)
    }

    pub fn with_session(session: InMemorySession, config: TemplateConfig) -> Self {
        init_tracing();
        let runtime = runtime();
        let session = Arc::new(session);
        let template = CqlTemplate::with_config(session.clone(), runtime.handle().clone(), config);
        Self {
            template,
            session,
            runtime,
        }
    }

    /// Create a `(id int PRIMARY KEY, name text, score bigint)` table.
    pub fn create_users(&self, table: &str) {
        self.session
            .run(
                &format!("CREATE TABLE {} (id int PRIMARY KEY, name text, score bigint)", table),
                &[],
            )
            .expect("Failed to create table");
    }
}

static TABLE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Generate a unique table name so tests sharing a session cannot collide.
pub fn unique_table(prefix: &str) -> String {
    format!("{}_{}", prefix, TABLE_COUNTER.fetch_add(1, Ordering::SeqCst))
}

// ============================================================================
// Mock Session
// ============================================================================

mock! {
    pub Session {}

    #[async_trait]
    impl CqlSession for Session {
        async fn execute(&self, statement: Statement, options: ExecuteOptions) -> Result<ResultSet, DriverError>;
        async fn prepare(&self, cql: &str) -> Result<PreparedStatement, DriverError>;
        async fn cluster_metadata(&self) -> Result<ClusterMetadata, DriverError>;
        fn keyspace(&self) -> Option<String>;
    }
}
