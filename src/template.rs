//! Statement dispatch and result-processing entry points.
//!
//! [`CqlTemplate`] is the main entry point of the crate. It wraps an injected
//! [`CqlSession`] and a tokio runtime handle, and offers three execution
//! modes for every statement:
//!
//! - blocking: wait until the driver settles the call
//! - async: return a [`CqlFuture`] immediately
//! - bounded: wait at most a timeout, then stop waiting
//!
//! Every other entry point (select helpers, prepared statement helpers,
//! ingest, ring description) is built on these.
//!
//! # Options
//!
//! Entry points take `Option<&ExecuteOptions>`. `None` selects
//! `TemplateConfig::default_options`; `Some(options)` is passed to the driver
//! unchanged.
//!
//! # Example
//!
//! ```
//! use cqlexec::session::InMemorySession;
//! use cqlexec::template::CqlTemplate;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = tokio::runtime::Builder::new_multi_thread()
//!     .worker_threads(1)
//!     .enable_all()
//!     .build()?;
//! let template = CqlTemplate::new(Arc::new(InMemorySession::new()), runtime.handle().clone());
//!
//! template.execute_cql("CREATE TABLE t (k int PRIMARY KEY, v text)", None)?;
//! template.execute_cql("INSERT INTO t (k, v) VALUES (1, 'a')", None)?;
//!
//! let count: i64 = template.select_one_value("SELECT COUNT(*) FROM t", None)?;
//! assert_eq!(count, 1);
//! # Ok(())
//! # }
//! ```

use crate::config::TemplateConfig;
use crate::error::{
    CqlError, DefaultExceptionTranslator, DriverError, ExceptionTranslator, ProcessingError,
    QueryError, Result,
};
use crate::future::{CqlFuture, DirectExecutor, Executor};
use crate::ingest::Ingestor;
use crate::processor::{
    self, MappedRows, ResultSetExtractor, RowCallbackHandler, RowMapper,
};
use crate::query::{
    BoundStatement, ColumnMap, ExecuteOptions, PreparedStatement, PreparedStatementBinder,
    PreparedStatementCreator, ResultSet, SimpleStatement, Statement,
};
use crate::session::CqlSession;
use crate::topology::{HostMapper, RingMember, RingMemberHostMapper};
use crate::types::{CqlValue, FromCqlValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

/// Execution core over an injected session.
///
/// Templates are cheap to clone and safe to share between threads; clones
/// share the session, runtime and configuration.
#[derive(Clone)]
pub struct CqlTemplate {
    session: Arc<dyn CqlSession>,
    runtime: Handle,
    config: Arc<TemplateConfig>,
    translator: Arc<dyn ExceptionTranslator>,
}

impl std::fmt::Debug for CqlTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqlTemplate")
            .field("config", &self.config)
            .field("translator", &self.translator)
            .finish()
    }
}

impl CqlTemplate {
    /// Create a template with the default configuration.
    ///
    /// # Arguments
    ///
    /// * `session` - Driver session shared by every call
    /// * `runtime` - Runtime the driver calls are spawned on
    pub fn new(session: Arc<dyn CqlSession>, runtime: Handle) -> Self {
        Self::with_config(session, runtime, TemplateConfig::default())
    }

    /// Create a template with an explicit configuration.
    pub fn with_config(session: Arc<dyn CqlSession>, runtime: Handle, config: TemplateConfig) -> Self {
        Self {
            session,
            runtime,
            config: Arc::new(config),
            translator: Arc::new(DefaultExceptionTranslator),
        }
    }

    /// Replace the driver error translator.
    pub fn with_translator(mut self, translator: impl ExceptionTranslator + 'static) -> Self {
        self.translator = Arc::new(translator);
        self
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<dyn CqlSession> {
        &self.session
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    /// Runtime the driver calls run on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    // ------------------------------------------------------------------------
    // Dispatcher
    // ------------------------------------------------------------------------

    /// Dispatch a statement and return its async handle.
    ///
    /// Cancelling the handle aborts the driver call best-effort.
    pub fn execute_async(
        &self,
        statement: impl Into<Statement>,
        options: Option<&ExecuteOptions>,
    ) -> CqlFuture<ResultSet> {
        let statement = statement.into();
        let options = self.resolve_options(options);
        let kind = statement.statement_type();
        debug!(
            cql = statement.cql(),
            statement_type = ?kind,
            returns_rows = kind.returns_rows(),
            writes = kind.is_write(),
            bound = statement.is_bound(),
            consistency = ?options.consistency,
            keyspace = self.config.keyspace.as_deref(),
            "Dispatching statement"
        );

        let session = Arc::clone(&self.session);
        self.spawn(async move { session.execute(statement, options).await })
    }

    /// Dispatch a statement and block until it settles.
    ///
    /// # Errors
    ///
    /// Returns the translated driver error, or `QueryError::InvalidState`
    /// when called from a current-thread tokio runtime.
    pub fn execute_blocking(
        &self,
        statement: impl Into<Statement>,
        options: Option<&ExecuteOptions>,
    ) -> Result<ResultSet> {
        blocking(|| self.execute_async(statement, options).get())
    }

    /// Dispatch a statement and block at most `timeout`.
    ///
    /// `None` uses the configured default timeout; without one the wait is
    /// unbounded. On timeout the driver call is left running and its outcome
    /// is discarded.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Timeout` if the call did not settle in time.
    pub fn execute_bounded(
        &self,
        statement: impl Into<Statement>,
        options: Option<&ExecuteOptions>,
        timeout: Option<Duration>,
    ) -> Result<ResultSet> {
        blocking(|| {
            let future = self.execute_async(statement, options);
            match timeout.or(self.config.default_timeout) {
                Some(timeout) => {
                    let outcome = future.get_timeout(timeout);
                    if matches!(&outcome, Err(e) if e.is_timeout()) {
                        warn!(
                            timeout_ms = timeout.as_millis() as u64,
                            "Bounded wait elapsed, abandoning in-flight statement"
                        );
                    }
                    outcome
                }
                None => future.get(),
            }
        })
    }

    // ------------------------------------------------------------------------
    // Raw CQL
    // ------------------------------------------------------------------------

    /// Execute CQL text and block for the result.
    pub fn execute_cql(&self, cql: &str, options: Option<&ExecuteOptions>) -> Result<ResultSet> {
        self.execute_blocking(SimpleStatement::new(cql), options)
    }

    /// Execute CQL text asynchronously.
    pub fn execute_cql_async(
        &self,
        cql: &str,
        options: Option<&ExecuteOptions>,
    ) -> CqlFuture<ResultSet> {
        self.execute_async(SimpleStatement::new(cql), options)
    }

    /// Remove every row of `table`.
    pub fn truncate(&self, table: &str, options: Option<&ExecuteOptions>) -> Result<()> {
        self.execute_blocking(truncate_cql(table), options)?;
        Ok(())
    }

    pub fn truncate_async(&self, table: &str, options: Option<&ExecuteOptions>) -> CqlFuture<()> {
        self.execute_async(truncate_cql(table), options)
            .transform(DirectExecutor, |_| Ok(()))
    }

    /// Run `callback` against the raw session.
    ///
    /// The returned future runs on the template's runtime and its driver
    /// errors are translated like any other call.
    pub fn execute_in_session<T, F, Fut>(&self, callback: F) -> CqlFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<dyn CqlSession>) -> Fut,
        Fut: Future<Output = std::result::Result<T, DriverError>> + Send + 'static,
    {
        self.spawn(callback(Arc::clone(&self.session)))
    }

    // ------------------------------------------------------------------------
    // Select family
    // ------------------------------------------------------------------------

    /// Execute `cql` and reduce the result with `extractor`.
    pub fn select<T, E>(&self, cql: &str, extractor: &E, options: Option<&ExecuteOptions>) -> Result<T>
    where
        E: ResultSetExtractor<T> + ?Sized,
    {
        let rs = self.execute_cql(cql, options)?;
        extractor.extract(&rs)
    }

    /// Like [`select`](Self::select), waiting at most `timeout` for the result.
    pub fn select_bounded<T, E>(
        &self,
        cql: &str,
        extractor: &E,
        timeout: Option<Duration>,
        options: Option<&ExecuteOptions>,
    ) -> Result<T>
    where
        E: ResultSetExtractor<T> + ?Sized,
    {
        let rs = self.execute_bounded(SimpleStatement::new(cql), options, timeout)?;
        extractor.extract(&rs)
    }

    /// Execute `cql` asynchronously.
    pub fn select_async(&self, cql: &str, options: Option<&ExecuteOptions>) -> CqlFuture<ResultSet> {
        self.execute_cql_async(cql, options)
    }

    /// Execute `cql` and feed every row to `handler`. Returns the row count.
    pub fn select_rows<H>(
        &self,
        cql: &str,
        handler: &mut H,
        options: Option<&ExecuteOptions>,
    ) -> Result<usize>
    where
        H: RowCallbackHandler + ?Sized,
    {
        let rs = self.execute_cql(cql, options)?;
        processor::process_rows(&rs, handler)
    }

    /// Execute `cql` asynchronously and feed the rows to `handler` on `executor`.
    ///
    /// Further pages are fetched on `executor` as well. Pass a `Handle` when
    /// the session's page source blocks.
    pub fn select_rows_async<H, X>(
        &self,
        cql: &str,
        handler: H,
        executor: X,
        options: Option<&ExecuteOptions>,
    ) -> CqlFuture<usize>
    where
        H: RowCallbackHandler + 'static,
        X: Executor + 'static,
    {
        self.execute_cql_async(cql, options)
            .transform(executor, move |rs| {
                let mut handler = handler;
                processor::process_rows(rs, &mut handler)
            })
    }

    /// Execute `cql` and lazily map its rows.
    pub fn select_mapped<T, M>(
        &self,
        cql: &str,
        mapper: M,
        options: Option<&ExecuteOptions>,
    ) -> Result<MappedRows<T>>
    where
        M: RowMapper<T> + 'static,
    {
        let rs = self.execute_cql(cql, options)?;
        Ok(processor::map_rows(&rs, mapper))
    }

    /// Execute `cql` asynchronously and map every row on `executor`.
    pub fn select_mapped_async<T, M, X>(
        &self,
        cql: &str,
        mapper: M,
        executor: X,
        options: Option<&ExecuteOptions>,
    ) -> CqlFuture<Vec<T>>
    where
        T: Send + Sync + 'static,
        M: RowMapper<T> + 'static,
        X: Executor + 'static,
    {
        self.execute_cql_async(cql, options)
            .transform(executor, move |rs| {
                processor::map_rows(rs, mapper).collect::<Result<Vec<T>>>()
            })
    }

    /// Execute `cql` and map its only row.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::IncorrectResultSize` unless exactly one row is returned.
    pub fn select_one<T, M>(&self, cql: &str, mapper: &M, options: Option<&ExecuteOptions>) -> Result<T>
    where
        M: RowMapper<T> + ?Sized,
    {
        let rs = self.execute_cql(cql, options)?;
        processor::process_one(&rs, mapper)
    }

    /// Execute `cql` and convert column 0 of its only row to `T`.
    pub fn select_one_value<T: FromCqlValue>(&self, cql: &str, options: Option<&ExecuteOptions>) -> Result<T> {
        let rs = self.execute_cql(cql, options)?;
        processor::process_one_value(&rs)
    }

    /// Execute `cql` and return its only row as a column map.
    pub fn select_one_as_map(&self, cql: &str, options: Option<&ExecuteOptions>) -> Result<ColumnMap> {
        let rs = self.execute_cql(cql, options)?;
        processor::process_one_as_map(&rs)
    }

    /// Execute `cql` and collect column 0 of every row.
    pub fn select_first_column_as_list<T: FromCqlValue>(
        &self,
        cql: &str,
        options: Option<&ExecuteOptions>,
    ) -> Result<Vec<T>> {
        let rs = self.execute_cql(cql, options)?;
        processor::process_first_column_as_list(&rs)
    }

    /// Execute `cql` and collect every row as a column map.
    pub fn select_as_list_of_map(&self, cql: &str, options: Option<&ExecuteOptions>) -> Result<Vec<ColumnMap>> {
        let rs = self.execute_cql(cql, options)?;
        processor::process_as_list_of_map(&rs)
    }

    // ------------------------------------------------------------------------
    // Prepared statements
    // ------------------------------------------------------------------------

    /// Prepare `cql`. One network round trip.
    pub fn prepare_statement(&self, cql: &str) -> Result<PreparedStatement> {
        blocking(|| self.prepare_statement_async(cql).get())
    }

    pub fn prepare_statement_async(&self, cql: &str) -> CqlFuture<PreparedStatement> {
        debug!(cql, "Preparing statement");
        let session = Arc::clone(&self.session);
        let cql = cql.to_string();
        self.spawn(async move { session.prepare(&cql).await })
    }

    /// Prepare through a creation strategy.
    pub fn prepare_with(&self, creator: &dyn PreparedStatementCreator) -> Result<PreparedStatement> {
        blocking(|| {
            debug!(cql = creator.cql(), "Preparing statement with creator");
            self.spawn(creator.create(Arc::clone(&self.session))).get()
        })
    }

    /// Bind values to a prepared statement. Local, never dispatched.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Binding` on a count or type mismatch.
    pub fn bind(
        &self,
        prepared: &PreparedStatement,
        binder: Option<&dyn PreparedStatementBinder>,
    ) -> Result<BoundStatement> {
        Ok(BoundStatement::with_binder(prepared.clone(), binder)?)
    }

    /// Bind, execute and reduce the result with `extractor`.
    pub fn select_prepared<T, E>(
        &self,
        prepared: &PreparedStatement,
        binder: Option<&dyn PreparedStatementBinder>,
        extractor: &E,
        options: Option<&ExecuteOptions>,
    ) -> Result<T>
    where
        E: ResultSetExtractor<T> + ?Sized,
    {
        let bound = self.bind(prepared, binder)?;
        let rs = self.execute_blocking(bound, options)?;
        extractor.extract(&rs)
    }

    /// Bind, execute and feed every row to `handler`.
    pub fn select_prepared_rows<H>(
        &self,
        prepared: &PreparedStatement,
        binder: Option<&dyn PreparedStatementBinder>,
        handler: &mut H,
        options: Option<&ExecuteOptions>,
    ) -> Result<usize>
    where
        H: RowCallbackHandler + ?Sized,
    {
        let bound = self.bind(prepared, binder)?;
        let rs = self.execute_blocking(bound, options)?;
        processor::process_rows(&rs, handler)
    }

    /// Bind, execute and lazily map the rows.
    pub fn select_prepared_mapped<T, M>(
        &self,
        prepared: &PreparedStatement,
        binder: Option<&dyn PreparedStatementBinder>,
        mapper: M,
        options: Option<&ExecuteOptions>,
    ) -> Result<MappedRows<T>>
    where
        M: RowMapper<T> + 'static,
    {
        let bound = self.bind(prepared, binder)?;
        let rs = self.execute_blocking(bound, options)?;
        Ok(processor::map_rows(&rs, mapper))
    }

    /// Prepare through `creator`, then run `callback` with the session and
    /// the prepared statement.
    pub fn execute_prepared<T, F, Fut>(
        &self,
        creator: &dyn PreparedStatementCreator,
        callback: F,
    ) -> CqlFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<dyn CqlSession>, PreparedStatement) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, DriverError>> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let prepare = creator.create(Arc::clone(&session));
        self.spawn(async move {
            let prepared = prepare.await?;
            callback(session, prepared).await
        })
    }

    /// Run `callback` with the session and an already prepared statement.
    ///
    /// No preparation round trip is made.
    pub fn execute_prepared_with<T, F, Fut>(
        &self,
        prepared: &PreparedStatement,
        callback: F,
    ) -> CqlFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<dyn CqlSession>, PreparedStatement) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, DriverError>> + Send + 'static,
    {
        debug!(cql = prepared.cql(), "Running callback with prepared statement");
        let session = Arc::clone(&self.session);
        let prepared = prepared.clone();
        self.spawn(async move { callback(session, prepared).await })
    }

    // ------------------------------------------------------------------------
    // Processing of already obtained results
    // ------------------------------------------------------------------------

    pub fn process_rows<H>(&self, rs: &ResultSet, handler: &mut H) -> Result<usize>
    where
        H: RowCallbackHandler + ?Sized,
    {
        processor::process_rows(rs, handler)
    }

    pub fn map_rows<T, M>(&self, rs: &ResultSet, mapper: M) -> MappedRows<T>
    where
        M: RowMapper<T> + 'static,
    {
        processor::map_rows(rs, mapper)
    }

    pub fn process_one<T, M>(&self, rs: &ResultSet, mapper: &M) -> Result<T>
    where
        M: RowMapper<T> + ?Sized,
    {
        processor::process_one(rs, mapper)
    }

    pub fn process_one_value<T: FromCqlValue>(&self, rs: &ResultSet) -> Result<T> {
        processor::process_one_value(rs)
    }

    pub fn process_one_as_map(&self, rs: &ResultSet) -> Result<ColumnMap> {
        processor::process_one_as_map(rs)
    }

    pub fn process_first_column_as_list<T: FromCqlValue>(&self, rs: &ResultSet) -> Result<Vec<T>> {
        processor::process_first_column_as_list(rs)
    }

    pub fn process_as_list_of_map(&self, rs: &ResultSet) -> Result<Vec<ColumnMap>> {
        processor::process_as_list_of_map(rs)
    }

    // ------------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------------

    /// Prepare `cql` once and execute it for every value tuple.
    ///
    /// Tuples are consumed lazily. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::IngestFailed` with the index of the first failed
    /// tuple. Rows written before the failure stay written.
    pub fn ingest<I>(&self, cql: &str, rows: I, options: Option<&ExecuteOptions>) -> Result<usize>
    where
        I: IntoIterator<Item = Vec<CqlValue>>,
    {
        blocking(|| Ingestor::new(self, self.config.ingest_max_in_flight).run(cql, rows, options))
    }

    /// Ingest a materialized two-dimensional array of values.
    pub fn ingest_array<R>(&self, cql: &str, rows: &[R], options: Option<&ExecuteOptions>) -> Result<usize>
    where
        R: AsRef<[CqlValue]>,
    {
        self.ingest(cql, rows.iter().map(|row| row.as_ref().to_vec()), options)
    }

    // ------------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------------

    /// Describe the token ring as [`RingMember`]s.
    pub fn describe_ring(&self) -> Result<Vec<RingMember>> {
        self.describe_ring_with(&RingMemberHostMapper)
    }

    /// Describe the token ring, mapping each host through `mapper`.
    pub fn describe_ring_with<T, M>(&self, mapper: &M) -> Result<Vec<T>>
    where
        M: HostMapper<T> + ?Sized,
    {
        let session = Arc::clone(&self.session);
        let metadata =
            blocking(|| self.spawn(async move { session.cluster_metadata().await }).get())?;
        debug!(
            cluster = %metadata.cluster_name,
            hosts = metadata.hosts.len(),
            "Read cluster metadata"
        );

        metadata
            .hosts
            .iter()
            .map(|host| {
                mapper.map_host(host).map_err(|e| {
                    CqlError::Processing(ProcessingError::HostMapper {
                        host: host.address.to_string(),
                        source: Arc::from(e),
                    })
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    pub(crate) fn resolve_options(&self, options: Option<&ExecuteOptions>) -> ExecuteOptions {
        match options {
            Some(options) => options.clone(),
            None => self.config.default_options.clone(),
        }
    }

    /// Run a driver operation on the runtime, settling a handle with its
    /// translated outcome.
    fn spawn<T, Fut>(&self, operation: Fut) -> CqlFuture<T>
    where
        T: Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, DriverError>> + Send + 'static,
    {
        let (future, promise) = CqlFuture::pending();
        let translator = Arc::clone(&self.translator);
        let task = self.runtime.spawn(async move {
            let outcome = operation
                .await
                .map_err(|e| translate(translator.as_ref(), e));
            promise.settle(outcome);
        });

        let abort = task.abort_handle();
        future.set_cancel_hook(move || abort.abort());
        future
    }
}

fn translate(translator: &dyn ExceptionTranslator, error: DriverError) -> CqlError {
    let translated = translator.translate(error);
    warn!(kind = %translated.kind, error = %translated.message, "Driver call failed");
    CqlError::Driver(translated)
}

fn truncate_cql(table: &str) -> SimpleStatement {
    SimpleStatement::new(format!("TRUNCATE {}", table))
}

/// Run a blocking wait on the calling thread.
///
/// On a multi-thread runtime worker the worker is handed off first so the
/// driver task keeps a scheduler thread. A current-thread runtime could not
/// drive the task at all, so the call is refused there.
fn blocking<T>(wait: impl FnOnce() -> Result<T>) -> Result<T> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            Err(QueryError::InvalidState(
                "blocking call from a current-thread runtime; use the async entry points".to_string(),
            )
            .into())
        }
        Ok(_) => tokio::task::block_in_place(wait),
        Err(_) => wait(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::query::{ColumnSpec, Consistency};
    use crate::session::{ClusterMetadata, HostDescriptor};
    use crate::types::CqlType;
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        pub Session {}

        #[async_trait]
        impl CqlSession for Session {
            async fn execute(&self, statement: Statement, options: ExecuteOptions) -> std::result::Result<ResultSet, DriverError>;
            async fn prepare(&self, cql: &str) -> std::result::Result<PreparedStatement, DriverError>;
            async fn cluster_metadata(&self) -> std::result::Result<ClusterMetadata, DriverError>;
            fn keyspace(&self) -> Option<String>;
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn template(session: MockSession, rt: &tokio::runtime::Runtime) -> CqlTemplate {
        CqlTemplate::new(Arc::new(session), rt.handle().clone())
    }

    fn kv_prepared() -> PreparedStatement {
        PreparedStatement::new(
            vec![7],
            "INSERT INTO t (k, v) VALUES (?, ?)",
            None,
            vec![
                ColumnSpec::new("k", CqlType::Int),
                ColumnSpec::new("v", CqlType::Text),
            ],
        )
    }

    fn count_result(n: i64) -> ResultSet {
        ResultSet::from_rows(
            vec![ColumnSpec::new("count", CqlType::Bigint)],
            vec![vec![CqlValue::BigInt(n)]],
        )
    }

    #[test]
    fn test_binding_error_is_never_dispatched() {
        let rt = runtime();
        let mut session = MockSession::new();
        session.expect_execute().times(0);
        let template = template(session, &rt);

        let too_few = [CqlValue::Int(1)];
        let err = template
            .select_prepared(&kv_prepared(), Some(&too_few), &processor::ColumnMapListExtractor, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);
    }

    #[test]
    fn test_absent_options_use_configured_defaults() {
        let rt = runtime();
        let mut session = MockSession::new();
        session
            .expect_execute()
            .withf(|_, options| options.consistency == Some(Consistency::LocalQuorum))
            .times(1)
            .returning(|_, _| Ok(ResultSet::empty()));
        session
            .expect_execute()
            .withf(|_, options| options.is_empty())
            .times(1)
            .returning(|_, _| Ok(ResultSet::empty()));

        let config = TemplateConfig::builder()
            .consistency(Consistency::LocalQuorum)
            .build()
            .unwrap();
        let template = CqlTemplate::with_config(Arc::new(session), rt.handle().clone(), config);

        template.execute_cql("SELECT * FROM t", None).unwrap();
        template
            .execute_cql("SELECT * FROM t", Some(&ExecuteOptions::default()))
            .unwrap();
    }

    #[test]
    fn test_driver_failure_is_translated() {
        let rt = runtime();
        let mut session = MockSession::new();
        session.expect_execute().returning(|_, _| {
            Err(DriverError::Unavailable {
                consistency: Consistency::Quorum,
                required: 2,
                alive: 1,
            })
        });
        let template = template(session, &rt);

        let err = template.execute_cql("SELECT * FROM t", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientReplicas);
        match err {
            CqlError::Driver(access) => assert!(matches!(access.cause, DriverError::Unavailable { .. })),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_custom_translator() {
        #[derive(Debug)]
        struct EverythingIsOverloaded;

        impl ExceptionTranslator for EverythingIsOverloaded {
            fn translate(&self, error: DriverError) -> crate::error::DataAccessError {
                crate::error::DataAccessError {
                    kind: ErrorKind::Overloaded,
                    message: error.to_string(),
                    cause: error,
                }
            }
        }

        let rt = runtime();
        let mut session = MockSession::new();
        session
            .expect_execute()
            .returning(|_, _| Err(DriverError::Server("oops".to_string())));
        let template = template(session, &rt).with_translator(EverythingIsOverloaded);

        let err = template.execute_cql("SELECT 1", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overloaded);
    }

    #[test]
    fn test_scalar_select() {
        let rt = runtime();
        let mut session = MockSession::new();
        session.expect_execute().returning(|_, _| Ok(count_result(5)));
        let template = template(session, &rt);

        let as_int: i64 = template.select_one_value("SELECT COUNT(*) FROM t", None).unwrap();
        let as_text: String = template.select_one_value("SELECT COUNT(*) FROM t", None).unwrap();
        assert_eq!(as_int, 5);
        assert_eq!(as_text, "5");
    }

    #[test]
    fn test_prepare_with_creator() {
        let rt = runtime();
        let mut session = MockSession::new();
        session
            .expect_prepare()
            .with(eq("INSERT INTO t (k, v) VALUES (?, ?)"))
            .times(1)
            .returning(|_| Ok(kv_prepared()));
        let template = template(session, &rt);

        let creator = crate::query::SimplePreparedStatementCreator::new("INSERT INTO t (k, v) VALUES (?, ?)");
        let prepared = template.prepare_with(&creator).unwrap();
        assert_eq!(prepared.parameter_count(), 2);
    }

    #[test]
    fn test_execute_prepared_callback() {
        let rt = runtime();
        let mut session = MockSession::new();
        session.expect_prepare().returning(|_| Ok(kv_prepared()));
        session.expect_execute().times(1).returning(|_, _| Ok(ResultSet::empty()));
        let template = template(session, &rt);

        let creator = crate::query::SimplePreparedStatementCreator::new("INSERT INTO t (k, v) VALUES (?, ?)");
        let future = template.execute_prepared(&creator, |session, prepared| async move {
            let bound = BoundStatement::new(prepared.clone(), vec![1i32.into(), "a".into()])
                .map_err(|e| DriverError::InvalidQuery(e.to_string()))?;
            session.execute(bound.into(), ExecuteOptions::new()).await?;
            Ok::<_, DriverError>(prepared.cql().to_string())
        });
        assert_eq!(future.get().unwrap(), "INSERT INTO t (k, v) VALUES (?, ?)");
    }

    #[test]
    fn test_execute_prepared_with_skips_preparation() {
        let rt = runtime();
        let mut session = MockSession::new();
        session.expect_prepare().times(0);
        session
            .expect_execute()
            .times(2)
            .returning(|_, _| Ok(count_result(1)));
        let template = template(session, &rt);

        let prepared = kv_prepared();
        for k in 0..2 {
            let future = template.execute_prepared_with(&prepared, move |session, prepared| async move {
                let bound = BoundStatement::new(prepared, vec![CqlValue::Int(k), "a".into()])
                    .map_err(|e| DriverError::InvalidQuery(e.to_string()))?;
                let rs = session.execute(bound.into(), ExecuteOptions::new()).await?;
                Ok::<_, DriverError>(rs.rows().count())
            });
            assert_eq!(future.get().unwrap(), 1);
        }
    }

    #[test]
    fn test_execute_in_session() {
        let rt = runtime();
        let mut session = MockSession::new();
        session.expect_keyspace().returning(|| Some("app".to_string()));
        let template = template(session, &rt);

        let keyspace = template
            .execute_in_session(|session| async move { Ok::<_, DriverError>(session.keyspace()) })
            .get()
            .unwrap();
        assert_eq!(keyspace.as_deref(), Some("app"));
    }

    #[test]
    fn test_describe_ring() {
        let rt = runtime();
        let mut session = MockSession::new();
        session.expect_cluster_metadata().returning(|| {
            Ok(ClusterMetadata {
                cluster_name: "test".to_string(),
                partitioner: "Murmur3Partitioner".to_string(),
                hosts: vec![
                    HostDescriptor::new("10.0.0.1:9042".parse().unwrap(), "dc1", "r1")
                        .with_tokens(vec!["0".to_string()]),
                    HostDescriptor::new("10.0.0.2:9042".parse().unwrap(), "dc2", "r1"),
                ],
            })
        });
        let template = template(session, &rt);

        let ring = template.describe_ring().unwrap();
        assert_eq!(ring.len(), 2);
        assert_eq!(ring[0].tokens, vec!["0"]);

        let failing = |host: &HostDescriptor| -> std::result::Result<String, crate::error::BoxError> {
            if host.datacenter == "dc2" {
                Err("unknown dc".into())
            } else {
                Ok(host.datacenter.clone())
            }
        };
        let err = template.describe_ring_with(&failing).unwrap_err();
        assert!(matches!(
            err,
            CqlError::Processing(ProcessingError::HostMapper { ref host, .. }) if host == "10.0.0.2:9042"
        ));
    }

    #[test]
    fn test_select_rows_async_runs_handler_on_executor() {
        let rt = runtime();
        let mut session = MockSession::new();
        session.expect_execute().returning(|_, _| {
            Ok(ResultSet::from_rows(
                vec![ColumnSpec::new("k", CqlType::Int)],
                (0..4).map(|i| vec![CqlValue::Int(i)]).collect(),
            ))
        });
        let template = template(session, &rt);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handler = processor::row_handler(move |_row| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let rows = template
            .select_rows_async("SELECT k FROM t", handler, rt.handle().clone(), None)
            .get()
            .unwrap();
        assert_eq!(rows, 4);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLog {
        type Writer = CapturedLog;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_dispatch_log_classifies_statement() {
        let rt = runtime();
        let mut session = MockSession::new();
        session
            .expect_execute()
            .returning(|_, _| Ok(ResultSet::empty()));
        let template = template(session, &rt);

        let log = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(log.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            template
                .execute_async("INSERT INTO t (k) VALUES (1)", None)
                .get()
                .unwrap();
            template.execute_async("SELECT k FROM t", None).get().unwrap();
        });

        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("Dispatching statement"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("statement_type=Insert"));
        assert!(lines[0].contains("returns_rows=false"));
        assert!(lines[0].contains("writes=true"));
        assert!(lines[1].contains("statement_type=Select"));
        assert!(lines[1].contains("returns_rows=true"));
        assert!(lines[1].contains("writes=false"));
    }

    #[test]
    fn test_blocking_from_runtime_worker() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let mut session = MockSession::new();
        session
            .expect_execute()
            .times(2)
            .returning(|_, _| Ok(count_result(1)));
        let template = template(session, &rt);

        let (bounded, unbounded) = rt
            .block_on(rt.spawn(async move {
                let bounded = template.execute_bounded(
                    "CREATE TABLE t (k int PRIMARY KEY)",
                    None,
                    Some(Duration::from_millis(500)),
                );
                let unbounded = template.execute_blocking("SELECT COUNT(*) FROM t", None);
                (bounded, unbounded)
            }))
            .unwrap();
        assert!(bounded.is_ok());
        assert_eq!(processor::process_one_value::<i64>(&unbounded.unwrap()).unwrap(), 1);
    }

    /// Pages fetched by awaiting on the runtime, as an async driver adapter does.
    struct RuntimePages {
        runtime: Handle,
        pages: std::vec::IntoIter<Vec<Vec<CqlValue>>>,
    }

    impl crate::query::results::PageSource for RuntimePages {
        fn fetch_next_page(&mut self) -> std::result::Result<Option<Vec<Vec<CqlValue>>>, DriverError> {
            self.runtime.block_on(tokio::time::sleep(Duration::from_millis(5)));
            Ok(self.pages.next())
        }
    }

    #[test]
    fn test_blocking_page_source_consumed_on_runtime_executor() {
        let rt = runtime();
        let handle = rt.handle().clone();
        let mut session = MockSession::new();
        session.expect_execute().returning(move |_, _| {
            let pages = vec![
                vec![vec![CqlValue::Int(2)], vec![CqlValue::Int(3)]],
                vec![vec![CqlValue::Int(4)]],
            ];
            Ok(ResultSet::new(
                vec![ColumnSpec::new("k", CqlType::Int)],
                vec![vec![CqlValue::Int(0)], vec![CqlValue::Int(1)]],
                Some(Box::new(RuntimePages {
                    runtime: handle.clone(),
                    pages: pages.into_iter(),
                })),
            ))
        });
        let template = template(session, &rt);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = processor::row_handler(move |row| {
            sink.lock().unwrap().push(row.get_as::<i32>(0)?);
            Ok(())
        });
        let rows = template
            .select_rows_async("SELECT k FROM t", handler, rt.handle().clone(), None)
            .get_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(rows, 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_blocking_refused_on_current_thread_runtime() {
        let session = MockSession::new();
        let template = CqlTemplate::new(Arc::new(session), Handle::current());

        let err = template.execute_cql("SELECT 1", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_async_entry_points_from_current_thread_runtime() {
        let mut session = MockSession::new();
        session.expect_execute().returning(|_, _| Ok(count_result(3)));
        let template = CqlTemplate::new(Arc::new(session), Handle::current());

        let rs = template.select_async("SELECT COUNT(*) FROM t", None).await.unwrap();
        assert_eq!(processor::process_one_value::<i64>(&rs).unwrap(), 3);
    }
}
