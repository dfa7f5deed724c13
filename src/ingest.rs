//! Bulk writes through a single prepared statement.

use crate::error::{CqlError, QueryError, Result};
use crate::future::CqlFuture;
use crate::query::{BoundStatement, ExecuteOptions, ResultSet};
use crate::template::CqlTemplate;
use crate::types::CqlValue;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Writes value tuples through one prepared statement, keeping at most
/// `max_in_flight` executions outstanding.
///
/// The first failure stops new writes. Writes already in flight are drained
/// and the earliest failed row is reported.
pub(crate) struct Ingestor<'a> {
    template: &'a CqlTemplate,
    max_in_flight: usize,
}

impl<'a> Ingestor<'a> {
    pub(crate) fn new(template: &'a CqlTemplate, max_in_flight: usize) -> Self {
        Self {
            template,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub(crate) fn run<I>(&self, cql: &str, rows: I, options: Option<&ExecuteOptions>) -> Result<usize>
    where
        I: IntoIterator<Item = Vec<CqlValue>>,
    {
        let prepared = self.template.prepare_statement(cql)?;
        let options = self.template.resolve_options(options);
        debug!(cql, max_in_flight = self.max_in_flight, "Starting ingest");

        let mut window: VecDeque<(usize, CqlFuture<ResultSet>)> = VecDeque::new();
        let mut failure: Option<(usize, CqlError)> = None;
        let mut written = 0usize;

        for (row, values) in rows.into_iter().enumerate() {
            if window.len() >= self.max_in_flight {
                if let Some((done, future)) = window.pop_front() {
                    match future.get() {
                        Ok(_) => written += 1,
                        Err(e) => {
                            failure = Some((done, e));
                            break;
                        }
                    }
                }
            }

            match BoundStatement::new(prepared.clone(), values) {
                Ok(bound) => {
                    let future = self.template.execute_async(bound, Some(&options));
                    window.push_back((row, future));
                }
                Err(e) => {
                    failure = Some((row, e.into()));
                    break;
                }
            }
        }

        for (row, future) in window {
            match future.get() {
                Ok(_) => written += 1,
                Err(e) => {
                    if failure.as_ref().map_or(true, |(first, _)| row < *first) {
                        failure = Some((row, e));
                    }
                }
            }
        }

        match failure {
            Some((row, source)) => {
                warn!(row, written, error = %source, "Ingest failed");
                Err(QueryError::IngestFailed {
                    row,
                    source: Box::new(source),
                }
                .into())
            }
            None => {
                debug!(rows = written, "Ingest complete");
                Ok(written)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TemplateConfig;
    use crate::error::{CqlError, DriverError, ErrorKind, QueryError};
    use crate::query::{ColumnSpec, ExecuteOptions, PreparedStatement, ResultSet, Statement};
    use crate::session::{ClusterMetadata, CqlSession};
    use crate::template::CqlTemplate;
    use crate::types::{CqlType, CqlValue};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Session that fails writes whose first value equals `fail_on`, and
    /// records the peak number of concurrent executions.
    #[derive(Default)]
    struct WriteSession {
        fail_on: Option<i32>,
        active: AtomicUsize,
        peak: AtomicUsize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl CqlSession for WriteSession {
        async fn execute(&self, statement: Statement, _options: ExecuteOptions) -> Result<ResultSet, DriverError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if let (Some(fail_on), Some(CqlValue::Int(k))) = (self.fail_on, statement.values().first()) {
                if *k == fail_on {
                    return Err(DriverError::Overloaded("busy".to_string()));
                }
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(ResultSet::empty())
        }

        async fn prepare(&self, cql: &str) -> Result<PreparedStatement, DriverError> {
            Ok(PreparedStatement::new(
                vec![1],
                cql,
                None,
                vec![ColumnSpec::new("k", CqlType::Int)],
            ))
        }

        async fn cluster_metadata(&self) -> Result<ClusterMetadata, DriverError> {
            Err(DriverError::Server("not supported".to_string()))
        }

        fn keyspace(&self) -> Option<String> {
            None
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn rows(n: i32) -> Vec<Vec<CqlValue>> {
        (0..n).map(|k| vec![CqlValue::Int(k)]).collect()
    }

    #[test]
    fn test_window_is_respected() {
        let rt = runtime();
        let session = Arc::new(WriteSession::default());
        let config = TemplateConfig::builder().ingest_max_in_flight(3).build().unwrap();
        let template = CqlTemplate::with_config(session.clone(), rt.handle().clone(), config);

        let written = template.ingest("INSERT INTO t (k) VALUES (?)", rows(20), None).unwrap();
        assert_eq!(written, 20);
        assert_eq!(session.writes.load(Ordering::SeqCst), 20);
        assert!(session.peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_sequential_by_default() {
        let rt = runtime();
        let session = Arc::new(WriteSession::default());
        let template = CqlTemplate::new(session.clone(), rt.handle().clone());

        template.ingest("INSERT INTO t (k) VALUES (?)", rows(5), None).unwrap();
        assert_eq!(session.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_driver_failure_stops_ingest() {
        let rt = runtime();
        let session = Arc::new(WriteSession {
            fail_on: Some(2),
            ..Default::default()
        });
        let template = CqlTemplate::new(session.clone(), rt.handle().clone());

        let err = template
            .ingest("INSERT INTO t (k) VALUES (?)", rows(10), None)
            .unwrap_err();
        match &err {
            CqlError::Query(QueryError::IngestFailed { row, .. }) => assert_eq!(*row, 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Overloaded);
        assert_eq!(session.writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_binding_failure_reports_row() {
        let rt = runtime();
        let session = Arc::new(WriteSession::default());
        let template = CqlTemplate::new(session.clone(), rt.handle().clone());

        let values = vec![
            vec![CqlValue::Int(0)],
            vec![CqlValue::Int(1), CqlValue::Int(1)],
            vec![CqlValue::Int(2)],
        ];
        let err = template
            .ingest("INSERT INTO t (k) VALUES (?)", values, None)
            .unwrap_err();
        assert!(matches!(err, CqlError::Query(QueryError::IngestFailed { row: 1, .. })));
        assert_eq!(err.kind(), ErrorKind::Binding);
        assert_eq!(session.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_input() {
        let rt = runtime();
        let session = Arc::new(WriteSession::default());
        let template = CqlTemplate::new(session, rt.handle().clone());

        let none: Vec<Vec<CqlValue>> = Vec::new();
        assert_eq!(template.ingest("INSERT INTO t (k) VALUES (?)", none, None).unwrap(), 0);
    }
}
