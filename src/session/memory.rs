//! In-process session implementation.
//!
//! `InMemorySession` executes a useful subset of CQL against in-memory
//! tables, which makes the execution core usable without a cluster in tests
//! and demos. It also supports canned responses, injected failures,
//! never-completing queries and artificial latency, and counts every
//! prepare and execute call.
//!
//! Supported statements:
//! - `CREATE TABLE [IF NOT EXISTS] t (col type [PRIMARY KEY], ..., [PRIMARY KEY (..)])`
//! - `DROP TABLE [IF EXISTS] t`, `TRUNCATE [TABLE] t`, `USE ks`
//! - `INSERT INTO t (cols) VALUES (terms) [IF NOT EXISTS] [USING ...]`
//! - `SELECT * | COUNT(*) | cols FROM t [WHERE col = term [AND ...]] [LIMIT n] [ALLOW FILTERING]`
//! - `UPDATE t [USING ...] SET col = term [, ...] WHERE ...`
//! - `DELETE FROM t WHERE ...`

use crate::error::DriverError;
use crate::query::results::{ColumnSpec, ExecutionInfo, PageSource, ResultSet};
use crate::query::{ExecuteOptions, PreparedStatement, Statement};
use crate::session::{ClusterMetadata, CqlSession, HostDescriptor};
use crate::types::{CqlType, CqlValue};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

/// Canned response for a statement.
#[derive(Debug, Clone)]
enum Response {
    Rows {
        columns: Vec<ColumnSpec>,
        rows: Vec<Vec<CqlValue>>,
    },
    Fail(DriverError),
    Hang,
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<ColumnSpec>,
    primary_key: Vec<String>,
    rows: Vec<Vec<CqlValue>>,
}

impl Table {
    fn index_of(&self, column: &str) -> Result<usize, DriverError> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| DriverError::InvalidQuery(format!("Undefined column name {}", column)))
    }

    fn key_indexes(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| &c.name == k))
            .collect()
    }

    fn matches(&self, row: &[CqlValue], filter: &[(usize, CqlValue)]) -> bool {
        filter.iter().all(|(i, v)| row[*i].cql_eq(v))
    }
}

#[derive(Debug, Default)]
struct Store {
    tables: HashMap<String, Table>,
    stubs: HashMap<String, Response>,
    keyspace: Option<String>,
}

/// Embedded session executing CQL against in-memory tables.
pub struct InMemorySession {
    store: Mutex<Store>,
    metadata: ClusterMetadata,
    latency: Option<Duration>,
    next_prepared_id: AtomicU64,
    prepare_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    pages_fetched: Arc<AtomicUsize>,
    executed: Mutex<Vec<(String, ExecuteOptions)>>,
}

impl Default for InMemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySession {
    /// Create an empty session with a single local host.
    pub fn new() -> Self {
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9042);
        Self {
            store: Mutex::new(Store::default()),
            metadata: ClusterMetadata {
                cluster_name: "in-memory".to_string(),
                partitioner: "org.apache.cassandra.dht.Murmur3Partitioner".to_string(),
                hosts: vec![HostDescriptor::new(local, "datacenter1", "rack1")
                    .with_host_name("localhost")
                    .with_tokens(vec!["0".to_string()])],
            },
            latency: None,
            next_prepared_id: AtomicU64::new(1),
            prepare_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            pages_fetched: Arc::new(AtomicUsize::new(0)),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Use `keyspace` as the session keyspace.
    pub fn with_keyspace(self, keyspace: impl Into<String>) -> Self {
        lock(&self.store).keyspace = Some(keyspace.into());
        self
    }

    /// Delay every execute call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replace the reported cluster metadata.
    pub fn with_metadata(mut self, metadata: ClusterMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Answer `cql` with fixed rows instead of executing it.
    pub fn stub_rows(&self, cql: &str, columns: Vec<ColumnSpec>, rows: Vec<Vec<CqlValue>>) {
        self.stub(cql, Response::Rows { columns, rows });
    }

    /// Fail every execution of `cql` with `error`.
    pub fn stub_failure(&self, cql: &str, error: DriverError) {
        self.stub(cql, Response::Fail(error));
    }

    /// Never complete executions of `cql`.
    pub fn stub_hang(&self, cql: &str) {
        self.stub(cql, Response::Hang);
    }

    pub fn clear_stubs(&self) {
        lock(&self.store).stubs.clear();
    }

    fn stub(&self, cql: &str, response: Response) {
        lock(&self.store).stubs.insert(normalize(cql), response);
    }

    /// Number of prepare calls received.
    pub fn prepare_count(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    /// Number of execute calls received.
    pub fn execute_count(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    /// Number of result pages fetched after the first one.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::SeqCst)
    }

    /// CQL text of every execute call, in arrival order.
    pub fn executed_statements(&self) -> Vec<String> {
        lock(&self.executed).iter().map(|(cql, _)| cql.clone()).collect()
    }

    /// Options of every execute call, in arrival order.
    pub fn executed_options(&self) -> Vec<ExecuteOptions> {
        lock(&self.executed).iter().map(|(_, o)| o.clone()).collect()
    }

    /// Number of rows currently stored in `table`.
    pub fn row_count(&self, table: &str) -> Option<usize> {
        lock(&self.store)
            .tables
            .get(&table_key(table))
            .map(|t| t.rows.len())
    }

    /// Execute `cql` directly, bypassing counters and stubs.
    pub fn run(&self, cql: &str, values: &[CqlValue]) -> Result<ResultSet, DriverError> {
        let command = Parser::parse(cql)?;
        self.apply(command, values, None)
    }

    fn apply(
        &self,
        command: Command,
        values: &[CqlValue],
        fetch_size: Option<u32>,
    ) -> Result<ResultSet, DriverError> {
        let binds = command.bind_count();
        if binds != values.len() {
            return Err(DriverError::InvalidQuery(format!(
                "Invalid amount of bind variables: expected {}, got {}",
                binds,
                values.len()
            )));
        }

        let mut store = lock(&self.store);
        match command {
            Command::CreateTable {
                name,
                if_not_exists,
                columns,
                primary_key,
            } => {
                if store.tables.contains_key(&name) {
                    if if_not_exists {
                        return Ok(ResultSet::empty());
                    }
                    return Err(DriverError::AlreadyExists {
                        keyspace: store.keyspace.clone().unwrap_or_default(),
                        table: name,
                    });
                }
                if primary_key.is_empty() {
                    return Err(DriverError::InvalidQuery(format!(
                        "No PRIMARY KEY specified for table {}",
                        name
                    )));
                }
                debug!(table = %name, columns = columns.len(), "Creating in-memory table");
                store.tables.insert(
                    name,
                    Table {
                        columns,
                        primary_key,
                        rows: Vec::new(),
                    },
                );
                Ok(ResultSet::empty())
            }
            Command::DropTable { name, if_exists } => {
                if store.tables.remove(&name).is_none() && !if_exists {
                    return Err(DriverError::InvalidQuery(format!("unconfigured table {}", name)));
                }
                Ok(ResultSet::empty())
            }
            Command::Truncate { name } => {
                table_mut(&mut store, &name)?.rows.clear();
                Ok(ResultSet::empty())
            }
            Command::Use { keyspace } => {
                store.keyspace = Some(keyspace);
                Ok(ResultSet::empty())
            }
            Command::Insert {
                table,
                columns,
                terms,
                if_not_exists,
            } => {
                let table = table_mut(&mut store, &table)?;
                let mut assigned = Vec::with_capacity(columns.len());
                for (column, term) in columns.iter().zip(terms) {
                    let index = table.index_of(column)?;
                    let value = coerce(term.resolve(values), &table.columns[index])?;
                    assigned.push((index, value));
                }
                let applied = upsert(table, assigned, if_not_exists)?;
                if if_not_exists {
                    Ok(applied_result(applied))
                } else {
                    Ok(ResultSet::empty())
                }
            }
            Command::Update {
                table,
                assignments,
                filter,
            } => {
                let table = table_mut(&mut store, &table)?;
                let filter = resolve_filter(table, filter, values)?;
                let mut assigned = Vec::with_capacity(assignments.len());
                for (column, term) in assignments {
                    let index = table.index_of(&column)?;
                    if table.primary_key.contains(&column) {
                        return Err(DriverError::InvalidQuery(format!(
                            "PRIMARY KEY part {} found in SET part",
                            column
                        )));
                    }
                    assigned.push((index, coerce(term.resolve(values), &table.columns[index])?));
                }
                let mut touched = false;
                for row in table.rows.iter_mut() {
                    if filter.iter().all(|(i, v)| row[*i].cql_eq(v)) {
                        for (i, v) in &assigned {
                            row[*i] = v.clone();
                        }
                        touched = true;
                    }
                }
                if !touched {
                    let mut full = filter;
                    full.extend(assigned);
                    upsert(table, full, false)?;
                }
                Ok(ResultSet::empty())
            }
            Command::Delete { table, filter } => {
                let table = table_mut(&mut store, &table)?;
                let filter = resolve_filter(table, filter, values)?;
                let rows = std::mem::take(&mut table.rows);
                table.rows = rows
                    .into_iter()
                    .filter(|row| !table.matches(row, &filter))
                    .collect();
                Ok(ResultSet::empty())
            }
            Command::Select {
                table,
                selection,
                filter,
                limit,
            } => {
                let table = table_mut(&mut store, &table)?;
                let filter = resolve_filter(table, filter, values)?;
                let limit = match limit.map(|t| t.resolve(values)) {
                    None => None,
                    Some(v) => match v.as_i64() {
                        Some(n) if n > 0 => Some(n as usize),
                        _ => {
                            return Err(DriverError::InvalidQuery(
                                "LIMIT must be strictly positive".to_string(),
                            ))
                        }
                    },
                };

                let mut matched: Vec<&Vec<CqlValue>> = table
                    .rows
                    .iter()
                    .filter(|row| table.matches(row, &filter))
                    .collect();
                if let Some(limit) = limit {
                    matched.truncate(limit);
                }

                let (columns, rows) = match selection {
                    Selection::Count => (
                        vec![ColumnSpec::new("count", CqlType::Bigint)],
                        vec![vec![CqlValue::BigInt(matched.len() as i64)]],
                    ),
                    Selection::All => (
                        table.columns.clone(),
                        matched.into_iter().cloned().collect(),
                    ),
                    Selection::Columns(names) => {
                        let indexes = names
                            .iter()
                            .map(|n| table.index_of(n))
                            .collect::<Result<Vec<_>, _>>()?;
                        let columns = indexes.iter().map(|i| table.columns[*i].clone()).collect();
                        let rows = matched
                            .into_iter()
                            .map(|row| indexes.iter().map(|i| row[*i].clone()).collect())
                            .collect();
                        (columns, rows)
                    }
                };
                drop(store);
                Ok(self.paged(columns, rows, fetch_size))
            }
        }
    }

    fn paged(
        &self,
        columns: Vec<ColumnSpec>,
        mut rows: Vec<Vec<CqlValue>>,
        fetch_size: Option<u32>,
    ) -> ResultSet {
        let page_size = match fetch_size {
            Some(n) if n > 0 && (n as usize) < rows.len() => n as usize,
            _ => return ResultSet::from_rows(columns, rows),
        };

        let rest = rows.split_off(page_size);
        let pages: VecDeque<Vec<Vec<CqlValue>>> = rest
            .chunks(page_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        trace!(pages = pages.len() + 1, page_size, "Paging in-memory result");
        ResultSet::new(
            columns,
            rows,
            Some(Box::new(VecPageSource {
                pages,
                fetched: Arc::clone(&self.pages_fetched),
            })),
        )
    }
}

#[async_trait]
impl CqlSession for InMemorySession {
    async fn execute(
        &self,
        statement: Statement,
        options: ExecuteOptions,
    ) -> Result<ResultSet, DriverError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.executed).push((statement.cql().to_string(), options.clone()));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let stub = lock(&self.store).stubs.get(&normalize(statement.cql())).cloned();
        let result = match stub {
            Some(Response::Hang) => return std::future::pending().await,
            Some(Response::Fail(e)) => return Err(e),
            Some(Response::Rows { columns, rows }) => self.paged(columns, rows, options.fetch_size),
            None => {
                let command = Parser::parse(statement.cql())?;
                self.apply(command, statement.values(), options.fetch_size)?
            }
        };

        let info = ExecutionInfo {
            tracing_id: options.tracing.then(Uuid::new_v4),
            achieved_consistency: options.consistency,
            warnings: Vec::new(),
        };
        Ok(result.with_execution_info(info))
    }

    async fn prepare(&self, cql: &str) -> Result<PreparedStatement, DriverError> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);

        let variables = match Parser::parse(cql) {
            Ok(command) => {
                let store = lock(&self.store);
                command.variables(&store.tables)?
            }
            Err(e) => {
                // canned statements without placeholders can still be prepared
                let stubbed = lock(&self.store).stubs.contains_key(&normalize(cql));
                if !stubbed || crate::query::placeholder_count(cql) > 0 {
                    return Err(e);
                }
                Vec::new()
            }
        };

        let id = self.next_prepared_id.fetch_add(1, Ordering::SeqCst);
        let keyspace = lock(&self.store).keyspace.clone();
        Ok(PreparedStatement::new(
            id.to_be_bytes().to_vec(),
            cql,
            keyspace,
            variables,
        ))
    }

    async fn cluster_metadata(&self) -> Result<ClusterMetadata, DriverError> {
        Ok(self.metadata.clone())
    }

    fn keyspace(&self) -> Option<String> {
        lock(&self.store).keyspace.clone()
    }
}

struct VecPageSource {
    pages: VecDeque<Vec<Vec<CqlValue>>>,
    fetched: Arc<AtomicUsize>,
}

impl PageSource for VecPageSource {
    fn fetch_next_page(&mut self) -> Result<Option<Vec<Vec<CqlValue>>>, DriverError> {
        let page = self.pages.pop_front();
        if page.is_some() {
            self.fetched.fetch_add(1, Ordering::SeqCst);
        }
        Ok(page)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn normalize(cql: &str) -> String {
    cql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .trim_end()
        .to_string()
}

fn table_key(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_lowercase()
}

fn table_mut<'a>(store: &'a mut Store, name: &str) -> Result<&'a mut Table, DriverError> {
    store
        .tables
        .get_mut(name)
        .ok_or_else(|| DriverError::InvalidQuery(format!("unconfigured table {}", name)))
}

fn resolve_filter(
    table: &Table,
    filter: Vec<(String, Term)>,
    values: &[CqlValue],
) -> Result<Vec<(usize, CqlValue)>, DriverError> {
    filter
        .into_iter()
        .map(|(column, term)| {
            let index = table.index_of(&column)?;
            Ok((index, coerce(term.resolve(values), &table.columns[index])?))
        })
        .collect()
}

/// Insert or overwrite by primary key. Returns whether the write was applied.
fn upsert(
    table: &mut Table,
    assigned: Vec<(usize, CqlValue)>,
    if_not_exists: bool,
) -> Result<bool, DriverError> {
    let keys = table.key_indexes();
    let mut key = Vec::with_capacity(keys.len());
    for k in &keys {
        match assigned.iter().find(|(i, _)| i == k) {
            Some((_, v)) if !v.is_null() => key.push((*k, v.clone())),
            _ => {
                return Err(DriverError::InvalidQuery(format!(
                    "Some primary key parts are missing: {}",
                    table.columns[*k].name
                )))
            }
        }
    }

    if let Some(pos) = table.rows.iter().position(|row| table.matches(row, &key)) {
        if if_not_exists {
            return Ok(false);
        }
        for (i, v) in assigned {
            table.rows[pos][i] = v;
        }
    } else {
        let mut row = vec![CqlValue::Null; table.columns.len()];
        for (i, v) in assigned {
            row[i] = v;
        }
        table.rows.push(row);
    }
    Ok(true)
}

fn applied_result(applied: bool) -> ResultSet {
    ResultSet::from_rows(
        vec![ColumnSpec::new("[applied]", CqlType::Boolean)],
        vec![vec![CqlValue::Boolean(applied)]],
    )
}

/// Store values in the representation of their column type.
fn coerce(value: CqlValue, column: &ColumnSpec) -> Result<CqlValue, DriverError> {
    let converted = match (&column.cql_type, &value) {
        (CqlType::Int, v) if v.as_i64().is_some() => v
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(CqlValue::Int),
        (CqlType::Smallint, v) if v.as_i64().is_some() => v
            .as_i64()
            .and_then(|i| i16::try_from(i).ok())
            .map(CqlValue::SmallInt),
        (CqlType::Tinyint, v) if v.as_i64().is_some() => v
            .as_i64()
            .and_then(|i| i8::try_from(i).ok())
            .map(CqlValue::TinyInt),
        (CqlType::Bigint, v) if v.as_i64().is_some() => v.as_i64().map(CqlValue::BigInt),
        (CqlType::Counter, v) if v.as_i64().is_some() => v.as_i64().map(CqlValue::Counter),
        (CqlType::Double, CqlValue::BigInt(i)) => Some(CqlValue::Double(*i as f64)),
        (CqlType::Double, CqlValue::Float(f)) => Some(CqlValue::Double(f64::from(*f))),
        (CqlType::Float, CqlValue::Double(d)) => Some(CqlValue::Float(*d as f32)),
        (CqlType::Float, CqlValue::BigInt(i)) => Some(CqlValue::Float(*i as f32)),
        (CqlType::Ascii, CqlValue::Text(s)) if s.is_ascii() => Some(CqlValue::Ascii(s.clone())),
        (CqlType::Timestamp, CqlValue::BigInt(ms)) => {
            chrono::DateTime::from_timestamp_millis(*ms).map(CqlValue::Timestamp)
        }
        (CqlType::Timeuuid, CqlValue::Uuid(u)) if u.get_version_num() == 1 => {
            Some(CqlValue::TimeUuid(*u))
        }
        (_, v) if column.cql_type.accepts(v) => Some(value.clone()),
        _ => None,
    };

    converted.ok_or_else(|| {
        DriverError::InvalidQuery(format!(
            "Invalid {} value for column {} of type {}",
            value.type_name(),
            column.name,
            column.cql_type
        ))
    })
}

// ============================================================================
// CQL subset parser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Quoted(String),
    Str(String),
    Number(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
    Bind,
    Sym(char),
}

#[derive(Debug, Clone)]
enum Term {
    Value(CqlValue),
    Bind(usize),
}

impl Term {
    fn resolve(&self, values: &[CqlValue]) -> CqlValue {
        match self {
            Term::Value(v) => v.clone(),
            Term::Bind(i) => values.get(*i).cloned().unwrap_or(CqlValue::Null),
        }
    }

    fn is_bind(&self) -> bool {
        matches!(self, Term::Bind(_))
    }
}

#[derive(Debug, Clone)]
enum Selection {
    All,
    Count,
    Columns(Vec<String>),
}

#[derive(Debug, Clone)]
enum Command {
    CreateTable {
        name: String,
        if_not_exists: bool,
        columns: Vec<ColumnSpec>,
        primary_key: Vec<String>,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    Truncate {
        name: String,
    },
    Use {
        keyspace: String,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        terms: Vec<Term>,
        if_not_exists: bool,
    },
    Update {
        table: String,
        assignments: Vec<(String, Term)>,
        filter: Vec<(String, Term)>,
    },
    Delete {
        table: String,
        filter: Vec<(String, Term)>,
    },
    Select {
        table: String,
        selection: Selection,
        filter: Vec<(String, Term)>,
        limit: Option<Term>,
    },
}

impl Command {
    fn bind_count(&self) -> usize {
        self.bind_columns().len()
    }

    /// Bound columns in placeholder order.
    fn bind_columns(&self) -> Vec<(&str, Option<&str>)> {
        fn binds<'a>(pairs: &'a [(String, Term)], table: &'a str) -> Vec<(&'a str, Option<&'a str>)> {
            pairs
                .iter()
                .filter(|(_, t)| t.is_bind())
                .map(|(c, _)| (table, Some(c.as_str())))
                .collect()
        }

        match self {
            Command::Insert {
                table,
                columns,
                terms,
                ..
            } => columns
                .iter()
                .zip(terms)
                .filter(|(_, t)| t.is_bind())
                .map(|(c, _)| (table.as_str(), Some(c.as_str())))
                .collect(),
            Command::Update {
                table,
                assignments,
                filter,
            } => {
                let mut out = binds(assignments, table);
                out.extend(binds(filter, table));
                out
            }
            Command::Delete { table, filter } => binds(filter, table),
            Command::Select {
                table,
                filter,
                limit,
                ..
            } => {
                let mut out = binds(filter, table);
                if limit.as_ref().is_some_and(Term::is_bind) {
                    out.push((table.as_str(), None));
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// Placeholder metadata, resolved against table schemas.
    fn variables(&self, tables: &HashMap<String, Table>) -> Result<Vec<ColumnSpec>, DriverError> {
        self.bind_columns()
            .into_iter()
            .map(|(table, column)| match column {
                None => Ok(ColumnSpec::new("[limit]", CqlType::Int)),
                Some(column) => {
                    let table = tables.get(table).ok_or_else(|| {
                        DriverError::InvalidQuery(format!("unconfigured table {}", table))
                    })?;
                    let index = table.index_of(column)?;
                    Ok(table.columns[index].clone())
                }
            })
            .collect()
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    binds: usize,
}

impl Parser {
    fn parse(cql: &str) -> Result<Command, DriverError> {
        let mut parser = Parser {
            tokens: tokenize(cql)?,
            pos: 0,
            binds: 0,
        };
        let command = parser.command()?;
        parser.eat_sym(';');
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(command)
    }

    fn command(&mut self) -> Result<Command, DriverError> {
        if self.eat_keyword("CREATE") {
            self.expect_keyword("TABLE")?;
            let if_not_exists = self.eat_if_not_exists()?;
            let name = self.table_name()?;
            let (columns, primary_key) = self.column_definitions()?;
            self.skip_rest();
            Ok(Command::CreateTable {
                name,
                if_not_exists,
                columns,
                primary_key,
            })
        } else if self.eat_keyword("DROP") {
            self.expect_keyword("TABLE")?;
            let if_exists = if self.eat_keyword("IF") {
                self.expect_keyword("EXISTS")?;
                true
            } else {
                false
            };
            Ok(Command::DropTable {
                name: self.table_name()?,
                if_exists,
            })
        } else if self.eat_keyword("TRUNCATE") {
            self.eat_keyword("TABLE");
            Ok(Command::Truncate {
                name: self.table_name()?,
            })
        } else if self.eat_keyword("USE") {
            Ok(Command::Use {
                keyspace: self.identifier()?,
            })
        } else if self.eat_keyword("INSERT") {
            self.insert()
        } else if self.eat_keyword("UPDATE") {
            self.update()
        } else if self.eat_keyword("DELETE") {
            self.expect_keyword("FROM")?;
            let table = self.table_name()?;
            let filter = self.where_clause()?;
            if filter.is_empty() {
                return Err(self.error("DELETE requires a WHERE clause"));
            }
            Ok(Command::Delete { table, filter })
        } else if self.eat_keyword("SELECT") {
            self.select()
        } else {
            Err(self.error("unsupported statement"))
        }
    }

    fn insert(&mut self) -> Result<Command, DriverError> {
        self.expect_keyword("INTO")?;
        let table = self.table_name()?;
        self.expect_sym('(')?;
        let columns = self.comma_separated(|p| p.identifier())?;
        self.expect_sym(')')?;
        self.expect_keyword("VALUES")?;
        self.expect_sym('(')?;
        let terms = self.comma_separated(|p| p.term())?;
        self.expect_sym(')')?;
        if columns.len() != terms.len() {
            return Err(DriverError::InvalidQuery(format!(
                "Unmatched column names/values: {} columns, {} values",
                columns.len(),
                terms.len()
            )));
        }
        let if_not_exists = self.eat_if_not_exists()?;
        self.using_clause()?;
        Ok(Command::Insert {
            table,
            columns,
            terms,
            if_not_exists,
        })
    }

    fn update(&mut self) -> Result<Command, DriverError> {
        let table = self.table_name()?;
        self.using_clause()?;
        self.expect_keyword("SET")?;
        let assignments = self.comma_separated(|p| {
            let column = p.identifier()?;
            p.expect_sym('=')?;
            Ok((column, p.term()?))
        })?;
        let filter = self.where_clause()?;
        if filter.is_empty() {
            return Err(self.error("UPDATE requires a WHERE clause"));
        }
        Ok(Command::Update {
            table,
            assignments,
            filter,
        })
    }

    fn select(&mut self) -> Result<Command, DriverError> {
        let selection = if self.eat_sym('*') {
            Selection::All
        } else if self.peek_keyword("COUNT") && self.peek_at(1) == Some(&Token::Sym('(')) {
            self.pos += 2;
            if !self.eat_sym('*') {
                self.term()?;
            }
            self.expect_sym(')')?;
            Selection::Count
        } else {
            Selection::Columns(self.comma_separated(|p| p.identifier())?)
        };
        self.expect_keyword("FROM")?;
        let table = self.table_name()?;
        let filter = self.where_clause()?;
        let limit = if self.eat_keyword("LIMIT") {
            Some(self.term()?)
        } else {
            None
        };
        if self.eat_keyword("ALLOW") {
            self.expect_keyword("FILTERING")?;
        }
        Ok(Command::Select {
            table,
            selection,
            filter,
            limit,
        })
    }

    fn where_clause(&mut self) -> Result<Vec<(String, Term)>, DriverError> {
        let mut filter = Vec::new();
        if !self.eat_keyword("WHERE") {
            return Ok(filter);
        }
        loop {
            let column = self.identifier()?;
            self.expect_sym('=')?;
            filter.push((column, self.term()?));
            if !self.eat_keyword("AND") {
                return Ok(filter);
            }
        }
    }

    /// `USING TTL n [AND TIMESTAMP n]`; values are accepted and ignored.
    fn using_clause(&mut self) -> Result<(), DriverError> {
        if !self.eat_keyword("USING") {
            return Ok(());
        }
        loop {
            if !(self.eat_keyword("TTL") || self.eat_keyword("TIMESTAMP")) {
                return Err(self.error("expected TTL or TIMESTAMP"));
            }
            match self.next() {
                Some(Token::Number(_)) => {}
                _ => return Err(self.error("USING values must be integer literals")),
            }
            if !self.eat_keyword("AND") {
                return Ok(());
            }
        }
    }

    fn column_definitions(&mut self) -> Result<(Vec<ColumnSpec>, Vec<String>), DriverError> {
        self.expect_sym('(')?;
        let mut columns = Vec::new();
        let mut primary_key = Vec::new();
        loop {
            if self.eat_keyword("PRIMARY") {
                self.expect_keyword("KEY")?;
                self.expect_sym('(')?;
                primary_key = self.key_columns()?;
            } else {
                let name = self.identifier()?;
                let cql_type = self.cql_type()?;
                self.eat_keyword("STATIC");
                if self.eat_keyword("PRIMARY") {
                    self.expect_keyword("KEY")?;
                    primary_key = vec![name.clone()];
                }
                columns.push(ColumnSpec::new(name, cql_type));
            }
            if !self.eat_sym(',') {
                break;
            }
        }
        self.expect_sym(')')?;
        Ok((columns, primary_key))
    }

    /// Key columns after `PRIMARY KEY (`, flattening the partition key group.
    fn key_columns(&mut self) -> Result<Vec<String>, DriverError> {
        let mut keys = Vec::new();
        let mut depth = 1;
        while depth > 0 {
            match self.next() {
                Some(Token::Sym('(')) => depth += 1,
                Some(Token::Sym(')')) => depth -= 1,
                Some(Token::Sym(',')) => {}
                Some(Token::Ident(name)) => keys.push(name.to_lowercase()),
                Some(Token::Quoted(name)) => keys.push(name),
                _ => return Err(self.error("malformed PRIMARY KEY")),
            }
        }
        Ok(keys)
    }

    fn cql_type(&mut self) -> Result<CqlType, DriverError> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name.to_lowercase(),
            _ => return Err(self.error("expected a type")),
        };
        let ty = match name.as_str() {
            "ascii" => CqlType::Ascii,
            "bigint" => CqlType::Bigint,
            "blob" => CqlType::Blob,
            "boolean" => CqlType::Boolean,
            "counter" => CqlType::Counter,
            "double" => CqlType::Double,
            "float" => CqlType::Float,
            "int" => CqlType::Int,
            "smallint" => CqlType::Smallint,
            "tinyint" => CqlType::Tinyint,
            "text" | "varchar" => CqlType::Text,
            "timestamp" => CqlType::Timestamp,
            "uuid" => CqlType::Uuid,
            "timeuuid" => CqlType::Timeuuid,
            "inet" => CqlType::Inet,
            "frozen" => {
                self.expect_sym('<')?;
                let inner = self.cql_type()?;
                self.expect_sym('>')?;
                inner
            }
            "list" | "set" => {
                self.expect_sym('<')?;
                let item = Box::new(self.cql_type()?);
                self.expect_sym('>')?;
                if name == "list" {
                    CqlType::List(item)
                } else {
                    CqlType::Set(item)
                }
            }
            "map" => {
                self.expect_sym('<')?;
                let key = self.cql_type()?;
                self.expect_sym(',')?;
                let value = self.cql_type()?;
                self.expect_sym('>')?;
                CqlType::Map(Box::new((key, value)))
            }
            other => return Err(self.error(&format!("unsupported type {}", other))),
        };
        Ok(ty)
    }

    fn term(&mut self) -> Result<Term, DriverError> {
        let value = match self.next() {
            Some(Token::Bind) => {
                let index = self.binds;
                self.binds += 1;
                return Ok(Term::Bind(index));
            }
            Some(Token::Str(s)) => CqlValue::Text(s),
            Some(Token::Blob(b)) => CqlValue::Blob(b),
            Some(Token::Uuid(u)) => CqlValue::Uuid(u),
            Some(Token::Number(n)) => parse_number(&n).ok_or_else(|| self.error("malformed number"))?,
            Some(Token::Ident(word)) => match word.to_uppercase().as_str() {
                "TRUE" => CqlValue::Boolean(true),
                "FALSE" => CqlValue::Boolean(false),
                "NULL" => CqlValue::Null,
                _ => return Err(self.error("expected a literal or bind marker")),
            },
            _ => return Err(self.error("expected a literal or bind marker")),
        };
        Ok(Term::Value(value))
    }

    fn comma_separated<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, DriverError>,
    ) -> Result<Vec<T>, DriverError> {
        let mut items = vec![item(self)?];
        while self.eat_sym(',') {
            items.push(item(self)?);
        }
        Ok(items)
    }

    fn eat_if_not_exists(&mut self) -> Result<bool, DriverError> {
        if self.eat_keyword("IF") {
            self.expect_keyword("NOT")?;
            self.expect_keyword("EXISTS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn table_name(&mut self) -> Result<String, DriverError> {
        let mut name = self.identifier()?;
        while self.eat_sym('.') {
            name = self.identifier()?;
        }
        Ok(name)
    }

    fn identifier(&mut self) -> Result<String, DriverError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name.to_lowercase()),
            Some(Token::Quoted(name)) => Ok(name),
            _ => Err(self.error("expected an identifier")),
        }
    }

    /// Skip table options such as `WITH ...`.
    fn skip_rest(&mut self) {
        while self.pos < self.tokens.len() && self.tokens[self.pos] != Token::Sym(';') {
            self.pos += 1;
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Ident(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), DriverError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", keyword)))
        }
    }

    fn eat_sym(&mut self, sym: char) -> bool {
        if self.tokens.get(self.pos) == Some(&Token::Sym(sym)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: char) -> Result<(), DriverError> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", sym)))
        }
    }

    fn error(&self, message: &str) -> DriverError {
        DriverError::Syntax(format!("{} at token {}", message, self.pos))
    }
}

fn parse_number(text: &str) -> Option<CqlValue> {
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().ok().map(CqlValue::Double)
    } else {
        text.parse::<i64>().ok().map(CqlValue::BigInt)
    }
}

fn tokenize(cql: &str) -> Result<Vec<Token>, DriverError> {
    let chars: Vec<char> = cql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
        } else if c == '-' && next == Some('-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if let Some(uuid) = uuid_at(&chars, i) {
            tokens.push(Token::Uuid(uuid));
            i += 36;
        } else if c == '\'' || c == '"' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(DriverError::Syntax("unterminated literal".to_string())),
                    Some(&ch) if ch == quote => {
                        if chars.get(i + 1) == Some(&quote) {
                            text.push(quote);
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    }
                    Some(&ch) => {
                        text.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(if quote == '\'' {
                Token::Str(text)
            } else {
                Token::Quoted(text)
            });
        } else if c == '0' && matches!(next, Some('x') | Some('X')) {
            let start = i + 2;
            i = start;
            while i < chars.len() && chars[i].is_ascii_hexdigit() {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            let bytes = hex::decode(&digits)
                .map_err(|e| DriverError::Syntax(format!("malformed blob literal: {}", e)))?;
            tokens.push(Token::Blob(bytes));
        } else if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < chars.len() {
                let ch = chars[i];
                let exponent_sign = (ch == '-' || ch == '+') && matches!(chars[i - 1], 'e' | 'E');
                if ch.is_ascii_digit() || ch == '.' || ch == 'e' || ch == 'E' || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c == '?' {
            tokens.push(Token::Bind);
            i += 1;
        } else if "(),=*;.<>".contains(c) {
            tokens.push(Token::Sym(c));
            i += 1;
        } else {
            return Err(DriverError::Syntax(format!("unexpected character '{}'", c)));
        }
    }
    Ok(tokens)
}

fn uuid_at(chars: &[char], start: usize) -> Option<Uuid> {
    let end = start + 36;
    if end > chars.len() || (end < chars.len() && chars[end].is_alphanumeric()) {
        return None;
    }
    let text: String = chars[start..end].iter().collect();
    let shaped = text.char_indices().all(|(i, ch)| match i {
        8 | 13 | 18 | 23 => ch == '-',
        _ => ch.is_ascii_hexdigit(),
    });
    if shaped {
        Uuid::parse_str(&text).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{BoundStatement, SimpleStatement};

    fn session_with_kv() -> InMemorySession {
        let session = InMemorySession::new();
        session
            .run("CREATE TABLE t (k int PRIMARY KEY, v text)", &[])
            .unwrap();
        session
    }

    fn collect(rs: ResultSet) -> Vec<Vec<CqlValue>> {
        rs.rows().map(|r| r.unwrap().into_values()).collect()
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("SELECT * FROM ks.t WHERE k = ? AND b = 0xdead -- trailing").unwrap();
        assert_eq!(tokens[0], Token::Ident("SELECT".to_string()));
        assert!(tokens.contains(&Token::Bind));
        assert!(tokens.contains(&Token::Blob(vec![0xde, 0xad])));
        assert_eq!(tokens.len(), 14);
    }

    #[test]
    fn test_tokenize_literals() {
        let tokens =
            tokenize("'it''s' -12 1.5e3 123e4567-e89b-12d3-a456-426614174000 \"Mixed\"").unwrap();
        assert_eq!(tokens[0], Token::Str("it's".to_string()));
        assert_eq!(tokens[1], Token::Number("-12".to_string()));
        assert_eq!(tokens[2], Token::Number("1.5e3".to_string()));
        assert!(matches!(tokens[3], Token::Uuid(_)));
        assert_eq!(tokens[4], Token::Quoted("Mixed".to_string()));
    }

    #[test]
    fn test_insert_select_upsert() {
        let session = session_with_kv();
        session
            .run("INSERT INTO t (k, v) VALUES (1, 'a')", &[])
            .unwrap();
        session
            .run("INSERT INTO t (k, v) VALUES (?, ?)", &[2i32.into(), "b".into()])
            .unwrap();
        session
            .run("INSERT INTO t (k, v) VALUES (1, 'z')", &[])
            .unwrap();

        assert_eq!(session.row_count("t"), Some(2));
        let rows = collect(session.run("SELECT v FROM t WHERE k = 1", &[]).unwrap());
        assert_eq!(rows, vec![vec![CqlValue::Text("z".to_string())]]);
    }

    #[test]
    fn test_count_and_limit() {
        let session = session_with_kv();
        for k in 0..5 {
            session
                .run("INSERT INTO t (k, v) VALUES (?, 'x')", &[CqlValue::Int(k)])
                .unwrap();
        }

        let rows = collect(session.run("SELECT COUNT(*) FROM t", &[]).unwrap());
        assert_eq!(rows, vec![vec![CqlValue::BigInt(5)]]);

        let rows = collect(session.run("SELECT k FROM t LIMIT 2", &[]).unwrap());
        assert_eq!(rows, vec![vec![CqlValue::Int(0)], vec![CqlValue::Int(1)]]);
    }

    #[test]
    fn test_update_delete_truncate() {
        let session = session_with_kv();
        session
            .run("UPDATE t SET v = 'new' WHERE k = 9", &[])
            .unwrap();
        let rows = collect(session.run("SELECT * FROM t", &[]).unwrap());
        assert_eq!(rows, vec![vec![CqlValue::Int(9), CqlValue::from("new")]]);

        session.run("DELETE FROM t WHERE k = 9", &[]).unwrap();
        assert_eq!(session.row_count("t"), Some(0));

        session.run("INSERT INTO t (k, v) VALUES (1, 'a')", &[]).unwrap();
        session.run("TRUNCATE t", &[]).unwrap();
        assert_eq!(session.row_count("t"), Some(0));
    }

    #[test]
    fn test_insert_if_not_exists() {
        let session = session_with_kv();
        let first = session
            .run("INSERT INTO t (k, v) VALUES (1, 'a') IF NOT EXISTS", &[])
            .unwrap();
        assert!(first.was_applied());
        let second = session
            .run("INSERT INTO t (k, v) VALUES (1, 'b') IF NOT EXISTS", &[])
            .unwrap();
        assert!(!second.was_applied());
    }

    #[test]
    fn test_errors() {
        let session = session_with_kv();
        assert!(matches!(
            session.run("SELECT * FROM missing", &[]),
            Err(DriverError::InvalidQuery(_))
        ));
        assert!(matches!(
            session.run("SELEC * FROM t", &[]),
            Err(DriverError::Syntax(_))
        ));
        assert!(matches!(
            session.run("INSERT INTO t (v) VALUES ('a')", &[]),
            Err(DriverError::InvalidQuery(_))
        ));
        assert!(matches!(
            session.run("INSERT INTO t (k, v) VALUES ('x', 'a')", &[]),
            Err(DriverError::InvalidQuery(_))
        ));
        assert!(matches!(
            session.run("CREATE TABLE t (k int PRIMARY KEY)", &[]),
            Err(DriverError::AlreadyExists { .. })
        ));
        assert!(matches!(
            session.run("SELECT * FROM t WHERE k = ?", &[]),
            Err(DriverError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_compound_primary_key() {
        let session = InMemorySession::new();
        session
            .run(
                "CREATE TABLE events (day text, ts bigint, payload blob, PRIMARY KEY ((day), ts)) WITH CLUSTERING ORDER BY (ts DESC)",
                &[],
            )
            .unwrap();
        session
            .run("INSERT INTO events (day, ts, payload) VALUES ('mon', 1, 0x01)", &[])
            .unwrap();
        session
            .run("INSERT INTO events (day, ts, payload) VALUES ('mon', 2, 0x02)", &[])
            .unwrap();
        assert_eq!(session.row_count("events"), Some(2));
    }

    #[tokio::test]
    async fn test_prepare_resolves_placeholder_types() {
        let session = session_with_kv();
        let ps = session
            .prepare("SELECT v FROM t WHERE k = ? LIMIT ?")
            .await
            .unwrap();

        assert_eq!(
            ps.variables(),
            &[
                ColumnSpec::new("k", CqlType::Int),
                ColumnSpec::new("[limit]", CqlType::Int)
            ]
        );
        assert_eq!(session.prepare_count(), 1);
    }

    #[tokio::test]
    async fn test_execute_bound_and_record_options() {
        let session = session_with_kv();
        let ps = session
            .prepare("INSERT INTO t (k, v) VALUES (?, ?)")
            .await
            .unwrap();
        let bound = BoundStatement::new(ps, vec![1i32.into(), "a".into()]).unwrap();
        let options = ExecuteOptions::new().with_tracing(true);

        let rs = session.execute(bound.into(), options.clone()).await.unwrap();
        assert!(rs.execution_info().tracing_id.is_some());
        assert_eq!(session.execute_count(), 1);
        assert_eq!(session.executed_options(), vec![options]);
        assert_eq!(session.row_count("t"), Some(1));
    }

    #[tokio::test]
    async fn test_paging_by_fetch_size() {
        let session = session_with_kv();
        for k in 0..5 {
            session
                .run("INSERT INTO t (k, v) VALUES (?, 'x')", &[CqlValue::Int(k)])
                .unwrap();
        }

        let rs = session
            .execute(
                "SELECT k FROM t".into(),
                ExecuteOptions::new().with_fetch_size(2),
            )
            .await
            .unwrap();
        assert_eq!(rs.available_without_fetching(), 2);
        assert_eq!(session.pages_fetched(), 0);

        assert_eq!(collect(rs).len(), 5);
        assert_eq!(session.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn test_stubs() {
        let session = InMemorySession::new();
        session.stub_rows(
            "SELECT release_version FROM system.local",
            vec![ColumnSpec::new("release_version", CqlType::Text)],
            vec![vec!["4.1.3".into()]],
        );
        session.stub_failure("SELECT boom", DriverError::Overloaded("busy".to_string()));

        let rs = session
            .execute(
                SimpleStatement::new("SELECT  release_version FROM system.local;").into(),
                ExecuteOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(collect(rs), vec![vec![CqlValue::from("4.1.3")]]);

        let err = session
            .execute("SELECT boom".into(), ExecuteOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Overloaded(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_never_completes() {
        let session = InMemorySession::new();
        session.stub_hang("SELECT * FROM slow");

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            session.execute("SELECT * FROM slow".into(), ExecuteOptions::new()),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cluster_metadata_and_keyspace() {
        let session = InMemorySession::new().with_keyspace("app");
        let metadata = session.cluster_metadata().await.unwrap();
        assert_eq!(metadata.hosts.len(), 1);
        assert_eq!(session.keyspace().as_deref(), Some("app"));

        session.run("USE other", &[]).unwrap();
        assert_eq!(session.keyspace().as_deref(), Some("other"));
    }
}
