//! Result set handling and iteration.
//!
//! A [`ResultSet`] is a single-pass cursor over rows that the driver
//! materializes page by page. Clones share the same cursor, so rows consumed
//! through one handle are gone for every other handle.

use crate::error::{CqlError, ConversionError, DriverError};
use crate::query::options::Consistency;
use crate::types::{CqlType, CqlValue, FromCqlValue};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Name and type of a result column or statement placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column or placeholder name
    pub name: String,
    /// Declared CQL type
    pub cql_type: CqlType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self {
            name: name.into(),
            cql_type,
        }
    }
}

/// Ordered column metadata of a result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDefinitions {
    columns: Vec<ColumnSpec>,
}

impl ColumnDefinitions {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column at `index`.
    pub fn get(&self, index: usize) -> Option<&ColumnSpec> {
        self.columns.get(index)
    }

    /// Position of the column named `name`. Matching is case-insensitive,
    /// like unquoted CQL identifiers.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    /// Column names in query order.
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter()
    }
}

/// Ordered mapping from column name to value, in query column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    entries: Vec<(String, CqlValue)>,
}

impl ColumnMap {
    /// Value of the column named `name`.
    pub fn get(&self, name: &str) -> Option<&CqlValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Column names in query order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CqlValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, CqlValue)> for ColumnMap {
    fn from_iter<I: IntoIterator<Item = (String, CqlValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ColumnMap {
    type Item = (String, CqlValue);
    type IntoIter = std::vec::IntoIter<(String, CqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A single result row.
#[derive(Clone, PartialEq)]
pub struct Row {
    columns: Arc<ColumnDefinitions>,
    values: Vec<CqlValue>,
}

impl Row {
    pub fn new(columns: Arc<ColumnDefinitions>, values: Vec<CqlValue>) -> Self {
        Self { columns, values }
    }

    /// Column metadata of this row.
    pub fn columns(&self) -> &ColumnDefinitions {
        &self.columns
    }

    /// Values in column order.
    pub fn values(&self) -> &[CqlValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<CqlValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value at column `index`.
    pub fn get(&self, index: usize) -> Result<&CqlValue, ConversionError> {
        self.values
            .get(index)
            .ok_or(ConversionError::ColumnIndexOutOfBounds {
                index,
                count: self.values.len(),
            })
    }

    /// Raw value of the column named `name`.
    pub fn get_by_name(&self, name: &str) -> Result<&CqlValue, ConversionError> {
        let index = self
            .columns
            .index_of(name)
            .ok_or_else(|| ConversionError::NoSuchColumn(name.to_string()))?;
        self.get(index)
    }

    /// Value at column `index`, converted to `T`.
    pub fn get_as<T: FromCqlValue>(&self, index: usize) -> Result<T, ConversionError> {
        let value = self.get(index)?;
        T::from_cql(value, &self.column_label(index))
    }

    /// Value of the column named `name`, converted to `T`.
    pub fn get_by_name_as<T: FromCqlValue>(&self, name: &str) -> Result<T, ConversionError> {
        T::from_cql(self.get_by_name(name)?, name)
    }

    /// Copy the row into an ordered column map.
    pub fn to_map(&self) -> ColumnMap {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (self.column_label(i), v.clone()))
            .collect()
    }

    fn column_label(&self, index: usize) -> String {
        self.columns
            .get(index)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("#{}", index))
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (i, value) in self.values.iter().enumerate() {
            map.entry(&self.column_label(i), value);
        }
        map.finish()
    }
}

/// Driver-side source of further result pages.
///
/// Implementations may block while fetching a page. A fetch runs on whichever
/// thread consumes the result set: a continuation on [`DirectExecutor`] runs
/// it on the thread that settled the handle, which is a runtime worker for
/// template dispatches. A source that drives async driver I/O through
/// `Handle::block_on` must be consumed off the workers, e.g. through a
/// `Handle` executor, which runs continuations on the blocking pool.
///
/// [`DirectExecutor`]: crate::future::DirectExecutor
pub trait PageSource: Send {
    /// Fetch the next page of rows, or `None` when the result is complete.
    fn fetch_next_page(&mut self) -> Result<Option<Vec<Vec<CqlValue>>>, DriverError>;
}

/// Execution metadata reported by the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionInfo {
    /// Server-side tracing session, when tracing was requested
    pub tracing_id: Option<Uuid>,
    /// Consistency level the coordinator achieved
    pub achieved_consistency: Option<Consistency>,
    /// Server warnings
    pub warnings: Vec<String>,
}

/// Query result: an ordered, single-pass sequence of rows.
#[derive(Clone)]
pub struct ResultSet {
    columns: Arc<ColumnDefinitions>,
    info: Arc<ExecutionInfo>,
    cursor: Arc<Mutex<Cursor>>,
}

struct Cursor {
    buffered: VecDeque<Vec<CqlValue>>,
    source: Option<Box<dyn PageSource>>,
    pending_error: Option<DriverError>,
}

impl Cursor {
    /// Make sure a row is buffered if the source has one.
    fn fill(&mut self) {
        while self.buffered.is_empty() && self.pending_error.is_none() {
            let Some(source) = self.source.as_mut() else {
                return;
            };
            match source.fetch_next_page() {
                Ok(Some(page)) => self.buffered.extend(page),
                Ok(None) => self.source = None,
                Err(e) => {
                    self.source = None;
                    self.pending_error = Some(e);
                }
            }
        }
    }
}

impl ResultSet {
    /// Create a result set from a first page and an optional source of more pages.
    pub fn new(
        columns: Vec<ColumnSpec>,
        first_page: Vec<Vec<CqlValue>>,
        source: Option<Box<dyn PageSource>>,
    ) -> Self {
        Self {
            columns: Arc::new(ColumnDefinitions::new(columns)),
            info: Arc::new(ExecutionInfo::default()),
            cursor: Arc::new(Mutex::new(Cursor {
                buffered: first_page.into(),
                source,
                pending_error: None,
            })),
        }
    }

    /// Create a fully materialized result set.
    pub fn from_rows(columns: Vec<ColumnSpec>, rows: Vec<Vec<CqlValue>>) -> Self {
        Self::new(columns, rows, None)
    }

    /// Result of a statement that returns no rows.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), None)
    }

    /// Attach execution metadata.
    pub fn with_execution_info(mut self, info: ExecutionInfo) -> Self {
        self.info = Arc::new(info);
        self
    }

    /// Column metadata.
    pub fn columns(&self) -> &ColumnDefinitions {
        &self.columns
    }

    /// Execution metadata.
    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.info
    }

    /// Consume the next row.
    pub fn next_row(&self) -> Option<Result<Row, CqlError>> {
        let mut cursor = self.lock();
        cursor.fill();
        if let Some(values) = cursor.buffered.pop_front() {
            return Some(Ok(Row::new(Arc::clone(&self.columns), values)));
        }
        cursor.pending_error.take().map(|e| Err(e.into()))
    }

    /// Iterate the remaining rows.
    pub fn rows(&self) -> RowIter {
        RowIter { rs: self.clone() }
    }

    /// Whether every row has been consumed. May fetch the next page.
    pub fn is_exhausted(&self) -> bool {
        let mut cursor = self.lock();
        cursor.fill();
        cursor.buffered.is_empty() && cursor.pending_error.is_none()
    }

    /// Rows buffered locally that can be read without fetching.
    pub fn available_without_fetching(&self) -> usize {
        self.lock().buffered.len()
    }

    /// Whether every page has been fetched from the driver.
    pub fn is_fully_fetched(&self) -> bool {
        self.lock().source.is_none()
    }

    /// Outcome of a conditional (`IF ...`) statement.
    ///
    /// Reads the `[applied]` column of the next row without consuming it;
    /// results without that column count as applied.
    pub fn was_applied(&self) -> bool {
        let Some(index) = self.columns.index_of("[applied]") else {
            return true;
        };
        let mut cursor = self.lock();
        cursor.fill();
        match cursor.buffered.front().and_then(|row| row.get(index)) {
            Some(CqlValue::Boolean(applied)) => *applied,
            _ => true,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("columns", &self.columns.names())
            .field("info", &self.info)
            .field("buffered", &self.available_without_fetching())
            .finish()
    }
}

impl IntoIterator for ResultSet {
    type Item = Result<Row, CqlError>;
    type IntoIter = RowIter;

    fn into_iter(self) -> Self::IntoIter {
        RowIter { rs: self }
    }
}

/// Iterator over the remaining rows of a result set.
pub struct RowIter {
    rs: ResultSet,
}

impl Iterator for RowIter {
    type Item = Result<Row, CqlError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rs.next_row()
    }
}
