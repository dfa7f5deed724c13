//! Result processing strategies.
//!
//! Three capability shapes consume a [`ResultSet`]:
//! - [`RowCallbackHandler`] - side effects per row, nothing returned
//! - [`RowMapper`] - one value per row, yielded lazily in row order
//! - [`ResultSetExtractor`] - the whole result reduced to one value
//!
//! Closures implement all three. The built-in scalar and collector
//! processors are implemented on top of them.
//!
//! Errors raised by application processors are reported as
//! `ProcessingError` with the row number. A processor that fails with a
//! `ConversionError` or `CqlError` keeps that error unchanged, so
//! `row.get_as::<T>(..)?` inside a mapper surfaces as a conversion error.

use crate::error::{BoxError, ConversionError, CqlError, ProcessingError, QueryError};
use crate::query::results::{ColumnMap, ResultSet, Row};
use crate::types::{CqlType, FromCqlValue};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Receives each row for its side effects.
pub trait RowCallbackHandler: Send {
    fn process_row(&mut self, row: &Row) -> Result<(), BoxError>;
}

impl<F> RowCallbackHandler for F
where
    F: FnMut(&Row) -> Result<(), BoxError> + Send,
{
    fn process_row(&mut self, row: &Row) -> Result<(), BoxError> {
        self(row)
    }
}

/// Maps each row to a value.
pub trait RowMapper<T>: Send + Sync {
    /// Map `row`, the `row_num`-th row of the result (zero based).
    fn map_row(&self, row: &Row, row_num: usize) -> Result<T, BoxError>;
}

impl<T, F> RowMapper<T> for F
where
    F: Fn(&Row, usize) -> Result<T, BoxError> + Send + Sync,
{
    fn map_row(&self, row: &Row, row_num: usize) -> Result<T, BoxError> {
        self(row, row_num)
    }
}

/// Reduces a whole result set to one value.
pub trait ResultSetExtractor<T>: Send + Sync {
    fn extract(&self, rs: &ResultSet) -> Result<T, CqlError>;
}

impl<T, F> ResultSetExtractor<T> for F
where
    F: Fn(&ResultSet) -> Result<T, CqlError> + Send + Sync,
{
    fn extract(&self, rs: &ResultSet) -> Result<T, CqlError> {
        self(rs)
    }
}

/// Build a row mapper from a closure, inferring its signature.
pub fn row_mapper<T, F>(f: F) -> impl RowMapper<T>
where
    F: Fn(&Row, usize) -> Result<T, BoxError> + Send + Sync,
{
    f
}

/// Build a row callback handler from a closure, inferring its signature.
pub fn row_handler<F>(f: F) -> impl RowCallbackHandler
where
    F: FnMut(&Row) -> Result<(), BoxError> + Send,
{
    f
}

/// Build a result set extractor from a closure, inferring its signature.
pub fn extractor<T, F>(f: F) -> impl ResultSetExtractor<T>
where
    F: Fn(&ResultSet) -> Result<T, CqlError> + Send + Sync,
{
    f
}

/// Keep conversion errors raised inside processors; wrap everything else.
///
/// Any other `CqlError`, a driver failure included, is wrapped with its row
/// so a processor failure never reads as a network one.
fn classify(error: BoxError, wrap: impl FnOnce(BoxError) -> ProcessingError) -> CqlError {
    let error = match error.downcast::<ConversionError>() {
        Ok(conversion) => return CqlError::Conversion(*conversion),
        Err(other) => other,
    };
    match error.downcast::<CqlError>() {
        Ok(cql) => match *cql {
            CqlError::Conversion(conversion) => CqlError::Conversion(conversion),
            other => CqlError::Processing(wrap(Box::new(other))),
        },
        Err(other) => CqlError::Processing(wrap(other)),
    }
}

// ============================================================================
// Built-in processors
// ============================================================================

/// Maps column 0 of each row to `T`.
pub struct SingleColumnRowMapper<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> SingleColumnRowMapper<T> {
    pub fn new() -> Self {
        Self {
            _target: PhantomData,
        }
    }
}

impl<T> Default for SingleColumnRowMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SingleColumnRowMapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleColumnRowMapper").finish()
    }
}

impl<T: FromCqlValue> RowMapper<T> for SingleColumnRowMapper<T> {
    fn map_row(&self, row: &Row, _row_num: usize) -> Result<T, BoxError> {
        Ok(row.get_as::<T>(0)?)
    }
}

/// Maps each row to an ordered column map.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnMapRowMapper;

impl RowMapper<ColumnMap> for ColumnMapRowMapper {
    fn map_row(&self, row: &Row, _row_num: usize) -> Result<ColumnMap, BoxError> {
        Ok(row.to_map())
    }
}

/// Expects exactly one row and maps it.
pub struct SingleRowExtractor<M, T> {
    mapper: M,
    _target: PhantomData<fn() -> T>,
}

impl<M: RowMapper<T>, T> SingleRowExtractor<M, T> {
    pub fn new(mapper: M) -> Self {
        Self {
            mapper,
            _target: PhantomData,
        }
    }
}

impl<M: RowMapper<T>, T> ResultSetExtractor<T> for SingleRowExtractor<M, T> {
    fn extract(&self, rs: &ResultSet) -> Result<T, CqlError> {
        process_one(rs, &self.mapper)
    }
}

/// Expects exactly one row and converts its column 0 to `T`.
pub struct SingleValueExtractor<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> SingleValueExtractor<T> {
    pub fn new() -> Self {
        Self {
            _target: PhantomData,
        }
    }
}

impl<T> Default for SingleValueExtractor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FromCqlValue> ResultSetExtractor<T> for SingleValueExtractor<T> {
    fn extract(&self, rs: &ResultSet) -> Result<T, CqlError> {
        process_one_value(rs)
    }
}

/// Collects column 0 of every row.
pub struct FirstColumnListExtractor<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> FirstColumnListExtractor<T> {
    pub fn new() -> Self {
        Self {
            _target: PhantomData,
        }
    }
}

impl<T> Default for FirstColumnListExtractor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FromCqlValue> ResultSetExtractor<Vec<T>> for FirstColumnListExtractor<T> {
    fn extract(&self, rs: &ResultSet) -> Result<Vec<T>, CqlError> {
        process_first_column_as_list(rs)
    }
}

/// Collects every row as a column map.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnMapListExtractor;

impl ResultSetExtractor<Vec<ColumnMap>> for ColumnMapListExtractor {
    fn extract(&self, rs: &ResultSet) -> Result<Vec<ColumnMap>, CqlError> {
        process_as_list_of_map(rs)
    }
}

/// Counts rows and records the result's column metadata.
#[derive(Debug, Clone, Default)]
pub struct RowCountCallbackHandler {
    row_count: usize,
    column_names: Vec<String>,
    column_types: Vec<CqlType>,
}

impl RowCountCallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows seen so far.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Column names, captured from the first row.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Column types, captured from the first row.
    pub fn column_types(&self) -> &[CqlType] {
        &self.column_types
    }
}

impl RowCallbackHandler for RowCountCallbackHandler {
    fn process_row(&mut self, row: &Row) -> Result<(), BoxError> {
        if self.row_count == 0 {
            self.column_names = row.columns().iter().map(|c| c.name.clone()).collect();
            self.column_types = row.columns().iter().map(|c| c.cql_type.clone()).collect();
        }
        self.row_count += 1;
        Ok(())
    }
}

// ============================================================================
// Processing functions
// ============================================================================

/// Feed every remaining row to `handler`, stopping at the first error.
///
/// Returns the number of rows processed. Effects of rows processed before a
/// failure are not rolled back.
pub fn process_rows<H>(rs: &ResultSet, handler: &mut H) -> Result<usize, CqlError>
where
    H: RowCallbackHandler + ?Sized,
{
    let mut processed = 0;
    while let Some(row) = rs.next_row() {
        let row = row?;
        handler
            .process_row(&row)
            .map_err(|e| classify(e, |e| ProcessingError::callback(processed, e)))?;
        processed += 1;
    }
    trace!(rows = processed, "Processed rows with callback handler");
    Ok(processed)
}

/// Lazily map the remaining rows of `rs`.
pub fn map_rows<T, M>(rs: &ResultSet, mapper: M) -> MappedRows<T>
where
    M: RowMapper<T> + 'static,
{
    MappedRows::new(rs.clone(), Arc::new(mapper))
}

/// Map the only row of `rs`.
///
/// # Errors
/// Returns `QueryError::IncorrectResultSize` if the result does not contain
/// exactly one row. The remaining rows are drained to report the actual count.
pub fn process_one<T, M>(rs: &ResultSet, mapper: &M) -> Result<T, CqlError>
where
    M: RowMapper<T> + ?Sized,
{
    let row = single_row(rs)?;
    mapper
        .map_row(&row, 0)
        .map_err(|e| classify(e, |e| ProcessingError::mapper(0, e)))
}

/// Convert column 0 of the only row of `rs` to `T`.
pub fn process_one_value<T: FromCqlValue>(rs: &ResultSet) -> Result<T, CqlError> {
    let row = single_row(rs)?;
    Ok(row.get_as::<T>(0)?)
}

/// The only row of `rs` as a column map.
pub fn process_one_as_map(rs: &ResultSet) -> Result<ColumnMap, CqlError> {
    Ok(single_row(rs)?.to_map())
}

/// Column 0 of every remaining row, converted to `T`.
pub fn process_first_column_as_list<T: FromCqlValue>(rs: &ResultSet) -> Result<Vec<T>, CqlError> {
    rs.rows()
        .map(|row| -> Result<T, CqlError> { Ok(row?.get_as::<T>(0)?) })
        .collect()
}

/// Every remaining row as a column map.
pub fn process_as_list_of_map(rs: &ResultSet) -> Result<Vec<ColumnMap>, CqlError> {
    rs.rows()
        .map(|row| -> Result<ColumnMap, CqlError> { Ok(row?.to_map()) })
        .collect()
}

fn single_row(rs: &ResultSet) -> Result<Row, CqlError> {
    let first = match rs.next_row() {
        Some(row) => row?,
        None => {
            return Err(QueryError::IncorrectResultSize {
                expected: 1,
                actual: 0,
            }
            .into())
        }
    };

    let mut actual = 1;
    while let Some(row) = rs.next_row() {
        row?;
        actual += 1;
    }
    if actual != 1 {
        return Err(QueryError::IncorrectResultSize {
            expected: 1,
            actual,
        }
        .into());
    }
    Ok(first)
}

/// Lazy single-pass sequence of mapped rows.
///
/// Clones share the underlying cursor. The sequence ends after the first
/// error.
pub struct MappedRows<T> {
    rs: ResultSet,
    mapper: Arc<dyn RowMapper<T>>,
    row_num: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
}

impl<T> MappedRows<T> {
    fn new(rs: ResultSet, mapper: Arc<dyn RowMapper<T>>) -> Self {
        Self {
            rs,
            mapper,
            row_num: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The result set being mapped.
    pub fn result_set(&self) -> &ResultSet {
        &self.rs
    }
}

impl<T> Clone for MappedRows<T> {
    fn clone(&self) -> Self {
        Self {
            rs: self.rs.clone(),
            mapper: Arc::clone(&self.mapper),
            row_num: Arc::clone(&self.row_num),
            failed: Arc::clone(&self.failed),
        }
    }
}

impl<T> fmt::Debug for MappedRows<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRows")
            .field("rows_mapped", &self.row_num.load(Ordering::SeqCst))
            .field("failed", &self.failed.load(Ordering::SeqCst))
            .finish()
    }
}

impl<T> Iterator for MappedRows<T> {
    type Item = Result<T, CqlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed.load(Ordering::SeqCst) {
            return None;
        }
        let item = match self.rs.next_row()? {
            Ok(row) => {
                let row_num = self.row_num.fetch_add(1, Ordering::SeqCst);
                self.mapper
                    .map_row(&row, row_num)
                    .map_err(|e| classify(e, |e| ProcessingError::mapper(row_num, e)))
            }
            Err(e) => Err(e),
        };
        if item.is_err() {
            self.failed.store(true, Ordering::SeqCst);
        }
        Some(item)
    }
}
