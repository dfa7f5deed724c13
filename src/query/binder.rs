//! Parameter binding for prepared statements.
//!
//! Binding is a local operation: count and type checks run before anything is
//! sent to the session, and a failed bind never reaches the network.

use crate::error::{BoxError, QueryError};
use crate::query::prepared::PreparedStatement;
use crate::types::CqlValue;

/// Supplies the positional values for a prepared statement.
pub trait PreparedStatementBinder: Send + Sync {
    /// Produce the values to bind, in placeholder order.
    fn bind_values(&self, prepared: &PreparedStatement) -> Result<Vec<CqlValue>, BoxError>;
}

impl PreparedStatementBinder for Vec<CqlValue> {
    fn bind_values(&self, _prepared: &PreparedStatement) -> Result<Vec<CqlValue>, BoxError> {
        Ok(self.clone())
    }
}

impl PreparedStatementBinder for [CqlValue] {
    fn bind_values(&self, _prepared: &PreparedStatement) -> Result<Vec<CqlValue>, BoxError> {
        Ok(self.to_vec())
    }
}

impl<const N: usize> PreparedStatementBinder for [CqlValue; N] {
    fn bind_values(&self, _prepared: &PreparedStatement) -> Result<Vec<CqlValue>, BoxError> {
        Ok(self.to_vec())
    }
}

/// Binder backed by a closure.
pub struct FnBinder<F>(pub F);

impl<F> PreparedStatementBinder for FnBinder<F>
where
    F: Fn(&PreparedStatement) -> Result<Vec<CqlValue>, BoxError> + Send + Sync,
{
    fn bind_values(&self, prepared: &PreparedStatement) -> Result<Vec<CqlValue>, BoxError> {
        (self.0)(prepared)
    }
}

/// A prepared statement with its placeholder values filled in.
///
/// Bound statements are single-use and are consumed by execution.
#[derive(Debug)]
pub struct BoundStatement {
    prepared: PreparedStatement,
    values: Vec<CqlValue>,
}

impl BoundStatement {
    /// Bind `values` to `prepared`.
    ///
    /// # Errors
    /// Returns `QueryError::Binding` if the number of values differs from the
    /// number of placeholders, or a value is not accepted by its placeholder type.
    pub fn new(prepared: PreparedStatement, values: Vec<CqlValue>) -> Result<Self, QueryError> {
        let expected = prepared.parameter_count();
        if values.len() != expected {
            return Err(QueryError::binding(
                None,
                format!(
                    "statement has {} placeholders but {} values were supplied",
                    expected,
                    values.len()
                ),
            ));
        }

        for (index, (spec, value)) in prepared.variables().iter().zip(&values).enumerate() {
            if !spec.cql_type.accepts(value) {
                return Err(QueryError::binding(
                    Some(index),
                    format!(
                        "value of type {} is not compatible with placeholder '{}' of type {}",
                        value.type_name(),
                        spec.name,
                        spec.cql_type
                    ),
                ));
            }
        }

        Ok(Self { prepared, values })
    }

    /// Bind using a binder. `None` binds no values.
    pub fn with_binder(
        prepared: PreparedStatement,
        binder: Option<&dyn PreparedStatementBinder>,
    ) -> Result<Self, QueryError> {
        let values = match binder {
            Some(binder) => binder
                .bind_values(&prepared)
                .map_err(|e| QueryError::binding(None, e.to_string()))?,
            None => Vec::new(),
        };
        Self::new(prepared, values)
    }

    /// Get the prepared statement this was bound from.
    pub fn prepared(&self) -> &PreparedStatement {
        &self.prepared
    }

    /// Get the bound values.
    pub fn values(&self) -> &[CqlValue] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::results::ColumnSpec;
    use crate::types::CqlType;

    fn insert_kv() -> PreparedStatement {
        PreparedStatement::new(
            vec![1],
            "INSERT INTO t (k, v) VALUES (?, ?)",
            None,
            vec![
                ColumnSpec::new("k", CqlType::Int),
                ColumnSpec::new("v", CqlType::Text),
            ],
        )
    }

    #[test]
    fn test_bind_valid() {
        let bound = BoundStatement::new(insert_kv(), vec![1i32.into(), "a".into()]).unwrap();
        assert_eq!(bound.values().len(), 2);
        assert_eq!(bound.prepared().cql(), "INSERT INTO t (k, v) VALUES (?, ?)");
    }

    #[test]
    fn test_bind_too_few_values() {
        let err = BoundStatement::new(insert_kv(), vec![1i32.into()]).unwrap_err();
        assert!(matches!(err, QueryError::Binding { index: None, .. }));
        assert!(err.to_string().contains("2 placeholders but 1 values"));
    }

    #[test]
    fn test_bind_too_many_values() {
        let err =
            BoundStatement::new(insert_kv(), vec![1i32.into(), "a".into(), 3i32.into()]).unwrap_err();
        assert!(matches!(err, QueryError::Binding { .. }));
    }

    #[test]
    fn test_bind_type_mismatch_reports_index() {
        let err = BoundStatement::new(insert_kv(), vec!["one".into(), "a".into()]).unwrap_err();
        assert!(matches!(err, QueryError::Binding { index: Some(0), .. }));
        assert!(err.to_string().contains("placeholder 'k'"));
    }

    #[test]
    fn test_bind_null_is_accepted() {
        assert!(BoundStatement::new(insert_kv(), vec![1i32.into(), CqlValue::Null]).is_ok());
    }

    #[test]
    fn test_binder_variants() {
        let array = [CqlValue::Int(1), CqlValue::from("a")];
        assert!(BoundStatement::with_binder(insert_kv(), Some(&array)).is_ok());

        let closure = FnBinder(|ps: &PreparedStatement| -> Result<Vec<CqlValue>, BoxError> {
            Ok((0..ps.parameter_count())
                .map(|i| CqlValue::Int(i as i32))
                .collect())
        });
        // second placeholder is text, so an int there must be refused
        assert!(BoundStatement::with_binder(insert_kv(), Some(&closure)).is_err());

        let none = BoundStatement::with_binder(insert_kv(), None).unwrap_err();
        assert!(matches!(none, QueryError::Binding { .. }));
    }

    #[test]
    fn test_binder_error_becomes_binding_error() {
        let failing = FnBinder(|_: &PreparedStatement| Err::<Vec<CqlValue>, BoxError>("no values".into()));
        let err = BoundStatement::with_binder(insert_kv(), Some(&failing)).unwrap_err();
        assert!(err.to_string().contains("no values"));
    }
}
