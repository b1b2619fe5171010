//! Backend contract
//!
//! Abstracts the relational-query client the detail core talks to. The
//! contract is deliberately small: filtered reads, conditional updates
//! returning affected rows, keyed upserts, bare inserts, and one remote
//! procedure call used for enum values. Different implementations (the
//! production [`PostgresBackend`], a scripted mock in tests) are used
//! interchangeably.

use serde_json::Value;
use std::fmt;

pub mod postgres;

pub use postgres::{connect, ConnectionError, PostgresBackend};

/// A row as the core sees it: column name to JSON value.
pub type JsonRow = serde_json::Map<String, Value>;

/// Backend error type
#[derive(Debug)]
pub enum BackendError {
    /// `PostgreSQL` error from `may_postgres`
    Postgres(may_postgres::Error),
    /// Query construction error
    Query(String),
    /// Row decoding error
    Decode(String),
    /// Other backend errors
    Other(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Postgres(e) => write!(f, "PostgreSQL error: {e}"),
            BackendError::Query(s) => write!(f, "Query error: {s}"),
            BackendError::Decode(s) => write!(f, "Decode error: {s}"),
            BackendError::Other(s) => write!(f, "Backend error: {s}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<may_postgres::Error> for BackendError {
    fn from(err: may_postgres::Error) -> Self {
        BackendError::Postgres(err)
    }
}

/// A schema-qualified table reference.
///
/// Tables outside the default schema are addressed explicitly; the common
/// case uses [`TableRef::public`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn public(table: impl Into<String>) -> Self {
        Self::new("public", table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// One filter condition on a select.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

/// A filtered read, built up in calling order.
///
/// # Example
///
/// ```
/// use fieldwork::backend::{SelectSpec, TableRef};
/// use serde_json::json;
///
/// let spec = SelectSpec::from(TableRef::public("schools"))
///     .columns(["id", "name"])
///     .eq("charter_id", json!("c1"))
///     .order_asc("name")
///     .range(0, 199);
/// assert_eq!(spec.columns.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SelectSpec {
    pub table: TableRef,
    /// Columns to select; empty means all.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    /// Ascending order, applied in the order given.
    pub order_by: Vec<String>,
    /// Inclusive row range `(from, to)` for pagination.
    pub range: Option<(u64, u64)>,
}

impl SelectSpec {
    pub fn from(table: TableRef) -> Self {
        Self {
            table,
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            range: None,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::Eq(column.into(), value));
        self
    }

    pub fn is_in(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(Filter::In(column.into(), values));
        self
    }

    pub fn order_asc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.range = Some((from, to));
        self
    }
}

/// Trait for executing backend operations
///
/// All calls are request/response and suspend the calling coroutine while
/// the backend round-trip is in flight.
pub trait DataBackend {
    /// Execute a filtered read and return the matching rows.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the query fails or a row cannot be decoded.
    fn select(&self, spec: &SelectSpec) -> Result<Vec<JsonRow>, BackendError>;

    /// Update rows matching the predicate and return the affected rows.
    /// An empty result means the predicate matched nothing.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the update fails.
    fn update(
        &self,
        table: &TableRef,
        payload: &JsonRow,
        matcher: &JsonRow,
    ) -> Result<Vec<JsonRow>, BackendError>;

    /// Insert-or-update keyed on a named unique column, returning the
    /// resulting rows.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the upsert fails.
    fn upsert(
        &self,
        table: &TableRef,
        payload: &JsonRow,
        on_conflict: &str,
    ) -> Result<Vec<JsonRow>, BackendError>;

    /// Unconditional row creation.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the insert fails.
    fn insert(&self, table: &TableRef, payload: &JsonRow) -> Result<(), BackendError>;

    /// Call a remote procedure with named arguments, returning its rows as
    /// a JSON array. Used for `enum_values(enum_type)`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the call fails.
    fn rpc(&self, procedure: &str, args: &JsonRow) -> Result<Value, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_spec_builder_accumulates() {
        let spec = SelectSpec::from(TableRef::public("email_addresses"))
            .eq("person_id", json!("p1"))
            .order_asc("email")
            .range(0, 199);
        assert_eq!(spec.table, TableRef::new("public", "email_addresses"));
        assert_eq!(
            spec.filters,
            vec![Filter::Eq("person_id".to_string(), json!("p1"))]
        );
        assert_eq!(spec.order_by, vec!["email".to_string()]);
        assert_eq!(spec.range, Some((0, 199)));
    }

    #[test]
    fn test_table_ref_display() {
        assert_eq!(TableRef::public("people").to_string(), "public.people");
        assert_eq!(TableRef::new("audit", "log").to_string(), "audit.log");
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Query("bad spec".to_string());
        assert!(err.to_string().contains("Query error"));
        let err = BackendError::Decode("bad row".to_string());
        assert!(err.to_string().contains("Decode error"));
    }
}
