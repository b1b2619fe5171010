//! Schema metadata store
//!
//! A static map from `(schema, table, column)` to introspected column facts.
//! The map is produced by an offline generation step against the live
//! database and shipped with the application, either as Rust code or as a
//! JSON artifact loaded at startup. It is never mutated at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Base type of a column as reported by introspection.
///
/// Everything that is not a boolean, a number, or a backend-defined enum is
/// treated as a string for rendering and write purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseType {
    String,
    Number,
    Boolean,
    Enum,
}

/// An outgoing foreign-key reference from a column.
///
/// A column may carry several references when it points into multiple
/// convenience views of the same logical table, so these are kept as an
/// ordered list on the descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnReference {
    /// Name of the referenced relation (table or view).
    pub relation: String,
    /// Columns of the referenced relation this key points at.
    pub referenced_columns: Vec<String>,
    /// Whether the relationship is one-to-one.
    pub is_one_to_one: bool,
}

/// Introspected facts about a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub base_type: BaseType,
    pub is_array: bool,
    pub is_nullable: bool,
    /// Name of the enum type when `base_type` is [`BaseType::Enum`].
    #[serde(default)]
    pub enum_ref: Option<String>,
    #[serde(default)]
    pub references: Vec<ColumnReference>,
}

/// The generated schema metadata map.
///
/// Lookups are by `(schema, table, column)`. The store is immutable once
/// built; rebuilds happen out-of-band when the database schema changes.
#[derive(Debug, Clone, Default)]
pub struct SchemaMetadata {
    columns: HashMap<(String, String, String), ColumnDescriptor>,
}

impl SchemaMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a list of column descriptors.
    pub fn from_columns<I>(columns: I) -> Self
    where
        I: IntoIterator<Item = ColumnDescriptor>,
    {
        let mut store = Self::new();
        for descriptor in columns {
            store.insert(descriptor);
        }
        store
    }

    /// Load the store from the generated JSON artifact (an array of
    /// descriptors with camelCase keys).
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if the artifact does not parse.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let columns: Vec<ColumnDescriptor> = serde_json::from_str(json)?;
        Ok(Self::from_columns(columns))
    }

    pub fn insert(&mut self, descriptor: ColumnDescriptor) {
        let key = (
            descriptor.schema.clone(),
            descriptor.table.clone(),
            descriptor.column.clone(),
        );
        self.columns.insert(key, descriptor);
    }

    /// Look up the descriptor for a single column.
    pub fn column(&self, schema: &str, table: &str, column: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .get(&(schema.to_string(), table.to_string(), column.to_string()))
    }

    /// Whether the given column exists on the given table.
    ///
    /// Used by the write router to strip payload keys the backend would
    /// reject.
    pub fn has_column(&self, schema: &str, table: &str, column: &str) -> bool {
        self.column(schema, table, column).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
