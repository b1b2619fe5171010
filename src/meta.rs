//! Field and column metadata merging
//!
//! Manual per-field declarations are combined with introspected column facts
//! from the [`SchemaMetadata`] store to produce one normalized descriptor per
//! field (for cards) or per column (for table blocks). Manual declarations
//! always win over introspection; after merging, `field_type` and `array`
//! are always defined.

use crate::schema::{BaseType, SchemaMetadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rendering/editing type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Attachment,
    Enum,
}

impl From<BaseType> for FieldType {
    fn from(base: BaseType) -> Self {
        match base {
            BaseType::Boolean => FieldType::Boolean,
            BaseType::Number => FieldType::Number,
            BaseType::Enum => FieldType::Enum,
            BaseType::String => FieldType::String,
        }
    }
}

/// Declared write target for a field.
///
/// `schema` defaults to `public` and `pk` to `id` when the target is turned
/// into a concrete write group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditTarget {
    #[serde(default)]
    pub schema: Option<String>,
    /// Backing table. Optional so a field can rename its column while still
    /// writing to the card-level default target.
    #[serde(default)]
    pub table: Option<String>,
    /// Backing column when it differs from the field name.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub pk: Option<String>,
    /// Backend enum type supplying the field's option list.
    #[serde(default)]
    pub enum_name: Option<String>,
    #[serde(default)]
    pub exceptions: Vec<ExceptionRule>,
}

/// A foreign table supplying `(value, label)` pairs for a field's choice
/// list (`lookup`) or for read-only display-label resolution (`reference`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupSource {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    pub value_column: String,
    pub label_column: String,
}

impl LookupSource {
    pub fn schema_or_public(&self) -> &str {
        self.schema.as_deref().unwrap_or("public")
    }

    /// Cache key shared by every field reading the same source.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.schema_or_public(),
            self.table,
            self.value_column,
            self.label_column
        )
    }
}

/// Lookup table used to translate human labels back into keys before a
/// value is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupTranslation {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    pub key_column: String,
    pub label_column: String,
}

impl LookupTranslation {
    pub fn schema_or_public(&self) -> &str {
        self.schema.as_deref().unwrap_or("public")
    }
}

/// A declared rename and/or lookup-based value translation applied before
/// persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionRule {
    pub field: String,
    #[serde(default)]
    pub maps_to_field: Option<String>,
    #[serde(default)]
    pub via_lookup: Option<LookupTranslation>,
}

/// Conditional visibility: the field is shown only while another field of
/// the same card holds the given value. Display only; the write router
/// ignores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleIf {
    pub field: String,
    pub equals: Value,
}

/// A static choice-list entry. Plain strings use the value as the label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticOption {
    Text(String),
    Labeled { value: String, label: String },
}

/// Manual per-field metadata, declared in code per entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMeta {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub array: Option<bool>,
    #[serde(default)]
    pub multiline: bool,
    #[serde(default)]
    pub options: Option<Vec<StaticOption>>,
    #[serde(default)]
    pub edit: Option<EditTarget>,
    #[serde(default)]
    pub lookup: Option<LookupSource>,
    #[serde(default)]
    pub reference: Option<LookupSource>,
    #[serde(default)]
    pub visible_if: Option<VisibleIf>,
}

/// Manual metadata merged with column facts: `field_type` and `array` are
/// always defined here.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedField {
    pub field: String,
    pub label: Option<String>,
    pub field_type: FieldType,
    pub array: bool,
    pub multiline: bool,
    pub options: Option<Vec<StaticOption>>,
    pub edit: Option<EditTarget>,
    pub lookup: Option<LookupSource>,
    pub reference: Option<LookupSource>,
    pub visible_if: Option<VisibleIf>,
}

impl MergedField {
    /// Display label, falling back to a humanized field name.
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| humanize(&self.field))
    }
}

/// Merge manual field metadata with introspected column facts.
///
/// Returns `None` when no manual descriptor exists: fields without declared
/// metadata are rendered as plain read-only text, which is intentional and
/// not an error.
///
/// The column to introspect is resolved as
/// `(edit.schema ?? schema, edit.table ?? table, edit.column ?? field)`;
/// when the resolved table is unknown no introspection happens and the
/// defaults (`String`, non-array) apply.
pub fn merge_field_metadata(
    field: &str,
    manual: Option<&FieldMeta>,
    schema: Option<&str>,
    table: Option<&str>,
    store: &SchemaMetadata,
) -> Option<MergedField> {
    let manual = manual?;

    let edit = manual.edit.as_ref();
    let resolved_schema = edit
        .and_then(|e| e.schema.as_deref())
        .or(schema)
        .unwrap_or("public");
    let resolved_table = edit.and_then(|e| e.table.as_deref()).or(table);
    let resolved_column = edit.and_then(|e| e.column.as_deref()).unwrap_or(field);

    let descriptor = resolved_table
        .and_then(|table| store.column(resolved_schema, table, resolved_column));

    let field_type = manual
        .field_type
        .or_else(|| descriptor.map(|d| FieldType::from(d.base_type)))
        .unwrap_or(FieldType::String);
    let array = manual
        .array
        .or_else(|| descriptor.map(|d| d.is_array))
        .unwrap_or(false);

    Some(MergedField {
        field: field.to_string(),
        label: manual.label.clone(),
        field_type,
        array,
        multiline: manual.multiline,
        options: manual.options.clone(),
        edit: manual.edit.clone(),
        lookup: manual.lookup.clone(),
        reference: manual.reference.clone(),
        visible_if: manual.visible_if.clone(),
    })
}

/// Manual per-column metadata for a table block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableColumnSpec {
    pub field: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub array: Option<bool>,
    #[serde(default)]
    pub multiline: bool,
    #[serde(default)]
    pub reference: Option<LookupSource>,
}

/// Normalized column descriptor for a table block; `field_type` and `array`
/// are always defined.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumnMeta {
    pub field: String,
    pub label: Option<String>,
    pub field_type: FieldType,
    pub array: bool,
    pub multiline: bool,
    pub reference: Option<LookupSource>,
}

impl TableColumnMeta {
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| humanize(&self.field))
    }
}

/// Merge a table-block column against the block's declared source table,
/// with the same precedence rule as [`merge_field_metadata`].
pub fn merge_table_column(
    schema: &str,
    table: &str,
    spec: &TableColumnSpec,
    store: &SchemaMetadata,
) -> TableColumnMeta {
    let descriptor = store.column(schema, table, &spec.field);
    let field_type = spec
        .field_type
        .or_else(|| descriptor.map(|d| FieldType::from(d.base_type)))
        .unwrap_or(FieldType::String);
    let array = spec
        .array
        .or_else(|| descriptor.map(|d| d.is_array))
        .unwrap_or(false);

    TableColumnMeta {
        field: spec.field.clone(),
        label: spec.label.clone(),
        field_type,
        array,
        multiline: spec.multiline,
        reference: spec.reference.clone(),
    }
}

/// Turn `snake_case` field names into title-cased labels.
pub(crate) fn humanize(field: &str) -> String {
    field
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, SchemaMetadata};

    fn store_with(base_type: BaseType, is_array: bool) -> SchemaMetadata {
        SchemaMetadata::from_columns([ColumnDescriptor {
            schema: "public".to_string(),
            table: "people".to_string(),
            column: "role".to_string(),
            base_type,
            is_array,
            is_nullable: true,
            enum_ref: None,
            references: Vec::new(),
        }])
    }

    #[test]
    fn test_manual_type_wins_over_introspection() {
        let store = store_with(BaseType::Boolean, true);
        let manual = FieldMeta {
            field_type: Some(FieldType::Date),
            array: Some(false),
            ..Default::default()
        };
        let merged =
            merge_field_metadata("role", Some(&manual), Some("public"), Some("people"), &store)
                .unwrap();
        assert_eq!(merged.field_type, FieldType::Date);
        assert!(!merged.array);
    }

    #[test]
    fn test_introspection_fills_missing_type_and_array() {
        let store = store_with(BaseType::Enum, true);
        let manual = FieldMeta::default();
        let merged =
            merge_field_metadata("role", Some(&manual), Some("public"), Some("people"), &store)
                .unwrap();
        assert_eq!(merged.field_type, FieldType::Enum);
        assert!(merged.array);
    }

    #[test]
    fn test_defaults_when_column_unknown() {
        let store = SchemaMetadata::new();
        let manual = FieldMeta::default();
        let merged =
            merge_field_metadata("notes", Some(&manual), Some("public"), Some("people"), &store)
                .unwrap();
        assert_eq!(merged.field_type, FieldType::String);
        assert!(!merged.array);
    }

    #[test]
    fn test_no_manual_metadata_yields_none() {
        let store = store_with(BaseType::String, false);
        assert!(merge_field_metadata("role", None, Some("public"), Some("people"), &store)
            .is_none());
    }

    #[test]
    fn test_edit_target_overrides_introspection_location() {
        // The edit declaration points at a different table/column, so the
        // facts come from there, not from the page defaults.
        let store = SchemaMetadata::from_columns([ColumnDescriptor {
            schema: "public".to_string(),
            table: "details".to_string(),
            column: "full_name".to_string(),
            base_type: BaseType::Number,
            is_array: false,
            is_nullable: false,
            enum_ref: None,
            references: Vec::new(),
        }]);
        let manual = FieldMeta {
            edit: Some(EditTarget {
                schema: None,
                table: Some("details".to_string()),
                column: Some("full_name".to_string()),
                pk: None,
                enum_name: None,
                exceptions: Vec::new(),
            }),
            ..Default::default()
        };
        let merged = merge_field_metadata(
            "display_name",
            Some(&manual),
            Some("public"),
            Some("people"),
            &store,
        )
        .unwrap();
        assert_eq!(merged.field_type, FieldType::Number);
    }

    #[test]
    fn test_merge_table_column_guarantees_type_and_array() {
        let store = SchemaMetadata::new();
        let spec = TableColumnSpec {
            field: "amount".to_string(),
            ..Default::default()
        };
        let merged = merge_table_column("public", "loans", &spec, &store);
        assert_eq!(merged.field_type, FieldType::String);
        assert!(!merged.array);
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize("first_name"), "First Name");
        assert_eq!(humanize("role"), "Role");
        assert_eq!(humanize("amount_issued"), "Amount Issued");
    }

    #[test]
    fn test_lookup_cache_key_defaults_schema() {
        let source = LookupSource {
            schema: None,
            table: "schools".to_string(),
            value_column: "id".to_string(),
            label_column: "name".to_string(),
        };
        assert_eq!(source.cache_key(), "public|schools|id|name");
    }
}
