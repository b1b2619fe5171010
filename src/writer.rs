//! Write router
//!
//! Turns a flat `{field: value}` edit set into one or more persisted
//! updates, each scoped to its correct backing table. Handles field-to-column
//! renames, lookup-based value translation ("exception" rules), and creation
//! of one-to-one child rows that do not exist yet.

use crate::backend::{BackendError, DataBackend, JsonRow, SelectSpec, TableRef};
use crate::meta::{EditTarget, ExceptionRule, MergedField};
use crate::options::SelectOption;
use crate::schema::SchemaMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

fn default_schema() -> String {
    "public".to_string()
}

fn default_pk() -> String {
    "id".to_string()
}

/// The `(schema, table, primary key)` tuple a group of fields is persisted
/// to. Declared targets may omit `schema` (`public`) and `pk` (`id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTarget {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
    #[serde(default = "default_pk")]
    pub pk: String,
}

impl WriteTarget {
    pub fn new(schema: Option<&str>, table: &str, pk: Option<&str>) -> Self {
        Self {
            schema: schema.unwrap_or("public").to_string(),
            table: table.to_string(),
            pk: pk.unwrap_or("id").to_string(),
        }
    }

    pub fn table(table: &str) -> Self {
        Self::new(None, table, None)
    }

    /// Target declared by a field's own `edit` metadata, if it names a
    /// table.
    pub fn from_edit(edit: &EditTarget) -> Option<Self> {
        edit.table
            .as_deref()
            .map(|table| Self::new(edit.schema.as_deref(), table, edit.pk.as_deref()))
    }

    pub fn group_key(&self) -> String {
        format!("{}|{}|{}", self.schema, self.table, self.pk)
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(self.schema.clone(), self.table.clone())
    }
}

/// One per-table write batch produced by [`group_field_updates`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteGroup {
    pub target: WriteTarget,
    pub payload: JsonRow,
    pub exceptions: Vec<ExceptionRule>,
}

/// Save error type
#[derive(Debug)]
pub enum SaveError {
    /// The update-by-match failed.
    Update { table: String, source: BackendError },
    /// The create-if-missing upsert failed.
    Upsert { table: String, source: BackendError },
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::Update { table, source } => {
                write!(f, "update of {table} failed: {source}")
            }
            SaveError::Upsert { table, source } => {
                write!(f, "upsert into {table} failed: {source}")
            }
        }
    }
}

impl std::error::Error for SaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SaveError::Update { source, .. } | SaveError::Upsert { source, .. } => Some(source),
        }
    }
}

/// What [`save_card_values`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Update matched at least one row.
    Updated(usize),
    /// Update matched nothing and a child row was created instead.
    Inserted,
    /// Nothing to write after column filtering.
    Skipped,
}

/// Remove empty-string elements from array values in place.
///
/// Applied before grouping so enum-array columns never see blank entries.
pub fn sanitize_values(values: &mut JsonRow) {
    for value in values.values_mut() {
        if let Value::Array(items) = value {
            items.retain(|item| !matches!(item, Value::String(s) if s.is_empty()));
        }
    }
}

/// Group edited fields by their write target.
///
/// Fields whose merged metadata declares an `edit` table write there;
/// fields without one fall back to `default_target` (the card's effective
/// write target). Fields with neither are silently excluded. Groups keep
/// the insertion order of their first-seen field.
///
/// A field writing a differently-named column gets an auto-appended rename
/// exception so lookup translation still applies downstream. Tab-level
/// exceptions are appended to every group whose payload contains the
/// exception's field, and each group's exception list is deduplicated by
/// serialized equality.
pub fn group_field_updates<F>(
    fields: &[String],
    values: &JsonRow,
    meta: F,
    default_target: Option<&WriteTarget>,
    tab_exceptions: &[ExceptionRule],
) -> Vec<WriteGroup>
where
    F: Fn(&str) -> Option<MergedField>,
{
    let mut groups: Vec<WriteGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for field in fields {
        let Some(value) = values.get(field) else {
            continue;
        };
        let merged = meta(field);
        let edit = merged.as_ref().and_then(|m| m.edit.clone());
        let target = edit
            .as_ref()
            .and_then(WriteTarget::from_edit)
            .or_else(|| default_target.cloned());
        let Some(target) = target else {
            continue;
        };

        let key = target.group_key();
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(WriteGroup {
                target,
                payload: JsonRow::new(),
                exceptions: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];

        let column = edit
            .as_ref()
            .and_then(|e| e.column.clone())
            .unwrap_or_else(|| field.clone());
        group.payload.insert(column.clone(), value.clone());
        if column != *field {
            group.exceptions.push(ExceptionRule {
                field: field.clone(),
                maps_to_field: Some(column),
                via_lookup: None,
            });
        }
        if let Some(edit) = &edit {
            group.exceptions.extend(edit.exceptions.iter().cloned());
        }
    }

    for group in &mut groups {
        for exception in tab_exceptions {
            if group.payload.contains_key(&exception.field) {
                group.exceptions.push(exception.clone());
            }
        }
        dedup_exceptions(&mut group.exceptions);
    }

    groups
}

fn dedup_exceptions(exceptions: &mut Vec<ExceptionRule>) {
    let mut seen = HashSet::new();
    exceptions.retain(|rule| {
        serde_json::to_string(rule)
            .map(|serialized| seen.insert(serialized))
            .unwrap_or(true)
    });
}

/// Apply exception rules to a payload, returning the transformed payload.
///
/// Lookup translation maps human labels back to keys via the declared
/// lookup table; labels with no match are dropped. If the translation
/// query itself fails the raw value passes through unchanged - a
/// best-effort fallback, logged at warn.
pub fn apply_exceptions(
    backend: &dyn DataBackend,
    payload: &JsonRow,
    exceptions: &[ExceptionRule],
) -> JsonRow {
    let mut out = payload.clone();

    for rule in exceptions {
        let Some(raw) = out.get(&rule.field).cloned() else {
            continue;
        };

        let mut value = raw.clone();
        if let Some(lookup) = &rule.via_lookup {
            if !raw.is_null() {
                let was_array = raw.is_array();
                let labels = labels_of(&raw);
                let spec =
                    SelectSpec::from(TableRef::new(lookup.schema_or_public(), &lookup.table))
                        .columns([lookup.key_column.clone(), lookup.label_column.clone()])
                        .is_in(
                            &lookup.label_column,
                            labels.iter().cloned().map(Value::String).collect(),
                        );
                match backend.select(&spec) {
                    Ok(rows) => {
                        let mut by_label: HashMap<String, String> = HashMap::new();
                        for row in &rows {
                            let label = row
                                .get(&lookup.label_column)
                                .map(SelectOption::normalize)
                                .unwrap_or_default();
                            let key = row
                                .get(&lookup.key_column)
                                .map(SelectOption::normalize)
                                .unwrap_or_default();
                            if !label.is_empty() && !key.is_empty() {
                                by_label.insert(label, key);
                            }
                        }
                        let keys: Vec<String> = labels
                            .iter()
                            .filter_map(|label| by_label.get(label).cloned())
                            .collect();
                        value = if was_array || keys.len() != 1 {
                            Value::Array(keys.into_iter().map(Value::String).collect())
                        } else {
                            Value::String(keys.into_iter().next().unwrap_or_default())
                        };
                    }
                    Err(e) => {
                        log::warn!(
                            "lookup translation via {} failed for field {}; writing raw labels: {e}",
                            lookup.table,
                            rule.field
                        );
                    }
                }
            }
        }

        match &rule.maps_to_field {
            Some(target) if *target != rule.field => {
                out.remove(&rule.field);
                out.insert(target.clone(), value);
            }
            _ => {
                out.insert(rule.field.clone(), value);
            }
        }
    }

    out
}

/// Normalize a raw value to the label list used for lookup translation:
/// arrays are used as-is, scalars are comma-split and trimmed.
fn labels_of(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(SelectOption::normalize)
            .filter(|label| !label.is_empty())
            .collect(),
        other => SelectOption::normalize(other)
            .split(',')
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect(),
    }
}

/// Persist one write group's values for one entity.
///
/// Applies exceptions, strips payload keys the target table does not have,
/// updates by `{pk: entity_id}`, and - for child tables keyed by a
/// non-`id` pk - upserts a fresh row when the update matched nothing.
///
/// # Errors
///
/// Returns `SaveError` if the update or the fallback upsert fails.
pub fn save_card_values(
    backend: &dyn DataBackend,
    store: &SchemaMetadata,
    target: &WriteTarget,
    entity_id: &str,
    values: &JsonRow,
    exceptions: &[ExceptionRule],
) -> Result<SaveOutcome, SaveError> {
    let transformed = apply_exceptions(backend, values, exceptions);
    let filtered: JsonRow = transformed
        .into_iter()
        .filter(|(column, _)| store.has_column(&target.schema, &target.table, column))
        .collect();

    if filtered.is_empty() {
        log::debug!("nothing to write to {} after column filtering", target.table);
        return Ok(SaveOutcome::Skipped);
    }

    let mut matcher = JsonRow::new();
    matcher.insert(target.pk.clone(), Value::String(entity_id.to_string()));

    let affected = backend
        .update(&target.table_ref(), &filtered, &matcher)
        .map_err(|source| SaveError::Update {
            table: target.table.clone(),
            source,
        })?;

    if affected.is_empty() && target.pk != "id" {
        // Zero rows on a child table keyed by the parent id means the child
        // row does not exist yet.
        let mut payload = filtered;
        payload.insert(target.pk.clone(), Value::String(entity_id.to_string()));
        backend
            .upsert(&target.table_ref(), &payload, &target.pk)
            .map_err(|source| SaveError::Upsert {
                table: target.table.clone(),
                source,
            })?;
        return Ok(SaveOutcome::Inserted);
    }

    Ok(SaveOutcome::Updated(affected.len()))
}
