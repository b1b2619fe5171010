//! Test configuration
//!
//! Shared fixtures for unit tests: a scripted [`MockBackend`] that records
//! every call, plus a small sample schema and detail spec resembling the
//! school-network data model the engine is used with.

use crate::backend::{BackendError, DataBackend, Filter, JsonRow, SelectSpec, TableRef};
use crate::blocks::{
    Block, CardBlock, DetailSpec, MapBlock, TabSpec, TableAction, TableBlock, TableSource,
};
use crate::meta::{EditTarget, FieldMeta, LookupSource, TableColumnSpec};
use crate::options::SelectOption;
use crate::schema::{BaseType, ColumnDescriptor, SchemaMetadata};
use crate::writer::WriteTarget;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Scripted in-memory backend.
///
/// Selects are answered from per-table row scripts with filters, ordering,
/// projection, and range applied; updates and upserts pop from FIFO result
/// queues (defaulting to "matched one row"). Every call is recorded so
/// tests can assert on exactly what was issued.
#[derive(Default)]
pub(crate) struct MockBackend {
    select_rows: Mutex<HashMap<String, Vec<JsonRow>>>,
    failing_selects: Mutex<HashSet<String>>,
    select_log: Mutex<Vec<SelectSpec>>,

    rpc_results: Mutex<HashMap<String, Value>>,
    failing_rpcs: Mutex<HashSet<String>>,
    rpc_log: Mutex<Vec<(String, JsonRow)>>,

    update_queue: Mutex<VecDeque<Vec<JsonRow>>>,
    update_log: Mutex<Vec<(String, JsonRow, JsonRow)>>,
    fail_updates: AtomicBool,

    upsert_queue: Mutex<VecDeque<Vec<JsonRow>>>,
    upsert_log: Mutex<Vec<(String, JsonRow, String)>>,
    fail_upserts: AtomicBool,

    insert_log: Mutex<Vec<(String, JsonRow)>>,
    fail_inserts: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_select(&self, table: &str, rows: Vec<JsonRow>) {
        self.select_rows
            .lock()
            .unwrap()
            .insert(table.to_string(), rows);
    }

    pub fn fail_select(&self, table: &str) {
        self.failing_selects
            .lock()
            .unwrap()
            .insert(table.to_string());
    }

    pub fn select_calls(&self, table: &str) -> usize {
        self.select_log
            .lock()
            .unwrap()
            .iter()
            .filter(|spec| spec.table.to_string() == table)
            .count()
    }

    pub fn last_select_spec(&self, table: &str) -> Option<SelectSpec> {
        self.select_log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|spec| spec.table.to_string() == table)
            .cloned()
    }

    pub fn script_rpc(&self, procedure: &str, result: Value) {
        self.rpc_results
            .lock()
            .unwrap()
            .insert(procedure.to_string(), result);
    }

    pub fn fail_rpc(&self, procedure: &str) {
        self.failing_rpcs
            .lock()
            .unwrap()
            .insert(procedure.to_string());
    }

    pub fn rpc_calls(&self, procedure: &str) -> usize {
        self.rpc_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == procedure)
            .count()
    }

    pub fn script_update(&self, rows: Vec<JsonRow>) {
        self.update_queue.lock().unwrap().push_back(rows);
    }

    pub fn fail_update(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }

    pub fn last_update(&self) -> Option<(String, JsonRow, JsonRow)> {
        self.update_log.lock().unwrap().last().cloned()
    }

    pub fn script_upsert(&self, rows: Vec<JsonRow>) {
        self.upsert_queue.lock().unwrap().push_back(rows);
    }

    pub fn last_upsert(&self) -> Option<(String, JsonRow, String)> {
        self.upsert_log.lock().unwrap().last().cloned()
    }

    pub fn inserts(&self) -> Vec<(String, JsonRow)> {
        self.insert_log.lock().unwrap().clone()
    }
}

fn matches_filter(row: &JsonRow, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, value) => row.get(column).unwrap_or(&Value::Null) == value,
        Filter::In(column, values) => {
            values.contains(row.get(column).unwrap_or(&Value::Null))
        }
    }
}

impl DataBackend for MockBackend {
    fn select(&self, spec: &SelectSpec) -> Result<Vec<JsonRow>, BackendError> {
        self.select_log.lock().unwrap().push(spec.clone());
        let key = spec.table.to_string();
        if self.failing_selects.lock().unwrap().contains(&key) {
            return Err(BackendError::Other("scripted select failure".to_string()));
        }
        let mut rows = self
            .select_rows
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default();
        rows.retain(|row| spec.filters.iter().all(|f| matches_filter(row, f)));
        for column in spec.order_by.iter().rev() {
            rows.sort_by_key(|row| {
                row.get(column).map(SelectOption::normalize).unwrap_or_default()
            });
        }
        if let Some((from, to)) = spec.range {
            let from = from as usize;
            let len = (to as usize).saturating_sub(from) + 1;
            rows = rows.into_iter().skip(from).take(len).collect();
        }
        if !spec.columns.is_empty() {
            rows = rows
                .into_iter()
                .map(|row| {
                    spec.columns
                        .iter()
                        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                        .collect()
                })
                .collect();
        }
        Ok(rows)
    }

    fn update(
        &self,
        table: &TableRef,
        payload: &JsonRow,
        matcher: &JsonRow,
    ) -> Result<Vec<JsonRow>, BackendError> {
        self.update_log
            .lock()
            .unwrap()
            .push((table.to_string(), payload.clone(), matcher.clone()));
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(BackendError::Other("scripted update failure".to_string()));
        }
        if let Some(rows) = self.update_queue.lock().unwrap().pop_front() {
            return Ok(rows);
        }
        // Default: the match succeeded and returned one row.
        let mut row = matcher.clone();
        row.extend(payload.clone());
        Ok(vec![row])
    }

    fn upsert(
        &self,
        table: &TableRef,
        payload: &JsonRow,
        on_conflict: &str,
    ) -> Result<Vec<JsonRow>, BackendError> {
        self.upsert_log.lock().unwrap().push((
            table.to_string(),
            payload.clone(),
            on_conflict.to_string(),
        ));
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(BackendError::Other("scripted upsert failure".to_string()));
        }
        if let Some(rows) = self.upsert_queue.lock().unwrap().pop_front() {
            return Ok(rows);
        }
        Ok(vec![payload.clone()])
    }

    fn insert(&self, table: &TableRef, payload: &JsonRow) -> Result<(), BackendError> {
        self.insert_log
            .lock()
            .unwrap()
            .push((table.to_string(), payload.clone()));
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(BackendError::Other("scripted insert failure".to_string()));
        }
        Ok(())
    }

    fn rpc(&self, procedure: &str, args: &JsonRow) -> Result<Value, BackendError> {
        self.rpc_log
            .lock()
            .unwrap()
            .push((procedure.to_string(), args.clone()));
        if self.failing_rpcs.lock().unwrap().contains(procedure) {
            return Err(BackendError::Other("scripted rpc failure".to_string()));
        }
        Ok(self
            .rpc_results
            .lock()
            .unwrap()
            .get(procedure)
            .cloned()
            .unwrap_or(Value::Array(Vec::new())))
    }
}

fn column(
    table: &str,
    name: &str,
    base_type: BaseType,
    is_array: bool,
) -> ColumnDescriptor {
    ColumnDescriptor {
        schema: "public".to_string(),
        table: table.to_string(),
        column: name.to_string(),
        base_type,
        is_array,
        is_nullable: true,
        enum_ref: None,
        references: Vec::new(),
    }
}

/// Sample introspection facts for the people/details/email tables.
pub(crate) fn sample_schema() -> SchemaMetadata {
    SchemaMetadata::from_columns([
        column("people", "id", BaseType::String, false),
        column("people", "first_name", BaseType::String, false),
        column("people", "role", BaseType::String, false),
        column("people", "certifications", BaseType::Enum, true),
        column("people", "active", BaseType::Boolean, false),
        column("people", "school_id", BaseType::String, false),
        column("details", "person_id", BaseType::String, false),
        column("details", "bio", BaseType::String, false),
        column("email_addresses", "id", BaseType::String, false),
        column("email_addresses", "person_id", BaseType::String, false),
        column("email_addresses", "email", BaseType::String, false),
    ])
}

/// A detail spec for a person: one editable card writing to `people`, a
/// bio card writing to the one-to-one `details` child table, an email
/// table block, and a map block.
pub(crate) fn sample_spec() -> DetailSpec {
    let mut fields = HashMap::new();
    fields.insert(
        "first_name".to_string(),
        FieldMeta {
            label: Some("First Name".to_string()),
            ..Default::default()
        },
    );
    fields.insert(
        "role".to_string(),
        FieldMeta {
            lookup: Some(LookupSource {
                schema: None,
                table: "roles".to_string(),
                value_column: "name".to_string(),
                label_column: "name".to_string(),
            }),
            ..Default::default()
        },
    );
    fields.insert("certifications".to_string(), FieldMeta::default());
    fields.insert("active".to_string(), FieldMeta::default());
    fields.insert(
        "school_id".to_string(),
        FieldMeta {
            label: Some("School".to_string()),
            reference: Some(LookupSource {
                schema: None,
                table: "schools".to_string(),
                value_column: "id".to_string(),
                label_column: "name".to_string(),
            }),
            ..Default::default()
        },
    );
    fields.insert(
        "bio".to_string(),
        FieldMeta {
            multiline: true,
            edit: Some(EditTarget {
                schema: None,
                table: Some("details".to_string()),
                column: None,
                pk: Some("person_id".to_string()),
                enum_name: None,
                exceptions: Vec::new(),
            }),
            ..Default::default()
        },
    );

    DetailSpec {
        entity: "people".to_string(),
        schema: Some("public".to_string()),
        table: Some("people".to_string()),
        default_tab: None,
        tabs: vec![TabSpec {
            id: "overview".to_string(),
            label: "Overview".to_string(),
            write_to: Some(WriteTarget::table("people")),
            exceptions: Vec::new(),
            blocks: vec![
                Block::Card(CardBlock {
                    id: "basics".to_string(),
                    title: "Basics".to_string(),
                    fields: vec![
                        "first_name".to_string(),
                        "role".to_string(),
                        "certifications".to_string(),
                        "active".to_string(),
                        "school_id".to_string(),
                    ],
                    editable: true,
                    edit_source: None,
                }),
                Block::Card(CardBlock {
                    id: "bio".to_string(),
                    title: "Bio".to_string(),
                    fields: vec!["bio".to_string()],
                    editable: true,
                    edit_source: None,
                }),
                Block::Table(TableBlock {
                    id: "emails".to_string(),
                    title: "Email Addresses".to_string(),
                    source: TableSource {
                        schema: None,
                        table: "email_addresses".to_string(),
                        fk_column: "person_id".to_string(),
                    },
                    columns: vec![TableColumnSpec {
                        field: "email".to_string(),
                        ..Default::default()
                    }],
                    row_actions: Vec::new(),
                    table_actions: vec![TableAction::CreateEmail {
                        label: "Add email".to_string(),
                        email_column: "email".to_string(),
                    }],
                }),
                Block::Map(MapBlock {
                    id: "home".to_string(),
                    title: "Home".to_string(),
                    lat_field: "lat".to_string(),
                    lng_field: "lng".to_string(),
                    label_field: "first_name".to_string(),
                }),
            ],
        }],
        fields,
    }
}
