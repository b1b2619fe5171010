//! Option resolver
//!
//! For the fields of a card, determines and fetches the selectable-value
//! universe for each field that needs one, with one fetch per distinct
//! source and process-wide reuse.
//!
//! Resolution is split into two phases so callers can publish partial
//! results immediately:
//! 1. [`OptionResolver::plan`] returns everything known without a network
//!    round-trip (static option lists, cache hits) plus a [`FetchPlan`] of
//!    what is missing, grouped by enum name / lookup cache key.
//! 2. [`OptionResolver::fetch`] executes the plan; if the [`CancelToken`] is
//!    tripped while fetches are in flight, the results are discarded.
//!
//! The caches are injected, not global: the application constructs one
//! [`OptionCache`] at startup and passes it by reference, which keeps them
//! resettable between test cases. Entries are never invalidated during a
//! session; enum and lookup data is semi-static.

use crate::backend::{DataBackend, JsonRow, SelectSpec, TableRef};
use crate::meta::{LookupSource, MergedField, StaticOption};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A normalized choice-list entry. Value and label are always strings;
/// label defaults to the value when no distinct label exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }

    /// Normalize a raw JSON value to an option string.
    pub fn normalize(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        }
    }

    fn from_static(option: &StaticOption) -> Self {
        match option {
            StaticOption::Text(value) => Self::new(value.clone(), value.clone()),
            StaticOption::Labeled { value, label } => Self::new(value.clone(), label.clone()),
        }
    }
}

/// Process-wide option caches, keyed by enum name and by lookup cache key.
///
/// Append-only during a session; concurrent resolvers racing on the same
/// key merely write the same idempotent entry twice.
#[derive(Default)]
pub struct OptionCache {
    enums: Mutex<HashMap<String, Vec<SelectOption>>>,
    lookups: Mutex<HashMap<String, Vec<SelectOption>>>,
}

impl OptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_enum(&self, enum_name: &str) -> Option<Vec<SelectOption>> {
        self.enums.lock().ok()?.get(enum_name).cloned()
    }

    pub fn store_enum(&self, enum_name: &str, options: Vec<SelectOption>) {
        if let Ok(mut enums) = self.enums.lock() {
            enums.insert(enum_name.to_string(), options);
        }
    }

    pub fn cached_lookup(&self, key: &str) -> Option<Vec<SelectOption>> {
        self.lookups.lock().ok()?.get(key).cloned()
    }

    pub fn store_lookup(&self, key: &str, options: Vec<SelectOption>) {
        if let Ok(mut lookups) = self.lookups.lock() {
            lookups.insert(key.to_string(), options);
        }
    }

    /// Drop everything. Intended for tests.
    pub fn reset(&self) {
        if let Ok(mut enums) = self.enums.lock() {
            enums.clear();
        }
        if let Ok(mut lookups) = self.lookups.lock() {
            lookups.clear();
        }
    }
}

/// Cooperative cancellation flag for an in-flight fetch pass.
///
/// There is no true network abort; a tripped token only means results
/// arriving afterwards are discarded, never applied.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One queued enum fetch, with every field that shares the enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumFetch {
    pub enum_name: String,
    pub fields: Vec<String>,
}

/// One queued lookup fetch, with every field that shares the cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupFetch {
    pub key: String,
    pub source: LookupSource,
    pub fields: Vec<String>,
}

/// The fetches a resolution pass still needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPlan {
    pub enums: Vec<EnumFetch>,
    pub lookups: Vec<LookupFetch>,
}

impl FetchPlan {
    pub fn is_empty(&self) -> bool {
        self.enums.is_empty() && self.lookups.is_empty()
    }
}

/// Resolved options keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSet {
    pub by_field: HashMap<String, Vec<SelectOption>>,
}

impl OptionSet {
    pub fn merge(&mut self, other: OptionSet) {
        self.by_field.extend(other.by_field);
    }

    pub fn get(&self, field: &str) -> Option<&[SelectOption]> {
        self.by_field.get(field).map(Vec::as_slice)
    }
}

pub struct OptionResolver<'a> {
    backend: &'a dyn DataBackend,
    cache: &'a OptionCache,
}

impl<'a> OptionResolver<'a> {
    pub fn new(backend: &'a dyn DataBackend, cache: &'a OptionCache) -> Self {
        Self { backend, cache }
    }

    /// Phase 1: everything known without a fetch, plus the remaining plan.
    ///
    /// Fields carrying both `lookup` and `reference` get no option list at
    /// all; references are display-only.
    pub fn plan(&self, fields: &[MergedField]) -> (OptionSet, FetchPlan) {
        let mut immediate = OptionSet::default();
        let mut enum_queue: Vec<EnumFetch> = Vec::new();
        let mut lookup_queue: Vec<LookupFetch> = Vec::new();

        for field in fields {
            if field.lookup.is_some() && field.reference.is_some() {
                continue;
            }
            if let Some(options) = &field.options {
                let normalized = options.iter().map(SelectOption::from_static).collect();
                immediate.by_field.insert(field.field.clone(), normalized);
                continue;
            }
            if let Some(enum_name) = field.edit.as_ref().and_then(|e| e.enum_name.as_deref()) {
                if let Some(cached) = self.cache.cached_enum(enum_name) {
                    immediate.by_field.insert(field.field.clone(), cached);
                } else if let Some(queued) =
                    enum_queue.iter_mut().find(|q| q.enum_name == enum_name)
                {
                    queued.fields.push(field.field.clone());
                } else {
                    enum_queue.push(EnumFetch {
                        enum_name: enum_name.to_string(),
                        fields: vec![field.field.clone()],
                    });
                }
                continue;
            }
            if let Some(lookup) = &field.lookup {
                let key = lookup.cache_key();
                if let Some(cached) = self.cache.cached_lookup(&key) {
                    immediate.by_field.insert(field.field.clone(), cached);
                } else if let Some(queued) = lookup_queue.iter_mut().find(|q| q.key == key) {
                    queued.fields.push(field.field.clone());
                } else {
                    lookup_queue.push(LookupFetch {
                        key,
                        source: lookup.clone(),
                        fields: vec![field.field.clone()],
                    });
                }
            }
        }

        (
            immediate,
            FetchPlan {
                enums: enum_queue,
                lookups: lookup_queue,
            },
        )
    }

    /// Phase 2: execute the plan. Returns `None` when the token was
    /// cancelled, in which case nothing may be applied to state.
    ///
    /// Failed fetches resolve to an empty option list for the affected
    /// fields and are not written to the caches, so a later pass may retry.
    pub fn fetch(&self, plan: &FetchPlan, cancel: &CancelToken) -> Option<OptionSet> {
        let mut fetched = OptionSet::default();

        for queued in &plan.enums {
            if cancel.is_cancelled() {
                return None;
            }
            let options = match self.fetch_enum_options(&queued.enum_name) {
                Ok(options) => {
                    self.cache.store_enum(&queued.enum_name, options.clone());
                    options
                }
                Err(e) => {
                    log::warn!("enum option fetch failed for {}: {e}", queued.enum_name);
                    Vec::new()
                }
            };
            for field in &queued.fields {
                fetched.by_field.insert(field.clone(), options.clone());
            }
        }

        for queued in &plan.lookups {
            if cancel.is_cancelled() {
                return None;
            }
            let options = match self.fetch_lookup_options(&queued.source) {
                Ok(options) => {
                    self.cache.store_lookup(&queued.key, options.clone());
                    options
                }
                Err(e) => {
                    log::warn!("lookup option fetch failed for {}: {e}", queued.key);
                    Vec::new()
                }
            };
            for field in &queued.fields {
                fetched.by_field.insert(field.clone(), options.clone());
            }
        }

        if cancel.is_cancelled() {
            return None;
        }
        Some(fetched)
    }

    /// Convenience: plan, fetch, and merge. Returns `None` when cancelled.
    pub fn resolve(&self, fields: &[MergedField], cancel: &CancelToken) -> Option<OptionSet> {
        let (mut options, plan) = self.plan(fields);
        if !plan.is_empty() {
            options.merge(self.fetch(&plan, cancel)?);
        }
        Some(options)
    }

    fn fetch_enum_options(
        &self,
        enum_name: &str,
    ) -> Result<Vec<SelectOption>, crate::backend::BackendError> {
        let mut args = JsonRow::new();
        args.insert(
            "enum_type".to_string(),
            Value::String(enum_name.to_string()),
        );
        let result = self.backend.rpc("enum_values", &args)?;
        let rows = match result {
            Value::Array(rows) => rows,
            _ => Vec::new(),
        };
        Ok(rows.iter().filter_map(normalize_enum_row).collect())
    }

    fn fetch_lookup_options(
        &self,
        source: &LookupSource,
    ) -> Result<Vec<SelectOption>, crate::backend::BackendError> {
        let spec = SelectSpec::from(TableRef::new(source.schema_or_public(), &source.table))
            .columns([source.value_column.clone(), source.label_column.clone()])
            .order_asc(source.label_column.clone());
        let rows = self.backend.select(&spec)?;
        Ok(rows
            .iter()
            .filter_map(|row| normalize_lookup_row(row, source))
            .collect())
    }
}

/// Enum rows arrive shaped `{value|name, label?}`.
fn normalize_enum_row(row: &Value) -> Option<SelectOption> {
    let object = row.as_object()?;
    let value = object
        .get("value")
        .or_else(|| object.get("name"))
        .map(SelectOption::normalize)?;
    if value.is_empty() {
        return None;
    }
    let label = object
        .get("label")
        .map(SelectOption::normalize)
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| value.clone());
    Some(SelectOption { value, label })
}

/// Rows whose value is empty are dropped; label defaults to the value.
fn normalize_lookup_row(row: &JsonRow, source: &LookupSource) -> Option<SelectOption> {
    let value = row.get(&source.value_column).map(SelectOption::normalize)?;
    if value.is_empty() {
        return None;
    }
    let label = row
        .get(&source.label_column)
        .map(SelectOption::normalize)
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| value.clone());
    Some(SelectOption { value, label })
}
