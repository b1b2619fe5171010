//! Detail view state machine
//!
//! Owns everything one rendered detail page needs: the entity snapshot,
//! per-card view/edit state, fetched child-table rows, resolved option
//! lists, and reference display labels. Card saves route through the write
//! grouping in [`crate::writer`] and finish by invalidating the page cache
//! for the entity, so stale detail rows are never served after a write.

use crate::backend::{BackendError, DataBackend, JsonRow, SelectSpec, TableRef};
use crate::blocks::{Block, DetailSpec, TableAction};
use crate::cache::QueryCache;
use crate::meta::{merge_field_metadata, merge_table_column, MergedField};
use crate::options::{CancelToken, OptionCache, OptionResolver, OptionSet, SelectOption};
use crate::render::{
    build_field, value_as_f64, RenderedBlock, RenderedCard, RenderedMap, RenderedTab,
    RenderedTable,
};
use crate::schema::SchemaMetadata;
use crate::writer::{group_field_updates, sanitize_values, save_card_values, SaveError, SaveOutcome};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Child-table row cap. Larger sets are expected to be reached through a
/// dedicated list page, not a detail block.
pub const TABLE_ROW_CAP: u64 = 200;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap()
});

/// View/edit mode of one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardMode {
    Viewing,
    Editing,
}

/// Per-card state: the mode plus the working value set. While viewing, the
/// values mirror the entity snapshot; while editing they accumulate changes
/// that are only persisted on save.
#[derive(Debug, Clone, PartialEq)]
pub struct CardState {
    pub mode: CardMode,
    pub values: JsonRow,
}

/// Detail error type
#[derive(Debug)]
pub enum DetailError {
    /// The operation needs a loaded entity.
    MissingEntityId,
    /// No card with the given id exists in the spec.
    UnknownCard(String),
    /// No table block with the given id exists in the spec.
    UnknownTable(String),
    /// A value was set or a save attempted outside edit mode.
    NotEditing(String),
    /// The card is declared read-only.
    NotEditable(String),
    /// The card has no effective write target anywhere.
    NoWriteTarget(String),
    /// The submitted email failed validation.
    InvalidEmail(String),
    /// The table block does not declare the requested action.
    UnsupportedAction(String),
    /// Backend failure outside the save path.
    Backend(BackendError),
    /// Save failure from the write router.
    Save(SaveError),
}

impl fmt::Display for DetailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailError::MissingEntityId => write!(f, "no entity is loaded"),
            DetailError::UnknownCard(id) => write!(f, "unknown card: {id}"),
            DetailError::UnknownTable(id) => write!(f, "unknown table block: {id}"),
            DetailError::NotEditing(id) => write!(f, "card {id} is not in edit mode"),
            DetailError::NotEditable(id) => write!(f, "card {id} is read-only"),
            DetailError::NoWriteTarget(id) => write!(f, "card {id} has no write target"),
            DetailError::InvalidEmail(raw) => write!(f, "invalid email address: {raw}"),
            DetailError::UnsupportedAction(id) => {
                write!(f, "table block {id} does not support this action")
            }
            DetailError::Backend(e) => write!(f, "backend error: {e}"),
            DetailError::Save(e) => write!(f, "save failed: {e}"),
        }
    }
}

impl std::error::Error for DetailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DetailError::Backend(e) => Some(e),
            DetailError::Save(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for DetailError {
    fn from(err: BackendError) -> Self {
        DetailError::Backend(err)
    }
}

impl From<SaveError> for DetailError {
    fn from(err: SaveError) -> Self {
        DetailError::Save(err)
    }
}

/// One detail page's live state.
pub struct DetailView<'a> {
    spec: DetailSpec,
    backend: &'a dyn DataBackend,
    store: &'a SchemaMetadata,
    option_cache: &'a OptionCache,
    query_cache: &'a dyn QueryCache,
    entity_id: Option<String>,
    entity: JsonRow,
    active_tab: Option<String>,
    cards: HashMap<String, CardState>,
    tables: HashMap<String, Vec<JsonRow>>,
    options: OptionSet,
    reference_labels: HashMap<String, Vec<String>>,
}

impl<'a> DetailView<'a> {
    pub fn new(
        spec: DetailSpec,
        backend: &'a dyn DataBackend,
        store: &'a SchemaMetadata,
        option_cache: &'a OptionCache,
        query_cache: &'a dyn QueryCache,
    ) -> Self {
        let active_tab = spec.initial_tab().map(str::to_string);
        Self {
            spec,
            backend,
            store,
            option_cache,
            query_cache,
            entity_id: None,
            entity: JsonRow::new(),
            active_tab,
            cards: HashMap::new(),
            tables: HashMap::new(),
            options: OptionSet::default(),
            reference_labels: HashMap::new(),
        }
    }

    pub fn spec(&self) -> &DetailSpec {
        &self.spec
    }

    pub fn entity(&self) -> &JsonRow {
        &self.entity
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn card_state(&self, card_id: &str) -> Option<&CardState> {
        self.cards.get(card_id)
    }

    pub fn table_rows(&self, block_id: &str) -> &[JsonRow] {
        self.tables.get(block_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    /// Load (or reload) the entity this page shows.
    ///
    /// Every card resets to viewing with a fresh snapshot; when the entity
    /// id changed, previously fetched child-table rows and reference labels
    /// are dropped as well.
    pub fn set_entity(&mut self, entity_id: &str, row: JsonRow) {
        if self.entity_id.as_deref() != Some(entity_id) {
            self.tables.clear();
            self.reference_labels.clear();
        }
        self.entity_id = Some(entity_id.to_string());
        self.entity = row;
        self.cards.clear();
        self.sync_card_snapshots();
    }

    /// Re-snapshot every card from the entity, resetting all to viewing.
    fn sync_card_snapshots(&mut self) {
        let mut cards = HashMap::new();
        for tab in &self.spec.tabs {
            for block in &tab.blocks {
                if let Block::Card(card) = block {
                    let values: JsonRow = card
                        .fields
                        .iter()
                        .filter_map(|f| self.entity.get(f).map(|v| (f.clone(), v.clone())))
                        .collect();
                    cards.insert(
                        card.id.clone(),
                        CardState {
                            mode: CardMode::Viewing,
                            values,
                        },
                    );
                }
            }
        }
        self.cards = cards;
    }

    /// The tab currently shown, falling back to the first declared tab when
    /// the stored id no longer exists in the spec.
    pub fn active_tab(&self) -> Option<&str> {
        self.active_tab
            .as_deref()
            .filter(|id| self.spec.tab(id).is_some())
            .or_else(|| self.spec.initial_tab())
    }

    /// Switch tabs. Unknown ids are ignored and the current tab kept.
    pub fn select_tab(&mut self, tab_id: &str) -> bool {
        if self.spec.tab(tab_id).is_some() {
            self.active_tab = Some(tab_id.to_string());
            true
        } else {
            log::debug!("ignoring selection of unknown tab {tab_id}");
            false
        }
    }

    /// Merged metadata for one field, against the page's default location.
    pub fn merged(&self, field: &str) -> Option<MergedField> {
        merge_field_metadata(
            field,
            self.spec.fields.get(field),
            self.spec.schema.as_deref(),
            self.spec.table.as_deref(),
            self.store,
        )
    }

    /// Enter edit mode on a card.
    ///
    /// # Errors
    ///
    /// Returns `DetailError` when the card is unknown or declared read-only.
    pub fn begin_edit(&mut self, card_id: &str) -> Result<(), DetailError> {
        let (_, card) = self
            .spec
            .card(card_id)
            .ok_or_else(|| DetailError::UnknownCard(card_id.to_string()))?;
        if !card.editable {
            return Err(DetailError::NotEditable(card_id.to_string()));
        }
        if let Some(state) = self.cards.get_mut(card_id) {
            state.mode = CardMode::Editing;
        }
        Ok(())
    }

    /// Stage one field value on a card in edit mode.
    ///
    /// # Errors
    ///
    /// Returns `DetailError` when the card is unknown or not being edited.
    pub fn set_value(
        &mut self,
        card_id: &str,
        field: &str,
        value: Value,
    ) -> Result<(), DetailError> {
        let state = self
            .cards
            .get_mut(card_id)
            .ok_or_else(|| DetailError::UnknownCard(card_id.to_string()))?;
        if state.mode != CardMode::Editing {
            return Err(DetailError::NotEditing(card_id.to_string()));
        }
        state.values.insert(field.to_string(), value);
        Ok(())
    }

    /// Leave edit mode, discarding staged values.
    pub fn cancel_edit(&mut self, card_id: &str) {
        let snapshot: Option<JsonRow> = self.spec.card(card_id).map(|(_, card)| {
            card.fields
                .iter()
                .filter_map(|f| self.entity.get(f).map(|v| (f.clone(), v.clone())))
                .collect()
        });
        if let (Some(state), Some(values)) = (self.cards.get_mut(card_id), snapshot) {
            state.mode = CardMode::Viewing;
            state.values = values;
        }
    }

    /// Persist a card's staged values.
    ///
    /// Values are sanitized, grouped per write target (the card's effective
    /// target catching fields without their own), and each group saved in
    /// declaration order; the first failure stops the run. Regardless of
    /// outcome, cached detail rows for this entity are invalidated and the
    /// card returns to viewing, so a failed save never leaves the page in a
    /// half-edited state showing stale data.
    ///
    /// # Errors
    ///
    /// Returns `DetailError` for state-machine violations or the first
    /// failed write.
    pub fn save_card(&mut self, card_id: &str) -> Result<Vec<SaveOutcome>, DetailError> {
        let entity_id = self
            .entity_id
            .clone()
            .ok_or(DetailError::MissingEntityId)?;
        let (fields, tab_exceptions, default_target) = {
            let (tab, card) = self
                .spec
                .card(card_id)
                .ok_or_else(|| DetailError::UnknownCard(card_id.to_string()))?;
            if !card.editable {
                return Err(DetailError::NotEditable(card_id.to_string()));
            }
            (
                card.fields.clone(),
                tab.exceptions.clone(),
                tab.write_target_for(card).cloned(),
            )
        };
        let state = self
            .cards
            .get(card_id)
            .ok_or_else(|| DetailError::UnknownCard(card_id.to_string()))?;
        if state.mode != CardMode::Editing {
            return Err(DetailError::NotEditing(card_id.to_string()));
        }

        let mut values = state.values.clone();
        sanitize_values(&mut values);

        let groups = group_field_updates(
            &fields,
            &values,
            |field| self.merged(field),
            default_target.as_ref(),
            &tab_exceptions,
        );
        if groups.is_empty() && default_target.is_none() {
            return Err(DetailError::NoWriteTarget(card_id.to_string()));
        }

        let mut outcomes = Vec::with_capacity(groups.len());
        let mut first_error: Option<SaveError> = None;
        for group in &groups {
            match save_card_values(
                self.backend,
                self.store,
                &group.target,
                &entity_id,
                &group.payload,
                &group.exceptions,
            ) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    first_error = Some(e);
                    break;
                }
            }
        }

        // The write may have landed even on the error path, so cached
        // detail rows for this entity can no longer be trusted.
        self.query_cache.invalidate_matching(&|key| {
            key.starts_with("detail/") && key.contains(entity_id.as_str())
        });

        match first_error {
            None => {
                self.entity.extend(values);
                self.sync_card_snapshots();
                Ok(outcomes)
            }
            Some(e) => {
                self.cancel_edit(card_id);
                Err(e.into())
            }
        }
    }

    /// Resolve option lists for a card's fields, publishing cache hits and
    /// static lists immediately and merging fetched results afterwards
    /// unless the token was cancelled.
    ///
    /// # Errors
    ///
    /// Returns `DetailError` when the card is unknown. Individual fetch
    /// failures degrade to empty option lists instead of failing the call.
    pub fn load_card_options(
        &mut self,
        card_id: &str,
        cancel: &CancelToken,
    ) -> Result<(), DetailError> {
        let fields: Vec<String> = self
            .spec
            .card(card_id)
            .map(|(_, card)| card.fields.clone())
            .ok_or_else(|| DetailError::UnknownCard(card_id.to_string()))?;
        let merged: Vec<MergedField> =
            fields.iter().filter_map(|f| self.merged(f)).collect();

        let resolver = OptionResolver::new(self.backend, self.option_cache);
        let (immediate, plan) = resolver.plan(&merged);
        self.options.merge(immediate);
        if !plan.is_empty() {
            if let Some(fetched) = resolver.fetch(&plan, cancel) {
                self.options.merge(fetched);
            }
        }
        Ok(())
    }

    /// Resolve display labels for every reference field that has a value on
    /// the current entity. Ids with no matching row, and all ids when the
    /// label query fails, fall back to the raw id so the page still shows
    /// something identifying.
    pub fn resolve_reference_labels(&mut self) {
        let mut resolved: HashMap<String, Vec<String>> = HashMap::new();
        for field in self.spec.fields.keys() {
            let Some(merged) = self.merged(field) else {
                continue;
            };
            let Some(reference) = merged.reference else {
                continue;
            };
            let ids = match self.entity.get(field) {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(SelectOption::normalize)
                    .filter(|id| !id.is_empty())
                    .collect::<Vec<_>>(),
                Some(Value::Null) | None => continue,
                Some(other) => {
                    let id = SelectOption::normalize(other);
                    if id.is_empty() {
                        continue;
                    }
                    vec![id]
                }
            };

            let spec = SelectSpec::from(TableRef::new(
                reference.schema_or_public(),
                &reference.table,
            ))
            .columns([reference.value_column.clone(), reference.label_column.clone()])
            .is_in(
                &reference.value_column,
                ids.iter().cloned().map(Value::String).collect(),
            );
            let labels = match self.backend.select(&spec) {
                Ok(rows) => {
                    let by_id: HashMap<String, String> = rows
                        .iter()
                        .filter_map(|row| {
                            let id = row
                                .get(&reference.value_column)
                                .map(SelectOption::normalize)?;
                            let label = row
                                .get(&reference.label_column)
                                .map(SelectOption::normalize)?;
                            (!id.is_empty() && !label.is_empty()).then_some((id, label))
                        })
                        .collect();
                    ids.iter()
                        .map(|id| by_id.get(id).cloned().unwrap_or_else(|| id.clone()))
                        .collect()
                }
                Err(e) => {
                    log::warn!(
                        "reference label query against {} failed for {field}: {e}",
                        reference.table
                    );
                    ids
                }
            };
            resolved.insert(field.clone(), labels);
        }
        self.reference_labels.extend(resolved);
    }

    /// Fetch (or refresh) one table block's child rows, capped at
    /// [`TABLE_ROW_CAP`]. A failed fetch logs and keeps whatever rows were
    /// shown before rather than blanking the block.
    ///
    /// # Errors
    ///
    /// Returns `DetailError` when the block is unknown or no entity is
    /// loaded.
    pub fn fetch_table_rows(&mut self, block_id: &str) -> Result<(), DetailError> {
        let entity_id = self
            .entity_id
            .clone()
            .ok_or(DetailError::MissingEntityId)?;
        let table = self
            .spec
            .table_block(block_id)
            .ok_or_else(|| DetailError::UnknownTable(block_id.to_string()))?;
        let spec = SelectSpec::from(TableRef::new(
            table.source.schema_or_public(),
            &table.source.table,
        ))
        .eq(&table.source.fk_column, Value::String(entity_id))
        .range(0, TABLE_ROW_CAP - 1);

        match self.backend.select(&spec) {
            Ok(rows) => {
                self.tables.insert(block_id.to_string(), rows);
            }
            Err(e) => {
                log::warn!("child row fetch for block {block_id} failed: {e}");
            }
        }
        Ok(())
    }

    /// Insert a bare child row carrying only the foreign key, then refresh
    /// the block.
    ///
    /// # Errors
    ///
    /// Returns `DetailError` when the block is unknown, no entity is
    /// loaded, or the insert fails.
    pub fn create_child_row(&mut self, block_id: &str) -> Result<(), DetailError> {
        let entity_id = self
            .entity_id
            .clone()
            .ok_or(DetailError::MissingEntityId)?;
        let table = self
            .spec
            .table_block(block_id)
            .ok_or_else(|| DetailError::UnknownTable(block_id.to_string()))?;
        let mut payload = JsonRow::new();
        payload.insert(
            table.source.fk_column.clone(),
            Value::String(entity_id),
        );
        let table_ref = TableRef::new(table.source.schema_or_public(), &table.source.table);
        self.backend.insert(&table_ref, &payload)?;
        self.fetch_table_rows(block_id)
    }

    /// Validate, normalize, and insert a new email child row, then refresh
    /// the block. The block must declare a [`TableAction::CreateEmail`].
    ///
    /// # Errors
    ///
    /// Returns `DetailError` when the block is unknown or lacks the action,
    /// the email is invalid, no entity is loaded, or the insert fails.
    pub fn create_email_row(&mut self, block_id: &str, raw: &str) -> Result<(), DetailError> {
        let entity_id = self
            .entity_id
            .clone()
            .ok_or(DetailError::MissingEntityId)?;
        let table = self
            .spec
            .table_block(block_id)
            .ok_or_else(|| DetailError::UnknownTable(block_id.to_string()))?;
        let email_column = table
            .table_actions
            .iter()
            .find_map(|action| match action {
                TableAction::CreateEmail { email_column, .. } => Some(email_column.clone()),
                TableAction::CreateChild { .. } => None,
            })
            .ok_or_else(|| DetailError::UnsupportedAction(block_id.to_string()))?;

        let email = raw.trim().to_lowercase();
        if !EMAIL_RE.is_match(&email) {
            return Err(DetailError::InvalidEmail(raw.to_string()));
        }

        let mut payload = JsonRow::new();
        payload.insert(
            table.source.fk_column.clone(),
            Value::String(entity_id),
        );
        payload.insert(email_column, Value::String(email));
        let table_ref = TableRef::new(table.source.schema_or_public(), &table.source.table);
        self.backend.insert(&table_ref, &payload)?;
        self.fetch_table_rows(block_id)
    }

    /// Build the render model for the active tab, or `None` when the spec
    /// has no tabs.
    pub fn render_active_tab(&self) -> Option<RenderedTab> {
        let tab_id = self.active_tab()?;
        let tab = self.spec.tab(tab_id)?;

        let mut blocks = Vec::with_capacity(tab.blocks.len());
        for block in &tab.blocks {
            match block {
                Block::Card(card) => {
                    let state = self.cards.get(&card.id);
                    let mode = state.map(|s| s.mode).unwrap_or(CardMode::Viewing);
                    let empty = JsonRow::new();
                    let values = state.map(|s| &s.values).unwrap_or(&empty);
                    let fields = card
                        .fields
                        .iter()
                        .map(|field| {
                            let merged = self.merged(field);
                            build_field(
                                field,
                                merged.as_ref(),
                                values.get(field).cloned().unwrap_or(Value::Null),
                                self.options.get(field),
                                self.reference_labels.get(field).map(Vec::as_slice),
                                values,
                                card.editable,
                            )
                        })
                        .collect();
                    blocks.push(RenderedBlock::Card(RenderedCard {
                        id: card.id.clone(),
                        title: card.title.clone(),
                        mode,
                        fields,
                    }));
                }
                Block::Table(table) => {
                    let columns = table
                        .columns
                        .iter()
                        .map(|spec| {
                            merge_table_column(
                                table.source.schema_or_public(),
                                &table.source.table,
                                spec,
                                self.store,
                            )
                        })
                        .collect();
                    blocks.push(RenderedBlock::Table(RenderedTable {
                        id: table.id.clone(),
                        title: table.title.clone(),
                        columns,
                        rows: self.table_rows(&table.id).to_vec(),
                        row_actions: table.row_actions.clone(),
                        table_actions: table.table_actions.clone(),
                    }));
                }
                Block::Map(map) => {
                    blocks.push(RenderedBlock::Map(RenderedMap {
                        id: map.id.clone(),
                        title: map.title.clone(),
                        lat: value_as_f64(self.entity.get(&map.lat_field)),
                        lng: value_as_f64(self.entity.get(&map.lng_field)),
                        label: self
                            .entity
                            .get(&map.label_field)
                            .map(SelectOption::normalize)
                            .filter(|label| !label.is_empty()),
                    }));
                }
            }
        }

        Some(RenderedTab {
            id: tab.id.clone(),
            label: tab.label.clone(),
            blocks,
        })
    }
}
