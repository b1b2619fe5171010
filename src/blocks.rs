//! Tab and block specifications
//!
//! The static, per-entity-type description of a detail page: a list of tabs,
//! each a list of blocks. Blocks are a closed tagged union so rendering
//! dispatch is exhaustive. Specs are defined in code and never mutated at
//! runtime.

use crate::meta::{ExceptionRule, FieldMeta, TableColumnSpec};
use crate::writer::WriteTarget;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A labeled, optionally editable group of fields for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardBlock {
    pub id: String,
    pub title: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub editable: bool,
    /// Explicit write target, overriding the tab-level `write_to`.
    #[serde(default)]
    pub edit_source: Option<WriteTarget>,
}

/// Where a table block's child rows come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSource {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    /// Column holding the parent entity's id.
    pub fk_column: String,
}

impl TableSource {
    pub fn schema_or_public(&self) -> &str {
        self.schema.as_deref().unwrap_or("public")
    }
}

/// A per-row action descriptor, interpreted by the application shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowAction {
    pub id: String,
    pub label: String,
}

/// A table-level action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TableAction {
    /// Bare insert of `{fk_column: entity_id}`.
    CreateChild { label: String },
    /// Modal flow that validates and normalizes an email before insert.
    CreateEmail { label: String, email_column: String },
}

/// A read-mostly list of child rows related to the entity by foreign key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableBlock {
    pub id: String,
    pub title: String,
    pub source: TableSource,
    pub columns: Vec<TableColumnSpec>,
    #[serde(default)]
    pub row_actions: Vec<RowAction>,
    #[serde(default)]
    pub table_actions: Vec<TableAction>,
}

/// A read-only map block with three fixed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapBlock {
    pub id: String,
    pub title: String,
    pub lat_field: String,
    pub lng_field: String,
    pub label_field: String,
}

/// The closed union of block variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "block")]
pub enum Block {
    Card(CardBlock),
    Table(TableBlock),
    Map(MapBlock),
}

/// One tab of a detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSpec {
    pub id: String,
    pub label: String,
    /// Default write target for editable cards in this tab.
    #[serde(default)]
    pub write_to: Option<WriteTarget>,
    /// Exceptions applied to every write group produced under this tab.
    #[serde(default)]
    pub exceptions: Vec<ExceptionRule>,
    pub blocks: Vec<Block>,
}

impl TabSpec {
    /// A card's effective write target: its own `edit_source` if present,
    /// else this tab's `write_to`.
    pub fn write_target_for<'a>(&'a self, card: &'a CardBlock) -> Option<&'a WriteTarget> {
        card.edit_source.as_ref().or(self.write_to.as_ref())
    }
}

/// The full static specification for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailSpec {
    /// Entity name, used in cache keys (`detail/{entity}/{id}`).
    pub entity: String,
    /// Default schema for metadata merging.
    #[serde(default)]
    pub schema: Option<String>,
    /// Default table for metadata merging.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub default_tab: Option<String>,
    pub tabs: Vec<TabSpec>,
    /// Manual per-field metadata.
    #[serde(default)]
    pub fields: HashMap<String, FieldMeta>,
}

impl DetailSpec {
    pub fn tab(&self, id: &str) -> Option<&TabSpec> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    /// First tab id, or the declared default when it exists in the list.
    pub fn initial_tab(&self) -> Option<&str> {
        if let Some(default) = self.default_tab.as_deref() {
            if self.tab(default).is_some() {
                return Some(default);
            }
        }
        self.tabs.first().map(|tab| tab.id.as_str())
    }

    pub fn card(&self, card_id: &str) -> Option<(&TabSpec, &CardBlock)> {
        for tab in &self.tabs {
            for block in &tab.blocks {
                if let Block::Card(card) = block {
                    if card.id == card_id {
                        return Some((tab, card));
                    }
                }
            }
        }
        None
    }

    pub fn table_block(&self, block_id: &str) -> Option<&TableBlock> {
        for tab in &self.tabs {
            for block in &tab.blocks {
                if let Block::Table(table) = block {
                    if table.id == block_id {
                        return Some(table);
                    }
                }
            }
        }
        None
    }
}
