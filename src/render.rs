//! Render model
//!
//! The Detail Renderer produces a declarative tree of rendered blocks and
//! controls rather than widgets; the application shell walks this model to
//! draw actual UI. Control selection is driven entirely by merged metadata,
//! so no per-entity form code exists.

use crate::backend::JsonRow;
use crate::blocks::{RowAction, TableAction};
use crate::detail::CardMode;
use crate::meta::{humanize, MergedField, TableColumnMeta};
use crate::options::SelectOption;
use serde_json::Value;

/// The control a field renders as.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Text { multiline: bool },
    Number,
    Checkbox,
    Date,
    Attachment,
    Select { options: Vec<SelectOption> },
    MultiSelect { options: Vec<SelectOption> },
    /// The field is known to expect a select (enum or lookup declared) but
    /// its options have not loaded yet; rendered as a disabled placeholder
    /// so no free text can be entered while loading.
    LoadingSelect,
    /// Read-only foreign-key display labels.
    Reference { labels: Vec<String> },
    /// No metadata declared; plain read-only text.
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedField {
    pub field: String,
    pub label: String,
    pub value: Value,
    pub control: Control,
    pub visible: bool,
    pub editable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedCard {
    pub id: String,
    pub title: String,
    pub mode: CardMode,
    pub fields: Vec<RenderedField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTable {
    pub id: String,
    pub title: String,
    pub columns: Vec<TableColumnMeta>,
    pub rows: Vec<JsonRow>,
    pub row_actions: Vec<RowAction>,
    pub table_actions: Vec<TableAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMap {
    pub id: String,
    pub title: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderedBlock {
    Card(RenderedCard),
    Table(RenderedTable),
    Map(RenderedMap),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTab {
    pub id: String,
    pub label: String,
    pub blocks: Vec<RenderedBlock>,
}

/// Pick the control for a merged field.
///
/// Reference fields are read-only regardless of any lookup also declared on
/// them. Fields that expect a select render a disabled placeholder until
/// their options arrive.
pub fn control_for(
    merged: &MergedField,
    options: Option<&[SelectOption]>,
    reference_labels: Option<&[String]>,
) -> Control {
    if merged.reference.is_some() {
        let labels = reference_labels
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        return Control::Reference { labels };
    }

    let expects_select = merged.options.is_some()
        || merged.lookup.is_some()
        || merged
            .edit
            .as_ref()
            .is_some_and(|e| e.enum_name.is_some());
    if expects_select {
        return match options {
            Some(options) if merged.array => Control::MultiSelect {
                options: options.to_vec(),
            },
            Some(options) => Control::Select {
                options: options.to_vec(),
            },
            None => Control::LoadingSelect,
        };
    }

    use crate::meta::FieldType;
    match merged.field_type {
        FieldType::Boolean => Control::Checkbox,
        FieldType::Number => Control::Number,
        FieldType::Date => Control::Date,
        FieldType::Attachment => Control::Attachment,
        // An enum without a declared source has nothing to offer.
        FieldType::Enum => Control::LoadingSelect,
        FieldType::String => Control::Text {
            multiline: merged.multiline,
        },
    }
}

/// Evaluate conditional visibility against the current value set.
pub fn is_visible(merged: &MergedField, values: &JsonRow) -> bool {
    match &merged.visible_if {
        Some(condition) => {
            values.get(&condition.field).unwrap_or(&Value::Null) == &condition.equals
        }
        None => true,
    }
}

/// Build the render model for one field.
///
/// `merged` is `None` for fields without declared metadata, which render as
/// plain read-only text.
pub fn build_field(
    field: &str,
    merged: Option<&MergedField>,
    value: Value,
    options: Option<&[SelectOption]>,
    reference_labels: Option<&[String]>,
    values: &JsonRow,
    card_editable: bool,
) -> RenderedField {
    let Some(merged) = merged else {
        return RenderedField {
            field: field.to_string(),
            label: humanize(field),
            value,
            control: Control::ReadOnly,
            visible: true,
            editable: false,
        };
    };

    let control = control_for(merged, options, reference_labels);
    let editable = card_editable
        && !matches!(control, Control::Reference { .. } | Control::ReadOnly);
    RenderedField {
        field: field.to_string(),
        label: merged.display_label(),
        value,
        control,
        visible: is_visible(merged, values),
        editable,
    }
}

pub(crate) fn value_as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
