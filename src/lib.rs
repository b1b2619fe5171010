//! # Fieldwork
//!
//! Metadata-driven record detail engine for PostgreSQL-backed data
//! applications, running on the `may` coroutine runtime.
//!
//! A detail page is described once as a [`DetailSpec`] (tabs, cards, table
//! and map blocks) plus per-field metadata; everything else is derived.
//! Introspected column facts from a [`SchemaMetadata`] store fill in what
//! the declarations leave out, an [`options::OptionResolver`] supplies
//! enum and lookup choice lists with process-wide caching, and the write
//! router turns a card save into per-table update batches with rename and
//! lookup-translation rules applied. [`DetailView`] ties it together as a
//! per-page state machine producing a declarative render model.

pub mod backend;
pub mod blocks;
pub mod cache;
pub mod config;
pub mod detail;
pub mod meta;
pub mod metrics;
pub mod options;
pub mod render;
pub mod schema;
pub mod writer;

#[cfg(test)]
mod tests_cfg;

pub use backend::{DataBackend, PostgresBackend};
pub use blocks::DetailSpec;
pub use detail::{CardMode, DetailError, DetailView};
pub use schema::SchemaMetadata;
