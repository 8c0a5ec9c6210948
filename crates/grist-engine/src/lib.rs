//! Dependency graph, recalculation loop, and user-action pipeline for a
//! table computation engine (§3, §4). The public surface is deliberately
//! narrow: [`engine::Document`] plus the free functions in
//! `engine::translator`/`engine::action` that mutate it. Wire-level
//! bundling and the metadata-schema facade live one layer up, in the
//! `grist` crate.

pub mod engine;

pub use engine::{Action, ActionError, Column, ColumnSpec, DependencyGraph, Document, LookupIndex, LookupKey, OrderField, Relation};
