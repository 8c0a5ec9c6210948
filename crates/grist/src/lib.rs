//! Public facade over the table computation engine (§6): a
//! name-identified API (`table_id`/`col_id` strings, matching how a host
//! addresses a document) sitting on top of `grist_engine::Document`'s
//! numeric `TableId`/`ColId` world. Wire-level byte encoding of actions
//! is explicitly out of scope here; callers get and pass Rust values.

pub mod engine;

pub use engine::{ActionBundleResult, Engine, RetValue, TableData, UserAction};

pub use grist_engine::{Action, ActionError};
pub use grist_formula::ParseError;
pub use grist_types::{CellValue, ColumnType, GristError, GristErrorKind};
