//! Error kinds surfaced by the core, per spec §7.
//!
//! - **`GristErrorKind`**: the canonical set of error kinds.
//! - **`GristError`**: one struct gluing a kind to an optional message,
//!   cell location, and kind-specific payload.
//!
//! User-action-level errors (`InvalidAction`, `Overflow`, unknown action
//! variants) are returned from `apply_user_actions` and roll back the
//! whole bundle. Cell-level errors (`CellError`, `CircularRef`,
//! `SyntaxError`) are stored as values and never raised to the caller.

use std::{error::Error, fmt};

use crate::{CellAddr, CellValue, RaisedException};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum GristErrorKind {
    /// Formula body could not be parsed; position mapped back to user text.
    SyntaxError { at_line: u32, at_col: u32 },
    /// A formula raised during computation.
    CellError { at: CellAddr, inner: RaisedException },
    /// A cell tried to re-enter itself while evaluating.
    CircularRef { at: CellAddr },
    /// An attribute was read off a wrong-type cell.
    InvalidTypedValue {
        typename: &'static str,
        value: String,
    },
    /// A structural action violated a schema invariant.
    InvalidAction,
    /// Integer outside the 32-bit signed range.
    Overflow,
    /// Formula assigned to the reserved record variable or its attributes.
    ReservedAssignment,
    /// Action variant the engine does not recognize.
    UnknownAction { variant: String },
}

impl fmt::Display for GristErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GristErrorKind::SyntaxError { at_line, at_col } => {
                write!(f, "SyntaxError at line {at_line}, col {at_col}")
            }
            GristErrorKind::CellError { at, inner } => {
                write!(f, "CellError({at}): {}", inner.name)
            }
            GristErrorKind::CircularRef { at } => write!(f, "CircularRefError at {at}"),
            GristErrorKind::InvalidTypedValue { typename, value } => {
                write!(f, "InvalidTypedValue({typename}, {value})")
            }
            GristErrorKind::InvalidAction => write!(f, "InvalidAction"),
            GristErrorKind::Overflow => write!(f, "Overflow"),
            GristErrorKind::ReservedAssignment => write!(
                f,
                "cannot assign to the record variable; did you mean '==' instead of '='?"
            ),
            GristErrorKind::UnknownAction { variant } => {
                write!(f, "UnknownAction({variant})")
            }
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct GristError {
    pub kind: GristErrorKind,
    pub message: Option<String>,
}

impl From<GristErrorKind> for GristError {
    fn from(kind: GristErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }
}

impl GristError {
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn syntax(line: u32, col: u32) -> Self {
        GristErrorKind::SyntaxError {
            at_line: line,
            at_col: col,
        }
        .into()
    }

    pub fn cell_error(at: CellAddr, inner: RaisedException) -> Self {
        GristErrorKind::CellError { at, inner }.into()
    }

    pub fn circular_ref(at: CellAddr) -> Self {
        GristErrorKind::CircularRef { at }.into()
    }

    pub fn invalid_typed_value(typename: &'static str, value: &CellValue) -> Self {
        GristErrorKind::InvalidTypedValue {
            typename,
            value: value.to_string(),
        }
        .into()
    }

    pub fn invalid_action(msg: impl Into<String>) -> Self {
        GristError::from(GristErrorKind::InvalidAction).with_message(msg)
    }

    pub fn overflow() -> Self {
        GristErrorKind::Overflow.into()
    }

    pub fn reserved_assignment() -> Self {
        GristErrorKind::ReservedAssignment.into()
    }

    pub fn unknown_action(variant: impl Into<String>) -> Self {
        GristErrorKind::UnknownAction {
            variant: variant.into(),
        }
        .into()
    }

    pub fn is_circular_ref(&self) -> bool {
        matches!(self.kind, GristErrorKind::CircularRef { .. })
    }
}

impl fmt::Display for GristError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl Error for GristError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let err = GristError::invalid_action("duplicate column id 'foo'");
        assert_eq!(
            err.to_string(),
            "InvalidAction: duplicate column id 'foo'"
        );
    }

    #[test]
    fn circular_ref_is_recognized() {
        let at = CellAddr::new(crate::TableId(0), crate::ColId(0), crate::RowId(1));
        let err = GristError::circular_ref(at);
        assert!(err.is_circular_ref());
    }
}
