//! Trigger conditions (§4.11): a `{text, parsed}` pair attached to a
//! trigger-formula column, parsed once and cached rather than re-parsed
//! on every row evaluated. Reuses the formula parser/body evaluator
//! directly, since a trigger condition is just a single-expression
//! formula body evaluated for its truthiness.

use std::rc::Rc;

use grist_formula::{Body, ParseError};
use grist_types::GristError;

#[derive(Debug, Clone, Default)]
pub struct TriggerCondition {
    pub text: String,
    parsed: Option<Rc<Body>>,
}

impl TriggerCondition {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses `text` and caches the body. An empty or whitespace-only
    /// text clears the condition entirely (§4.11: "clears the record
    /// when text becomes empty or null").
    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), GristError> {
        let text = text.into();
        if text.trim().is_empty() {
            self.text = String::new();
            self.parsed = None;
            return Ok(());
        }
        let body = grist_formula::parse_body(&text).map_err(parse_error_to_grist)?;
        self.text = text;
        self.parsed = Some(Rc::new(body));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn parsed(&self) -> Option<&Body> {
        self.parsed.as_deref()
    }

    /// §4.11 rename propagation: rewrites `path` to `new_name` wherever it
    /// appears in the condition text, then re-parses. A no-op on an empty
    /// condition.
    pub fn rename(&mut self, path: &[&str], new_name: &str) -> Result<(), GristError> {
        if self.is_empty() {
            return Ok(());
        }
        let rewritten =
            grist_formula::rename_in_source(&self.text, path, new_name).map_err(|e| parse_error_to_grist(e.0))?;
        self.set_text(rewritten)
    }
}

fn parse_error_to_grist(e: ParseError) -> GristError {
    GristError::syntax(e.line, e.col)
}
