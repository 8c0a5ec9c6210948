use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use chrono::NaiveDateTime;

use crate::{CellAddr, GristError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ids::{RowId, TableId};

/// The canonical set of column type tags (§3). `Ref`/`RefList`/`DateTime`
/// carry the target table / timezone as a parameter the way the source
/// keeps it in a `type` suffix (`Ref:Address`, `DateTime:America/New_York`).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Numeric,
    Int,
    Bool,
    Date,
    DateTime(String),
    Choice,
    ChoiceList,
    Ref(TableId),
    RefList(TableId),
    Attachments,
    PositionNumber,
    ManualSortPos,
    Id,
    Any,
    Blob,
}

impl ColumnType {
    /// Column default value, per the `_type_defaults` table in the source.
    pub fn default_value(&self) -> CellValue {
        match self {
            ColumnType::Text | ColumnType::Choice => CellValue::Text(String::new()),
            ColumnType::Numeric => CellValue::Numeric(0.0),
            ColumnType::Int | ColumnType::Id => CellValue::Int(0),
            ColumnType::Bool => CellValue::Bool(false),
            ColumnType::Date | ColumnType::DateTime(_) => CellValue::Blank,
            ColumnType::ChoiceList => CellValue::ChoiceList(Vec::new().into()),
            ColumnType::Ref(_) => CellValue::Ref(RowId::EMPTY),
            ColumnType::RefList(_) | ColumnType::Attachments => {
                CellValue::RefList(Vec::new().into())
            }
            ColumnType::PositionNumber => CellValue::PositionNumber(f64::INFINITY),
            ColumnType::ManualSortPos => CellValue::ManualSortPos(2_147_483_647.0),
            ColumnType::Any | ColumnType::Blob => CellValue::Blank,
        }
    }

    /// §4.1 `is_right_type`: whether a stored value belongs to this type
    /// without any coercion.
    pub fn is_right_type(&self, value: &CellValue) -> bool {
        match (self, value) {
            (_, CellValue::Blank) => true,
            (ColumnType::Text | ColumnType::Choice, CellValue::Text(_)) => true,
            (ColumnType::Numeric, CellValue::Numeric(_)) => true,
            (ColumnType::Int | ColumnType::Id, CellValue::Int(_)) => true,
            (ColumnType::Bool, CellValue::Bool(_)) => true,
            (ColumnType::Date, CellValue::Date(_)) => true,
            (ColumnType::DateTime(_), CellValue::DateTime(_, _)) => true,
            (ColumnType::ChoiceList, CellValue::ChoiceList(_)) => true,
            (ColumnType::Ref(_), CellValue::Ref(_)) => true,
            (ColumnType::RefList(_) | ColumnType::Attachments, CellValue::RefList(_)) => true,
            (ColumnType::PositionNumber, CellValue::PositionNumber(_)) => true,
            (ColumnType::ManualSortPos, CellValue::ManualSortPos(_)) => true,
            (ColumnType::Any, _) => true,
            (ColumnType::Blob, CellValue::Blob(_)) => true,
            _ => false,
        }
    }

    pub fn typename(&self) -> &'static str {
        match self {
            ColumnType::Text => "Text",
            ColumnType::Numeric => "Numeric",
            ColumnType::Int => "Int",
            ColumnType::Bool => "Bool",
            ColumnType::Date => "Date",
            ColumnType::DateTime(_) => "DateTime",
            ColumnType::Choice => "Choice",
            ColumnType::ChoiceList => "ChoiceList",
            ColumnType::Ref(_) => "Ref",
            ColumnType::RefList(_) => "RefList",
            ColumnType::Attachments => "Attachments",
            ColumnType::PositionNumber => "PositionNumber",
            ColumnType::ManualSortPos => "ManualSortPos",
            ColumnType::Id => "Id",
            ColumnType::Any => "Any",
            ColumnType::Blob => "Blob",
        }
    }

    /// §4.1 `convert`: best-effort coercion of arbitrary input into this
    /// type. Returns the original value unchanged (stored as alt-text by
    /// the caller) when no sensible coercion exists.
    pub fn convert(&self, input: CellValue) -> CellValue {
        match self {
            ColumnType::Bool => match &input {
                CellValue::Bool(_) => input,
                CellValue::Int(0) => CellValue::Bool(false),
                CellValue::Int(_) => CellValue::Bool(true),
                CellValue::Numeric(n) => CellValue::Bool(*n != 0.0),
                CellValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => CellValue::Bool(true),
                    "false" | "0" | "no" | "" => CellValue::Bool(false),
                    _ => input,
                },
                CellValue::Blank => CellValue::Bool(false),
                _ => input,
            },
            ColumnType::Numeric => match &input {
                CellValue::Numeric(_) => input,
                CellValue::Int(i) => CellValue::Numeric(*i as f64),
                CellValue::Bool(b) => CellValue::Numeric(if *b { 1.0 } else { 0.0 }),
                CellValue::Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(CellValue::Numeric)
                    .unwrap_or(input.clone()),
                CellValue::Blank => CellValue::Numeric(0.0),
                _ => input,
            },
            ColumnType::Int | ColumnType::Id => match &input {
                CellValue::Int(_) => input,
                CellValue::Numeric(n) if n.fract() == 0.0 => CellValue::Int(*n as i64),
                CellValue::Bool(b) => CellValue::Int(if *b { 1 } else { 0 }),
                CellValue::Text(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(CellValue::Int)
                    .unwrap_or(input.clone()),
                CellValue::Blank => CellValue::Int(0),
                _ => input,
            },
            ColumnType::Text | ColumnType::Choice => match &input {
                CellValue::Text(_) => input,
                CellValue::Blank => CellValue::Text(String::new()),
                other => CellValue::Text(other.to_string()),
            },
            ColumnType::Ref(_) => match &input {
                CellValue::Ref(_) => input,
                // A small-integer float resolves directly to a row id.
                CellValue::Numeric(n) if n.fract() == 0.0 => CellValue::Ref(RowId(*n as i64)),
                CellValue::Int(i) => CellValue::Ref(RowId(*i)),
                CellValue::Blank => CellValue::Ref(RowId::EMPTY),
                _ => input,
            },
            ColumnType::RefList(_) | ColumnType::Attachments => match &input {
                CellValue::RefList(_) => input,
                CellValue::Blank => CellValue::RefList(Vec::new().into()),
                _ => input,
            },
            ColumnType::PositionNumber | ColumnType::ManualSortPos => match &input {
                CellValue::Numeric(n) => {
                    if matches!(self, ColumnType::PositionNumber) {
                        CellValue::PositionNumber(*n)
                    } else {
                        CellValue::ManualSortPos(*n)
                    }
                }
                CellValue::Int(i) => {
                    if matches!(self, ColumnType::PositionNumber) {
                        CellValue::PositionNumber(*i as f64)
                    } else {
                        CellValue::ManualSortPos(*i as f64)
                    }
                }
                CellValue::Blank => self.default_value(),
                _ => input,
            },
            ColumnType::ChoiceList => match &input {
                CellValue::ChoiceList(_) => input,
                CellValue::Text(s) => match parse_json_like_list(s) {
                    Some(items) => CellValue::ChoiceList(items.into()),
                    None => input,
                },
                CellValue::Blank => CellValue::ChoiceList(Vec::new().into()),
                _ => input,
            },
            ColumnType::Date => match &input {
                CellValue::Date(_) => input,
                CellValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(CellValue::Date)
                    .unwrap_or(input.clone()),
                CellValue::Numeric(n) => CellValue::Date(excel_serial_to_date(*n)),
                CellValue::Blank => CellValue::Blank,
                _ => input,
            },
            ColumnType::DateTime(tz) => match &input {
                CellValue::DateTime(_, _) => input,
                CellValue::Text(s) => NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S")
                    .map(|dt| CellValue::DateTime(dt.and_utc().timestamp(), tz.clone()))
                    .unwrap_or(input.clone()),
                CellValue::Numeric(n) => CellValue::DateTime((*n * 86_400.0) as i64, tz.clone()),
                CellValue::Blank => CellValue::Blank,
                _ => input,
            },
            ColumnType::Any | ColumnType::Blob => input,
        }
    }
}

fn parse_json_like_list(s: &str) -> Option<Vec<String>> {
    let trimmed = s.trim();
    if !trimmed.starts_with('[') || !trimmed.ends_with(']') {
        return None;
    }
    let inner = &trimmed[1..trimmed.len() - 1];
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    Some(
        inner
            .split(',')
            .map(|p| p.trim().trim_matches('"').to_string())
            .collect(),
    )
}

fn excel_serial_to_date(serial: f64) -> NaiveDate {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30).unwrap();
    epoch + chrono::Duration::days(serial.trunc() as i64)
}

/// A list of `Choice` strings stored as an immutable sequence (§4.1).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChoiceListValue(Vec<String>);

impl ChoiceListValue {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// §4.1: "rename of a choice rewrites stored values".
    pub fn rename_choice(&mut self, from: &str, to: &str) {
        for item in self.0.iter_mut() {
            if item == from {
                *item = to.to_string();
            }
        }
    }
}

impl From<Vec<String>> for ChoiceListValue {
    fn from(v: Vec<String>) -> Self {
        Self(v)
    }
}

impl Hash for ChoiceListValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// A list of row ids, the storage form of `RefList` / `Attachments` (§3).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct RefListValue(Vec<RowId>);

impl RefListValue {
    pub fn as_slice(&self) -> &[RowId] {
        &self.0
    }

    pub fn contains(&self, row: RowId) -> bool {
        self.0.contains(&row)
    }

    /// §4.9 `RemoveRecord`: a `RefList` loses only the removed ids.
    pub fn without(&self, removed: &[RowId]) -> Self {
        Self(
            self.0
                .iter()
                .copied()
                .filter(|r| !removed.contains(r))
                .collect(),
        )
    }
}

impl From<Vec<RowId>> for RefListValue {
    fn from(v: Vec<RowId>) -> Self {
        Self(v)
    }
}

/// A value the host sent in that cannot be marshalled into the wire's
/// scalar set (§6: out-of-i32-range ints become `['U', repr]`).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnmarshallableValue(pub String);

/// A formula raised during computation (§4.13). Stored verbatim in place
/// of the formula's would-be result.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct RaisedException {
    pub name: String,
    pub message: Option<String>,
    pub traceback: Option<String>,
    /// Original user input, kept so trigger formulas can reconsider on a
    /// manual edit (§4.13).
    pub user_input: Option<Box<CellValue>>,
}

impl Eq for RaisedException {}
impl Hash for RaisedException {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.message.hash(state);
    }
}

impl RaisedException {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: None,
            traceback: None,
            user_input: None,
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn circular_ref() -> Self {
        Self::new("CircularRefError").with_message("Circular reference detected")
    }
}

/// Every legal stored cell kind, plus the wrapper kinds used for values
/// that cannot, or do not yet, hold a right-typed value (§3, §9).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Blank,
    Text(String),
    Numeric(f64),
    Int(i64),
    Bool(bool),
    Date(NaiveDate),
    /// Seconds since epoch + named zone (§3).
    DateTime(i64, String),
    ChoiceList(ChoiceListValue),
    Ref(RowId),
    RefList(RefListValue),
    PositionNumber(f64),
    ManualSortPos(f64),
    Blob(Vec<u8>),

    /// A right-typed column holding a value that failed `is_right_type`,
    /// stored verbatim and shown to formulas as alt-text (§3, §4.13).
    AltText(String),
    /// A formula raised during computation (§4.3, §4.13).
    Raised(Box<RaisedException>),
    /// A value not yet computed (initial state before first recalc).
    Pending,
    /// A value hidden from the current reader by access control.
    Censored,
    /// A host-sent value outside the representable range for its type.
    Unmarshallable(UnmarshallableValue),
}

impl Eq for CellValue {}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::Blank | CellValue::Pending | CellValue::Censored => {}
            CellValue::Text(s) | CellValue::AltText(s) => s.hash(state),
            CellValue::Numeric(n) | CellValue::PositionNumber(n) | CellValue::ManualSortPos(n) => {
                n.to_bits().hash(state)
            }
            CellValue::Int(i) => i.hash(state),
            CellValue::Bool(b) => b.hash(state),
            CellValue::Date(d) => d.hash(state),
            CellValue::DateTime(s, tz) => {
                s.hash(state);
                tz.hash(state);
            }
            CellValue::ChoiceList(c) => c.hash(state),
            CellValue::Ref(r) => r.hash(state),
            CellValue::RefList(r) => r.hash(state),
            CellValue::Blob(b) => b.hash(state),
            CellValue::Raised(r) => r.hash(state),
            CellValue::Unmarshallable(u) => u.hash(state),
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Blank => write!(f, ""),
            CellValue::Text(s) | CellValue::AltText(s) => write!(f, "{s}"),
            CellValue::Numeric(n) => write!(f, "{n}"),
            CellValue::Int(i) => write!(f, "{i}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Date(d) => write!(f, "{d}"),
            CellValue::DateTime(secs, tz) => write!(f, "{secs}@{tz}"),
            CellValue::ChoiceList(c) => write!(f, "{:?}", c.as_slice()),
            CellValue::Ref(r) => write!(f, "Ref({r})"),
            CellValue::RefList(r) => write!(f, "RefList({:?})", r.as_slice()),
            CellValue::PositionNumber(n) | CellValue::ManualSortPos(n) => write!(f, "{n}"),
            CellValue::Blob(_) => write!(f, "<blob>"),
            CellValue::Raised(e) => write!(f, "#{}", e.name),
            CellValue::Pending => write!(f, "<pending>"),
            CellValue::Censored => write!(f, "<censored>"),
            CellValue::Unmarshallable(u) => write!(f, "{}", u.0),
        }
    }
}

impl CellValue {
    /// `encoding_equal` from §8: NaNs equal, int/float equal when they
    /// represent the same number.
    pub fn encoding_equal(&self, other: &CellValue) -> bool {
        use CellValue::*;
        match (self, other) {
            (Numeric(a), Numeric(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Int(a), Numeric(b)) | (Numeric(b), Int(a)) => *a as f64 == *b,
            (PositionNumber(a), PositionNumber(b)) | (ManualSortPos(a), ManualSortPos(b)) => {
                a == b || (a.is_nan() && b.is_nan())
            }
            _ => self == other,
        }
    }

    pub fn is_error_like(&self) -> bool {
        matches!(self, CellValue::Raised(_) | CellValue::AltText(_))
    }

    /// Attribute access on an alt-text sibling raises `InvalidTypedValue`
    /// (§4.13); attribute access on a raised cell re-raises as `CellError`
    /// carrying the originating location (§4.3).
    pub fn rich_access_error(&self, at: CellAddr) -> Option<GristError> {
        match self {
            CellValue::AltText(_) => Some(GristError::invalid_typed_value("AltText", self)),
            CellValue::Raised(exc) => Some(GristError::cell_error(at, (**exc).clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_convert_accepts_int_and_text() {
        let t = ColumnType::Bool;
        assert_eq!(t.convert(CellValue::Int(1)), CellValue::Bool(true));
        assert_eq!(t.convert(CellValue::Int(0)), CellValue::Bool(false));
        assert_eq!(
            t.convert(CellValue::Text("true".into())),
            CellValue::Bool(true)
        );
    }

    #[test]
    fn ref_convert_resolves_whole_float() {
        let t = ColumnType::Ref(TableId(1));
        assert_eq!(t.convert(CellValue::Numeric(3.0)), CellValue::Ref(RowId(3)));
        assert_eq!(t.convert(CellValue::Numeric(3.5)), CellValue::Numeric(3.5));
    }

    #[test]
    fn encoding_equal_treats_int_and_float_as_same() {
        assert!(CellValue::Int(4).encoding_equal(&CellValue::Numeric(4.0)));
        assert!(CellValue::Numeric(f64::NAN).encoding_equal(&CellValue::Numeric(f64::NAN)));
    }

    #[test]
    fn ref_list_without_drops_only_removed_ids() {
        let list: RefListValue = vec![RowId(1), RowId(2), RowId(3)].into();
        let reduced = list.without(&[RowId(2)]);
        assert_eq!(reduced.as_slice(), &[RowId(1), RowId(3)]);
    }
}
