use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use ordered_float::NotNan;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The set of scalar kinds the engine will move across the SQL boundary.
///
/// Constants and parameters of any other shape are not translatable and
/// stay on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    DateTime,
    Uuid,
}

/// A concrete scalar value: literals in expression trees and cells in
/// result rows. Floats are `NotNan` so every value is `Eq + Hash`, which
/// projection dedup relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(NotNan<f64>),
    String(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    Uuid(Uuid),
}

impl ScalarValue {
    pub fn kind(&self) -> Option<ScalarKind> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Bool(_) => Some(ScalarKind::Bool),
            ScalarValue::Int(_) => Some(ScalarKind::Int),
            ScalarValue::Float(_) => Some(ScalarKind::Float),
            ScalarValue::String(_) => Some(ScalarKind::String),
            ScalarValue::Bytes(_) => Some(ScalarKind::Bytes),
            ScalarValue::DateTime(_) => Some(ScalarKind::DateTime),
            ScalarValue::Uuid(_) => Some(ScalarKind::Uuid),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// The SQL-NULL compensation default for a kind, used when a scalar
    /// sub-query result must be coalesced to a non-nullable output.
    pub fn default_for(kind: ScalarKind) -> ScalarValue {
        match kind {
            ScalarKind::Bool => ScalarValue::Bool(false),
            ScalarKind::Int => ScalarValue::Int(0),
            ScalarKind::Float => ScalarValue::Float(NotNan::default()),
            ScalarKind::String => ScalarValue::String(String::new()),
            ScalarKind::Bytes => ScalarValue::Bytes(Vec::new()),
            ScalarKind::DateTime => ScalarValue::DateTime(
                NaiveDate::from_ymd_opt(1, 1, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .unwrap_or_default(),
            ),
            ScalarKind::Uuid => ScalarValue::Uuid(Uuid::nil()),
        }
    }

    /// Shaped-row representation.
    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::Null => Value::Null,
            ScalarValue::Bool(b) => Value::Bool(*b),
            ScalarValue::Int(i) => Value::from(*i),
            ScalarValue::Float(x) => Value::from(x.into_inner()),
            ScalarValue::String(s) => Value::String(s.clone()),
            ScalarValue::Bytes(b) => Value::Array(b.iter().map(|v| Value::from(*v)).collect()),
            ScalarValue::DateTime(dt) => Value::String(dt.to_string()),
            ScalarValue::Uuid(u) => Value::String(u.to_string()),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            ScalarValue::Int(i) => write!(f, "{}", i),
            ScalarValue::Float(x) => write!(f, "{}", x.into_inner()),
            ScalarValue::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            ScalarValue::Bytes(b) => write!(f, "x'{}'", b.iter().map(|v| format!("{:02x}", v)).collect::<String>()),
            ScalarValue::DateTime(dt) => write!(f, "'{}'", dt),
            ScalarValue::Uuid(u) => write!(f, "'{}'", u),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_has_no_kind() {
        assert_eq!(ScalarValue::Null.kind(), None);
        assert_eq!(ScalarValue::Int(3).kind(), Some(ScalarKind::Int));
    }

    #[test]
    fn defaults_match_kind() {
        for kind in [
            ScalarKind::Bool,
            ScalarKind::Int,
            ScalarKind::Float,
            ScalarKind::String,
            ScalarKind::Bytes,
            ScalarKind::DateTime,
            ScalarKind::Uuid,
        ] {
            assert_eq!(ScalarValue::default_for(kind).kind(), Some(kind));
        }
    }

    #[test]
    fn display_escapes_strings() {
        let v = ScalarValue::String("it's".into());
        assert_eq!(v.to_string(), "'it''s'");
    }
}
