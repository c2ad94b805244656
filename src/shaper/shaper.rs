use std::collections::HashSet;
use std::fmt;

use serde_json::{Map, Value};

use crate::query_model::{Expr, QuerySourceRef};
use crate::shaper::ValueBuffer;
use crate::sql::{BinaryOp, ScalarKind, ScalarValue};

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeError {
    /// The selector kept an untranslated sub-tree; the caller must
    /// evaluate it before rows can be shaped here.
    ClientEvalRequired,
    MissingColumn(usize),
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::ClientEvalRequired => {
                write!(f, "the projection requires client-side evaluation")
            }
            ShapeError::MissingColumn(index) => {
                write!(f, "the row has no value at projection slot {}", index)
            }
        }
    }
}

impl std::error::Error for ShapeError {}

/// One member of a materialized entity: output member name, projection
/// slot, scalar kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSlot {
    pub member: String,
    pub index: usize,
    pub kind: ScalarKind,
}

/// Materializes entity rows into JSON objects.
///
/// `buffered` selects the shaping strategy: the unbuffered shaper streams
/// row by row, the buffered one sees the whole result set and collapses
/// duplicate key tuples (one-to-many fan-out from eager loading, identity
/// resolution under tracking).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityShaper {
    pub query_source: QuerySourceRef,
    /// Display name of the entity type, for diagnostics.
    pub entity_name: String,
    pub tracking: bool,
    /// Projection slots of the primary key, in key order.
    pub key_indices: Vec<usize>,
    pub layout: Vec<MemberSlot>,
    pub buffered: bool,
}

impl EntityShaper {
    pub fn materialize(&self, row: &ValueBuffer) -> Result<Value, ShapeError> {
        let mut object = Map::new();
        for slot in &self.layout {
            let value = row.get(slot.index).ok_or(ShapeError::MissingColumn(slot.index))?;
            object.insert(slot.member.clone(), value.to_json());
        }
        Ok(Value::Object(object))
    }

    pub fn shape_all(&self, rows: &[ValueBuffer]) -> Result<Vec<Value>, ShapeError> {
        if !self.buffered {
            return rows.iter().map(|row| self.materialize(row)).collect();
        }
        let mut seen: HashSet<Vec<ScalarValue>> = HashSet::new();
        let mut shaped = Vec::new();
        for row in rows {
            let mut key = Vec::with_capacity(self.key_indices.len());
            for &index in &self.key_indices {
                key.push(row.get(index).ok_or(ShapeError::MissingColumn(index))?.clone());
            }
            if self.key_indices.is_empty() || seen.insert(key) {
                shaped.push(self.materialize(row)?);
            }
        }
        Ok(shaped)
    }
}

/// Shapes arbitrary projections by evaluating the rewritten selector
/// against each row.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBufferShaper {
    pub selector: Expr,
    /// The selector still contains untranslated host nodes.
    pub requires_client_eval: bool,
}

impl ValueBufferShaper {
    pub fn shape(&self, row: &ValueBuffer) -> Result<Value, ShapeError> {
        if self.requires_client_eval {
            return Err(ShapeError::ClientEvalRequired);
        }
        eval_shaped(&self.selector, row)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shaper {
    Entity(EntityShaper),
    ValueBuffer(ValueBufferShaper),
    /// Client-side grouping: rows arrive ordered by key; consecutive rows
    /// with the same key value form one group.
    Grouping { key: Expr, element: Box<Shaper> },
}

impl Shaper {
    pub fn shape_rows(&self, rows: &[ValueBuffer]) -> Result<Vec<Value>, ShapeError> {
        match self {
            Shaper::Entity(shaper) => shaper.shape_all(rows),
            Shaper::ValueBuffer(shaper) => rows.iter().map(|row| shaper.shape(row)).collect(),
            Shaper::Grouping { key, element } => {
                let mut groups: Vec<Value> = Vec::new();
                let mut current_key: Option<Value> = None;
                let mut current_rows: Vec<ValueBuffer> = Vec::new();
                for row in rows {
                    let key_value = eval_shaped(key, row)?;
                    if current_key.as_ref() != Some(&key_value) {
                        if let Some(finished) = current_key.take() {
                            groups.push(group_object(finished, element.shape_rows(&current_rows)?));
                        }
                        current_rows.clear();
                        current_key = Some(key_value);
                    }
                    current_rows.push(row.clone());
                }
                if let Some(finished) = current_key {
                    groups.push(group_object(finished, element.shape_rows(&current_rows)?));
                }
                Ok(groups)
            }
        }
    }
}

fn group_object(key: Value, items: Vec<Value>) -> Value {
    let mut object = Map::new();
    object.insert("Key".to_string(), key);
    object.insert("Items".to_string(), Value::Array(items));
    Value::Object(object)
}

/// Evaluates a rewritten selector against one row. Anything the projection
/// stage could not rewrite is a client-eval residue and fails here.
pub fn eval_shaped(expr: &Expr, row: &ValueBuffer) -> Result<Value, ShapeError> {
    match expr {
        Expr::Literal(value) => Ok(value.to_json()),
        Expr::ReadColumn { index, .. } => row
            .get(*index)
            .map(|v| v.to_json())
            .ok_or(ShapeError::MissingColumn(*index)),
        Expr::New { members, args } => {
            let mut object = Map::new();
            for (member, arg) in members.iter().zip(args) {
                object.insert(member.clone(), eval_shaped(arg, row)?);
            }
            Ok(Value::Object(object))
        }
        Expr::Cast { expr, .. } => eval_shaped(expr, row),
        Expr::Conditional { test, if_true, if_false } => {
            match eval_shaped(test, row)? {
                Value::Bool(true) => eval_shaped(if_true, row),
                Value::Bool(false) => eval_shaped(if_false, row),
                _ => Err(ShapeError::ClientEvalRequired),
            }
        }
        Expr::Binary { op, left, right } => {
            let left = eval_shaped(left, row)?;
            match op {
                BinaryOp::Coalesce => {
                    if left.is_null() { eval_shaped(right, row) } else { Ok(left) }
                }
                BinaryOp::Eq => Ok(Value::Bool(left == eval_shaped(right, row)?)),
                BinaryOp::NotEq => Ok(Value::Bool(left != eval_shaped(right, row)?)),
                _ => Err(ShapeError::ClientEvalRequired),
            }
        }
        _ => Err(ShapeError::ClientEvalRequired),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_model::QuerySource;

    fn row(values: Vec<ScalarValue>) -> ValueBuffer {
        ValueBuffer::new(values)
    }

    fn product_shaper(buffered: bool) -> EntityShaper {
        EntityShaper {
            query_source: QuerySource::entity("p", "Product"),
            entity_name: "Product".into(),
            tracking: false,
            key_indices: vec![0],
            layout: vec![
                MemberSlot { member: "Id".into(), index: 0, kind: ScalarKind::Int },
                MemberSlot { member: "Name".into(), index: 1, kind: ScalarKind::String },
            ],
            buffered,
        }
    }

    #[test]
    fn materializes_members_by_slot() {
        let shaper = product_shaper(false);
        let shaped = shaper
            .materialize(&row(vec![ScalarValue::Int(7), ScalarValue::String("Tea".into())]))
            .unwrap();
        assert_eq!(shaped, serde_json::json!({ "Id": 7, "Name": "Tea" }));
    }

    #[test]
    fn buffered_shaping_collapses_duplicate_keys() {
        let shaper = product_shaper(true);
        let rows = vec![
            row(vec![ScalarValue::Int(1), ScalarValue::String("Tea".into())]),
            row(vec![ScalarValue::Int(1), ScalarValue::String("Tea".into())]),
            row(vec![ScalarValue::Int(2), ScalarValue::String("Coffee".into())]),
        ];
        let shaped = shaper.shape_all(&rows).unwrap();
        assert_eq!(shaped.len(), 2);
    }

    #[test]
    fn unbuffered_shaping_keeps_every_row() {
        let shaper = product_shaper(false);
        let rows = vec![
            row(vec![ScalarValue::Int(1), ScalarValue::String("Tea".into())]),
            row(vec![ScalarValue::Int(1), ScalarValue::String("Tea".into())]),
        ];
        assert_eq!(shaper.shape_all(&rows).unwrap().len(), 2);
    }

    #[test]
    fn value_buffer_shaper_evaluates_rewritten_selector() {
        let shaper = ValueBufferShaper {
            selector: Expr::New {
                members: vec!["Name".into(), "Tag".into()],
                args: vec![
                    Expr::ReadColumn { index: 0, kind: Some(ScalarKind::String) },
                    Expr::lit(ScalarValue::String("x".into())),
                ],
            },
            requires_client_eval: false,
        };
        let shaped = shaper.shape(&row(vec![ScalarValue::String("Tea".into())])).unwrap();
        assert_eq!(shaped, serde_json::json!({ "Name": "Tea", "Tag": "x" }));
    }

    #[test]
    fn client_eval_residue_refuses_to_shape() {
        let shaper = ValueBufferShaper {
            selector: Expr::static_call("host_only", vec![]),
            requires_client_eval: true,
        };
        assert_eq!(
            shaper.shape(&row(vec![])),
            Err(ShapeError::ClientEvalRequired)
        );
    }

    #[test]
    fn grouping_shaper_groups_consecutive_keys() {
        let element = Shaper::ValueBuffer(ValueBufferShaper {
            selector: Expr::ReadColumn { index: 1, kind: Some(ScalarKind::String) },
            requires_client_eval: false,
        });
        let shaper = Shaper::Grouping {
            key: Expr::ReadColumn { index: 0, kind: Some(ScalarKind::Int) },
            element: Box::new(element),
        };
        let rows = vec![
            row(vec![ScalarValue::Int(1), ScalarValue::String("a".into())]),
            row(vec![ScalarValue::Int(1), ScalarValue::String("b".into())]),
            row(vec![ScalarValue::Int(2), ScalarValue::String("c".into())]),
        ];
        let groups = shaper.shape_rows(&rows).unwrap();
        assert_eq!(
            groups,
            vec![
                serde_json::json!({ "Key": 1, "Items": ["a", "b"] }),
                serde_json::json!({ "Key": 2, "Items": ["c"] }),
            ]
        );
    }
}
