use crate::select::SelectExpression;
use crate::sql::{BinaryOp, ComparisonOp, ScalarKind, ScalarValue};

/// The SQL expression model: one tagged union of every node kind the
/// generator can render. Nodes are pure data with structural equality, so
/// projection dedup and ordering dedup work by comparing values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlExpr {
    /// Reference to a column of a table source, carrying enough typing to
    /// shape the value that comes back.
    Column {
        table_alias: String,
        name: String,
        kind: ScalarKind,
        nullable: bool,
    },
    Literal(ScalarValue),
    Parameter(String),
    Binary {
        op: BinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    IsNull(Box<SqlExpr>),
    Not(Box<SqlExpr>),
    Negate(Box<SqlExpr>),
    In {
        expr: Box<SqlExpr>,
        values: Vec<SqlExpr>,
    },
    InSubquery {
        expr: Box<SqlExpr>,
        subquery: Box<SelectExpression>,
    },
    Case {
        when: Box<SqlExpr>,
        then: Box<SqlExpr>,
        otherwise: Box<SqlExpr>,
    },
    /// String comparison with the operator kept explicit, so providers can
    /// render collation-correct SQL. Transparent to translation: rebuilt
    /// only when an operand changes.
    StringCompare {
        op: ComparisonOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    /// Explicit cast, equally transparent.
    Cast {
        expr: Box<SqlExpr>,
        kind: ScalarKind,
    },
    /// Composite node: an ordered tuple of sub-expressions. Never rendered
    /// directly; comparison unfolding explodes it pairwise first.
    Tuple(Vec<SqlExpr>),
    Like {
        expr: Box<SqlExpr>,
        pattern: Box<SqlExpr>,
    },
    Function {
        name: String,
        args: Vec<SqlExpr>,
    },
    Star,
    /// Scalar sub-query.
    Subquery(Box<SelectExpression>),
}

impl SqlExpr {
    pub fn binary(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::binary(BinaryOp::Eq, left, right)
    }

    pub fn and(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::binary(BinaryOp::AndAlso, left, right)
    }

    pub fn or(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::binary(BinaryOp::OrElse, left, right)
    }

    /// Fold a non-empty list with a binary operator, left-associated.
    pub fn fold(op: BinaryOp, terms: Vec<SqlExpr>) -> Option<SqlExpr> {
        let mut iter = terms.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |acc, term| SqlExpr::binary(op, acc, term)))
    }

    /// Best-effort scalar kind of this expression, used when shaping needs
    /// a column type for a projected value.
    pub fn kind(&self) -> Option<ScalarKind> {
        match self {
            SqlExpr::Column { kind, .. } => Some(*kind),
            SqlExpr::Literal(value) => value.kind(),
            SqlExpr::Cast { kind, .. } => Some(*kind),
            SqlExpr::Binary { op, left, right } => {
                if op.is_comparison() || op.is_logical() {
                    Some(ScalarKind::Bool)
                } else {
                    left.kind().or_else(|| right.kind())
                }
            }
            SqlExpr::IsNull(_) | SqlExpr::Not(_) => Some(ScalarKind::Bool),
            SqlExpr::In { .. } | SqlExpr::InSubquery { .. } => Some(ScalarKind::Bool),
            SqlExpr::StringCompare { .. } | SqlExpr::Like { .. } => Some(ScalarKind::Bool),
            SqlExpr::Negate(inner) => inner.kind(),
            SqlExpr::Case { then, otherwise, .. } => then.kind().or_else(|| otherwise.kind()),
            SqlExpr::Function { name, args } => match name.as_str() {
                "COUNT" | "LENGTH" => Some(ScalarKind::Int),
                "UPPER" | "LOWER" | "TRIM" => Some(ScalarKind::String),
                "SUM" | "MIN" | "MAX" | "AVG" | "ABS" => args.first().and_then(|a| a.kind()),
                _ => None,
            },
            SqlExpr::Subquery(select) => {
                select.projection().first().and_then(|entry| entry.expr.kind())
            }
            _ => None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            SqlExpr::Function { name, .. }
                if matches!(name.as_str(), "COUNT" | "SUM" | "MIN" | "MAX" | "AVG")
        )
    }
}

/// Alias wrapper: a projection entry. `source_member` is attached after the
/// fact by the projection visitor so the shaper can map output members back
/// to projection slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasExpr {
    pub alias: String,
    pub expr: SqlExpr,
    pub source_member: Option<String>,
}

impl AliasExpr {
    pub fn new(alias: impl Into<String>, expr: SqlExpr) -> AliasExpr {
        AliasExpr { alias: alias.into(), expr, source_member: None }
    }
}
