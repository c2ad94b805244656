use crate::query_model::{QueryModel, QuerySourceRef};
use crate::sql::{BinaryOp, ComparisonOp, ScalarKind, ScalarValue};

/// The host-language expression tree handed to the compiler.
///
/// Upstream builds everything except `ReadColumn`, which only the
/// projection stage splices in: it means "read projection slot `index` of
/// the current row".
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(ScalarValue),
    Parameter { name: String, kind: ScalarKind },
    /// Reference to a query source's current element.
    SourceRef(QuerySourceRef),
    /// Member access, e.g. `p.Name`.
    Property { object: Box<Expr>, name: String },
    /// Method call, instance or static.
    Call {
        object: Option<Box<Expr>>,
        method: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    /// Constructor of an anonymous/result object with named members.
    New { members: Vec<String>, args: Vec<Expr> },
    SubQuery(Box<QueryModel>),
    /// String comparison with an explicit operator.
    StringCompare {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cast { expr: Box<Expr>, kind: ScalarKind },
    /// In-memory element list, the left side of `list.Contains(x)`.
    Collection(Vec<Expr>),
    /// Output-only: read projection slot `index`, typed as `kind`.
    ReadColumn { index: usize, kind: Option<ScalarKind> },
}

impl Expr {
    pub fn lit(value: ScalarValue) -> Expr {
        Expr::Literal(value)
    }

    pub fn null() -> Expr {
        Expr::Literal(ScalarValue::Null)
    }

    pub fn source(source: &QuerySourceRef) -> Expr {
        Expr::SourceRef(source.clone())
    }

    pub fn property(object: Expr, name: impl Into<String>) -> Expr {
        Expr::Property { object: Box::new(object), name: name.into() }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn not_eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::NotEq, left, right)
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::AndAlso, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::OrElse, left, right)
    }

    pub fn call(object: Expr, method: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call { object: Some(Box::new(object)), method: method.into(), args }
    }

    pub fn static_call(method: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call { object: None, method: method.into(), args }
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self, Expr::Literal(ScalarValue::Null))
    }

    /// The query source this expression directly references, if it is a
    /// bare source reference.
    pub fn as_source_ref(&self) -> Option<&QuerySourceRef> {
        match self {
            Expr::SourceRef(source) => Some(source),
            _ => None,
        }
    }
}
