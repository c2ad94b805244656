use crate::query_model::{Expr, QuerySourceRef};
use crate::sql::{JoinKind, ScalarValue};

/// The root of a query source: a mapped table, a raw SQL fragment, or a
/// nested query.
#[derive(Debug, Clone, PartialEq)]
pub enum FromRoot {
    EntityTable,
    RawSql { sql: String, args: Vec<ScalarValue> },
    SubQuery(Box<QueryModel>),
    /// An in-memory element list, e.g. the receiver of `list.Contains(x)`.
    Collection(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub source: QuerySourceRef,
    pub root: FromRoot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub source: QuerySourceRef,
    pub root: FromRoot,
    pub on: Expr,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub expr: Expr,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultOperator {
    Contains(Expr),
    First,
    Single,
    Count,
    Sum(Expr),
    Min(Expr),
    Max(Expr),
    Average(Expr),
    Distinct,
    Skip(Expr),
    Take(Expr),
    GroupBy {
        key_selector: Expr,
        element_selector: Option<Expr>,
    },
}

/// How many values the query produces, decided by its trailing result
/// operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Sequence,
    Single,
    Scalar,
}

/// The abstract query handed down by the front end: a main source, body
/// clauses in declaration order, a selector and trailing result operators.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryModel {
    pub main_from: FromClause,
    pub joins: Vec<JoinClause>,
    pub where_clauses: Vec<Expr>,
    pub order_by: Vec<Ordering>,
    pub selector: Expr,
    pub result_operators: Vec<ResultOperator>,
    /// Navigation properties requested for eager loading.
    pub eager_loads: Vec<String>,
}

impl QueryModel {
    /// A `from source select source` skeleton.
    pub fn for_source(source: QuerySourceRef, root: FromRoot) -> QueryModel {
        QueryModel {
            selector: Expr::SourceRef(source.clone()),
            main_from: FromClause { source, root },
            joins: Vec::new(),
            where_clauses: Vec::new(),
            order_by: Vec::new(),
            result_operators: Vec::new(),
            eager_loads: Vec::new(),
        }
    }

    pub fn with_where(mut self, predicate: Expr) -> QueryModel {
        self.where_clauses.push(predicate);
        self
    }

    pub fn with_selector(mut self, selector: Expr) -> QueryModel {
        self.selector = selector;
        self
    }

    pub fn with_result_operator(mut self, op: ResultOperator) -> QueryModel {
        self.result_operators.push(op);
        self
    }

    /// Whether the query passes its source through untouched: a bare
    /// `select source` with no joins, filters or orderings.
    pub fn is_identity_query(&self) -> bool {
        self.joins.is_empty()
            && self.where_clauses.is_empty()
            && self.order_by.is_empty()
            && self
                .selector
                .as_source_ref()
                .map(|s| *s == self.main_from.source)
                .unwrap_or(false)
    }

    pub fn output_kind(&self) -> OutputKind {
        match self.result_operators.last() {
            Some(ResultOperator::Contains(_))
            | Some(ResultOperator::Count)
            | Some(ResultOperator::Sum(_))
            | Some(ResultOperator::Min(_))
            | Some(ResultOperator::Max(_))
            | Some(ResultOperator::Average(_)) => OutputKind::Scalar,
            Some(ResultOperator::First) | Some(ResultOperator::Single) => OutputKind::Single,
            _ => OutputKind::Sequence,
        }
    }

    pub fn contains_item(&self) -> Option<&Expr> {
        self.result_operators.iter().find_map(|op| match op {
            ResultOperator::Contains(item) => Some(item),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_model::QuerySource;

    #[test]
    fn identity_query_detection() {
        let p = QuerySource::entity("p", "Product");
        let qm = QueryModel::for_source(p.clone(), FromRoot::EntityTable);
        assert!(qm.is_identity_query());

        let filtered = qm.clone().with_where(Expr::lit(ScalarValue::Bool(true)));
        assert!(!filtered.is_identity_query());

        let reselected = qm.with_selector(Expr::property(Expr::source(&p), "Name"));
        assert!(!reselected.is_identity_query());
    }

    #[test]
    fn output_kind_follows_trailing_operator() {
        let p = QuerySource::entity("p", "Product");
        let qm = QueryModel::for_source(p, FromRoot::EntityTable);
        assert_eq!(qm.output_kind(), OutputKind::Sequence);
        assert_eq!(
            qm.clone().with_result_operator(ResultOperator::First).output_kind(),
            OutputKind::Single
        );
        assert_eq!(
            qm.with_result_operator(ResultOperator::Count).output_kind(),
            OutputKind::Scalar
        );
    }
}
