use crate::sql::SqlExpr;

/// Outcome of translating one host expression.
///
/// `NotTranslatable` is a normal result, not a failure: the caller decides
/// whether to fall back to client evaluation or to reject the query.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Translated(SqlExpr),
    NotTranslatable,
}

impl Translation {
    pub fn expr(self) -> Option<SqlExpr> {
        match self {
            Translation::Translated(expr) => Some(expr),
            Translation::NotTranslatable => None,
        }
    }

    pub fn as_expr(&self) -> Option<&SqlExpr> {
        match self {
            Translation::Translated(expr) => Some(expr),
            Translation::NotTranslatable => None,
        }
    }

    pub fn is_translated(&self) -> bool {
        matches!(self, Translation::Translated(_))
    }

    pub fn is_not_translatable(&self) -> bool {
        matches!(self, Translation::NotTranslatable)
    }
}

impl From<Option<SqlExpr>> for Translation {
    fn from(value: Option<SqlExpr>) -> Translation {
        match value {
            Some(expr) => Translation::Translated(expr),
            None => Translation::NotTranslatable,
        }
    }
}
