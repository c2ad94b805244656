use crate::query_model::{QuerySource, QuerySourceRef};
use crate::select::SelectExpression;
use crate::sql::{ScalarValue, SqlExpr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

/// One entry in a select statement's FROM list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableSource {
    /// A mapped base table.
    Table {
        name: String,
        schema: Option<String>,
        alias: String,
        source: Option<QuerySourceRef>,
    },
    /// A raw SQL fragment standing in for a table.
    RawSql {
        sql: String,
        args: Vec<ScalarValue>,
        alias: String,
        source: Option<QuerySourceRef>,
    },
    /// A nested select rendered as a parenthesized derived table.
    Derived {
        select: Box<SelectExpression>,
        alias: String,
        source: Option<QuerySourceRef>,
    },
    Join {
        kind: JoinKind,
        table: Box<TableSource>,
        on: SqlExpr,
    },
}

impl TableSource {
    pub fn alias(&self) -> &str {
        match self {
            TableSource::Table { alias, .. }
            | TableSource::RawSql { alias, .. }
            | TableSource::Derived { alias, .. } => alias,
            TableSource::Join { table, .. } => table.alias(),
        }
    }

    pub fn query_source(&self) -> Option<&QuerySourceRef> {
        match self {
            TableSource::Table { source, .. }
            | TableSource::RawSql { source, .. }
            | TableSource::Derived { source, .. } => source.as_ref(),
            TableSource::Join { table, .. } => table.query_source(),
        }
    }

    /// Whether this source was registered for the given query source.
    pub fn handles_source(&self, wanted: &QuerySource) -> bool {
        self.query_source().map(|s| s.as_ref() == wanted).unwrap_or(false)
    }
}

/// A raw SQL fragment composes as a sub-SELECT only when its trimmed text
/// starts, case-insensitively, with the keyword SELECT followed by
/// whitespace. Anything else (stored procedure calls, DML with OUTPUT, ...)
/// must run verbatim.
pub fn raw_sql_is_composable(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    let mut chars = trimmed.chars();
    let keyword: String = chars.by_ref().take(6).collect();
    if !keyword.eq_ignore_ascii_case("select") {
        return false;
    }
    matches!(chars.next(), Some(' ') | Some('\t') | Some('\n') | Some('\r'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_with_space_is_composable() {
        assert!(raw_sql_is_composable("SELECT * FROM products"));
        assert!(raw_sql_is_composable("  select\tId FROM products"));
        assert!(raw_sql_is_composable("\nSeLeCt\n* FROM products"));
    }

    #[test]
    fn non_select_text_is_not_composable() {
        assert!(!raw_sql_is_composable("EXEC GetProducts"));
        assert!(!raw_sql_is_composable("WITH cte AS (SELECT 1) SELECT * FROM cte"));
        assert!(!raw_sql_is_composable("SELECTED FROM x"));
        assert!(!raw_sql_is_composable("SELECT"));
    }
}
