use crate::sql::ScalarKind;

/// The provider-specific surface of SQL text generation. The defaults are
/// ANSI-flavored; a provider overrides what its dialect renders
/// differently.
pub trait SqlDialect {
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn parameter_placeholder(&self, name: &str) -> String {
        format!("@{}", name)
    }

    fn cast_type(&self, kind: ScalarKind) -> &'static str {
        match kind {
            ScalarKind::Bool => "BOOLEAN",
            ScalarKind::Int => "BIGINT",
            ScalarKind::Float => "DOUBLE PRECISION",
            ScalarKind::String => "VARCHAR",
            ScalarKind::Bytes => "BLOB",
            ScalarKind::DateTime => "TIMESTAMP",
            ScalarKind::Uuid => "UUID",
        }
    }

    fn limit_offset_clause(&self, limit: Option<String>, offset: Option<String>) -> String {
        let mut clause = String::new();
        if let Some(limit) = limit {
            clause.push_str(" LIMIT ");
            clause.push_str(&limit);
        }
        if let Some(offset) = offset {
            clause.push_str(" OFFSET ");
            clause.push_str(&offset);
        }
        clause
    }
}

/// Plain ANSI rendering, the fallback dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnsiDialect;

impl SqlDialect for AnsiDialect {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted_and_escaped() {
        let d = AnsiDialect;
        assert_eq!(d.quote_identifier("Name"), "\"Name\"");
        assert_eq!(d.quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
