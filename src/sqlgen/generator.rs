use std::fmt::Write;

use crate::error::QueryCompilationError;
use crate::metadata::{EntityType, Model};
use crate::select::SelectExpression;
use crate::sql::{BinaryOp, JoinKind, ScalarValue, SqlExpr, TableSource};
use crate::sqlgen::SqlDialect;

/// One command parameter: raw-SQL arguments and extracted literals carry a
/// value; named query parameters are bound at execution time.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandParameter {
    pub name: String,
    pub value: Option<ScalarValue>,
}

/// The product of compilation: command text plus its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    pub text: String,
    pub parameters: Vec<CommandParameter>,
}

/// Renders a finished select statement as SQL text.
pub struct QuerySqlGenerator<'a> {
    select: &'a SelectExpression,
    dialect: &'a dyn SqlDialect,
    verbatim: Option<(&'a str, &'a [ScalarValue])>,
}

impl SelectExpression {
    pub fn create_default_query_sql_generator<'a>(
        &'a self,
        dialect: &'a dyn SqlDialect,
    ) -> QuerySqlGenerator<'a> {
        QuerySqlGenerator { select: self, dialect, verbatim: None }
    }

    /// Generator for a raw-SQL root executed verbatim: the fragment is the
    /// whole command.
    pub fn create_from_sql_query_sql_generator<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [ScalarValue],
        dialect: &'a dyn SqlDialect,
    ) -> QuerySqlGenerator<'a> {
        QuerySqlGenerator { select: self, dialect, verbatim: Some((sql, args)) }
    }
}

impl<'a> QuerySqlGenerator<'a> {
    pub fn generate(&self) -> Result<SqlCommand, QueryCompilationError> {
        if let Some((sql, args)) = self.verbatim {
            let parameters = args
                .iter()
                .enumerate()
                .map(|(i, value)| CommandParameter {
                    name: format!("p{}", i),
                    value: Some(value.clone()),
                })
                .collect();
            return Ok(SqlCommand { text: sql.trim().to_string(), parameters });
        }
        let mut writer = SqlWriter { text: String::new(), parameters: Vec::new(), dialect: self.dialect };
        writer.write_select(self.select)?;
        Ok(SqlCommand { text: writer.text, parameters: writer.parameters })
    }
}

/// Shape check for composed raw-SQL roots: every column the statement
/// reads off the fragment must exist on the mapped entity, otherwise the
/// mismatch surfaces here with the table and column named, instead of as a
/// provider error at execution time.
pub fn validate_raw_sql_projection(
    select: &SelectExpression,
    model: &Model,
    entity: &EntityType,
) -> Result<(), QueryCompilationError> {
    let Some(raw_alias) = select.tables().iter().find_map(|t| match t {
        TableSource::RawSql { alias, .. } => Some(alias.clone()),
        _ => None,
    }) else {
        return Ok(());
    };
    let known: Vec<&str> = model
        .all_properties(entity)
        .iter()
        .map(|p| p.column_name.as_str())
        .collect();
    for entry in select.projection() {
        if let SqlExpr::Column { table_alias, name, .. } = &entry.expr {
            if table_alias == &raw_alias && !known.contains(&name.as_str()) {
                return Err(QueryCompilationError::UnknownColumn {
                    table: entity.table_name.clone(),
                    column: name.clone(),
                });
            }
        }
    }
    Ok(())
}

struct SqlWriter<'a> {
    text: String,
    parameters: Vec<CommandParameter>,
    dialect: &'a dyn SqlDialect,
}

impl<'a> SqlWriter<'a> {
    fn write_select(&mut self, select: &SelectExpression) -> Result<(), QueryCompilationError> {
        self.text.push_str("SELECT ");
        if select.is_distinct() {
            self.text.push_str("DISTINCT ");
        }
        if let Some(star_alias) = select.project_star_alias() {
            let quoted = self.dialect.quote_identifier(star_alias);
            let _ = write!(self.text, "{}.*", quoted);
        } else if select.projection().is_empty() {
            self.text.push('*');
        } else {
            for (i, entry) in select.projection().iter().enumerate() {
                if i > 0 {
                    self.text.push_str(", ");
                }
                self.write_expr(&entry.expr)?;
                let implicit = matches!(&entry.expr, SqlExpr::Column { name, .. } if name == &entry.alias);
                if !implicit && !entry.alias.is_empty() {
                    let quoted = self.dialect.quote_identifier(&entry.alias);
                    let _ = write!(self.text, " AS {}", quoted);
                }
            }
        }

        self.text.push_str(" FROM ");
        for (i, table) in select.tables().iter().enumerate() {
            if i > 0 && !matches!(table, TableSource::Join { .. }) {
                self.text.push_str(" CROSS JOIN ");
            }
            self.write_table(table)?;
        }

        if let Some(predicate) = select.predicate() {
            self.text.push_str(" WHERE ");
            self.write_expr(predicate)?;
        }
        if !select.group_by().is_empty() {
            self.text.push_str(" GROUP BY ");
            for (i, key) in select.group_by().iter().enumerate() {
                if i > 0 {
                    self.text.push_str(", ");
                }
                self.write_expr(key)?;
            }
        }
        if !select.order_by().is_empty() {
            self.text.push_str(" ORDER BY ");
            for (i, ordering) in select.order_by().iter().enumerate() {
                if i > 0 {
                    self.text.push_str(", ");
                }
                self.write_expr(&ordering.expr)?;
                if !ordering.ascending {
                    self.text.push_str(" DESC");
                }
            }
        }

        let limit = match select.limit() {
            Some(expr) => Some(self.render_inline(expr)?),
            None => None,
        };
        let offset = match select.offset() {
            Some(expr) => Some(self.render_inline(expr)?),
            None => None,
        };
        if limit.is_some() || offset.is_some() {
            let clause = self.dialect.limit_offset_clause(limit, offset);
            self.text.push_str(&clause);
        }
        Ok(())
    }

    fn write_table(&mut self, table: &TableSource) -> Result<(), QueryCompilationError> {
        match table {
            TableSource::Table { name, schema, alias, .. } => {
                if let Some(schema) = schema {
                    let quoted = self.dialect.quote_identifier(schema);
                    let _ = write!(self.text, "{}.", quoted);
                }
                let name = self.dialect.quote_identifier(name);
                let alias = self.dialect.quote_identifier(alias);
                let _ = write!(self.text, "{} AS {}", name, alias);
            }
            TableSource::RawSql { sql, args, alias, .. } => {
                for value in args {
                    let name = format!("p{}", self.parameters.len());
                    self.parameters.push(CommandParameter { name, value: Some(value.clone()) });
                }
                let alias = self.dialect.quote_identifier(alias);
                let _ = write!(self.text, "({}) AS {}", sql.trim(), alias);
            }
            TableSource::Derived { select, alias, .. } => {
                self.text.push('(');
                self.write_select(select)?;
                let alias = self.dialect.quote_identifier(alias);
                let _ = write!(self.text, ") AS {}", alias);
            }
            TableSource::Join { kind, table, on } => {
                self.text.push_str(match kind {
                    JoinKind::Inner => " INNER JOIN ",
                    JoinKind::LeftOuter => " LEFT JOIN ",
                });
                self.write_table(table)?;
                self.text.push_str(" ON ");
                self.write_expr(on)?;
            }
        }
        Ok(())
    }

    fn write_expr(&mut self, expr: &SqlExpr) -> Result<(), QueryCompilationError> {
        match expr {
            SqlExpr::Column { table_alias, name, .. } => {
                let table = self.dialect.quote_identifier(table_alias);
                let column = self.dialect.quote_identifier(name);
                let _ = write!(self.text, "{}.{}", table, column);
            }
            SqlExpr::Literal(value) => self.write_literal(value),
            SqlExpr::Parameter(name) => {
                if !self.parameters.iter().any(|p| &p.name == name) {
                    self.parameters.push(CommandParameter { name: name.clone(), value: None });
                }
                let placeholder = self.dialect.parameter_placeholder(name);
                self.text.push_str(&placeholder);
            }
            SqlExpr::Binary { op: BinaryOp::Coalesce, left, right } => {
                self.text.push_str("COALESCE(");
                self.write_expr(left)?;
                self.text.push_str(", ");
                self.write_expr(right)?;
                self.text.push(')');
            }
            SqlExpr::Binary { op, left, right } => {
                self.text.push('(');
                self.write_expr(left)?;
                let _ = write!(self.text, " {} ", op);
                self.write_expr(right)?;
                self.text.push(')');
            }
            SqlExpr::IsNull(inner) => {
                self.write_expr(inner)?;
                self.text.push_str(" IS NULL");
            }
            SqlExpr::Not(inner) => match &**inner {
                SqlExpr::IsNull(operand) => {
                    self.write_expr(operand)?;
                    self.text.push_str(" IS NOT NULL");
                }
                other => {
                    self.text.push_str("NOT (");
                    self.write_expr(other)?;
                    self.text.push(')');
                }
            },
            SqlExpr::Negate(inner) => {
                self.text.push('-');
                self.write_expr(inner)?;
            }
            SqlExpr::In { expr, values } => {
                if values.is_empty() {
                    // an empty list matches nothing
                    self.text.push_str("0 = 1");
                    return Ok(());
                }
                self.write_expr(expr)?;
                self.text.push_str(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.text.push_str(", ");
                    }
                    self.write_expr(value)?;
                }
                self.text.push(')');
            }
            SqlExpr::InSubquery { expr, subquery } => {
                self.write_expr(expr)?;
                self.text.push_str(" IN (");
                self.write_select(subquery)?;
                self.text.push(')');
            }
            SqlExpr::Case { when, then, otherwise } => {
                self.text.push_str("CASE WHEN ");
                self.write_expr(when)?;
                self.text.push_str(" THEN ");
                self.write_expr(then)?;
                self.text.push_str(" ELSE ");
                self.write_expr(otherwise)?;
                self.text.push_str(" END");
            }
            SqlExpr::StringCompare { op, left, right } => {
                self.text.push('(');
                self.write_expr(left)?;
                let _ = write!(self.text, " {} ", op);
                self.write_expr(right)?;
                self.text.push(')');
            }
            SqlExpr::Cast { expr, kind } => {
                self.text.push_str("CAST(");
                self.write_expr(expr)?;
                let _ = write!(self.text, " AS {})", self.dialect.cast_type(*kind));
            }
            SqlExpr::Tuple(elements) => {
                self.text.push('(');
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        self.text.push_str(", ");
                    }
                    self.write_expr(element)?;
                }
                self.text.push(')');
            }
            SqlExpr::Like { expr, pattern } => {
                self.write_expr(expr)?;
                self.text.push_str(" LIKE ");
                self.write_expr(pattern)?;
            }
            SqlExpr::Function { name, args } => {
                let _ = write!(self.text, "{}(", name);
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.text.push_str(", ");
                    }
                    self.write_expr(arg)?;
                }
                self.text.push(')');
            }
            SqlExpr::Star => self.text.push('*'),
            SqlExpr::Subquery(select) => {
                self.text.push('(');
                self.write_select(select)?;
                self.text.push(')');
            }
        }
        Ok(())
    }

    /// Literals of textual and binary kinds are extracted into parameters;
    /// plain numerics and booleans inline.
    fn write_literal(&mut self, value: &ScalarValue) {
        match value {
            ScalarValue::Null
            | ScalarValue::Bool(_)
            | ScalarValue::Int(_)
            | ScalarValue::Float(_) => {
                let _ = write!(self.text, "{}", value);
            }
            _ => {
                let name = format!("p{}", self.parameters.len());
                let placeholder = self.dialect.parameter_placeholder(&name);
                self.parameters.push(CommandParameter { name, value: Some(value.clone()) });
                self.text.push_str(&placeholder);
            }
        }
    }

    fn render_inline(&mut self, expr: &SqlExpr) -> Result<String, QueryCompilationError> {
        let start = self.text.len();
        self.write_expr(expr)?;
        Ok(self.text.split_off(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_model::QuerySource;
    use crate::sql::ScalarKind;
    use crate::sqlgen::AnsiDialect;

    fn product_select() -> SelectExpression {
        let p = QuerySource::entity("p", "Product");
        let mut select = SelectExpression::new();
        select.add_table(TableSource::Table {
            name: "Products".into(),
            schema: None,
            alias: "p".into(),
            source: Some(p),
        });
        select
    }

    fn col(name: &str, kind: ScalarKind) -> SqlExpr {
        SqlExpr::Column { table_alias: "p".into(), name: name.into(), kind, nullable: false }
    }

    #[test]
    fn renders_basic_select() {
        let mut select = product_select();
        select.add_to_projection(col("Id", ScalarKind::Int));
        select.add_to_projection(col("Name", ScalarKind::String));
        select.add_to_predicate(SqlExpr::eq(
            col("Id", ScalarKind::Int),
            SqlExpr::Literal(ScalarValue::Int(3)),
        ));
        let dialect = AnsiDialect;
        let command = select.create_default_query_sql_generator(&dialect).generate().unwrap();
        assert_eq!(
            command.text,
            "SELECT \"p\".\"Id\", \"p\".\"Name\" FROM \"Products\" AS \"p\" WHERE (\"p\".\"Id\" = 3)"
        );
        assert!(command.parameters.is_empty());
    }

    #[test]
    fn string_literals_become_parameters() {
        let mut select = product_select();
        select.add_to_projection(col("Id", ScalarKind::Int));
        select.add_to_predicate(SqlExpr::eq(
            col("Name", ScalarKind::String),
            SqlExpr::Literal(ScalarValue::String("Tea".into())),
        ));
        let dialect = AnsiDialect;
        let command = select.create_default_query_sql_generator(&dialect).generate().unwrap();
        assert!(command.text.contains("= @p0"));
        assert_eq!(
            command.parameters,
            vec![CommandParameter { name: "p0".into(), value: Some(ScalarValue::String("Tea".into())) }]
        );
    }

    #[test]
    fn is_not_null_renders_compactly() {
        let mut select = product_select();
        select.add_to_projection(col("Id", ScalarKind::Int));
        select.add_to_predicate(SqlExpr::Not(Box::new(SqlExpr::IsNull(Box::new(col(
            "Name",
            ScalarKind::String,
        ))))));
        let dialect = AnsiDialect;
        let command = select.create_default_query_sql_generator(&dialect).generate().unwrap();
        assert!(command.text.ends_with("WHERE \"p\".\"Name\" IS NOT NULL"));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let mut select = product_select();
        select.add_to_projection(col("Id", ScalarKind::Int));
        select.add_to_predicate(SqlExpr::In {
            expr: Box::new(col("Id", ScalarKind::Int)),
            values: vec![],
        });
        let dialect = AnsiDialect;
        let command = select.create_default_query_sql_generator(&dialect).generate().unwrap();
        assert!(command.text.ends_with("WHERE 0 = 1"));
    }

    #[test]
    fn limit_offset_render_inline() {
        let mut select = product_select();
        select.add_to_projection(col("Id", ScalarKind::Int));
        select.set_limit(Some(SqlExpr::Literal(ScalarValue::Int(10))));
        select.set_offset(Some(SqlExpr::Literal(ScalarValue::Int(20))));
        let dialect = AnsiDialect;
        let command = select.create_default_query_sql_generator(&dialect).generate().unwrap();
        assert!(command.text.ends_with(" LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn verbatim_generator_passes_text_through() {
        let select = product_select();
        let dialect = AnsiDialect;
        let args = vec![ScalarValue::Int(5)];
        let command = select
            .create_from_sql_query_sql_generator("EXEC GetProducts", &args, &dialect)
            .generate()
            .unwrap();
        assert_eq!(command.text, "EXEC GetProducts");
        assert_eq!(command.parameters.len(), 1);
        assert_eq!(command.parameters[0].value, Some(ScalarValue::Int(5)));
    }

    #[test]
    fn validates_composed_raw_sql_columns() {
        use crate::metadata::{EntityType, Model, Property};

        let model = Model::new().with_entity(
            EntityType::new("Product", "Products")
                .with_property(Property::new("Id", ScalarKind::Int))
                .with_key(&["Id"]),
        );
        let entity = model.find_entity_type("Product").unwrap();

        let p = QuerySource::entity("p", "Product");
        let mut select = SelectExpression::new();
        select.add_table(TableSource::RawSql {
            sql: "SELECT * FROM Products".into(),
            args: vec![],
            alias: "p".into(),
            source: Some(p),
        });
        select.add_to_projection(col("Id", ScalarKind::Int));
        assert!(validate_raw_sql_projection(&select, &model, entity).is_ok());

        select.add_to_projection(col("Vendor", ScalarKind::String));
        match validate_raw_sql_projection(&select, &model, entity) {
            Err(QueryCompilationError::UnknownColumn { table, column }) => {
                assert_eq!(table, "Products");
                assert_eq!(column, "Vendor");
            }
            other => panic!("expected UnknownColumn, got {:?}", other),
        }
    }
}
