use crate::error::QueryCompilationError;
use crate::metadata::Property;
use crate::query_model::QuerySourceRef;
use crate::sql::{AliasExpr, ScalarValue, SqlExpr, TableSource};

/// One ORDER BY entry of a select statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlOrdering {
    pub expr: SqlExpr,
    pub ascending: bool,
}

/// Mutable builder for one SELECT statement.
///
/// Projection indices are stable for the lifetime of the builder: entries
/// are only ever appended, and `add_to_projection` returns the index of an
/// existing structurally-equal entry instead of appending a duplicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SelectExpression {
    /// Empty string marks an anonymous (inlinable) select.
    pub alias: String,
    tables: Vec<TableSource>,
    projection: Vec<AliasExpr>,
    predicate: Option<SqlExpr>,
    group_by: Vec<SqlExpr>,
    order_by: Vec<SqlOrdering>,
    limit: Option<SqlExpr>,
    offset: Option<SqlExpr>,
    distinct: bool,
    /// When set, the statement renders `alias.*` instead of an explicit
    /// projection list.
    project_star_alias: Option<String>,
}

impl SelectExpression {
    pub fn new() -> SelectExpression {
        SelectExpression::default()
    }

    pub fn with_alias(alias: impl Into<String>) -> SelectExpression {
        SelectExpression { alias: alias.into(), ..SelectExpression::default() }
    }

    pub fn tables(&self) -> &[TableSource] {
        &self.tables
    }

    pub fn projection(&self) -> &[AliasExpr] {
        &self.projection
    }

    pub fn predicate(&self) -> Option<&SqlExpr> {
        self.predicate.as_ref()
    }

    pub fn group_by(&self) -> &[SqlExpr] {
        &self.group_by
    }

    pub fn order_by(&self) -> &[SqlOrdering] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<&SqlExpr> {
        self.limit.as_ref()
    }

    pub fn offset(&self) -> Option<&SqlExpr> {
        self.offset.as_ref()
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn project_star_alias(&self) -> Option<&str> {
        self.project_star_alias.as_deref()
    }

    /// Appends a table source. Never dedups: the same table joined twice
    /// is two sources with two aliases.
    pub fn add_table(&mut self, table: TableSource) {
        self.tables.push(table);
    }

    /// Removes and returns the most recently added table source, so a
    /// freshly registered table can be rewrapped as a join.
    pub fn pop_table(&mut self) -> Option<TableSource> {
        self.tables.pop()
    }

    /// The table registered for a query source. Failure here is an
    /// internal invariant violation: roots register their tables before
    /// anything binds against them.
    pub fn get_table_for_query_source(
        &self,
        source: &QuerySourceRef,
    ) -> Result<&TableSource, QueryCompilationError> {
        self.tables
            .iter()
            .find(|t| t.handles_source(source))
            .ok_or_else(|| QueryCompilationError::UnregisteredQuerySource(source.name.clone()))
    }

    /// Whether the source is bindable here, directly or through a nested
    /// derived table.
    pub fn reaches_source(&self, source: &QuerySourceRef) -> bool {
        self.tables.iter().any(|t| table_reaches_source(t, source))
    }

    /// Adds an expression to the projection, wrapping it in an alias.
    /// Structurally equal expressions share one slot; the returned index is
    /// stable.
    pub fn add_to_projection(&mut self, expr: SqlExpr) -> usize {
        if let Some(index) = self.projection.iter().position(|entry| entry.expr == expr) {
            return index;
        }
        let base = match &expr {
            SqlExpr::Column { name, .. } => name.clone(),
            _ => "c".to_string(),
        };
        let alias = self.unique_alias(&base);
        self.projection.push(AliasExpr::new(alias, expr));
        self.projection.len() - 1
    }

    /// Root-relative overload: binds the property to its column first.
    pub fn add_property_to_projection(
        &mut self,
        property: &Property,
        source: &QuerySourceRef,
    ) -> Result<usize, QueryCompilationError> {
        let column = self.bind_property(property, source)?;
        Ok(self.add_to_projection(column))
    }

    /// Resolves a property to a column reference against the table
    /// registered for `source`. A derived-table source is resolved by
    /// binding inside the nested select and projecting the column out of
    /// it.
    pub fn bind_property(
        &mut self,
        property: &Property,
        source: &QuerySourceRef,
    ) -> Result<SqlExpr, QueryCompilationError> {
        if !self.reaches_source(source) {
            return Err(QueryCompilationError::UnregisteredQuerySource(source.name.clone()));
        }
        for table in &mut self.tables {
            if let Some(column) = bind_property_in_table(table, property, source)? {
                return Ok(column);
            }
        }
        Err(QueryCompilationError::UnregisteredQuerySource(source.name.clone()))
    }

    /// Projection slot of a property, adding the column lazily when it is
    /// not projected yet.
    pub fn get_projection_index(
        &mut self,
        property: &Property,
        source: &QuerySourceRef,
    ) -> Result<usize, QueryCompilationError> {
        let column = self.bind_property(property, source)?;
        if let Some(index) = self.projection.iter().position(|entry| entry.expr == column) {
            return Ok(index);
        }
        Ok(self.add_to_projection(column))
    }

    pub fn set_source_member(&mut self, index: usize, member: impl Into<String>) {
        if let Some(entry) = self.projection.get_mut(index) {
            entry.source_member = Some(member.into());
        }
    }

    pub fn set_predicate(&mut self, predicate: Option<SqlExpr>) {
        self.predicate = predicate;
    }

    /// AND-composes onto the existing predicate; never overwrites.
    pub fn add_to_predicate(&mut self, predicate: SqlExpr) {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => SqlExpr::and(existing, predicate),
            None => predicate,
        });
    }

    pub fn add_to_group_by(&mut self, expr: SqlExpr) {
        if !self.group_by.contains(&expr) {
            self.group_by.push(expr);
        }
    }

    /// Appends an ordering unless an ordering over the same expression is
    /// already present.
    pub fn add_to_order_by(&mut self, expr: SqlExpr, ascending: bool) {
        if self.order_by.iter().any(|o| o.expr == expr) {
            return;
        }
        self.order_by.push(SqlOrdering { expr, ascending });
    }

    pub fn clear_order_by(&mut self) {
        self.order_by.clear();
    }

    pub fn set_limit(&mut self, limit: Option<SqlExpr>) {
        self.limit = limit;
    }

    pub fn set_offset(&mut self, offset: Option<SqlExpr>) {
        self.offset = offset;
    }

    pub fn set_distinct(&mut self, distinct: bool) {
        self.distinct = distinct;
    }

    pub fn set_project_star_alias(&mut self, alias: Option<String>) {
        self.project_star_alias = alias;
    }

    /// Replaces the projection with a single aggregate (COUNT, SUM, ...).
    pub fn set_aggregate_projection(&mut self, expr: SqlExpr) {
        self.projection.clear();
        self.project_star_alias = None;
        self.projection.push(AliasExpr::new(self.unique_alias("c"), expr));
    }

    /// Whether the projection is a single aggregate call (COUNT, SUM, ...).
    pub fn is_aggregate_projection(&self) -> bool {
        self.projection.len() == 1 && self.projection[0].expr.is_aggregate()
    }

    /// Drops projection entries from `from_index` on. Used to roll back
    /// slots added while probing a sub-query that ends up not lifted.
    pub fn remove_range_from_projection(&mut self, from_index: usize) {
        self.projection.truncate(from_index);
    }

    /// A select that adds nothing over its single table: no projection,
    /// predicate, grouping, ordering, paging or DISTINCT.
    pub fn is_identity_query(&self) -> bool {
        self.tables.len() == 1
            && self.projection.is_empty()
            && self.project_star_alias.is_none()
            && self.predicate.is_none()
            && self.group_by.is_empty()
            && self.order_by.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
            && !self.distinct
    }

    /// Raw SQL text of the root, when the root is a raw-SQL fragment.
    pub fn raw_sql_root(&self) -> Option<(&str, &[ScalarValue])> {
        match self.tables.first() {
            Some(TableSource::RawSql { sql, args, .. }) => Some((sql, args)),
            _ => None,
        }
    }

    fn unique_alias(&self, base: &str) -> String {
        let taken = |candidate: &str| {
            self.projection.iter().any(|entry| entry.alias.eq_ignore_ascii_case(candidate))
        };
        if !taken(base) {
            return base.to_string();
        }
        let mut n = 0usize;
        loop {
            let candidate = format!("{}{}", base, n);
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn table_reaches_source(table: &TableSource, source: &QuerySourceRef) -> bool {
    if table.handles_source(source) {
        return true;
    }
    match table {
        TableSource::Derived { select, .. } => select.reaches_source(source),
        TableSource::Join { table, .. } => table_reaches_source(table, source),
        _ => false,
    }
}

/// Binds a property against one FROM entry when the entry covers the
/// source. A direct table yields the column on its alias; a derived table
/// binds inside the nested select (possibly against a different source the
/// nested select wraps) and projects the column out.
fn bind_property_in_table(
    table: &mut TableSource,
    property: &Property,
    source: &QuerySourceRef,
) -> Result<Option<SqlExpr>, QueryCompilationError> {
    match table {
        TableSource::Table { .. } | TableSource::RawSql { .. } => {
            if !table.handles_source(source) {
                return Ok(None);
            }
            Ok(Some(SqlExpr::Column {
                table_alias: table.alias().to_string(),
                name: property.column_name.clone(),
                kind: property.kind,
                nullable: property.nullable,
            }))
        }
        TableSource::Derived { select, alias, source: own_source } => {
            let direct = own_source.as_ref().map(|s| s == source).unwrap_or(false);
            let inner_source = if select.reaches_source(source) {
                Some(source.clone())
            } else if direct {
                // the derived table stands in for this source as a whole;
                // bind against whatever the nested select wraps
                select.tables.iter().find_map(|t| t.query_source()).cloned()
            } else {
                None
            };
            let Some(inner_source) = inner_source else {
                return Ok(None);
            };
            let inner = select.bind_property(property, &inner_source)?;
            let index = select.add_to_projection(inner);
            let projected = &select.projection[index];
            Ok(Some(SqlExpr::Column {
                table_alias: alias.clone(),
                name: projected.alias.clone(),
                kind: property.kind,
                nullable: property.nullable,
            }))
        }
        TableSource::Join { table, .. } => bind_property_in_table(table, property, source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_model::QuerySource;
    use crate::sql::ScalarKind;

    fn product_table(source: &QuerySourceRef) -> TableSource {
        TableSource::Table {
            name: "Products".into(),
            schema: None,
            alias: "p".into(),
            source: Some(source.clone()),
        }
    }

    fn name_property() -> Property {
        Property::new("Name", ScalarKind::String)
    }

    #[test]
    fn projection_dedups_and_keeps_indices_stable() {
        let p = QuerySource::entity("p", "Product");
        let mut select = SelectExpression::new();
        select.add_table(product_table(&p));

        let id = Property::new("Id", ScalarKind::Int);
        let first = select.add_property_to_projection(&id, &p).unwrap();
        let second = select.add_property_to_projection(&name_property(), &p).unwrap();
        let again = select.add_property_to_projection(&id, &p).unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(again, first);
        assert_eq!(select.projection().len(), 2);
    }

    #[test]
    fn projection_index_adds_the_column_lazily() {
        let p = QuerySource::entity("p", "Product");
        let mut select = SelectExpression::new();
        select.add_table(product_table(&p));

        let index = select.get_projection_index(&name_property(), &p).unwrap();
        assert_eq!(index, 0);
        assert_eq!(select.projection().len(), 1);
        assert_eq!(select.projection()[0].alias, "Name");

        let again = select.get_projection_index(&name_property(), &p).unwrap();
        assert_eq!(again, index);
        assert_eq!(select.projection().len(), 1);
    }

    #[test]
    fn aliases_uniquify_case_insensitively() {
        let mut select = SelectExpression::new();
        let a = SqlExpr::Column {
            table_alias: "p".into(),
            name: "name".into(),
            kind: ScalarKind::String,
            nullable: false,
        };
        let b = SqlExpr::Column {
            table_alias: "q".into(),
            name: "Name".into(),
            kind: ScalarKind::String,
            nullable: false,
        };
        select.add_to_projection(a);
        select.add_to_projection(b);
        let aliases: Vec<&str> = select.projection().iter().map(|e| e.alias.as_str()).collect();
        assert_eq!(aliases, vec!["name", "Name0"]);
    }

    #[test]
    fn unregistered_source_is_an_error() {
        let p = QuerySource::entity("p", "Product");
        let q = QuerySource::entity("q", "Order");
        let mut select = SelectExpression::new();
        select.add_table(product_table(&p));

        let err = select.bind_property(&name_property(), &q).unwrap_err();
        match err {
            QueryCompilationError::UnregisteredQuerySource(name) => assert_eq!(name, "q"),
            other => panic!("expected UnregisteredQuerySource, got {:?}", other),
        }
    }

    #[test]
    fn predicate_composes_with_and() {
        let mut select = SelectExpression::new();
        let a = SqlExpr::Literal(ScalarValue::Bool(true));
        let b = SqlExpr::Literal(ScalarValue::Bool(false));
        select.add_to_predicate(a.clone());
        select.add_to_predicate(b.clone());
        match select.predicate() {
            Some(SqlExpr::Binary { op: crate::sql::BinaryOp::AndAlso, left, right }) => {
                assert_eq!(**left, a);
                assert_eq!(**right, b);
            }
            other => panic!("expected AND composition, got {:?}", other),
        }
    }

    #[test]
    fn binding_through_derived_table_projects_inner_column() {
        let inner_source = QuerySource::entity("p", "Product");
        let mut inner = SelectExpression::with_alias("t");
        inner.add_table(product_table(&inner_source));

        let outer_source = QuerySource::entity("o", "Product");
        let mut outer = SelectExpression::new();
        outer.add_table(TableSource::Derived {
            select: Box::new(inner),
            alias: "t".into(),
            source: Some(outer_source.clone()),
        });

        let column = outer.bind_property(&name_property(), &outer_source).unwrap();
        match column {
            SqlExpr::Column { table_alias, name, .. } => {
                assert_eq!(table_alias, "t");
                assert_eq!(name, "Name");
            }
            other => panic!("expected column over derived table, got {:?}", other),
        }
        // the inner select now projects the column out
        match outer.tables() {
            [TableSource::Derived { select, .. }] => {
                assert_eq!(select.projection().len(), 1);
                assert_eq!(select.projection()[0].alias, "Name");
            }
            other => panic!("expected a single derived table, got {:?}", other),
        }
    }

    #[test]
    fn identity_query_goes_false_after_any_shaping() {
        let p = QuerySource::entity("p", "Product");
        let mut select = SelectExpression::new();
        select.add_table(product_table(&p));
        assert!(select.is_identity_query());
        select.set_distinct(true);
        assert!(!select.is_identity_query());
    }
}
