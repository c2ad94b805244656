use indexmap::IndexMap;
use tracing::warn;

use crate::error::QueryCompilationError;
use crate::metadata::EntityType;
use crate::query::{ParentScope, QueryCompilationContext};
use crate::query_model::{
    Expr, FromRoot, JoinClause, Ordering, QueryModel, QuerySourceRef, ResultOperator,
};
use crate::select::SelectExpression;
use crate::shaper::{EntityShaper, Shaper, ValueBufferShaper};
use crate::sql::{raw_sql_is_composable, BinaryOp, ScalarValue, SqlExpr, TableSource};
use crate::translate::{SqlTranslator, Translation};

/// Compiles one query model into SQL builder state: a select statement per
/// query source, plus everything that could not be pushed into SQL and
/// stays on the client.
pub struct QueryModelVisitor<'c, 'm> {
    pub(crate) context: &'c QueryCompilationContext<'m>,
    pub queries: IndexMap<usize, SelectExpression>,
    pub group_keys: IndexMap<usize, Expr>,
    pub(crate) main_source: Option<QuerySourceRef>,
    /// Catch-all: some part of the query cannot run on the server at all.
    pub requires_client_eval: bool,
    pub requires_client_filter: bool,
    pub requires_client_projection: bool,
    pub requires_client_order_by: bool,
    pub requires_client_result_operator: bool,
    /// Filter residue for the caller to apply after materialization.
    pub client_filter: Option<Expr>,
    pub(crate) shaped_selector: Option<Expr>,
    pub(crate) entity_shape: Option<EntityShaper>,
    pub(crate) grouping_key: Option<Expr>,
    root_verbatim: bool,
    root_non_composable: bool,
}

impl<'c, 'm> QueryModelVisitor<'c, 'm> {
    pub fn new(context: &'c QueryCompilationContext<'m>) -> QueryModelVisitor<'c, 'm> {
        QueryModelVisitor {
            context,
            queries: IndexMap::new(),
            group_keys: IndexMap::new(),
            main_source: None,
            requires_client_eval: false,
            requires_client_filter: false,
            requires_client_projection: false,
            requires_client_order_by: false,
            requires_client_result_operator: false,
            client_filter: None,
            shaped_selector: None,
            entity_shape: None,
            grouping_key: None,
            root_verbatim: false,
            root_non_composable: false,
        }
    }

    /// A query lifts into an enclosing SQL statement only when nothing in
    /// it fell back to client evaluation.
    pub fn is_liftable(&self) -> bool {
        !(self.requires_client_eval
            || self.requires_client_filter
            || self.requires_client_projection
            || self.requires_client_order_by
            || self.requires_client_result_operator)
    }

    pub fn is_root_verbatim(&self) -> bool {
        self.root_verbatim
    }

    pub fn main_select(&self) -> Option<&SelectExpression> {
        let id = self.main_source.as_ref()?.id();
        self.queries.get(&id)
    }

    pub fn main_select_mut(&mut self) -> Option<&mut SelectExpression> {
        let id = self.main_source.as_ref()?.id();
        self.queries.get_mut(&id)
    }

    pub fn into_main_select(mut self) -> Option<SelectExpression> {
        let id = self.main_source.as_ref()?.id();
        self.queries.shift_remove(&id)
    }

    pub fn visit_query_model(
        &mut self,
        qm: &QueryModel,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<(), QueryCompilationError> {
        if !qm.eager_loads.is_empty() {
            self.context.require_buffering();
        }
        self.visit_main_from(qm, parent)?;
        for join in &qm.joins {
            self.visit_join(join, parent)?;
        }
        for predicate in &qm.where_clauses {
            self.visit_where(predicate, parent)?;
        }
        self.visit_orderings(&qm.order_by, parent)?;
        self.visit_result_operators(qm, parent)?;
        self.visit_selector(qm, parent)?;
        Ok(())
    }

    fn visit_main_from(
        &mut self,
        qm: &QueryModel,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<(), QueryCompilationError> {
        let source = qm.main_from.source.clone();
        self.main_source = Some(source.clone());
        match &qm.main_from.root {
            FromRoot::EntityTable => {
                let entity = self.entity_for(&source)?;
                let base = table_alias_base(&source.name, &entity.table_name);
                let alias = self.context.create_unique_table_alias(&base);
                let mut select = SelectExpression::new();
                select.add_table(TableSource::Table {
                    name: entity.table_name.clone(),
                    schema: entity.schema.clone(),
                    alias: alias.clone(),
                    source: Some(source.clone()),
                });
                if let Some(predicate) = self.discriminator_predicate(entity, &alias) {
                    select.add_to_predicate(predicate);
                }
                self.queries.insert(source.id(), select);
            }
            FromRoot::RawSql { sql, args } => {
                let composable = raw_sql_is_composable(sql);
                if !composable && !qm.eager_loads.is_empty() {
                    return Err(QueryCompilationError::IncludeOnNonComposableSql(sql.clone()));
                }
                self.root_non_composable = !composable;
                self.root_verbatim = !composable
                    || (qm.is_identity_query()
                        && qm.result_operators.is_empty()
                        && qm.eager_loads.is_empty());
                let base = if source.name.is_empty() { "t" } else { source.name.as_str() };
                let alias = self.context.create_unique_table_alias(base);
                let mut select = SelectExpression::new();
                select.add_table(TableSource::RawSql {
                    sql: sql.clone(),
                    args: args.clone(),
                    alias: alias.clone(),
                    source: Some(source.clone()),
                });
                if composable && !self.root_verbatim {
                    if let Some(entity) = source
                        .entity_type_name()
                        .and_then(|name| self.context.model.find_entity_type(name))
                    {
                        if let Some(predicate) = self.discriminator_predicate(entity, &alias) {
                            select.add_to_predicate(predicate);
                        }
                    }
                }
                self.queries.insert(source.id(), select);
            }
            FromRoot::SubQuery(inner) => {
                let mut inner_model = (**inner).clone();
                let group_key = match inner_model.result_operators.last() {
                    Some(ResultOperator::GroupBy { key_selector, .. }) => {
                        Some(key_selector.clone())
                    }
                    _ => None,
                };
                if group_key.is_some() {
                    inner_model.result_operators.pop();
                }
                let mut child = QueryModelVisitor::new(self.context);
                child.visit_query_model(&inner_model, parent)?;
                if !child.is_liftable() {
                    self.requires_client_eval = true;
                }
                let Some(mut child_select) = child.into_main_select() else {
                    self.requires_client_eval = true;
                    self.queries.insert(source.id(), SelectExpression::new());
                    return Ok(());
                };
                let alias = self.context.create_subquery_alias();
                child_select.alias = alias.clone();
                let mut select = SelectExpression::new();
                select.add_table(TableSource::Derived {
                    select: Box::new(child_select),
                    alias,
                    source: Some(source.clone()),
                });
                self.queries.insert(source.id(), select);
                if let Some(key) = group_key {
                    self.group_keys.insert(source.id(), key.clone());
                    self.apply_server_group_by(&key, parent)?;
                }
            }
            FromRoot::Collection(_) => {
                // only meaningful as the receiver of a containment test;
                // as a query root the whole query stays on the client
                self.requires_client_eval = true;
                self.queries.insert(source.id(), SelectExpression::new());
            }
        }
        Ok(())
    }

    fn visit_join(
        &mut self,
        join: &JoinClause,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<(), QueryCompilationError> {
        if !matches!(join.root, FromRoot::EntityTable) {
            self.requires_client_eval = true;
            return Ok(());
        }
        let entity = self.entity_for(&join.source)?;
        let base = table_alias_base(&join.source.name, &entity.table_name);
        let alias = self.context.create_unique_table_alias(&base);
        let table = TableSource::Table {
            name: entity.table_name.clone(),
            schema: entity.schema.clone(),
            alias: alias.clone(),
            source: Some(join.source.clone()),
        };
        let discriminator = self.discriminator_predicate(entity, &alias);

        let Some(main_id) = self.main_source.as_ref().map(|s| s.id()) else {
            self.requires_client_eval = true;
            return Ok(());
        };
        if let Some(select) = self.queries.get_mut(&main_id) {
            select.add_table(table);
        }
        let condition = {
            let mut translator =
                SqlTranslator::new(self.context, &mut self.queries, &self.group_keys, parent);
            translator.translate(&join.on)?
        };
        match condition {
            Translation::Translated(on) => {
                if let Some(select) = self.queries.get_mut(&main_id) {
                    if let Some(table) = select.pop_table() {
                        select.add_table(TableSource::Join {
                            kind: join.kind,
                            table: Box::new(table),
                            on,
                        });
                    }
                    if let Some(predicate) = discriminator {
                        select.add_to_predicate(predicate);
                    }
                }
            }
            Translation::NotTranslatable => {
                // back the table out again, otherwise it renders as a bare
                // cross join and multiplies the result set
                warn!(source = %join.source, "join condition cannot be translated; falling back to client evaluation");
                if let Some(select) = self.queries.get_mut(&main_id) {
                    select.pop_table();
                }
                self.requires_client_eval = true;
                self.push_client_filter(join.on.clone());
            }
        }
        Ok(())
    }

    fn visit_where(
        &mut self,
        predicate: &Expr,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<(), QueryCompilationError> {
        if self.root_non_composable {
            warn!("filter over a non-composable raw SQL root is evaluated client-side");
            self.requires_client_filter = true;
            self.push_client_filter(predicate.clone());
            return Ok(());
        }
        let (result, salvage) = {
            let mut translator =
                SqlTranslator::new(self.context, &mut self.queries, &self.group_keys, parent)
                    .for_top_level_predicate(predicate);
            let result = translator.translate(predicate)?;
            (result, translator.client_eval_predicate.take())
        };
        match result {
            Translation::Translated(sql) => {
                if let Some(residue) = salvage {
                    warn!(residue = ?residue, "part of the filter is evaluated client-side");
                    self.requires_client_filter = true;
                    self.push_client_filter(residue);
                }
                if let Some(select) = self.main_select_mut() {
                    select.add_to_predicate(sql);
                }
            }
            Translation::NotTranslatable => {
                warn!(predicate = ?predicate, "filter cannot be translated; evaluated client-side");
                self.requires_client_filter = true;
                self.push_client_filter(predicate.clone());
            }
        }
        Ok(())
    }

    fn push_client_filter(&mut self, predicate: Expr) {
        self.client_filter = Some(match self.client_filter.take() {
            Some(existing) => Expr::and(existing, predicate),
            None => predicate,
        });
    }

    /// Orderings are all-or-nothing: one untranslatable key moves the
    /// whole ORDER BY to the client, because a partial server sort would
    /// not be stable under the client's re-sort.
    fn visit_orderings(
        &mut self,
        orderings: &[Ordering],
        parent: Option<&ParentScope<'_>>,
    ) -> Result<(), QueryCompilationError> {
        if orderings.is_empty() {
            return Ok(());
        }
        if self.root_non_composable {
            self.requires_client_order_by = true;
            return Ok(());
        }
        let mut translated = Vec::with_capacity(orderings.len());
        for ordering in orderings {
            let result = {
                let mut translator =
                    SqlTranslator::new(self.context, &mut self.queries, &self.group_keys, parent);
                translator.translate(&ordering.expr)?
            };
            match result {
                Translation::Translated(expr) => translated.push((expr, ordering.ascending)),
                Translation::NotTranslatable => {
                    warn!("ordering cannot be translated; sorting client-side");
                    self.requires_client_order_by = true;
                    if let Some(select) = self.main_select_mut() {
                        select.clear_order_by();
                    }
                    return Ok(());
                }
            }
        }
        if let Some(select) = self.main_select_mut() {
            for (expr, ascending) in translated {
                select.add_to_order_by(expr, ascending);
            }
        }
        Ok(())
    }

    fn visit_result_operators(
        &mut self,
        qm: &QueryModel,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<(), QueryCompilationError> {
        if qm.result_operators.is_empty() {
            return Ok(());
        }
        if self.root_non_composable {
            self.requires_client_result_operator = true;
            return Ok(());
        }
        for op in &qm.result_operators {
            match op {
                ResultOperator::Take(count) => {
                    match self.translate_simple(count, parent)? {
                        Some(expr) => {
                            if let Some(select) = self.main_select_mut() {
                                select.set_limit(Some(expr));
                            }
                        }
                        None => self.requires_client_result_operator = true,
                    }
                }
                ResultOperator::Skip(count) => {
                    match self.translate_simple(count, parent)? {
                        Some(expr) => {
                            if let Some(select) = self.main_select_mut() {
                                select.set_offset(Some(expr));
                            }
                        }
                        None => self.requires_client_result_operator = true,
                    }
                }
                ResultOperator::Distinct => {
                    if let Some(select) = self.main_select_mut() {
                        select.set_distinct(true);
                    }
                }
                ResultOperator::First | ResultOperator::Single => {
                    if let Some(select) = self.main_select_mut() {
                        if select.limit().is_none() {
                            select.set_limit(Some(SqlExpr::Literal(ScalarValue::Int(1))));
                        }
                    }
                }
                ResultOperator::Count => {
                    if let Some(select) = self.main_select_mut() {
                        select.set_aggregate_projection(SqlExpr::Function {
                            name: "COUNT".into(),
                            args: vec![SqlExpr::Star],
                        });
                    }
                }
                ResultOperator::Sum(selector)
                | ResultOperator::Min(selector)
                | ResultOperator::Max(selector)
                | ResultOperator::Average(selector) => {
                    let name = match op {
                        ResultOperator::Sum(_) => "SUM",
                        ResultOperator::Min(_) => "MIN",
                        ResultOperator::Max(_) => "MAX",
                        _ => "AVG",
                    };
                    match self.translate_simple(selector, parent)? {
                        Some(expr) => {
                            if let Some(select) = self.main_select_mut() {
                                select.set_aggregate_projection(SqlExpr::Function {
                                    name: name.into(),
                                    args: vec![expr],
                                });
                            }
                        }
                        None => self.requires_client_result_operator = true,
                    }
                }
                ResultOperator::GroupBy { key_selector, .. } => {
                    self.apply_client_grouping(key_selector, parent)?;
                }
                ResultOperator::Contains(_) => {
                    // containment over the root query only makes sense as
                    // a sub-query; at the top it stays on the client
                    self.requires_client_result_operator = true;
                }
            }
        }
        Ok(())
    }

    fn translate_simple(
        &mut self,
        expr: &Expr,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<Option<SqlExpr>, QueryCompilationError> {
        let mut translator =
            SqlTranslator::new(self.context, &mut self.queries, &self.group_keys, parent);
        Ok(translator.translate(expr)?.expr())
    }

    /// GROUP BY pushed into SQL: used when the query ranges over the
    /// groupings of a nested query and aggregates them.
    fn apply_server_group_by(
        &mut self,
        key: &Expr,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<(), QueryCompilationError> {
        match self.translate_simple(key, parent)? {
            Some(SqlExpr::Tuple(elements)) => {
                if let Some(select) = self.main_select_mut() {
                    for element in elements {
                        select.add_to_group_by(element);
                    }
                }
            }
            Some(expr) => {
                if let Some(select) = self.main_select_mut() {
                    select.add_to_group_by(expr);
                }
            }
            None => {
                warn!("grouping key cannot be translated; grouping client-side");
                self.requires_client_result_operator = true;
            }
        }
        Ok(())
    }

    /// Trailing group-by with no aggregation: rows are ordered by the key
    /// in SQL and grouped client-side by the shaper.
    fn apply_client_grouping(
        &mut self,
        key: &Expr,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<(), QueryCompilationError> {
        match self.project_group_key(key, parent)? {
            Some(rewritten) => self.grouping_key = Some(rewritten),
            None => {
                warn!("grouping key cannot be translated; grouping client-side");
                self.requires_client_result_operator = true;
            }
        }
        Ok(())
    }

    fn project_group_key(
        &mut self,
        key: &Expr,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<Option<Expr>, QueryCompilationError> {
        match key {
            Expr::New { members, args } => {
                let mut rewritten = Vec::with_capacity(args.len());
                for arg in args {
                    match self.project_group_scalar(arg, parent)? {
                        Some(expr) => rewritten.push(expr),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Expr::New { members: members.clone(), args: rewritten }))
            }
            _ => self.project_group_scalar(key, parent),
        }
    }

    fn project_group_scalar(
        &mut self,
        expr: &Expr,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<Option<Expr>, QueryCompilationError> {
        let Some(sql) = self.translate_simple(expr, parent)? else {
            return Ok(None);
        };
        let Some(select) = self.main_select_mut() else {
            return Ok(None);
        };
        let kind = sql.kind();
        let index = select.add_to_projection(sql.clone());
        select.add_to_order_by(sql, true);
        Ok(Some(Expr::ReadColumn { index, kind }))
    }

    /// Discriminator restriction for shared-table hierarchies: a single
    /// equality when one concrete type matches, a left-associated OR chain
    /// when several do.
    fn discriminator_predicate(&self, entity: &EntityType, alias: &str) -> Option<SqlExpr> {
        let property_name = entity.discriminator_property.as_deref()?;
        let property = self.context.model.find_property(entity, property_name)?;
        let column = SqlExpr::Column {
            table_alias: alias.to_string(),
            name: property.column_name.clone(),
            kind: property.kind,
            nullable: property.nullable,
        };
        let terms: Vec<SqlExpr> = self
            .context
            .model
            .concrete_types_in_hierarchy(entity)
            .iter()
            .filter_map(|e| e.discriminator_value.clone())
            .map(|value| SqlExpr::eq(column.clone(), SqlExpr::Literal(value)))
            .collect();
        SqlExpr::fold(BinaryOp::OrElse, terms)
    }

    pub(crate) fn entity_for(
        &self,
        source: &QuerySourceRef,
    ) -> Result<&'m EntityType, QueryCompilationError> {
        let name = source
            .entity_type_name()
            .ok_or_else(|| QueryCompilationError::UnknownEntityType(source.name.clone()))?;
        self.context
            .model
            .find_entity_type(name)
            .ok_or_else(|| QueryCompilationError::UnknownEntityType(name.to_string()))
    }

    /// The shaper for the compiled query. `buffered` is decided once, at
    /// the end of compilation, from tracking and eager-load demands.
    pub fn build_shaper(&self, buffered: bool) -> Shaper {
        let needs_materialization = buffered
            || self.context.tracking
            || !self.is_liftable();
        let element: Shaper = match (&self.entity_shape, &self.shaped_selector) {
            (Some(shape), None) if needs_materialization => {
                let mut shape = shape.clone();
                shape.buffered = buffered;
                Shaper::Entity(shape)
            }
            (Some(shape), None) => {
                // no tracking, no buffering, nothing client-side: hand the
                // raw values over without entity machinery
                let members = shape.layout.iter().map(|slot| slot.member.clone()).collect();
                let args = shape
                    .layout
                    .iter()
                    .map(|slot| Expr::ReadColumn { index: slot.index, kind: Some(slot.kind) })
                    .collect();
                Shaper::ValueBuffer(ValueBufferShaper {
                    selector: Expr::New { members, args },
                    requires_client_eval: false,
                })
            }
            (_, selector) => Shaper::ValueBuffer(ValueBufferShaper {
                selector: selector
                    .clone()
                    .unwrap_or(Expr::ReadColumn { index: 0, kind: None }),
                requires_client_eval: self.requires_client_projection || self.requires_client_eval,
            }),
        };
        match &self.grouping_key {
            Some(key) => Shaper::Grouping { key: key.clone(), element: Box::new(element) },
            None => element,
        }
    }
}

/// Alias base for an entity table: the source's declared name when it has
/// one, else the lowercased first letter of the table name.
fn table_alias_base(source_name: &str, table_name: &str) -> String {
    if !source_name.is_empty() {
        return source_name.to_string();
    }
    table_name
        .chars()
        .next()
        .map(|c| c.to_ascii_lowercase().to_string())
        .unwrap_or_else(|| "t".to_string())
}
