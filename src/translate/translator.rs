use indexmap::IndexMap;

use crate::error::QueryCompilationError;
use crate::query::{ParentScope, QueryCompilationContext, QueryModelVisitor};
use crate::query_model::{Expr, FromRoot, OutputKind, QueryModel, QuerySourceRef, ResultOperator, SourceItem};
use crate::select::SelectExpression;
use crate::sql::{BinaryOp, ScalarKind, SqlExpr, TableSource};
use crate::translate::{try_remove_null_check, TranslatedCall, Translation};

/// Translates host expressions into SQL expressions against the selects a
/// query model visitor has registered.
///
/// Two failure channels: `Err` is fatal (broken metadata, invariant
/// violations), `Ok(NotTranslatable)` means "leave this on the client".
pub struct SqlTranslator<'a, 'm> {
    context: &'a QueryCompilationContext<'m>,
    queries: &'a mut IndexMap<usize, SelectExpression>,
    group_keys: &'a IndexMap<usize, Expr>,
    parent: Option<&'a ParentScope<'a>>,
    /// The query's designated top-level predicate, matched by node
    /// identity. Only this exact node may shed one untranslatable AND
    /// operand into the side channel.
    top_level_predicate: Option<&'a Expr>,
    in_projection: bool,
    /// Set when a top-level AND salvaged one side: the other side, to be
    /// evaluated client-side after the rows come back.
    pub client_eval_predicate: Option<Expr>,
}

impl<'a, 'm> SqlTranslator<'a, 'm> {
    pub fn new(
        context: &'a QueryCompilationContext<'m>,
        queries: &'a mut IndexMap<usize, SelectExpression>,
        group_keys: &'a IndexMap<usize, Expr>,
        parent: Option<&'a ParentScope<'a>>,
    ) -> SqlTranslator<'a, 'm> {
        SqlTranslator {
            context,
            queries,
            group_keys,
            parent,
            top_level_predicate: None,
            in_projection: false,
            client_eval_predicate: None,
        }
    }

    pub fn for_top_level_predicate(mut self, predicate: &'a Expr) -> SqlTranslator<'a, 'm> {
        self.top_level_predicate = Some(predicate);
        self
    }

    pub fn for_projection(mut self) -> SqlTranslator<'a, 'm> {
        self.in_projection = true;
        self
    }

    pub fn translate(&mut self, expr: &Expr) -> Result<Translation, QueryCompilationError> {
        match expr {
            Expr::Literal(value) => Ok(Translation::Translated(SqlExpr::Literal(value.clone()))),
            Expr::Parameter { name, .. } => {
                Ok(Translation::Translated(SqlExpr::Parameter(name.clone())))
            }
            Expr::SourceRef(source) => self.visit_source_ref(source),
            Expr::Property { .. } => self.visit_property(expr),
            Expr::Call { .. } => self.visit_call(expr),
            Expr::Binary { .. } => self.visit_binary(expr),
            Expr::Not(inner) => Ok(self
                .translate(inner)?
                .expr()
                .map(|e| SqlExpr::Not(Box::new(e)))
                .into()),
            Expr::Negate(inner) => Ok(self
                .translate(inner)?
                .expr()
                .map(|e| SqlExpr::Negate(Box::new(e)))
                .into()),
            Expr::Conditional { .. } => self.visit_conditional(expr),
            Expr::New { args, .. } => {
                let mut elements = Vec::with_capacity(args.len());
                for arg in args {
                    match self.translate(arg)? {
                        Translation::Translated(e) => elements.push(e),
                        Translation::NotTranslatable => return Ok(Translation::NotTranslatable),
                    }
                }
                Ok(Translation::Translated(SqlExpr::Tuple(elements)))
            }
            Expr::SubQuery(model) => self.visit_subquery(model),
            Expr::StringCompare { op, left, right } => {
                let left = self.translate(left)?;
                let right = self.translate(right)?;
                match (left, right) {
                    (Translation::Translated(l), Translation::Translated(r)) => {
                        Ok(Translation::Translated(SqlExpr::StringCompare {
                            op: *op,
                            left: Box::new(l),
                            right: Box::new(r),
                        }))
                    }
                    _ => Ok(Translation::NotTranslatable),
                }
            }
            Expr::Cast { expr: inner, kind } => Ok(self
                .translate(inner)?
                .expr()
                .map(|e| SqlExpr::Cast { expr: Box::new(e), kind: *kind })
                .into()),
            Expr::Collection(_) => Ok(Translation::NotTranslatable),
            Expr::ReadColumn { .. } => Ok(Translation::NotTranslatable),
        }
    }

    fn visit_binary(&mut self, expr: &Expr) -> Result<Translation, QueryCompilationError> {
        let Expr::Binary { op, left, right } = expr else {
            return Ok(Translation::NotTranslatable);
        };
        match op {
            BinaryOp::Coalesce => {
                let left = self.translate(left)?;
                let right = self.translate(right)?;
                match (left, right) {
                    (Translation::Translated(l), Translation::Translated(r)) => {
                        Ok(Translation::Translated(SqlExpr::binary(BinaryOp::Coalesce, l, r)))
                    }
                    _ => Ok(Translation::NotTranslatable),
                }
            }
            BinaryOp::Eq | BinaryOp::NotEq => {
                let left_t = self.translate(left)?;
                let right_t = self.translate(right)?;
                match (left_t, right_t) {
                    (Translation::Translated(l), Translation::Translated(r)) => {
                        Ok(unfold_structural_comparison(*op, l, r))
                    }
                    _ => Ok(Translation::NotTranslatable),
                }
            }
            BinaryOp::AndAlso => {
                let left_t = self.translate(left)?;
                let right_t = self.translate(right)?;
                match (left_t, right_t) {
                    (Translation::Translated(l), Translation::Translated(r)) => {
                        Ok(Translation::Translated(SqlExpr::and(l, r)))
                    }
                    (Translation::Translated(l), Translation::NotTranslatable)
                        if self.is_top_level(expr) && self.client_eval_predicate.is_none() =>
                    {
                        self.client_eval_predicate = Some((**right).clone());
                        Ok(Translation::Translated(l))
                    }
                    (Translation::NotTranslatable, Translation::Translated(r))
                        if self.is_top_level(expr) && self.client_eval_predicate.is_none() =>
                    {
                        self.client_eval_predicate = Some((**left).clone());
                        Ok(Translation::Translated(r))
                    }
                    _ => Ok(Translation::NotTranslatable),
                }
            }
            BinaryOp::OrElse => {
                let left = self.translate(left)?;
                let right = self.translate(right)?;
                match (left, right) {
                    (Translation::Translated(l), Translation::Translated(r)) => {
                        Ok(Translation::Translated(SqlExpr::or(l, r)))
                    }
                    _ => Ok(Translation::NotTranslatable),
                }
            }
            _ => {
                // ordering comparisons and arithmetic need both sides
                let left = self.translate(left)?;
                let right = self.translate(right)?;
                match (left, right) {
                    (Translation::Translated(l), Translation::Translated(r)) => {
                        Ok(Translation::Translated(SqlExpr::binary(*op, l, r)))
                    }
                    _ => Ok(Translation::NotTranslatable),
                }
            }
        }
    }

    fn is_top_level(&self, expr: &Expr) -> bool {
        self.top_level_predicate
            .map(|top| std::ptr::eq(top as *const Expr, expr as *const Expr))
            .unwrap_or(false)
    }

    fn visit_conditional(&mut self, expr: &Expr) -> Result<Translation, QueryCompilationError> {
        if let Some(member) = try_remove_null_check(expr) {
            return self.translate(&member);
        }
        let Expr::Conditional { test, if_true, if_false } = expr else {
            return Ok(Translation::NotTranslatable);
        };
        let test = self.translate(test)?;
        let if_true = self.translate(if_true)?;
        let if_false = self.translate(if_false)?;
        match (test, if_true, if_false) {
            (
                Translation::Translated(when),
                Translation::Translated(then),
                Translation::Translated(otherwise),
            ) => Ok(Translation::Translated(SqlExpr::Case {
                when: Box::new(when),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            })),
            _ => Ok(Translation::NotTranslatable),
        }
    }

    fn visit_property(&mut self, expr: &Expr) -> Result<Translation, QueryCompilationError> {
        let Expr::Property { object, name } = expr else {
            return Ok(Translation::NotTranslatable);
        };
        if let Some(rebound) = self.try_rebind_grouping_key(expr) {
            return self.translate(&rebound);
        }
        if let Some(source) = object.as_source_ref() {
            return self.bind_member(source, name);
        }
        match self.translate(object)? {
            Translation::Translated(object_sql) => {
                Ok(self.context.member_translator.translate(&object_sql, name).into())
            }
            Translation::NotTranslatable => Ok(Translation::NotTranslatable),
        }
    }

    fn visit_call(&mut self, expr: &Expr) -> Result<Translation, QueryCompilationError> {
        let Expr::Call { object, method, args } = expr else {
            return Ok(Translation::NotTranslatable);
        };
        // property-accessor form: Property(source, "Name")
        if object.is_none() && method == "Property" && args.len() == 2 {
            if let (Some(source), Expr::Literal(crate::sql::ScalarValue::String(name))) =
                (args[0].as_source_ref(), &args[1])
            {
                let source = source.clone();
                // the explicit accessor names a mapped property; a miss
                // here is an authoring error, not a client fallback
                if let Some(entity) = source
                    .entity_type_name()
                    .and_then(|n| self.context.model.find_entity_type(n))
                {
                    if self.context.model.find_property(entity, name).is_none() {
                        return Err(QueryCompilationError::UnknownProperty {
                            entity: entity.name.clone(),
                            property: name.clone(),
                        });
                    }
                }
                return self.bind_member(&source, name);
            }
        }
        let object_sql = match object {
            Some(inner) => match self.translate(inner)? {
                Translation::Translated(e) => Some(e),
                Translation::NotTranslatable => return Ok(Translation::NotTranslatable),
            },
            None => None,
        };
        let mut arg_sql = Vec::with_capacity(args.len());
        for arg in args {
            match self.translate(arg)? {
                Translation::Translated(e) => arg_sql.push(e),
                Translation::NotTranslatable => return Ok(Translation::NotTranslatable),
            }
        }
        let call = TranslatedCall { method: method.clone(), object: object_sql, args: arg_sql };
        Ok(self.context.method_call_translator.translate(&call).into())
    }

    /// A bare source reference is resolvable when its select already
    /// projects a value, typically through a nested derived table: the
    /// value surfaces as a column on the derived table's alias.
    fn visit_source_ref(
        &mut self,
        source: &QuerySourceRef,
    ) -> Result<Translation, QueryCompilationError> {
        let select = match self.find_select(source.id()) {
            Some(select) => select,
            None => return Ok(Translation::NotTranslatable),
        };
        if let Some(first) = select.projection().first() {
            return Ok(Translation::Translated(first.expr.clone()));
        }
        if let Some(TableSource::Derived { select: inner, alias, .. }) = select.tables().first() {
            if let Some(first) = inner.projection().first() {
                let kind = match &source.item {
                    SourceItem::Value(kind) => Some(*kind),
                    SourceItem::Entity(_) => first.expr.kind(),
                };
                if let Some(kind) = kind {
                    return Ok(Translation::Translated(SqlExpr::Column {
                        table_alias: alias.clone(),
                        name: first.alias.clone(),
                        kind,
                        nullable: true,
                    }));
                }
            }
        }
        Ok(Translation::NotTranslatable)
    }

    fn find_select(&self, source_id: usize) -> Option<&SelectExpression> {
        self.queries
            .get(&source_id)
            .or_else(|| {
                self.queries.values().find(|select| {
                    select
                        .tables()
                        .iter()
                        .any(|t| t.query_source().map(|s| s.id() == source_id).unwrap_or(false))
                })
            })
            .or_else(|| self.parent.and_then(|p| p.find_select_for_source(source_id)))
    }

    /// Binds `source.member` to a column of the select registered for the
    /// source, in this scope or an enclosing one. Anything unmapped or out
    /// of reach stays on the client.
    fn bind_member(
        &mut self,
        source: &QuerySourceRef,
        member: &str,
    ) -> Result<Translation, QueryCompilationError> {
        let Some(entity_name) = source.entity_type_name() else {
            return Ok(Translation::NotTranslatable);
        };
        let Some(entity) = self.context.model.find_entity_type(entity_name) else {
            return Ok(Translation::NotTranslatable);
        };
        let Some(property) = self.context.model.find_property(entity, member) else {
            return Ok(Translation::NotTranslatable);
        };
        let property = property.clone();

        // own scope first: binding may project through a derived table
        let own_key = if self.queries.contains_key(&source.id()) {
            Some(source.id())
        } else {
            self.queries
                .iter()
                .find(|(_, select)| select.reaches_source(source))
                .map(|(key, _)| *key)
        };
        if let Some(key) = own_key {
            if let Some(select) = self.queries.get_mut(&key) {
                return match select.bind_property(&property, source) {
                    Ok(column) => Ok(Translation::Translated(column)),
                    Err(_) => Ok(Translation::NotTranslatable),
                };
            }
        }

        // enclosing scopes are read-only: only direct table aliases bind
        if let Some(parent) = self.parent {
            if let Some(select) = parent.find_select_for_source(source.id()) {
                for table in select.tables() {
                    if !table.handles_source(source) {
                        continue;
                    }
                    if let TableSource::Table { alias, .. } | TableSource::RawSql { alias, .. } = table {
                        return Ok(Translation::Translated(SqlExpr::Column {
                            table_alias: alias.clone(),
                            name: property.column_name.clone(),
                            kind: property.kind,
                            nullable: property.nullable,
                        }));
                    }
                }
            }
        }
        Ok(Translation::NotTranslatable)
    }

    /// `g.Key` (and `g.Key.Member` chains) rebind through the key selector
    /// registered when the grouping was compiled. Composite keys built with
    /// anonymous constructors resolve member-by-member, at any depth.
    fn try_rebind_grouping_key(&self, expr: &Expr) -> Option<Expr> {
        let mut path: Vec<&str> = Vec::new();
        let mut current = expr;
        while let Expr::Property { object, name } = current {
            path.push(name);
            current = object;
        }
        let source = current.as_source_ref()?;
        let key_selector = self
            .group_keys
            .get(&source.id())
            .or_else(|| self.parent.and_then(|p| p.find_group_key(source.id())))?;
        path.reverse();
        let (first, rest) = path.split_first()?;
        if *first != "Key" {
            return None;
        }
        let mut rebound = key_selector.clone();
        for segment in rest {
            rebound = match rebound {
                Expr::New { members, args } => {
                    let index = members.iter().position(|m| m == segment)?;
                    args.get(index)?.clone()
                }
                other => Expr::property(other, *segment),
            };
        }
        Some(rebound)
    }

    fn visit_subquery(&mut self, model: &QueryModel) -> Result<Translation, QueryCompilationError> {
        // in-memory list containment: item IN (e1, e2, ...)
        if let FromRoot::Collection(elements) = &model.main_from.root {
            if model.is_identity_query() && model.result_operators.len() == 1 {
                if let Some(item) = model.contains_item() {
                    let item = item.clone();
                    let item_sql = match self.translate(&item)? {
                        Translation::Translated(e) => e,
                        Translation::NotTranslatable => return Ok(Translation::NotTranslatable),
                    };
                    let mut values = Vec::with_capacity(elements.len());
                    for element in elements {
                        match self.translate(element)? {
                            Translation::Translated(e) => values.push(e),
                            Translation::NotTranslatable => {
                                return Ok(Translation::NotTranslatable);
                            }
                        }
                    }
                    return Ok(Translation::Translated(SqlExpr::In {
                        expr: Box::new(item_sql),
                        values,
                    }));
                }
            }
            return Ok(Translation::NotTranslatable);
        }

        // sequence containment: item IN (SELECT ...)
        if let Some(item) = model.contains_item() {
            let item = item.clone();
            let item_sql = match self.translate(&item)? {
                Translation::Translated(e) => e,
                Translation::NotTranslatable => return Ok(Translation::NotTranslatable),
            };
            let mut inner = model.clone();
            inner
                .result_operators
                .retain(|op| !matches!(op, ResultOperator::Contains(_)));
            return match self.compile_subquery(&inner)? {
                Some(select) if select.projection().len() == 1 => {
                    Ok(Translation::Translated(SqlExpr::InSubquery {
                        expr: Box::new(item_sql),
                        subquery: Box::new(select),
                    }))
                }
                _ => Ok(Translation::NotTranslatable),
            };
        }

        // single-value and scalar sub-queries nest as correlated selects,
        // or collapse to the bare column when nothing but the projection
        // survived compilation
        match model.output_kind() {
            OutputKind::Single | OutputKind::Scalar => {
                // an entity-shaped single row has no single-column SQL
                // form inside a projection
                if self.in_projection
                    && model.output_kind() == OutputKind::Single
                    && produces_entity_rows(model)
                {
                    return Ok(Translation::NotTranslatable);
                }
                match self.compile_subquery(model)? {
                    Some(select) if select.projection().len() == 1 => {
                        if can_collapse(&select, self) {
                            Ok(Translation::Translated(select.projection()[0].expr.clone()))
                        } else {
                            Ok(Translation::Translated(SqlExpr::Subquery(Box::new(select))))
                        }
                    }
                    _ => Ok(Translation::NotTranslatable),
                }
            }
            OutputKind::Sequence => Ok(Translation::NotTranslatable),
        }
    }

    /// Compiles a nested query model against a child visitor. `None` when
    /// the child needed client evaluation and cannot be lifted into SQL.
    fn compile_subquery(
        &mut self,
        model: &QueryModel,
    ) -> Result<Option<SelectExpression>, QueryCompilationError> {
        let scope = ParentScope {
            queries: &*self.queries,
            group_keys: self.group_keys,
            parent: self.parent,
        };
        let mut child = QueryModelVisitor::new(self.context);
        child.visit_query_model(model, Some(&scope))?;
        if !child.is_liftable() {
            return Ok(None);
        }
        Ok(child.into_main_select().map(|mut select| {
            select.alias = String::new();
            select
        }))
    }
}

/// Whether the sub-query yields whole entities rather than a scalar value.
fn produces_entity_rows(model: &QueryModel) -> bool {
    model
        .selector
        .as_source_ref()
        .map(|s| matches!(s.item, SourceItem::Entity(_)))
        .unwrap_or(false)
}

/// Collapse is safe when the sub-select adds nothing over a single table
/// whose query source is already reachable in the current scope: the
/// projected expression can stand on its own.
fn can_collapse(select: &SelectExpression, translator: &SqlTranslator<'_, '_>) -> bool {
    if select.projection().len() != 1
        || select.tables().len() != 1
        || select.predicate().is_some()
        || !select.group_by().is_empty()
        || !select.order_by().is_empty()
        || select.limit().is_some()
        || select.offset().is_some()
        || select.is_distinct()
        || select.is_aggregate_projection()
    {
        return false;
    }
    select
        .tables()
        .first()
        .and_then(|t| t.query_source())
        .map(|s| translator.find_select(s.id()).is_some())
        .unwrap_or(false)
}

/// Explodes composite (tuple) operands into pairwise comparisons: AND for
/// equality, OR for inequality. A null literal against a tuple broadcasts
/// to every element. Plain null comparisons become IS NULL tests.
fn unfold_structural_comparison(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> Translation {
    match (left, right) {
        (SqlExpr::Tuple(lhs), SqlExpr::Tuple(rhs)) => {
            if lhs.len() != rhs.len() {
                return Translation::NotTranslatable;
            }
            let terms: Vec<SqlExpr> = lhs
                .into_iter()
                .zip(rhs)
                .map(|(l, r)| process_comparison(op, l, r))
                .collect();
            let combine = if op == BinaryOp::Eq { BinaryOp::AndAlso } else { BinaryOp::OrElse };
            SqlExpr::fold(combine, terms).into()
        }
        (SqlExpr::Tuple(elements), SqlExpr::Literal(v)) if v.is_null() => {
            broadcast_null(op, elements)
        }
        (SqlExpr::Literal(v), SqlExpr::Tuple(elements)) if v.is_null() => {
            broadcast_null(op, elements)
        }
        (left, right) => Translation::Translated(process_comparison(op, left, right)),
    }
}

fn broadcast_null(op: BinaryOp, elements: Vec<SqlExpr>) -> Translation {
    let terms: Vec<SqlExpr> = elements
        .into_iter()
        .map(|e| process_comparison(op, e, SqlExpr::Literal(crate::sql::ScalarValue::Null)))
        .collect();
    let combine = if op == BinaryOp::Eq { BinaryOp::AndAlso } else { BinaryOp::OrElse };
    SqlExpr::fold(combine, terms).into()
}

/// `x = NULL` never matches in SQL; rewrite to the IS NULL test the author
/// meant.
fn process_comparison(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> SqlExpr {
    let left_null = matches!(&left, SqlExpr::Literal(v) if v.is_null());
    let right_null = matches!(&right, SqlExpr::Literal(v) if v.is_null());
    match (op, left_null, right_null) {
        (BinaryOp::Eq, true, false) => SqlExpr::IsNull(Box::new(right)),
        (BinaryOp::Eq, false, true) => SqlExpr::IsNull(Box::new(left)),
        (BinaryOp::NotEq, true, false) => SqlExpr::Not(Box::new(SqlExpr::IsNull(Box::new(right)))),
        (BinaryOp::NotEq, false, true) => SqlExpr::Not(Box::new(SqlExpr::IsNull(Box::new(left)))),
        _ => SqlExpr::binary(op, left, right),
    }
}
