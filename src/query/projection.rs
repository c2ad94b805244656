use tracing::warn;

use crate::error::QueryCompilationError;
use crate::query::{ParentScope, QueryModelVisitor};
use crate::query_model::{Expr, OutputKind, QueryModel, QuerySourceRef, SourceItem};
use crate::shaper::{EntityShaper, MemberSlot};
use crate::sql::{BinaryOp, ScalarValue, SqlExpr, TableSource};
use crate::translate::{SqlTranslator, Translation};

/// Projection handling: translate every output sub-expression, project it,
/// and splice column reads back into the selector so the shaper can
/// evaluate it against flat rows.
impl<'c, 'm> QueryModelVisitor<'c, 'm> {
    pub(crate) fn visit_selector(
        &mut self,
        qm: &QueryModel,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<(), QueryCompilationError> {
        if self.requires_client_eval {
            self.shaped_selector = Some(qm.selector.clone());
            return Ok(());
        }
        // an aggregate result operator already replaced the projection
        if let Some(select) = self.main_select() {
            if select.is_aggregate_projection() {
                let kind = select.projection()[0].expr.kind();
                self.shaped_selector = Some(Expr::ReadColumn { index: 0, kind });
                return Ok(());
            }
        }
        if let Some(source) = qm.selector.as_source_ref() {
            let is_main = self
                .main_source
                .as_ref()
                .map(|main| main == source)
                .unwrap_or(false);
            if is_main && matches!(source.item, SourceItem::Entity(_)) {
                let source = source.clone();
                let (layout, key_indices) = self.project_entity_columns(&source)?;
                self.entity_shape = Some(EntityShaper {
                    query_source: source.clone(),
                    entity_name: self.entity_for(&source)?.display_name().to_string(),
                    tracking: self.context.tracking,
                    key_indices,
                    layout,
                    buffered: false,
                });
                // identity projection over a derived root renders as star
                let star_alias = match self.main_select().map(|s| s.tables()) {
                    Some([TableSource::Derived { alias, .. }]) => Some(alias.clone()),
                    _ => None,
                };
                if let (Some(alias), Some(select)) = (star_alias, self.main_select_mut()) {
                    select.set_project_star_alias(Some(alias));
                }
                return Ok(());
            }
        }
        let rewritten = self.visit_projection_expr(&qm.selector, parent)?;
        self.shaped_selector = Some(rewritten);
        Ok(())
    }

    /// Projects every mapped column of the source's entity, in declared
    /// order, and returns the materialization layout plus the projection
    /// slots of the primary key.
    pub(crate) fn project_entity_columns(
        &mut self,
        source: &QuerySourceRef,
    ) -> Result<(Vec<MemberSlot>, Vec<usize>), QueryCompilationError> {
        let entity = self.entity_for(source)?;
        let properties: Vec<_> = self
            .context
            .model
            .all_properties(entity)
            .into_iter()
            .cloned()
            .collect();
        let key_names: Vec<String> = self
            .context
            .model
            .find_primary_key(entity)
            .iter()
            .map(|p| p.name.clone())
            .collect();
        let Some(select) = self.main_select_mut() else {
            return Err(QueryCompilationError::UnregisteredQuerySource(source.name.clone()));
        };
        let mut layout = Vec::with_capacity(properties.len());
        for property in &properties {
            let index = select.add_property_to_projection(property, source)?;
            select.set_source_member(index, property.name.clone());
            layout.push(MemberSlot { member: property.name.clone(), index, kind: property.kind });
        }
        let key_indices = key_names
            .iter()
            .filter_map(|name| {
                layout
                    .iter()
                    .find(|slot| &slot.member == name)
                    .map(|slot| slot.index)
            })
            .collect();
        Ok((layout, key_indices))
    }

    fn visit_projection_expr(
        &mut self,
        expr: &Expr,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<Expr, QueryCompilationError> {
        match expr {
            Expr::New { members, args } => {
                let mut rewritten = Vec::with_capacity(args.len());
                for (member, arg) in members.iter().zip(args) {
                    if let Some(source) = arg.as_source_ref() {
                        if matches!(source.item, SourceItem::Entity(_)) {
                            // a whole entity inside a composite output:
                            // project its columns, materialize client-side
                            let source = source.clone();
                            self.requires_client_projection = true;
                            self.context.require_buffering();
                            self.project_entity_columns(&source)?;
                            rewritten.push(arg.clone());
                            continue;
                        }
                    }
                    let arg_rewritten = self.visit_projection_expr(arg, parent)?;
                    if let Expr::ReadColumn { index, .. } = &arg_rewritten {
                        let index = *index;
                        if let Some(select) = self.main_select_mut() {
                            select.set_source_member(index, member.clone());
                        }
                    }
                    rewritten.push(arg_rewritten);
                }
                Ok(Expr::New { members: members.clone(), args: rewritten })
            }
            Expr::Literal(_) | Expr::ReadColumn { .. } => Ok(expr.clone()),
            _ => {
                let result = {
                    let mut translator = SqlTranslator::new(
                        self.context,
                        &mut self.queries,
                        &self.group_keys,
                        parent,
                    )
                    .for_projection();
                    translator.translate(expr)?
                };
                match result {
                    Translation::Translated(sql) => {
                        let sql = compensate_scalar_subquery(expr, sql);
                        let kind = sql.kind();
                        let Some(select) = self.main_select_mut() else {
                            return Ok(expr.clone());
                        };
                        let index = select.add_to_projection(sql);
                        Ok(Expr::ReadColumn { index, kind })
                    }
                    Translation::NotTranslatable => {
                        warn!(expr = ?expr, "projection cannot be translated; evaluated client-side");
                        self.requires_client_projection = true;
                        self.project_client_eval_inputs(expr, parent)?;
                        Ok(expr.clone())
                    }
                }
            }
        }
    }

    /// The inputs a client-evaluated sub-tree will need: every property
    /// reference inside it that does translate is pushed into the
    /// projection, so the materialized row carries the raw values.
    fn project_client_eval_inputs(
        &mut self,
        expr: &Expr,
        parent: Option<&ParentScope<'_>>,
    ) -> Result<(), QueryCompilationError> {
        let mut references = Vec::new();
        collect_property_refs(expr, &mut references);
        for reference in references {
            let result = {
                let mut translator = SqlTranslator::new(
                    self.context,
                    &mut self.queries,
                    &self.group_keys,
                    parent,
                );
                translator.translate(&reference)?
            };
            if let Translation::Translated(sql) = result {
                if let Some(select) = self.main_select_mut() {
                    select.add_to_projection(sql);
                }
            }
        }
        Ok(())
    }
}

/// A scalar sub-query returning no rows surfaces as SQL NULL; when the
/// result feeds a non-nullable host value it is coalesced to the kind's
/// default.
fn compensate_scalar_subquery(expr: &Expr, sql: SqlExpr) -> SqlExpr {
    let scalar_output = matches!(
        expr,
        Expr::SubQuery(model) if model.output_kind() == OutputKind::Scalar
    );
    if !scalar_output || !matches!(sql, SqlExpr::Subquery(_)) {
        return sql;
    }
    match sql.kind() {
        Some(kind) => SqlExpr::binary(
            BinaryOp::Coalesce,
            sql,
            SqlExpr::Literal(ScalarValue::default_for(kind)),
        ),
        None => sql,
    }
}

/// Property accesses rooted at a query source, anywhere in the tree.
fn collect_property_refs(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Property { object, .. } => {
            if object.as_source_ref().is_some() {
                out.push(expr.clone());
            } else {
                collect_property_refs(object, out);
            }
        }
        Expr::Call { object, args, .. } => {
            if let Some(object) = object {
                collect_property_refs(object, out);
            }
            for arg in args {
                collect_property_refs(arg, out);
            }
        }
        Expr::Binary { left, right, .. } | Expr::StringCompare { left, right, .. } => {
            collect_property_refs(left, out);
            collect_property_refs(right, out);
        }
        Expr::Not(inner) | Expr::Negate(inner) => collect_property_refs(inner, out),
        Expr::Cast { expr, .. } => collect_property_refs(expr, out),
        Expr::Conditional { test, if_true, if_false } => {
            collect_property_refs(test, out);
            collect_property_refs(if_true, out);
            collect_property_refs(if_false, out);
        }
        Expr::New { args, .. } | Expr::Collection(args) => {
            for arg in args {
                collect_property_refs(arg, out);
            }
        }
        _ => {}
    }
}
