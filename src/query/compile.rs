use crate::error::QueryCompilationError;
use crate::metadata::Model;
use crate::query::{QueryCompilationContext, QueryCompilationOptions, QueryModelVisitor};
use crate::query_model::{Expr, QueryModel};
use crate::shaper::Shaper;
use crate::sql::TableSource;
use crate::sqlgen::{validate_raw_sql_projection, SqlCommand, SqlDialect};

/// The product of compiling one query model: the command to execute and
/// the shaper that turns its rows into results, plus whatever work stayed
/// on the client.
#[derive(Debug)]
pub struct CompiledQuery {
    pub sql: SqlCommand,
    pub shaper: Shaper,
    pub requires_client_filter: bool,
    pub requires_client_projection: bool,
    pub requires_client_order_by: bool,
    pub requires_client_result_operator: bool,
    /// Filter residue to apply after materialization, when any.
    pub client_filter: Option<Expr>,
}

/// Compiles a query model against a metadata model into SQL text,
/// parameters and a shaper.
pub fn compile_query(
    model: &Model,
    qm: &QueryModel,
    options: QueryCompilationOptions,
    dialect: &dyn SqlDialect,
) -> Result<CompiledQuery, QueryCompilationError> {
    let context = QueryCompilationContext::new(model, options);
    let mut visitor = QueryModelVisitor::new(&context);
    visitor.visit_query_model(qm, None)?;

    // buffering is decided once, after the whole model is visited
    let buffered = context.requires_buffering() || context.tracking;
    let shaper = visitor.build_shaper(buffered);

    let requires_client_filter = visitor.requires_client_filter;
    let requires_client_projection =
        visitor.requires_client_projection || visitor.requires_client_eval;
    let requires_client_order_by = visitor.requires_client_order_by;
    let requires_client_result_operator =
        visitor.requires_client_result_operator || visitor.requires_client_eval;
    let client_filter = visitor.client_filter.clone();
    let verbatim = visitor.is_root_verbatim();
    let main_entity = visitor
        .main_source
        .as_ref()
        .and_then(|s| s.entity_type_name())
        .map(|name| name.to_string());

    let main_name = qm.main_from.source.name.clone();
    let select = visitor
        .into_main_select()
        .ok_or(QueryCompilationError::UnregisteredQuerySource(main_name))?;

    let sql = if verbatim {
        match select.raw_sql_root() {
            Some((text, args)) => select
                .create_from_sql_query_sql_generator(text, args, dialect)
                .generate()?,
            None => select.create_default_query_sql_generator(dialect).generate()?,
        }
    } else {
        let composed_raw = matches!(select.tables().first(), Some(TableSource::RawSql { .. }));
        if composed_raw {
            if let Some(entity) = main_entity.as_deref().and_then(|n| model.find_entity_type(n)) {
                validate_raw_sql_projection(&select, model, entity)?;
            }
        }
        select.create_default_query_sql_generator(dialect).generate()?
    };

    Ok(CompiledQuery {
        sql,
        shaper,
        requires_client_filter,
        requires_client_projection,
        requires_client_order_by,
        requires_client_result_operator,
        client_filter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityType, Model, Property};
    use crate::query_model::{FromRoot, QueryModel, QuerySource};
    use crate::sql::{BinaryOp, ScalarKind, ScalarValue};
    use crate::sqlgen::AnsiDialect;

    fn catalog() -> Model {
        Model::new()
            .with_entity(
                EntityType::new("Product", "Products")
                    .with_property(Property::new("Id", ScalarKind::Int))
                    .with_property(Property::new("Name", ScalarKind::String))
                    .with_property(Property::new("Price", ScalarKind::Int))
                    .with_key(&["Id"]),
            )
            .with_entity(
                EntityType::new("Order", "Orders")
                    .with_property(Property::new("Id", ScalarKind::Int))
                    .with_property(Property::new("ProductId", ScalarKind::Int))
                    .with_key(&["Id"]),
            )
            .with_entity(
                EntityType::new("Animal", "Animals")
                    .with_property(Property::new("Id", ScalarKind::Int))
                    .with_property(Property::new("Kind", ScalarKind::String))
                    .with_key(&["Id"])
                    .with_discriminator("Kind", ScalarValue::String("Animal".into())),
            )
            .with_entity(
                EntityType::new("Dog", "Animals")
                    .with_base("Animal")
                    .with_discriminator("Kind", ScalarValue::String("Dog".into())),
            )
    }

    fn compile(model: &Model, qm: &QueryModel) -> CompiledQuery {
        compile_query(model, qm, QueryCompilationOptions::default(), &AnsiDialect).unwrap()
    }

    #[test]
    fn filtered_projected_query_renders_fully_in_sql() {
        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let qm = QueryModel::for_source(p.clone(), FromRoot::EntityTable)
            .with_where(Expr::binary(
                BinaryOp::Gt,
                Expr::property(Expr::source(&p), "Price"),
                Expr::lit(ScalarValue::Int(10)),
            ))
            .with_selector(Expr::New {
                members: vec!["Id".into(), "Name".into()],
                args: vec![
                    Expr::property(Expr::source(&p), "Id"),
                    Expr::property(Expr::source(&p), "Name"),
                ],
            });

        let compiled = compile(&model, &qm);
        assert_eq!(
            compiled.sql.text,
            "SELECT \"p\".\"Id\", \"p\".\"Name\" FROM \"Products\" AS \"p\" WHERE (\"p\".\"Price\" > 10)"
        );
        assert!(!compiled.requires_client_filter);
        assert!(!compiled.requires_client_projection);
        match &compiled.shaper {
            Shaper::ValueBuffer(vb) => {
                assert!(!vb.requires_client_eval);
                assert!(matches!(vb.selector, Expr::New { .. }));
            }
            other => panic!("expected value-buffer shaper, got {:?}", other),
        }
    }

    #[test]
    fn non_composable_raw_sql_runs_verbatim() {
        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let qm = QueryModel::for_source(
            p,
            FromRoot::RawSql {
                sql: "EXEC dbo.GetProducts".into(),
                args: vec![ScalarValue::Int(7)],
            },
        );

        let compiled = compile(&model, &qm);
        assert_eq!(compiled.sql.text, "EXEC dbo.GetProducts");
        assert_eq!(compiled.sql.parameters.len(), 1);
        assert_eq!(compiled.sql.parameters[0].value, Some(ScalarValue::Int(7)));
    }

    #[test]
    fn composable_raw_sql_nests_under_a_filter() {
        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let qm = QueryModel::for_source(
            p.clone(),
            FromRoot::RawSql { sql: "SELECT * FROM Products".into(), args: vec![] },
        )
        .with_where(Expr::eq(
            Expr::property(Expr::source(&p), "Id"),
            Expr::lit(ScalarValue::Int(1)),
        ));

        let compiled = compile(&model, &qm);
        assert!(compiled.sql.text.starts_with("SELECT "));
        assert!(compiled.sql.text.contains("FROM (SELECT * FROM Products) AS \"p\""));
        assert!(compiled.sql.text.contains("WHERE (\"p\".\"Id\" = 1)"));
    }

    #[test]
    fn include_over_non_composable_raw_sql_is_an_error() {
        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let mut qm = QueryModel::for_source(
            p,
            FromRoot::RawSql { sql: "EXEC dbo.GetProducts".into(), args: vec![] },
        );
        qm.eager_loads.push("Orders".into());

        let err = compile_query(&model, &qm, QueryCompilationOptions::default(), &AnsiDialect)
            .unwrap_err();
        assert!(matches!(err, QueryCompilationError::IncludeOnNonComposableSql(_)));
    }

    #[test]
    fn hierarchy_root_gets_discriminator_or_chain() {
        let model = catalog();
        let a = QuerySource::entity("a", "Animal");
        let qm = QueryModel::for_source(a.clone(), FromRoot::EntityTable)
            .with_selector(Expr::property(Expr::source(&a), "Id"));

        let compiled = compile(&model, &qm);
        assert!(compiled.sql.text.contains(
            "WHERE ((\"a\".\"Kind\" = @p0) OR (\"a\".\"Kind\" = @p1))"
        ));
        assert_eq!(
            compiled.sql.parameters[0].value,
            Some(ScalarValue::String("Animal".into()))
        );
        assert_eq!(
            compiled.sql.parameters[1].value,
            Some(ScalarValue::String("Dog".into()))
        );
    }

    #[test]
    fn leaf_type_gets_single_discriminator_equality() {
        let model = catalog();
        let d = QuerySource::entity("d", "Dog");
        let qm = QueryModel::for_source(d.clone(), FromRoot::EntityTable)
            .with_selector(Expr::property(Expr::source(&d), "Id"));

        let compiled = compile(&model, &qm);
        assert!(compiled.sql.text.contains("WHERE (\"d\".\"Kind\" = @p0)"));
        assert_eq!(
            compiled.sql.parameters[0].value,
            Some(ScalarValue::String("Dog".into()))
        );
    }

    #[test]
    fn named_source_keeps_its_name_as_alias() {
        let model = catalog();
        let stock = QuerySource::entity("stock", "Product");
        let qm = QueryModel::for_source(stock.clone(), FromRoot::EntityTable)
            .with_selector(Expr::property(Expr::source(&stock), "Id"));

        let compiled = compile(&model, &qm);
        assert_eq!(
            compiled.sql.text,
            "SELECT \"stock\".\"Id\" FROM \"Products\" AS \"stock\""
        );
    }

    #[test]
    fn unnamed_source_falls_back_to_table_initial() {
        let model = catalog();
        let anon = QuerySource::entity("", "Product");
        let qm = QueryModel::for_source(anon.clone(), FromRoot::EntityTable)
            .with_selector(Expr::property(Expr::source(&anon), "Id"));

        let compiled = compile(&model, &qm);
        assert_eq!(
            compiled.sql.text,
            "SELECT \"p\".\"Id\" FROM \"Products\" AS \"p\""
        );
    }

    #[test]
    fn top_level_and_salvages_the_translatable_side() {
        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let opaque = Expr::eq(
            Expr::call(Expr::property(Expr::source(&p), "Name"), "reverse", vec![]),
            Expr::lit(ScalarValue::String("aeT".into())),
        );
        let qm = QueryModel::for_source(p.clone(), FromRoot::EntityTable)
            .with_where(Expr::and(
                Expr::eq(
                    Expr::property(Expr::source(&p), "Id"),
                    Expr::lit(ScalarValue::Int(3)),
                ),
                opaque.clone(),
            ))
            .with_selector(Expr::property(Expr::source(&p), "Id"));

        let compiled = compile(&model, &qm);
        assert!(compiled.sql.text.contains("WHERE (\"p\".\"Id\" = 3)"));
        assert!(compiled.requires_client_filter);
        assert_eq!(compiled.client_filter, Some(opaque));
    }

    #[test]
    fn untranslatable_projection_still_projects_its_inputs() {
        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let qm = QueryModel::for_source(p.clone(), FromRoot::EntityTable)
            .with_selector(Expr::call(
                Expr::property(Expr::source(&p), "Name"),
                "reverse",
                vec![],
            ));

        let compiled = compile(&model, &qm);
        assert!(compiled.requires_client_projection);
        assert!(compiled.sql.text.contains("\"p\".\"Name\""));
        match &compiled.shaper {
            Shaper::ValueBuffer(vb) => assert!(vb.requires_client_eval),
            other => panic!("expected value-buffer shaper, got {:?}", other),
        }
    }

    #[test]
    fn identity_entity_query_projects_all_columns() {
        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let qm = QueryModel::for_source(p, FromRoot::EntityTable);

        let compiled = compile(&model, &qm);
        assert_eq!(
            compiled.sql.text,
            "SELECT \"p\".\"Id\", \"p\".\"Name\", \"p\".\"Price\" FROM \"Products\" AS \"p\""
        );
        // untracked, unbuffered: plain values, no entity machinery
        match &compiled.shaper {
            Shaper::ValueBuffer(vb) => assert!(!vb.requires_client_eval),
            other => panic!("expected value-buffer shaper, got {:?}", other),
        }
    }

    #[test]
    fn tracking_switches_to_a_buffered_entity_shaper() {
        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let qm = QueryModel::for_source(p, FromRoot::EntityTable);

        let compiled =
            compile_query(&model, &qm, QueryCompilationOptions { tracking: true }, &AnsiDialect)
                .unwrap();
        match &compiled.shaper {
            Shaper::Entity(shape) => {
                assert!(shape.tracking);
                assert!(shape.buffered);
                assert_eq!(shape.key_indices, vec![0]);
            }
            other => panic!("expected entity shaper, got {:?}", other),
        }
    }

    #[test]
    fn translatable_join_renders_inner_join() {
        use crate::query_model::JoinClause;
        use crate::sql::JoinKind;

        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let o = QuerySource::entity("o", "Order");
        let mut qm = QueryModel::for_source(p.clone(), FromRoot::EntityTable)
            .with_selector(Expr::property(Expr::source(&p), "Id"));
        qm.joins.push(JoinClause {
            source: o.clone(),
            root: FromRoot::EntityTable,
            on: Expr::eq(
                Expr::property(Expr::source(&o), "ProductId"),
                Expr::property(Expr::source(&p), "Id"),
            ),
            kind: JoinKind::Inner,
        });

        let compiled = compile(&model, &qm);
        assert_eq!(
            compiled.sql.text,
            "SELECT \"p\".\"Id\" FROM \"Products\" AS \"p\" INNER JOIN \"Orders\" AS \"o\" \
             ON (\"o\".\"ProductId\" = \"p\".\"Id\")"
        );
    }

    #[test]
    fn untranslatable_join_condition_backs_the_table_out() {
        use crate::query_model::JoinClause;
        use crate::sql::JoinKind;

        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let o = QuerySource::entity("o", "Order");
        let on = Expr::eq(
            Expr::call(Expr::property(Expr::source(&o), "ProductId"), "reverse", vec![]),
            Expr::property(Expr::source(&p), "Id"),
        );
        let mut qm = QueryModel::for_source(p.clone(), FromRoot::EntityTable)
            .with_selector(Expr::property(Expr::source(&p), "Id"));
        qm.joins.push(JoinClause {
            source: o,
            root: FromRoot::EntityTable,
            on: on.clone(),
            kind: JoinKind::Inner,
        });

        let compiled = compile(&model, &qm);
        assert!(!compiled.sql.text.contains("CROSS JOIN"));
        assert!(!compiled.sql.text.contains("Orders"));
        assert_eq!(compiled.client_filter, Some(on));
        assert!(compiled.requires_client_projection);
    }

    #[test]
    fn grouped_subquery_renders_server_group_by() {
        use crate::query_model::{QuerySource, ResultOperator, SourceItem};

        let model = catalog();
        let p = QuerySource::entity("p", "Product");
        let inner = QueryModel::for_source(p.clone(), FromRoot::EntityTable)
            .with_result_operator(ResultOperator::GroupBy {
                key_selector: Expr::property(Expr::source(&p), "Price"),
                element_selector: None,
            });
        let g = QuerySource::new("g", SourceItem::Value(ScalarKind::Int));
        let qm = QueryModel::for_source(g.clone(), FromRoot::SubQuery(Box::new(inner)))
            .with_selector(Expr::property(Expr::source(&g), "Key"));

        let compiled = compile(&model, &qm);
        assert!(compiled.sql.text.starts_with("SELECT \"t0\".\"Price\" FROM ("));
        assert!(compiled.sql.text.ends_with(") AS \"t0\" GROUP BY \"t0\".\"Price\""));
        assert!(!compiled.requires_client_result_operator);
    }

    #[test]
    fn unknown_entity_type_is_an_error() {
        let model = catalog();
        let x = QuerySource::entity("x", "Widget");
        let qm = QueryModel::for_source(x, FromRoot::EntityTable);

        let err = compile_query(&model, &qm, QueryCompilationOptions::default(), &AnsiDialect)
            .unwrap_err();
        assert!(matches!(err, QueryCompilationError::UnknownEntityType(name) if name == "Widget"));
    }
}
