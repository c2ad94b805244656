use std::cell::{Cell, RefCell};

use indexmap::IndexMap;

use crate::metadata::Model;
use crate::query_model::Expr;
use crate::select::SelectExpression;
use crate::translate::{
    DefaultMemberTranslator, DefaultMethodCallTranslator, MemberTranslator, MethodCallTranslator,
};

#[derive(Debug, Clone, Default)]
pub struct QueryCompilationOptions {
    /// Track materialized entities for change detection. Forces buffered
    /// shaping.
    pub tracking: bool,
}

/// Per-compilation state shared by every visitor of one query.
///
/// Compilation is single-threaded and the context never outlives one
/// `compile_query` call, so query-wide counters and flags live in `Cell`s.
pub struct QueryCompilationContext<'m> {
    pub model: &'m Model,
    pub tracking: bool,
    pub method_call_translator: Box<dyn MethodCallTranslator>,
    pub member_translator: Box<dyn MemberTranslator>,
    requires_buffering: Cell<bool>,
    subquery_alias_counter: Cell<usize>,
    table_aliases: RefCell<Vec<String>>,
}

impl<'m> QueryCompilationContext<'m> {
    pub fn new(model: &'m Model, options: QueryCompilationOptions) -> QueryCompilationContext<'m> {
        QueryCompilationContext {
            model,
            tracking: options.tracking,
            method_call_translator: Box::new(DefaultMethodCallTranslator),
            member_translator: Box::new(DefaultMemberTranslator),
            requires_buffering: Cell::new(false),
            subquery_alias_counter: Cell::new(0),
            table_aliases: RefCell::new(Vec::new()),
        }
    }

    /// Something downstream (identity resolution, eager loading) needs the
    /// whole result set in memory before shaping.
    pub fn require_buffering(&self) {
        self.requires_buffering.set(true);
    }

    pub fn requires_buffering(&self) -> bool {
        self.requires_buffering.get()
    }

    /// Query-wide unique table alias from a preferred base ("p" for the
    /// Products table). Collisions get a numeric suffix.
    pub fn create_unique_table_alias(&self, base: &str) -> String {
        let base = if base.is_empty() { "t" } else { base };
        let mut taken = self.table_aliases.borrow_mut();
        let unique = if !taken.iter().any(|a| a.eq_ignore_ascii_case(base)) {
            base.to_string()
        } else {
            let mut n = 0usize;
            loop {
                let candidate = format!("{}{}", base, n);
                if !taken.iter().any(|a| a.eq_ignore_ascii_case(&candidate)) {
                    break candidate;
                }
                n += 1;
            }
        };
        taken.push(unique.clone());
        unique
    }

    /// Aliases for derived tables: t0, t1, ...
    pub fn create_subquery_alias(&self) -> String {
        let n = self.subquery_alias_counter.get();
        self.subquery_alias_counter.set(n + 1);
        format!("t{}", n)
    }
}

/// Read-only view of an enclosing query's compilation state, for resolving
/// correlated references from a sub-query. Handed to the child at
/// construction; the child never mutates its parent.
pub struct ParentScope<'a> {
    pub queries: &'a IndexMap<usize, SelectExpression>,
    pub group_keys: &'a IndexMap<usize, Expr>,
    pub parent: Option<&'a ParentScope<'a>>,
}

impl<'a> ParentScope<'a> {
    /// The select, at any enclosing level, whose tables handle the given
    /// query source.
    pub fn find_select_for_source(&self, source_id: usize) -> Option<&'a SelectExpression> {
        let here = self.queries.get(&source_id).or_else(|| {
            self.queries
                .values()
                .find(|select| {
                    select
                        .tables()
                        .iter()
                        .any(|t| t.query_source().map(|s| s.id() == source_id).unwrap_or(false))
                })
        });
        here.or_else(|| self.parent.and_then(|p| p.find_select_for_source(source_id)))
    }

    pub fn find_group_key(&self, source_id: usize) -> Option<&'a Expr> {
        self.group_keys
            .get(&source_id)
            .or_else(|| self.parent.and_then(|p| p.find_group_key(source_id)))
    }
}
