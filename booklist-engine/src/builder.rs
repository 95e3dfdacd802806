//! FILENAME: booklist-engine/src/builder.rs
//!
//! Query-spec composition. `BooklistBuilder` turns a style, a bookshelf scope
//! and a filter set into a `QueryPlan`: the sorted leaf SELECT (structured
//! fragments, parameterized predicates), the per-level accumulated group
//! columns used for header synthesis, and the column sets the materializer
//! copies onto header and leaf rows.

use std::sync::Arc;

use rusqlite::types::Value;
use rustc_hash::FxHashMap;

use store::{Db, Domain, DomainKind, InstanceTracker, Join, OrderTerm, Predicate, SelectBuilder};

use crate::error::Result;
use crate::groups::{DomainExpression, GroupDef, GroupJoins, Sort};
use crate::materializer::Booklist;
use crate::schema::{
    BOOK, BOOK_UUID, TBL_AUTHORS, TBL_BOOKS, TBL_BOOKSHELVES, TBL_BOOK_AUTHOR,
    TBL_BOOK_BOOKSHELF, TBL_BOOK_SERIES, TBL_LOAN, TBL_PUBLISHERS, TBL_SERIES, TITLE, TITLE_OB,
};
use crate::style::{Filter, GroupKind, ListStyle, RebuildMode};

// ============================================================================
// ROW COLLECTOR
// ============================================================================

/// Deduplicating registry of domain expressions, in projection order.
///
/// Re-registering a name with the same expression merges flags and returns
/// the existing slot; re-registering with a different expression is a
/// programmer error.
#[derive(Debug, Default)]
struct RowCollector {
    domains: Vec<DomainExpression>,
    by_name: FxHashMap<String, usize>,
    /// Projection indices of sorted domains, in registration order.
    sort_order: Vec<usize>,
}

impl RowCollector {
    /// Register a domain expression, returning its projection index.
    ///
    /// # Panics
    ///
    /// When `name` was already registered with a different source expression.
    fn add(&mut self, dx: DomainExpression) -> usize {
        if let Some(&idx) = self.by_name.get(dx.domain.name()) {
            let existing = &mut self.domains[idx];
            assert!(
                existing.expr == dx.expr,
                "domain `{}` registered twice with different source expressions: `{}` vs `{}`",
                dx.domain.name(),
                existing.expr,
                dx.expr
            );
            existing.grouped |= dx.grouped;
            if matches!(existing.sort, Sort::None) && !matches!(dx.sort, Sort::None) {
                existing.sort = dx.sort;
                self.sort_order.push(idx);
            }
            if existing.order_by_expr.is_none() {
                existing.order_by_expr = dx.order_by_expr;
            }
            return idx;
        }

        let idx = self.domains.len();
        self.by_name.insert(dx.domain.name().to_owned(), idx);
        if !matches!(dx.sort, Sort::None) {
            self.sort_order.push(idx);
        }
        self.domains.push(dx);
        idx
    }
}

// ============================================================================
// QUERY PLAN
// ============================================================================

/// Everything one hierarchy level needs during materialization.
#[derive(Debug, Clone)]
pub(crate) struct LevelPlan {
    pub kind: GroupKind,
    /// Node-key segment prefix.
    pub prefix: &'static str,
    /// Projection index producing the key segment value.
    pub key_col: usize,
    /// Projection indices of the accumulated group domains for levels 1..=L.
    /// Change detection compares these; header rows copy them.
    pub accumulated_cols: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct QueryPlan {
    pub select_sql: String,
    pub select_params: Vec<Value>,
    /// One list-table column per projected expression, in SELECT order.
    pub projection: Vec<Domain>,
    pub levels: Vec<LevelPlan>,
    /// List-table column names of the sorted domains, for the optional
    /// sort-key index.
    pub sort_index_columns: Vec<String>,
}

// ============================================================================
// BOOKLIST BUILDER
// ============================================================================

/// Entry point: configures and builds a [`Booklist`].
#[derive(Debug, Clone)]
pub struct BooklistBuilder {
    style: ListStyle,
    bookshelf_id: Option<i64>,
    filters: Vec<Filter>,
    rebuild_mode: RebuildMode,
}

impl BooklistBuilder {
    pub fn new(style: ListStyle) -> Self {
        BooklistBuilder {
            style,
            bookshelf_id: None,
            filters: Vec::new(),
            rebuild_mode: RebuildMode::default(),
        }
    }

    /// Restrict the list to one bookshelf. Without this the whole library is
    /// listed.
    pub fn for_bookshelf(mut self, bookshelf_id: i64) -> Self {
        self.bookshelf_id = Some(bookshelf_id);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn rebuild_mode(mut self, mode: RebuildMode) -> Self {
        self.rebuild_mode = mode;
        self
    }

    /// Compose the plan and materialize the list table.
    pub fn build<'db>(
        &self,
        db: &'db Db,
        tracker: &Arc<InstanceTracker>,
    ) -> Result<Booklist<'db>> {
        let plan = self.compose();
        Booklist::build(
            db,
            Arc::clone(tracker),
            plan,
            self.style.clone(),
            self.bookshelf_id.unwrap_or(0),
            self.rebuild_mode,
        )
    }

    // ------------------------------------------------------------------------
    // Plan composition
    // ------------------------------------------------------------------------

    pub(crate) fn compose(&self) -> QueryPlan {
        let mut collector = RowCollector::default();
        let mut joins_needed = GroupJoins::default();
        let mut grouped_cols: Vec<usize> = Vec::new();
        let mut levels: Vec<LevelPlan> = Vec::new();

        // Group levels, outermost first. The accumulated column set grows as
        // levels are added, so level L carries every ancestor's group domains.
        for &kind in self.style.groups() {
            let def = GroupDef::for_kind(kind);
            merge_joins(&mut joins_needed, def.joins);

            let key_col = collector.add(def.key);
            push_grouped(&mut grouped_cols, &collector, key_col);
            for dx in def.display {
                let idx = collector.add(dx);
                push_grouped(&mut grouped_cols, &collector, idx);
            }

            levels.push(LevelPlan {
                kind,
                prefix: def.prefix,
                key_col,
                accumulated_cols: grouped_cols.clone(),
            });
        }

        // Leaf domains.
        collector.add(DomainExpression::new(
            Domain::new(TITLE, DomainKind::Text).not_null(),
            format!("b.{TITLE}"),
        ));
        if self.style.has_group(GroupKind::Series) {
            // Numeric series ordering within the innermost group.
            collector.add(
                DomainExpression::new(
                    Domain::new("series_num", DomainKind::Text),
                    "bs.series_num",
                )
                .sorted(Sort::Asc)
                .order_by("CAST(bs.series_num AS REAL)"),
            );
        }
        collector.add(
            DomainExpression::new(
                Domain::new(TITLE_OB, DomainKind::Text).not_null(),
                format!("b.{TITLE_OB}"),
            )
            .sorted(Sort::Asc)
            .order_by(format!("b.{TITLE_OB}")),
        );
        collector.add(DomainExpression::new(
            Domain::new(BOOK, DomainKind::Integer).not_null(),
            "b._id",
        ));
        collector.add(DomainExpression::new(
            Domain::new(BOOK_UUID, DomainKind::Text).not_null(),
            format!("b.{BOOK_UUID}"),
        ));

        joins_needed.loan |= self.filters.iter().any(Filter::needs_loan_join);
        joins_needed.bookshelf |= self.bookshelf_id.is_some();

        // Assemble the SELECT.
        let mut select = SelectBuilder::from(TBL_BOOKS.ref_());
        self.add_joins(&mut select, joins_needed);
        for dx in &collector.domains {
            select.column_as(&dx.expr, dx.domain.name());
        }
        if let Some(shelf) = self.bookshelf_id {
            select.filter(Predicate::eq("bb.bookshelf", shelf));
        }
        for filter in &self.filters {
            if let Some(predicate) = filter.predicate() {
                select.filter(predicate);
            }
        }
        let mut sort_index_columns = Vec::new();
        for &idx in &collector.sort_order {
            let dx = &collector.domains[idx];
            select.order_by(order_term(dx));
            sort_index_columns.push(dx.domain.name().to_owned());
        }

        let (select_sql, select_params) = select.render();
        QueryPlan {
            select_sql,
            select_params,
            projection: collector.domains.iter().map(|dx| dx.domain.clone()).collect(),
            levels,
            sort_index_columns,
        }
    }

    /// Conditional joins: only the tables the groups, filters and scope
    /// actually touch are pulled in.
    fn add_joins(&self, select: &mut SelectBuilder, needs: GroupJoins) {
        if needs.author {
            let on = if self.style.is_primary_author_only() {
                "ba.book=b._id AND ba.position=1".to_owned()
            } else {
                "ba.book=b._id".to_owned()
            };
            select.join(Join::inner(TBL_BOOK_AUTHOR.ref_(), on));
            select.join(Join::inner(TBL_AUTHORS.ref_(), "a._id=ba.author"));
        }
        if needs.series {
            // LEFT OUTER so books without a series still appear.
            select.join(Join::left_outer(TBL_BOOK_SERIES.ref_(), "bs.book=b._id"));
            select.join(Join::left_outer(TBL_SERIES.ref_(), "s._id=bs.series"));
        }
        if needs.publisher {
            select.join(Join::left_outer(TBL_PUBLISHERS.ref_(), "p._id=b.publisher"));
        }
        if needs.bookshelf {
            select.join(Join::inner(TBL_BOOK_BOOKSHELF.ref_(), "bb.book=b._id"));
            if self.style.has_group(GroupKind::Bookshelf) {
                select.join(Join::inner(TBL_BOOKSHELVES.ref_(), "sh._id=bb.bookshelf"));
            }
        } else if self.style.has_group(GroupKind::Bookshelf) {
            select.join(Join::inner(TBL_BOOK_BOOKSHELF.ref_(), "bb.book=b._id"));
            select.join(Join::inner(TBL_BOOKSHELVES.ref_(), "sh._id=bb.bookshelf"));
        }
        if needs.loan {
            select.join(Join::left_outer(TBL_LOAN.ref_(), "l.book=b._id"));
        }
    }
}

fn merge_joins(into: &mut GroupJoins, from: GroupJoins) {
    into.author |= from.author;
    into.series |= from.series;
    into.publisher |= from.publisher;
    into.bookshelf |= from.bookshelf;
    into.loan |= from.loan;
}

fn push_grouped(grouped: &mut Vec<usize>, collector: &RowCollector, idx: usize) {
    if collector.domains[idx].grouped && !grouped.contains(&idx) {
        grouped.push(idx);
    }
}

/// Text sorts use locale-insensitive comparison unless the domain carries a
/// verbatim order-by expression.
fn order_term(dx: &DomainExpression) -> OrderTerm {
    let mut term = match &dx.order_by_expr {
        Some(expr) => OrderTerm::new(expr.clone()),
        None if dx.domain.kind().is_text() => OrderTerm::new(dx.expr.clone()).collate_nocase(),
        None => OrderTerm::new(dx.expr.clone()),
    };
    if matches!(dx.sort, Sort::Desc) {
        term = term.descending();
    }
    term
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::DomainExpression;

    fn author_series_style() -> ListStyle {
        ListStyle::new(1, "authors and series")
            .with_group(GroupKind::Author)
            .with_group(GroupKind::Series)
    }

    #[test]
    fn plan_has_one_level_per_group() {
        let plan = BooklistBuilder::new(author_series_style()).compose();
        assert_eq!(plan.levels.len(), 2);
        assert_eq!(plan.levels[0].kind, GroupKind::Author);
        assert_eq!(plan.levels[1].kind, GroupKind::Series);
        // Accumulated domains grow outward-in.
        assert!(
            plan.levels[0].accumulated_cols.len() < plan.levels[1].accumulated_cols.len()
        );
        assert!(plan.levels[1]
            .accumulated_cols
            .starts_with(&plan.levels[0].accumulated_cols));
    }

    #[test]
    fn select_joins_and_sorts() {
        let plan = BooklistBuilder::new(author_series_style()).compose();
        assert!(plan.select_sql.contains("JOIN authors a"));
        assert!(plan.select_sql.contains("LEFT OUTER JOIN series s"));
        assert!(plan
            .select_sql
            .contains("a.family_name || ', ' || a.given_names COLLATE NOCASE"));
        // The precomputed title order column is used verbatim.
        assert!(plan.select_sql.contains("b.title_ob"));
        assert!(!plan.select_sql.contains("b.title_ob COLLATE"));
    }

    #[test]
    fn primary_author_only_constrains_the_join() {
        let style = author_series_style().primary_author_only();
        let plan = BooklistBuilder::new(style).compose();
        assert!(plan.select_sql.contains("ba.position=1"));
    }

    #[test]
    fn bookshelf_scope_adds_join_and_parameter() {
        let plan = BooklistBuilder::new(author_series_style())
            .for_bookshelf(3)
            .compose();
        assert!(plan.select_sql.contains("JOIN book_bookshelf bb"));
        assert!(plan.select_sql.contains("bb.bookshelf=?"));
        assert_eq!(plan.select_params.len(), 1);
    }

    #[test]
    fn re_registering_a_domain_merges() {
        let mut collector = RowCollector::default();
        let a = collector.add(DomainExpression::new(
            Domain::new("genre", DomainKind::Text),
            "COALESCE(b.genre,'')",
        ));
        let b = collector.add(
            DomainExpression::new(Domain::new("genre", DomainKind::Text), "COALESCE(b.genre,'')")
                .grouped(),
        );
        assert_eq!(a, b);
        assert!(collector.domains[a].grouped);
    }

    #[test]
    #[should_panic(expected = "different source expressions")]
    fn conflicting_domain_registration_fails_fast() {
        let mut collector = RowCollector::default();
        collector.add(DomainExpression::new(
            Domain::new("genre", DomainKind::Text),
            "COALESCE(b.genre,'')",
        ));
        collector.add(DomainExpression::new(
            Domain::new("genre", DomainKind::Text),
            "b.genre",
        ));
    }
}
