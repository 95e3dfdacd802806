//! FILENAME: store/src/sql.rs
//!
//! Structured SELECT assembly. Queries are collected as typed fragment lists
//! (projection columns, joins, predicates with bind parameters, order terms)
//! and rendered to SQL exactly once. Predicates carry their own parameters so
//! callers never splice values into SQL text.

use rusqlite::types::Value;

// ============================================================================
// FRAGMENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

/// One JOIN clause: `<kind> <table_ref> ON <on>`.
#[derive(Debug, Clone)]
pub struct Join {
    kind: JoinKind,
    table_ref: String,
    on: String,
}

impl Join {
    pub fn inner(table_ref: impl Into<String>, on: impl Into<String>) -> Self {
        Join {
            kind: JoinKind::Inner,
            table_ref: table_ref.into(),
            on: on.into(),
        }
    }

    pub fn left_outer(table_ref: impl Into<String>, on: impl Into<String>) -> Self {
        Join {
            kind: JoinKind::LeftOuter,
            table_ref: table_ref.into(),
            on: on.into(),
        }
    }

    fn render(&self) -> String {
        let keyword = match self.kind {
            JoinKind::Inner => "JOIN",
            JoinKind::LeftOuter => "LEFT OUTER JOIN",
        };
        format!(" {} {} ON ({})", keyword, self.table_ref, self.on)
    }
}

/// A boolean fragment plus the values bound to its `?` placeholders.
#[derive(Debug, Clone)]
pub struct Predicate {
    sql: String,
    params: Vec<Value>,
}

impl Predicate {
    /// A parameterless fragment.
    pub fn raw(sql: impl Into<String>) -> Self {
        Predicate {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Predicate {
            sql: sql.into(),
            params,
        }
    }

    /// `expr = ?`.
    pub fn eq(expr: &str, value: impl Into<Value>) -> Self {
        Predicate {
            sql: format!("{expr}=?"),
            params: vec![value.into()],
        }
    }

    /// `expr LIKE ?`, case-insensitive per SQLite's default LIKE.
    pub fn like(expr: &str, pattern: impl Into<String>) -> Self {
        Predicate {
            sql: format!("{expr} LIKE ?"),
            params: vec![Value::Text(pattern.into())],
        }
    }

    /// `expr IN (?,?,...)`. An empty list renders as a constant false.
    pub fn in_list(expr: &str, values: Vec<Value>) -> Self {
        if values.is_empty() {
            return Predicate::raw("0");
        }
        let marks = vec!["?"; values.len()].join(",");
        Predicate {
            sql: format!("{expr} IN ({marks})"),
            params: values,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone)]
pub struct OrderTerm {
    expr: String,
    collate_nocase: bool,
    descending: bool,
}

impl OrderTerm {
    pub fn new(expr: impl Into<String>) -> Self {
        OrderTerm {
            expr: expr.into(),
            collate_nocase: false,
            descending: false,
        }
    }

    /// Locale-insensitive text comparison. Not applied to expressions that
    /// already resolve to a precomputed order-by column.
    pub fn collate_nocase(mut self) -> Self {
        self.collate_nocase = true;
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn is_descending(&self) -> bool {
        self.descending
    }

    fn render(&self) -> String {
        let mut out = self.expr.clone();
        if self.collate_nocase {
            out.push_str(" COLLATE NOCASE");
        }
        if self.descending {
            out.push_str(" DESC");
        }
        out
    }
}

// ============================================================================
// SELECT BUILDER
// ============================================================================

/// Accumulates fragments for a single SELECT and renders the statement plus
/// its bind parameters in clause order.
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    distinct: bool,
    columns: Vec<String>,
    from: String,
    joins: Vec<Join>,
    predicates: Vec<Predicate>,
    order_terms: Vec<OrderTerm>,
}

impl SelectBuilder {
    pub fn from(table_ref: impl Into<String>) -> Self {
        SelectBuilder {
            distinct: false,
            columns: Vec::new(),
            from: table_ref.into(),
            joins: Vec::new(),
            predicates: Vec::new(),
            order_terms: Vec::new(),
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn column(&mut self, expr: impl Into<String>) -> &mut Self {
        self.columns.push(expr.into());
        self
    }

    pub fn column_as(&mut self, expr: &str, alias: &str) -> &mut Self {
        self.columns.push(format!("{expr} AS {alias}"));
        self
    }

    pub fn join(&mut self, join: Join) -> &mut Self {
        self.joins.push(join);
        self
    }

    /// AND-composed with all other predicates.
    pub fn filter(&mut self, predicate: Predicate) -> &mut Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_by(&mut self, term: OrderTerm) -> &mut Self {
        self.order_terms.push(term);
        self
    }

    pub fn order_terms(&self) -> &[OrderTerm] {
        &self.order_terms
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Render the statement and the bind values for its placeholders.
    pub fn render(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.columns.join(","));
        sql.push_str(" FROM ");
        sql.push_str(&self.from);
        for join in &self.joins {
            sql.push_str(&join.render());
        }

        let mut params = Vec::new();
        if !self.predicates.is_empty() {
            let clauses: Vec<String> = self
                .predicates
                .iter()
                .map(|p| format!("({})", p.sql))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
            for p in &self.predicates {
                params.extend(p.params.iter().cloned());
            }
        }

        if !self.order_terms.is_empty() {
            let terms: Vec<String> = self.order_terms.iter().map(OrderTerm::render).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(","));
        }

        (sql, params)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_plain_select() {
        let mut select = SelectBuilder::from("books b");
        select.column("b._id").column_as("b.title", "title");
        let (sql, params) = select.render();
        assert_eq!(sql, "SELECT b._id,b.title AS title FROM books b");
        assert!(params.is_empty());
    }

    #[test]
    fn render_joins_filters_and_order() {
        let mut select = SelectBuilder::from("books b");
        select
            .column("b.title")
            .join(Join::inner("book_author ba", "ba.book=b._id"))
            .join(Join::left_outer("loan l", "l.book=b._id"))
            .filter(Predicate::eq("b.read", 1i64))
            .filter(Predicate::raw("l.loanee IS NULL"))
            .order_by(OrderTerm::new("b.title").collate_nocase())
            .order_by(OrderTerm::new("b.date_added").descending());

        let (sql, params) = select.render();
        assert_eq!(
            sql,
            "SELECT b.title FROM books b \
             JOIN book_author ba ON (ba.book=b._id) \
             LEFT OUTER JOIN loan l ON (l.book=b._id) \
             WHERE (b.read=?) AND (l.loanee IS NULL) \
             ORDER BY b.title COLLATE NOCASE,b.date_added DESC"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn empty_in_list_is_constant_false() {
        assert_eq!(Predicate::in_list("b._id", Vec::new()).sql(), "0");
    }
}
