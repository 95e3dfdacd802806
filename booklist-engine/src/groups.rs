//! FILENAME: booklist-engine/src/groups.rs
//!
//! Build recipe per group kind: the node-key segment (short prefix plus key
//! expression, usually a foreign-key id), the display domains the header rows
//! carry, the sort contribution, and which joins the kind requires. The
//! query-spec builder consumes these when composing a plan.

use store::{Domain, DomainKind};

use crate::style::GroupKind;

// ============================================================================
// DOMAIN EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sort {
    None,
    Asc,
    Desc,
}

/// A domain bound to the SQL expression that produces it, plus how it takes
/// part in grouping and sorting.
#[derive(Debug, Clone)]
pub(crate) struct DomainExpression {
    pub domain: Domain,
    pub expr: String,
    pub grouped: bool,
    pub sort: Sort,
    /// Verbatim order-by expression overriding the default (precomputed
    /// order-by columns, numeric casts).
    pub order_by_expr: Option<String>,
}

impl DomainExpression {
    pub fn new(domain: Domain, expr: impl Into<String>) -> Self {
        DomainExpression {
            domain,
            expr: expr.into(),
            grouped: false,
            sort: Sort::None,
            order_by_expr: None,
        }
    }

    pub fn grouped(mut self) -> Self {
        self.grouped = true;
        self
    }

    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by_expr = Some(expr.into());
        self
    }
}

// ============================================================================
// GROUP DEFINITIONS
// ============================================================================

/// Joins a group kind pulls into the leaf SELECT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GroupJoins {
    pub author: bool,
    pub series: bool,
    pub publisher: bool,
    pub bookshelf: bool,
    pub loan: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct GroupDef {
    pub kind: GroupKind,
    /// Short node-key segment prefix ("a" for author, "s" for series, ...).
    pub prefix: &'static str,
    /// Produces the key segment value; also part of the group identity.
    pub key: DomainExpression,
    /// Extra domains shown on this level's header rows.
    pub display: Vec<DomainExpression>,
    pub joins: GroupJoins,
}

impl GroupDef {
    /// The recipe for one group kind.
    ///
    /// # Panics
    ///
    /// `GroupKind::Book` is the implicit leaf level and has no recipe.
    pub fn for_kind(kind: GroupKind) -> GroupDef {
        match kind {
            GroupKind::Book => panic!("Book is the implicit leaf level, not a group"),

            GroupKind::Author => GroupDef {
                kind,
                prefix: "a",
                key: DomainExpression::new(
                    Domain::new("author", DomainKind::Integer),
                    "a._id",
                )
                .grouped(),
                display: vec![DomainExpression::new(
                    Domain::new("author_name", DomainKind::Text),
                    "a.family_name || ', ' || a.given_names",
                )
                .grouped()
                .sorted(Sort::Asc)],
                joins: GroupJoins {
                    author: true,
                    ..GroupJoins::default()
                },
            },

            GroupKind::Series => GroupDef {
                kind,
                prefix: "s",
                key: DomainExpression::new(
                    Domain::new("series", DomainKind::Integer),
                    "bs.series",
                )
                .grouped(),
                display: vec![DomainExpression::new(
                    Domain::new("series_title", DomainKind::Text),
                    "COALESCE(s.series_title,'')",
                )
                .grouped()
                .sorted(Sort::Asc)],
                joins: GroupJoins {
                    series: true,
                    ..GroupJoins::default()
                },
            },

            GroupKind::Publisher => GroupDef {
                kind,
                prefix: "p",
                key: DomainExpression::new(
                    Domain::new("publisher", DomainKind::Integer),
                    "b.publisher",
                )
                .grouped(),
                display: vec![DomainExpression::new(
                    Domain::new("publisher_name", DomainKind::Text),
                    "COALESCE(p.publisher_name,'')",
                )
                .grouped()
                .sorted(Sort::Asc)],
                joins: GroupJoins {
                    publisher: true,
                    ..GroupJoins::default()
                },
            },

            GroupKind::Genre => Self::value_group(kind, "g", "genre", "COALESCE(b.genre,'')"),
            GroupKind::Language => {
                Self::value_group(kind, "lang", "language", "COALESCE(b.language,'')")
            }
            GroupKind::Location => {
                Self::value_group(kind, "loc", "location", "COALESCE(b.location,'')")
            }
            GroupKind::Format => Self::value_group(kind, "fmt", "format", "COALESCE(b.format,'')"),

            GroupKind::Rating => GroupDef {
                kind,
                prefix: "rt",
                key: DomainExpression::new(
                    Domain::new("rating_group", DomainKind::Integer),
                    "CAST(b.rating AS INTEGER)",
                )
                .grouped()
                .sorted(Sort::Desc),
                display: Vec::new(),
                joins: GroupJoins::default(),
            },

            GroupKind::Loaned => GroupDef {
                kind,
                prefix: "l",
                key: DomainExpression::new(
                    Domain::new("loanee", DomainKind::Text),
                    "COALESCE(l.loanee,'')",
                )
                .grouped()
                .sorted(Sort::Asc),
                display: Vec::new(),
                joins: GroupJoins {
                    loan: true,
                    ..GroupJoins::default()
                },
            },

            GroupKind::Bookshelf => GroupDef {
                kind,
                prefix: "shelf",
                key: DomainExpression::new(
                    Domain::new("bookshelf", DomainKind::Integer),
                    "bb.bookshelf",
                )
                .grouped(),
                display: vec![DomainExpression::new(
                    Domain::new("shelf_name", DomainKind::Text),
                    "sh.shelf_name",
                )
                .grouped()
                .sorted(Sort::Asc)],
                joins: GroupJoins {
                    bookshelf: true,
                    ..GroupJoins::default()
                },
            },

            GroupKind::Read => GroupDef {
                kind,
                prefix: "r",
                key: DomainExpression::new(
                    Domain::new("read_status", DomainKind::Integer),
                    "b.read",
                )
                .grouped()
                .sorted(Sort::Asc),
                display: Vec::new(),
                joins: GroupJoins::default(),
            },

            GroupKind::TitleLetter => GroupDef {
                kind,
                prefix: "t",
                key: DomainExpression::new(
                    Domain::new("title_letter", DomainKind::Text),
                    "upper(substr(b.title,1,1))",
                )
                .grouped()
                .sorted(Sort::Asc),
                display: Vec::new(),
                joins: GroupJoins::default(),
            },
        }
    }

    /// Groups keyed directly on a book column: key and display coincide.
    fn value_group(
        kind: GroupKind,
        prefix: &'static str,
        name: &str,
        expr: &str,
    ) -> GroupDef {
        GroupDef {
            kind,
            prefix,
            key: DomainExpression::new(Domain::new(name, DomainKind::Text), expr)
                .grouped()
                .sorted(Sort::Asc),
            display: Vec::new(),
            joins: GroupJoins::default(),
        }
    }
}
