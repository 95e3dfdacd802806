//! FILENAME: booklist-engine/src/style.rs
//!
//! List style configuration: which group levels a list is built with, how the
//! initial expansion state is chosen, and the optional row filters. All types
//! are serde-serializable so styles can be stored as JSON.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use rusqlite::types::Value;
use store::Predicate;

// ============================================================================
// GROUP KIND
// ============================================================================

/// The kind of grouping a hierarchy level applies. `Book` is the implicit
/// leaf level and never appears in a style's group list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKind {
    Book,
    Author,
    Series,
    Publisher,
    Genre,
    Language,
    Location,
    Format,
    Rating,
    Loaned,
    Bookshelf,
    Read,
    TitleLetter,
}

impl GroupKind {
    /// Stable numeric code stored in the `node_group` column.
    pub fn code(self) -> i64 {
        match self {
            GroupKind::Book => 0,
            GroupKind::Author => 1,
            GroupKind::Series => 2,
            GroupKind::Publisher => 3,
            GroupKind::Genre => 4,
            GroupKind::Language => 5,
            GroupKind::Location => 6,
            GroupKind::Format => 7,
            GroupKind::Rating => 8,
            GroupKind::Loaned => 9,
            GroupKind::Bookshelf => 10,
            GroupKind::Read => 11,
            GroupKind::TitleLetter => 12,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => GroupKind::Book,
            1 => GroupKind::Author,
            2 => GroupKind::Series,
            3 => GroupKind::Publisher,
            4 => GroupKind::Genre,
            5 => GroupKind::Language,
            6 => GroupKind::Location,
            7 => GroupKind::Format,
            8 => GroupKind::Rating,
            9 => GroupKind::Loaned,
            10 => GroupKind::Bookshelf,
            11 => GroupKind::Read,
            12 => GroupKind::TitleLetter,
            _ => return None,
        })
    }
}

// ============================================================================
// REBUILD MODE
// ============================================================================

/// How node expansion/visibility is initialized when a list is (re)built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildMode {
    /// Every node expanded and visible.
    AlwaysExpanded,
    /// Only level 1 visible, everything collapsed.
    AlwaysCollapsed,
    /// Levels above `top_level` expanded, `top_level` itself visible but
    /// collapsed, deeper levels hidden.
    PreferredState { top_level: usize },
    /// Restore the per-bookshelf/style state from the durable table.
    SavedState,
}

impl Default for RebuildMode {
    fn default() -> Self {
        RebuildMode::SavedState
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// A row filter. Filters with no effective criteria (empty pattern, empty id
/// list) are inactive and contribute no predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Case-insensitive wildcard match on the book title.
    TitleWildcard(String),
    /// Books currently on loan to the given person.
    LoanedTo(String),
    /// Read (true) or unread (false) books only.
    ReadStatus(bool),
    /// An explicit set of book ids.
    BookIdList(Vec<i64>),
}

impl Filter {
    /// The predicate for an active filter, `None` when inactive.
    pub(crate) fn predicate(&self) -> Option<Predicate> {
        match self {
            Filter::TitleWildcard(pattern) => {
                if pattern.is_empty() {
                    None
                } else {
                    Some(Predicate::like("b.title", format!("%{pattern}%")))
                }
            }
            Filter::LoanedTo(name) => {
                if name.is_empty() {
                    None
                } else {
                    Some(Predicate::eq("l.loanee", name.clone()))
                }
            }
            Filter::ReadStatus(read) => {
                Some(Predicate::eq("b.read", i64::from(*read)))
            }
            Filter::BookIdList(ids) => {
                if ids.is_empty() {
                    None
                } else {
                    Some(Predicate::in_list(
                        "b._id",
                        ids.iter().map(|&id| Value::Integer(id)).collect(),
                    ))
                }
            }
        }
    }

    /// Whether this filter needs the loan table joined in.
    pub(crate) fn needs_loan_join(&self) -> bool {
        matches!(self, Filter::LoanedTo(name) if !name.is_empty())
    }
}

// ============================================================================
// LIST STYLE
// ============================================================================

/// A named list configuration: the ordered group levels plus presentation
/// flags that influence query composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListStyle {
    id: i64,
    name: String,
    groups: SmallVec<[GroupKind; 4]>,
    /// Place each book under its primary author only, instead of under every
    /// credited author.
    #[serde(default)]
    primary_author_only: bool,
}

impl ListStyle {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        ListStyle {
            id,
            name: name.into(),
            groups: SmallVec::new(),
            primary_author_only: false,
        }
    }

    pub fn with_group(mut self, kind: GroupKind) -> Self {
        debug_assert!(kind != GroupKind::Book, "Book is the implicit leaf level");
        self.groups.push(kind);
        self
    }

    pub fn primary_author_only(mut self) -> Self {
        self.primary_author_only = true;
        self
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[GroupKind] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn has_group(&self, kind: GroupKind) -> bool {
        self.groups.contains(&kind)
    }

    pub fn is_primary_author_only(&self) -> bool {
        self.primary_author_only
    }

    /// The level books sit at: one below the innermost group.
    pub fn book_level(&self) -> usize {
        self.groups.len() + 1
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_codes_round_trip() {
        for kind in [
            GroupKind::Book,
            GroupKind::Author,
            GroupKind::Series,
            GroupKind::Rating,
            GroupKind::TitleLetter,
        ] {
            assert_eq!(GroupKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(GroupKind::from_code(999), None);
    }

    #[test]
    fn style_serializes() {
        let style = ListStyle::new(7, "by author")
            .with_group(GroupKind::Author)
            .with_group(GroupKind::Series)
            .primary_author_only();
        let json = serde_json::to_string(&style).unwrap();
        let back: ListStyle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, style);
        assert_eq!(back.group_count(), 2);
        assert_eq!(back.book_level(), 3);
    }

    #[test]
    fn inactive_filters_have_no_predicate() {
        assert!(Filter::TitleWildcard(String::new()).predicate().is_none());
        assert!(Filter::LoanedTo(String::new()).predicate().is_none());
        assert!(Filter::BookIdList(Vec::new()).predicate().is_none());
        assert!(Filter::ReadStatus(true).predicate().is_some());
    }
}
