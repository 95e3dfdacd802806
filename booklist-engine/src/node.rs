//! FILENAME: booklist-engine/src/node.rs

use serde::{Deserialize, Serialize};

use crate::schema::KEY_SEPARATOR;
use crate::style::GroupKind;

/// Desired state for a node mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeNextState {
    Expand,
    Collapse,
    Toggle,
}

/// One row of the materialized list, as seen by callers.
#[derive(Debug, Clone, PartialEq)]
pub struct BooklistNode {
    pub row_id: i64,
    /// Path identity: `prefix=value` segments, outermost group first.
    pub key: String,
    /// 1-based; books sit one level below the innermost group.
    pub level: usize,
    pub group: GroupKind,
    pub expanded: bool,
    pub visible: bool,
    /// Set on leaf rows only.
    pub book_id: Option<i64>,
    /// Position among visible rows, when computed.
    pub list_position: Option<usize>,
}

impl BooklistNode {
    pub fn is_leaf(&self) -> bool {
        self.group == GroupKind::Book
    }
}

/// The first `segments` segments of a node key, i.e. the key of the ancestor
/// at that level.
pub(crate) fn key_prefix(key: &str, segments: usize) -> String {
    key.split(KEY_SEPARATOR)
        .take(segments)
        .collect::<Vec<_>>()
        .join(&KEY_SEPARATOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_walks_ancestors() {
        let key = "a=3/s=9";
        assert_eq!(key_prefix(key, 1), "a=3");
        assert_eq!(key_prefix(key, 2), "a=3/s=9");
        // Asking for more segments than exist returns the whole key.
        assert_eq!(key_prefix(key, 5), "a=3/s=9");
    }
}
