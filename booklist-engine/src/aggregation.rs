//! FILENAME: booklist-engine/src/aggregation.rs
//!
//! Streaming header synthesis. The leaf SELECT arrives sorted by the group
//! keys, so a single pass with per-level last-seen state decides where group
//! header rows belong: whenever level L's accumulated group values differ
//! from the previous leaf row, headers are due for L and every deeper level,
//! outermost first, before the leaf row itself.

use rusqlite::types::Value;

pub(crate) struct HeaderSynthesizer {
    /// Per level (outermost first): projection indices of the accumulated
    /// group domains. Level L's set contains every outer level's set.
    accumulated: Vec<Vec<usize>>,
    /// Values of the accumulated domains on the previous leaf row.
    last: Vec<Option<Vec<Value>>>,
}

impl HeaderSynthesizer {
    pub fn new(accumulated: Vec<Vec<usize>>) -> Self {
        let last = vec![None; accumulated.len()];
        HeaderSynthesizer { accumulated, last }
    }

    /// Feed the next leaf row. Returns the 1-based outermost level whose
    /// accumulated values changed; headers are due for that level and all
    /// deeper ones. `None` when the row stays inside the current innermost
    /// group.
    pub fn advance(&mut self, row: &[Value]) -> Option<usize> {
        let mut first_changed = None;
        for (i, cols) in self.accumulated.iter().enumerate() {
            let current: Vec<Value> = cols.iter().map(|&c| row[c].clone()).collect();
            let changed = self.last[i].as_ref() != Some(&current);
            if changed {
                first_changed.get_or_insert(i + 1);
                self.last[i] = Some(current);
            }
        }
        first_changed
    }

    /// Forget all last-seen state; the next row emits every header again.
    pub fn reset(&mut self) {
        self.last.iter_mut().for_each(|slot| *slot = None);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(a: i64, b: i64) -> Vec<Value> {
        vec![Value::Integer(a), Value::Integer(b)]
    }

    #[test]
    fn first_row_emits_all_headers() {
        let mut synth = HeaderSynthesizer::new(vec![vec![0], vec![0, 1]]);
        assert_eq!(synth.advance(&row(1, 1)), Some(1));
    }

    #[test]
    fn same_group_emits_nothing() {
        let mut synth = HeaderSynthesizer::new(vec![vec![0], vec![0, 1]]);
        synth.advance(&row(1, 1));
        assert_eq!(synth.advance(&row(1, 1)), None);
    }

    #[test]
    fn inner_change_emits_inner_header_only() {
        let mut synth = HeaderSynthesizer::new(vec![vec![0], vec![0, 1]]);
        synth.advance(&row(1, 1));
        assert_eq!(synth.advance(&row(1, 2)), Some(2));
    }

    #[test]
    fn outer_change_emits_from_the_outer_level() {
        let mut synth = HeaderSynthesizer::new(vec![vec![0], vec![0, 1]]);
        synth.advance(&row(1, 1));
        // Inner value repeats, but the outer group changed: both headers due.
        assert_eq!(synth.advance(&row(2, 1)), Some(1));
    }

    #[test]
    fn reset_forgets_everything() {
        let mut synth = HeaderSynthesizer::new(vec![vec![0]]);
        synth.advance(&row(1, 0));
        synth.reset();
        assert_eq!(synth.advance(&row(1, 0)), Some(1));
    }

    #[test]
    fn null_and_value_differ() {
        let mut synth = HeaderSynthesizer::new(vec![vec![0]]);
        synth.advance(&[Value::Null]);
        assert_eq!(synth.advance(&[Value::Integer(0)]), Some(1));
    }
}
