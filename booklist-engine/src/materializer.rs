//! FILENAME: booklist-engine/src/materializer.rs
//!
//! List materialization and the `Booklist` instance API. Building runs in one
//! transaction: create the per-instance table, stream the plan's sorted leaf
//! SELECT through the header synthesizer inserting rows one at a time (rowid
//! assignment order is the hierarchy pre-order), apply the rebuild mode, then
//! index and ANALYZE. The instance owns its table until `close`.

use std::cell::Cell;
use std::sync::Arc;

use rusqlite::params_from_iter;
use rusqlite::types::Value;

use store::{Db, Domain, DomainKind, InstanceTracker, TableDefinition};

use crate::aggregation::HeaderSynthesizer;
use crate::builder::QueryPlan;
use crate::cursor::{BooklistWindow, Page, PageSource};
use crate::error::Result;
use crate::navigator::BookNavigator;
use crate::node::{key_prefix, BooklistNode, NodeNextState};
use crate::schema::{
    BOOK, BOOK_UUID, KEY_SEPARATOR, NODE_EXPANDED, NODE_GROUP, NODE_KEY, NODE_LEVEL, NODE_VISIBLE,
};
use crate::state::NodeStateStore;
use crate::style::{GroupKind, ListStyle, RebuildMode};

// ============================================================================
// BOOKLIST
// ============================================================================

/// A materialized, hierarchical book list bound to one connection. Rows live
/// in a disposable per-instance table; dropping the instance without
/// [`close`](Self::close) leaks the table until the connection goes away and
/// is logged as a warning.
pub struct Booklist<'db> {
    db: &'db Db,
    tracker: Arc<InstanceTracker>,
    instance_id: u32,
    table_name: String,
    style: ListStyle,
    bookshelf_id: i64,
    book_count: Cell<Option<i64>>,
    distinct_book_count: Cell<Option<i64>>,
    /// Bumped on every visibility mutation; windows watch it to drop caches.
    epoch: Cell<u64>,
    closed: bool,
}

impl<'db> Booklist<'db> {
    pub(crate) fn build(
        db: &'db Db,
        tracker: Arc<InstanceTracker>,
        plan: QueryPlan,
        style: ListStyle,
        bookshelf_id: i64,
        mode: RebuildMode,
    ) -> Result<Booklist<'db>> {
        let instance_id = tracker.acquire();
        let table_name = format!("book_list_tmp_{instance_id}");

        let built = db.with_transaction(|db| {
            materialize(db, &table_name, &plan, &style, bookshelf_id, mode)
        });
        match built {
            Ok(()) => {
                log::debug!("built {table_name} for style `{}`", style.name());
                Ok(Booklist {
                    db,
                    tracker,
                    instance_id,
                    table_name,
                    style,
                    bookshelf_id,
                    book_count: Cell::new(None),
                    distinct_book_count: Cell::new(None),
                    epoch: Cell::new(0),
                    closed: false,
                })
            }
            Err(err) => {
                tracker.release();
                Err(err)
            }
        }
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn style(&self) -> &ListStyle {
        &self.style
    }

    pub fn group_count(&self) -> usize {
        self.style.group_count()
    }

    pub(crate) fn db(&self) -> &'db Db {
        self.db
    }

    fn state(&self) -> NodeStateStore<'_> {
        NodeStateStore::new(
            self.db,
            &self.table_name,
            self.bookshelf_id,
            self.style.id(),
            self.group_count(),
        )
    }

    fn bump_epoch(&self) {
        self.epoch.set(self.epoch.get() + 1);
    }

    // ------------------------------------------------------------------------
    // Counts
    // ------------------------------------------------------------------------

    /// Number of book placements in the list (a book under two authors counts
    /// twice). Cached; the count never changes for a built list.
    pub fn count_books(&self) -> Result<i64> {
        if let Some(count) = self.book_count.get() {
            return Ok(count);
        }
        let count = self.db.query_i64(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {NODE_GROUP}=?",
                self.table_name
            ),
            [GroupKind::Book.code()],
        )?;
        self.book_count.set(Some(count));
        Ok(count)
    }

    /// Number of distinct books in the list. Cached.
    pub fn count_distinct_books(&self) -> Result<i64> {
        if let Some(count) = self.distinct_book_count.get() {
            return Ok(count);
        }
        let count = self.db.query_i64(
            &format!(
                "SELECT COUNT(DISTINCT {BOOK}) FROM {} WHERE {NODE_GROUP}=?",
                self.table_name
            ),
            [GroupKind::Book.code()],
        )?;
        self.distinct_book_count.set(Some(count));
        Ok(count)
    }

    pub fn count_visible_rows(&self) -> Result<i64> {
        Ok(self.db.query_i64(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {NODE_VISIBLE}=1",
                self.table_name
            ),
            [],
        )?)
    }

    // ------------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------------

    /// The node at `row_id`.
    ///
    /// # Panics
    ///
    /// When no such row exists; row ids come from this list, so a miss is a
    /// caller bug.
    pub fn node_by_row_id(&self, row_id: i64) -> Result<BooklistNode> {
        match self.read_node(row_id)? {
            Some(node) => Ok(node),
            None => panic!("row {row_id} not in {}", self.table_name),
        }
    }

    fn read_node(&self, row_id: i64) -> Result<Option<BooklistNode>> {
        use rusqlite::OptionalExtension;
        let sql = format!(
            "SELECT _id,{NODE_KEY},{NODE_LEVEL},{NODE_GROUP},{NODE_EXPANDED},{NODE_VISIBLE},\
             {BOOK} FROM {} WHERE _id=?",
            self.table_name
        );
        let mut stmt = self.db.conn().prepare_cached(&sql)?;
        Ok(stmt
            .query_row([row_id], |row| {
                Ok(BooklistNode {
                    row_id: row.get(0)?,
                    key: row.get(1)?,
                    level: row.get::<_, i64>(2)? as usize,
                    group: group_from_row(row.get(3)?),
                    expanded: row.get(4)?,
                    visible: row.get(5)?,
                    book_id: row.get(6)?,
                    list_position: None,
                })
            })
            .optional()?)
    }

    /// Position of a node among the visible rows: the count of visible rows
    /// before it (one less when the node itself is hidden).
    fn list_position_of(&self, node: &BooklistNode) -> Result<usize> {
        let before = self.db.query_i64(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {NODE_VISIBLE}=1 AND _id<?",
                self.table_name
            ),
            [node.row_id],
        )? as usize;
        Ok(if node.visible {
            before
        } else {
            before.saturating_sub(1)
        })
    }

    /// Expand, collapse or toggle one node. Returns the node with its new
    /// state and list position.
    pub fn set_node(
        &self,
        row_id: i64,
        next_state: NodeNextState,
        relative_child_level: usize,
    ) -> Result<BooklistNode> {
        let mut node = self.node_by_row_id(row_id)?;
        let expand = match next_state {
            NodeNextState::Expand => true,
            NodeNextState::Collapse => false,
            NodeNextState::Toggle => !node.expanded,
        };
        self.state().set_node(&node, expand, relative_child_level)?;
        self.bump_epoch();
        node.expanded = expand;
        node.visible = true;
        node.list_position = Some(self.list_position_of(&node)?);
        Ok(node)
    }

    /// Expand or collapse all nodes, keeping `top_level` visible, and persist
    /// the tree state.
    pub fn set_all_nodes(&self, top_level: usize, expand: bool) -> Result<()> {
        self.state().set_all_nodes(top_level, expand)?;
        self.bump_epoch();
        Ok(())
    }

    /// Every node of one book, with positions. When none of them is visible,
    /// each placement's ancestor chain is expanded first so the caller can
    /// scroll to the book.
    pub fn book_nodes(&self, book_id: i64) -> Result<Vec<BooklistNode>> {
        let mut nodes = self.read_book_nodes(book_id)?;
        if nodes.is_empty() {
            return Ok(nodes);
        }
        if !nodes.iter().any(|n| n.visible) {
            self.db.with_transaction(|_| {
                for node in &nodes {
                    self.ensure_node_is_visible(node)?;
                }
                Ok::<_, crate::error::BooklistError>(())
            })?;
            self.bump_epoch();
            nodes = self.read_book_nodes(book_id)?;
        }
        for node in &mut nodes {
            node.list_position = Some(self.list_position_of(node)?);
        }
        Ok(nodes)
    }

    fn read_book_nodes(&self, book_id: i64) -> Result<Vec<BooklistNode>> {
        let sql = format!(
            "SELECT _id,{NODE_KEY},{NODE_LEVEL},{NODE_GROUP},{NODE_EXPANDED},{NODE_VISIBLE},\
             {BOOK} FROM {} WHERE {BOOK}=? ORDER BY _id",
            self.table_name
        );
        let mut stmt = self.db.conn().prepare_cached(&sql)?;
        let rows = stmt.query_map([book_id], |row| {
            Ok(BooklistNode {
                row_id: row.get(0)?,
                key: row.get(1)?,
                level: row.get::<_, i64>(2)? as usize,
                group: group_from_row(row.get(3)?),
                expanded: row.get(4)?,
                visible: row.get(5)?,
                book_id: row.get(6)?,
                list_position: None,
            })
        })?;
        let mut nodes = Vec::new();
        for node in rows {
            nodes.push(node?);
        }
        Ok(nodes)
    }

    /// Expand the node's ancestors root-downward, one child level at a time,
    /// walking the key prefixes.
    fn ensure_node_is_visible(&self, node: &BooklistNode) -> Result<()> {
        let deepest_ancestor = (node.level - 1).min(self.group_count());
        for level in 1..=deepest_ancestor {
            let prefix = key_prefix(&node.key, level);
            let found = self.db.query_opt_i64(
                &format!(
                    "SELECT _id FROM {} WHERE {NODE_KEY}=? AND {NODE_LEVEL}=? \
                     ORDER BY _id LIMIT 1",
                    self.table_name
                ),
                (prefix, level as i64),
            )?;
            if let Some(row_id) = found {
                let ancestor = self.node_by_row_id(row_id)?;
                self.state().set_node(&ancestor, true, 1)?;
            }
        }
        Ok(())
    }

    /// Book ids of all leaf rows, in list order.
    pub fn current_book_id_list(&self) -> Result<Vec<i64>> {
        let values = self.db.query_column(
            &format!(
                "SELECT {BOOK} FROM {} WHERE {NODE_GROUP}=? ORDER BY _id",
                self.table_name
            ),
            [GroupKind::Book.code()],
        )?;
        Ok(values
            .into_iter()
            .filter_map(|v| match v {
                Value::Integer(id) => Some(id),
                _ => None,
            })
            .collect())
    }

    /// The first leaf after `from_row_id` whose book fails the artifact
    /// predicate (receives the book uuid), wrapping to the start of the list.
    /// A hidden hit is revealed by expanding its ancestors, and the returned
    /// node carries its list position so the caller can scroll to it.
    pub fn next_book_without<F>(
        &self,
        from_row_id: i64,
        mut has_artifact: F,
    ) -> Result<Option<BooklistNode>>
    where
        F: FnMut(&str) -> bool,
    {
        let found = match self.scan_missing(from_row_id, i64::MAX, &mut has_artifact)? {
            Some(node) => Some(node),
            // Wrap around, rescanning up to and including the start row.
            None if from_row_id > 0 => self.scan_missing(0, from_row_id, &mut has_artifact)?,
            None => None,
        };
        let Some(mut node) = found else {
            return Ok(None);
        };
        if !node.visible {
            self.db
                .with_transaction(|_| self.ensure_node_is_visible(&node))?;
            self.bump_epoch();
            node = self.node_by_row_id(node.row_id)?;
        }
        node.list_position = Some(self.list_position_of(&node)?);
        Ok(Some(node))
    }

    fn scan_missing<F>(
        &self,
        after: i64,
        up_to: i64,
        has_artifact: &mut F,
    ) -> Result<Option<BooklistNode>>
    where
        F: FnMut(&str) -> bool,
    {
        let sql = format!(
            "SELECT _id,{NODE_KEY},{NODE_LEVEL},{NODE_GROUP},{NODE_EXPANDED},{NODE_VISIBLE},\
             {BOOK},{BOOK_UUID} FROM {} \
             WHERE {NODE_GROUP}=? AND _id>? AND _id<=? ORDER BY _id",
            self.table_name
        );
        let mut stmt = self.db.conn().prepare_cached(&sql)?;
        let mut rows = stmt.query((GroupKind::Book.code(), after, up_to))?;
        while let Some(row) = rows.next()? {
            let uuid: String = row.get(7)?;
            if !has_artifact(&uuid) {
                return Ok(Some(BooklistNode {
                    row_id: row.get(0)?,
                    key: row.get(1)?,
                    level: row.get::<_, i64>(2)? as usize,
                    group: group_from_row(row.get(3)?),
                    expanded: row.get(4)?,
                    visible: row.get(5)?,
                    book_id: row.get(6)?,
                    list_position: None,
                }));
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------------

    /// A windowed reader over the visible rows.
    pub fn window(&self) -> BooklistWindow<'_, Self> {
        BooklistWindow::new(self)
    }

    /// A leaf-only navigator over all book rows.
    pub fn navigator(&self) -> BookNavigator<'_, 'db> {
        BookNavigator::new(self)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Drop the list table and release the instance id.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.db
            .conn()
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", self.table_name))?;
        self.tracker.release();
        self.closed = true;
        Ok(())
    }
}

impl Drop for Booklist<'_> {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!(
                "booklist instance {} dropped without close()",
                self.instance_id
            );
            let _ = self
                .db
                .conn()
                .execute_batch(&format!("DROP TABLE IF EXISTS {}", self.table_name));
            self.tracker.release();
        }
    }
}

impl PageSource for Booklist<'_> {
    fn fetch_page(&self, offset: usize, limit: usize) -> Result<Page> {
        let sql = format!(
            "SELECT * FROM {} WHERE {NODE_VISIBLE}=1 ORDER BY _id LIMIT ? OFFSET ?",
            self.table_name
        );
        let mut stmt = self.db.conn().prepare_cached(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let column_count = columns.len();
        let mut rows = stmt.query((limit as i64, offset as i64))?;
        let mut data = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(row.get::<_, Value>(i)?);
            }
            data.push(values);
        }
        Ok(Page::new(offset, columns, data))
    }

    fn visible_count(&self) -> Result<usize> {
        Ok(self.count_visible_rows()? as usize)
    }

    fn epoch(&self) -> u64 {
        self.epoch.get()
    }
}

fn group_from_row(code: i64) -> GroupKind {
    GroupKind::from_code(code).expect("unknown node_group code in list table")
}

// ============================================================================
// MATERIALIZATION
// ============================================================================

fn materialize(
    db: &Db,
    table_name: &str,
    plan: &QueryPlan,
    style: &ListStyle,
    bookshelf_id: i64,
    mode: RebuildMode,
) -> Result<()> {
    NodeStateStore::create_table(db)?;

    let table = list_table_def(table_name, &plan.projection);
    db.conn().execute_batch(&table.create_sql(false)?)?;

    let group_count = plan.levels.len();

    // One INSERT per header level (each carries its accumulated group
    // columns) plus the leaf INSERT carrying every projected column.
    let header_sqls: Vec<String> = plan
        .levels
        .iter()
        .map(|level| {
            let extra: Vec<&str> = level
                .accumulated_cols
                .iter()
                .map(|&i| plan.projection[i].name())
                .collect();
            insert_sql(table_name, &extra)
        })
        .collect();
    let leaf_cols: Vec<&str> = plan.projection.iter().map(Domain::name).collect();
    let leaf_sql = insert_sql(table_name, &leaf_cols);

    let mut synth = HeaderSynthesizer::new(
        plan.levels
            .iter()
            .map(|level| level.accumulated_cols.clone())
            .collect(),
    );
    let separator = KEY_SEPARATOR.to_string();
    let mut segments: Vec<String> = vec![String::new(); group_count];

    let column_count = plan.projection.len();
    let mut select = db.conn().prepare(&plan.select_sql)?;
    let mut rows = select.query(params_from_iter(plan.select_params.iter().cloned()))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(row.get::<_, Value>(i)?);
        }
        for (i, level) in plan.levels.iter().enumerate() {
            segments[i] = format!("{}={}", level.prefix, key_value(&values[level.key_col]));
        }

        if let Some(first) = synth.advance(&values) {
            for level_no in first..=group_count {
                let level = &plan.levels[level_no - 1];
                let mut params: Vec<Value> = vec![
                    Value::Text(segments[..level_no].join(&separator)),
                    Value::Integer(level_no as i64),
                    Value::Integer(level.kind.code()),
                ];
                params.extend(level.accumulated_cols.iter().map(|&c| values[c].clone()));
                let mut stmt = db.conn().prepare_cached(&header_sqls[level_no - 1])?;
                stmt.execute(params_from_iter(params))?;
            }
        }

        let mut params: Vec<Value> = vec![
            Value::Text(segments.join(&separator)),
            Value::Integer((group_count + 1) as i64),
            Value::Integer(GroupKind::Book.code()),
        ];
        params.extend(values);
        let mut stmt = db.conn().prepare_cached(&leaf_sql)?;
        stmt.execute(params_from_iter(params))?;
    }
    drop(rows);
    drop(select);

    let state = NodeStateStore::new(db, table_name, bookshelf_id, style.id(), group_count);
    state.apply_rebuild_mode(mode)?;

    db.conn().execute_batch(&format!(
        "CREATE INDEX {table_name}_idx_node ON {table_name} \
         ({NODE_LEVEL},{NODE_VISIBLE},{NODE_KEY})"
    ))?;
    create_sort_index(db, table_name, plan)?;
    db.analyze(table_name)?;
    Ok(())
}

/// The list table: node columns plus one column per projected domain. Header
/// rows carry only their accumulated group columns, so every projected
/// column must accept NULL regardless of its source-table constraints.
fn list_table_def(table_name: &str, projection: &[Domain]) -> TableDefinition {
    TableDefinition::new(table_name, "bl")
        .with_primary_key()
        .add_domains([
            Domain::new(NODE_KEY, DomainKind::Text).not_null(),
            Domain::new(NODE_LEVEL, DomainKind::Integer).not_null(),
            Domain::new(NODE_GROUP, DomainKind::Integer).not_null(),
            Domain::new(NODE_EXPANDED, DomainKind::Boolean)
                .not_null()
                .with_default("0"),
            Domain::new(NODE_VISIBLE, DomainKind::Boolean)
                .not_null()
                .with_default("0"),
        ])
        .add_domains(projection.iter().cloned().map(Domain::nullable))
}

fn insert_sql(table_name: &str, extra_cols: &[&str]) -> String {
    let mut columns = format!("{NODE_KEY},{NODE_LEVEL},{NODE_GROUP}");
    let mut marks = String::from("?,?,?");
    for col in extra_cols {
        columns.push(',');
        columns.push_str(col);
        marks.push_str(",?");
    }
    format!("INSERT INTO {table_name} ({columns}) VALUES ({marks})")
}

/// Render a key segment value. NULL renders as the empty string so missing
/// values still group.
fn key_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(_) => String::new(),
    }
}

/// Sort-key index over the stored sort columns. Skipped when the native
/// collation is already case-insensitive, which makes the plain rowid order
/// reusable for sorted reads.
fn create_sort_index(db: &Db, table_name: &str, plan: &QueryPlan) -> Result<()> {
    if plan.sort_index_columns.is_empty() || !db.collation_is_case_sensitive()? {
        return Ok(());
    }
    let columns: Vec<String> = plan
        .sort_index_columns
        .iter()
        .map(|name| {
            let is_text = plan
                .projection
                .iter()
                .find(|d| d.name() == name)
                .map(|d| d.kind().is_text())
                .unwrap_or(false);
            if is_text {
                format!("{name} COLLATE NOCASE")
            } else {
                name.clone()
            }
        })
        .collect();
    db.conn().execute_batch(&format!(
        "CREATE INDEX {table_name}_idx_sort ON {table_name} ({})",
        columns.join(",")
    ))?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_table_accepts_partial_header_rows() {
        let projection = vec![
            Domain::new("title", DomainKind::Text).not_null(),
            Domain::new("book", DomainKind::Integer).not_null(),
        ];
        let sql = list_table_def("t", &projection).create_sql(false).unwrap();
        assert!(!sql.contains("title text not null"));
        assert!(!sql.contains("book integer not null"));
        // Node columns keep their constraints.
        assert!(sql.contains("node_key text not null"));
    }
}
