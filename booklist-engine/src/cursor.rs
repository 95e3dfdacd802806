//! FILENAME: booklist-engine/src/cursor.rs
//!
//! Windowed reading of the visible rows. `BooklistWindow` is a generic paged
//! reader over any `PageSource`: it fetches fixed-size pages by offset and
//! keeps the ones a scrolling reader is likely to revisit. A page stays
//! cached while it is on the recency ring or within the ring's capacity of
//! the current read position; only pages failing both tests are dropped. A
//! mutation epoch on the source invalidates the whole window, so a reader
//! never serves rows from before a visibility change.

use std::collections::VecDeque;

use rusqlite::types::Value;
use rustc_hash::FxHashMap;

use crate::error::Result;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_CACHED_PAGES: usize = 8;

// ============================================================================
// PAGE SOURCE
// ============================================================================

/// Anything that can serve row pages by offset. Implemented by
/// [`Booklist`](crate::materializer::Booklist) over `visible = 1` rows.
pub trait PageSource {
    fn fetch_page(&self, offset: usize, limit: usize) -> Result<Page>;
    fn visible_count(&self) -> Result<usize>;
    /// Changes whenever row visibility changes; readers drop their caches
    /// when it does.
    fn epoch(&self) -> u64;
}

// ============================================================================
// PAGE AND ROWS
// ============================================================================

/// One fetched page: ordered named columns, position-addressable rows.
pub struct Page {
    offset: usize,
    columns: FxHashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl Page {
    pub fn new(offset: usize, column_names: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let columns = column_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();
        Page {
            offset,
            columns,
            rows,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A borrowed view of one row of a cached page.
pub struct RowRef<'a> {
    page: &'a Page,
    index: usize,
}

impl<'a> RowRef<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let col = *self.page.columns.get(column)?;
        self.page.rows[self.index].get(col)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, column: &str) -> Option<&'a str> {
        match self.get(column)? {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

// ============================================================================
// WINDOW
// ============================================================================

pub struct BooklistWindow<'a, S: PageSource + ?Sized> {
    source: &'a S,
    page_size: usize,
    capacity: usize,
    pages: FxHashMap<usize, Page>,
    /// Page ids, most recently used first.
    mru: VecDeque<usize>,
    /// Page id of the last read, the anchor for distance-based eviction.
    current: usize,
    count: Option<usize>,
    epoch: u64,
}

impl<'a, S: PageSource + ?Sized> BooklistWindow<'a, S> {
    pub fn new(source: &'a S) -> Self {
        BooklistWindow {
            epoch: source.epoch(),
            source,
            page_size: DEFAULT_PAGE_SIZE,
            capacity: DEFAULT_CACHED_PAGES,
            pages: FxHashMap::default(),
            mru: VecDeque::new(),
            current: 0,
            count: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be positive");
        self.page_size = page_size;
        self
    }

    pub fn with_cached_pages(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "page cache capacity must be positive");
        self.capacity = capacity;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of currently cached pages, for diagnostics.
    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    /// The visible-row count, fetched once and then served from cache until
    /// the source mutates.
    pub fn count(&mut self) -> Result<usize> {
        self.sync();
        if let Some(count) = self.count {
            return Ok(count);
        }
        let count = self.source.visible_count()?;
        self.count = Some(count);
        Ok(count)
    }

    /// The row at a visible position, or `None` past the end.
    pub fn row_at(&mut self, position: usize) -> Result<Option<RowRef<'_>>> {
        self.sync();
        let page_id = position / self.page_size;
        self.current = page_id;
        if !self.pages.contains_key(&page_id) {
            let page = self
                .source
                .fetch_page(page_id * self.page_size, self.page_size)?;
            self.pages.insert(page_id, page);
        }
        self.promote(page_id);
        self.evict_distant();
        let page = &self.pages[&page_id];
        let index = position - page.offset();
        if index < page.len() {
            Ok(Some(RowRef { page, index }))
        } else {
            Ok(None)
        }
    }

    /// Drop all cached state when the source has mutated.
    fn sync(&mut self) {
        let current = self.source.epoch();
        if current != self.epoch {
            self.pages.clear();
            self.mru.clear();
            self.count = None;
            self.epoch = current;
        }
    }

    fn promote(&mut self, page_id: usize) {
        if let Some(pos) = self.mru.iter().position(|&id| id == page_id) {
            self.mru.remove(pos);
        }
        self.mru.push_front(page_id);
        self.mru.truncate(self.capacity);
    }

    /// A page is dropped only when it is both off the recency ring and more
    /// than the ring's capacity in pages away from the current position.
    fn evict_distant(&mut self) {
        let ring: Vec<usize> = self.mru.iter().copied().collect();
        let current = self.current;
        let capacity = self.capacity;
        self.pages
            .retain(|&id, _| ring.contains(&id) || id.abs_diff(current) <= capacity);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// A synthetic source: `total` rows with a single `n` column holding the
    /// row position. Counts every page fetch.
    struct FakeSource {
        total: usize,
        fetches: Cell<usize>,
        epoch: Cell<u64>,
    }

    impl FakeSource {
        fn new(total: usize) -> Self {
            FakeSource {
                total,
                fetches: Cell::new(0),
                epoch: Cell::new(0),
            }
        }

        fn mutate(&self) {
            self.epoch.set(self.epoch.get() + 1);
        }
    }

    impl PageSource for FakeSource {
        fn fetch_page(&self, offset: usize, limit: usize) -> Result<Page> {
            self.fetches.set(self.fetches.get() + 1);
            let end = (offset + limit).min(self.total);
            let rows = (offset..end)
                .map(|n| vec![Value::Integer(n as i64)])
                .collect();
            Ok(Page::new(offset, vec!["n".to_owned()], rows))
        }

        fn visible_count(&self) -> Result<usize> {
            Ok(self.total)
        }

        fn epoch(&self) -> u64 {
            self.epoch.get()
        }
    }

    #[test]
    fn rows_come_back_by_position() {
        let source = FakeSource::new(45);
        let mut window = BooklistWindow::new(&source).with_page_size(20);
        assert_eq!(window.row_at(0).unwrap().unwrap().get_i64("n"), Some(0));
        assert_eq!(window.row_at(44).unwrap().unwrap().get_i64("n"), Some(44));
        assert!(window.row_at(45).unwrap().is_none());
    }

    #[test]
    fn recently_read_pages_are_not_refetched() {
        let source = FakeSource::new(500);
        let mut window = BooklistWindow::new(&source)
            .with_page_size(20)
            .with_cached_pages(8);

        // Touch five different pages, then revisit them all.
        for page in 0..5 {
            window.row_at(page * 20).unwrap();
        }
        assert_eq!(source.fetches.get(), 5);
        for page in 0..5 {
            window.row_at(page * 20 + 7).unwrap();
        }
        assert_eq!(source.fetches.get(), 5);
    }

    #[test]
    fn distant_pages_are_evicted_nearby_ones_survive() {
        let source = FakeSource::new(500);
        let mut window = BooklistWindow::new(&source)
            .with_page_size(20)
            .with_cached_pages(8);

        // Scan forward through twelve pages.
        for page in 0..12 {
            window.row_at(page * 20).unwrap();
        }
        assert_eq!(source.fetches.get(), 12);
        // The ring holds the last eight pages; page 3 fell off it but is
        // within eight pages of the current position, so it stays cached.
        assert_eq!(window.cached_pages(), 9);
        window.row_at(3 * 20 + 5).unwrap();
        assert_eq!(source.fetches.get(), 12);

        // Page 0 is off the ring and more than eight pages away: refetched.
        window.row_at(0).unwrap();
        assert_eq!(source.fetches.get(), 13);
    }

    #[test]
    fn count_is_cached_until_mutation() {
        let source = FakeSource::new(99);
        let mut window = BooklistWindow::new(&source);
        assert_eq!(window.count().unwrap(), 99);
        assert_eq!(window.count().unwrap(), 99);

        window.row_at(0).unwrap();
        assert_eq!(window.cached_pages(), 1);

        // A visibility mutation drops pages and count wholesale.
        source.mutate();
        assert_eq!(window.count().unwrap(), 99);
        assert_eq!(window.cached_pages(), 0);
    }

    #[test]
    fn ring_capacity_bounds_only_the_far_pages() {
        let source = FakeSource::new(500);
        let mut window = BooklistWindow::new(&source)
            .with_page_size(20)
            .with_cached_pages(2);

        window.row_at(0).unwrap(); // page 0
        window.row_at(100).unwrap(); // page 5
        window.row_at(120).unwrap(); // page 6; page 0 is now far and off-ring
        window.row_at(140).unwrap(); // page 7
        assert_eq!(source.fetches.get(), 4);
        assert_eq!(window.cached_pages(), 3);

        // Page 5 fell off the two-slot ring but sits two pages from the
        // current position: still a hit.
        window.row_at(101).unwrap();
        assert_eq!(source.fetches.get(), 4);

        // Page 0 was dropped.
        window.row_at(1).unwrap();
        assert_eq!(source.fetches.get(), 5);
    }
}
