//! In-memory page store.
//!
//! Used by tests and for staging bulk loads. Supports forcing shared-read
//! retries on a page so the cursor retry loop can be exercised
//! deterministically.

use std::collections::HashMap;

use crate::storage::page::{Page, PageId};
use crate::storage::store::{PageStore, StoreError, validate_page_size};

/// Statistics about store operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// Number of page reads.
    pub reads: u64,
    /// Number of page writes.
    pub writes: u64,
    /// Number of pages allocated.
    pub allocations: u64,
    /// Number of pages freed.
    pub frees: u64,
    /// Number of retries signalled to shared cursors.
    pub retries: u64,
}

/// A `PageStore` that keeps every page in a `Vec`.
///
/// # Thread Safety
///
/// Not thread-safe; the tree drives it from a single writer.
#[derive(Debug)]
pub struct MemoryPageStore {
    page_size: usize,
    pages: Vec<Page>,
    pending_retries: HashMap<PageId, usize>,
    stats: MemoryStoreStats,
}

impl MemoryPageStore {
    /// Create an empty store with the given page size.
    pub fn new(page_size: usize) -> Result<Self, StoreError> {
        validate_page_size(page_size)?;
        Ok(Self {
            page_size,
            pages: Vec::new(),
            pending_retries: HashMap::new(),
            stats: MemoryStoreStats::default(),
        })
    }

    /// Statistics collected so far.
    #[must_use]
    pub const fn stats(&self) -> MemoryStoreStats {
        self.stats
    }

    /// Make the next `count` retry checks on `page_id` report a conflict.
    pub fn force_retries(&mut self, page_id: PageId, count: usize) {
        self.pending_retries.insert(page_id, count);
    }

    fn index(&self, page_id: PageId) -> Result<usize, StoreError> {
        let total_pages = self.page_count();
        if page_id >= total_pages {
            return Err(StoreError::PageOutOfBounds {
                page_id,
                total_pages,
            });
        }
        usize::try_from(page_id).map_err(|_| StoreError::PageOutOfBounds {
            page_id,
            total_pages,
        })
    }
}

impl PageStore for MemoryPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        self.pages.len() as u64
    }

    fn allocate(&mut self) -> Result<PageId, StoreError> {
        let page_id = self.page_count();
        self.pages.push(Page::new(self.page_size));
        self.stats.allocations += 1;
        Ok(page_id)
    }

    fn read_page(&mut self, page_id: PageId) -> Result<Page, StoreError> {
        let idx = self.index(page_id)?;
        self.stats.reads += 1;
        Ok(self.pages[idx].clone())
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StoreError> {
        let idx = self.index(page_id)?;
        if page.len() != self.page_size {
            return Err(StoreError::PageLengthMismatch {
                expected: self.page_size,
                actual: page.len(),
            });
        }
        self.pages[idx].as_bytes_mut().copy_from_slice(page.as_bytes());
        self.stats.writes += 1;
        Ok(())
    }

    fn free(&mut self, page_id: PageId) -> Result<(), StoreError> {
        let idx = self.index(page_id)?;
        self.pages[idx].clear();
        self.stats.frees += 1;
        Ok(())
    }

    fn should_retry(&mut self, page_id: PageId) -> bool {
        match self.pending_retries.get_mut(&page_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                self.stats.retries += 1;
                true
            }
            _ => false,
        }
    }
}
