//! Page store abstraction consumed by the B+-tree.
//!
//! The tree never touches a file directly. It asks a `PageStore` for pages by
//! id and works on them through a scoped `PageCursor`:
//!
//! - `with_cursor` acquires a cursor on a page, runs the caller's closure,
//!   and writes any dirty page back when the closure returns.
//! - Shared-mode cursors are re-run while the store reports a conflicting
//!   write (`should_retry`), up to `MAX_CURSOR_RETRIES` times.
//! - Exclusive-mode cursors run exactly once.
//!
//! Implementations: `MemoryPageStore` (tests, staging) and `FilePageStore`.

use crate::storage::page::{MAX_PAGE_SIZE, MIN_PAGE_SIZE, Page, PageId};
use crate::storage::superblock::SuperblockError;

/// Upper bound on shared-read retries. A shared read that still conflicts
/// after this many retries fails with `StoreError::RetryLimitExceeded`.
pub const MAX_CURSOR_RETRIES: usize = 16;

/// A fixed-size page store addressed by page id.
pub trait PageStore {
    /// Size of every page in this store.
    fn page_size(&self) -> usize;

    /// Number of node pages allocated so far (the high-water mark).
    fn page_count(&self) -> u64;

    /// Reserve a new zeroed page at the end of the store.
    fn allocate(&mut self) -> Result<PageId, StoreError>;

    /// Read a page.
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StoreError>;

    /// Write a page.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StoreError>;

    /// Release a page. Ids are never reused; the page is zeroed so that it
    /// reads back as an uninitialized node.
    fn free(&mut self, page_id: PageId) -> Result<(), StoreError> {
        let page = Page::new(self.page_size());
        self.write_page(page_id, &page)
    }

    /// Make all writes durable.
    fn sync(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Whether a conflicting write happened to `page_id` since it was last
    /// read, meaning a shared reader must read it again.
    fn should_retry(&mut self, _page_id: PageId) -> bool {
        false
    }
}

/// Validate a page size requested for a new store.
pub fn validate_page_size(page_size: usize) -> Result<(), StoreError> {
    if (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) && page_size % 8 == 0 {
        Ok(())
    } else {
        Err(StoreError::InvalidPageSize(page_size))
    }
}

/// Lock mode of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Read-only access; the cursor may be re-run on conflict.
    Shared,
    /// Read-write access.
    Exclusive,
}

/// A positioned view over one page at a time.
///
/// The cursor owns a copy of the current page. Writes mark it dirty; dirty
/// pages are written back on `goto` and when the owning `with_cursor` scope
/// ends.
pub struct PageCursor<'s, S: PageStore + ?Sized> {
    store: &'s mut S,
    mode: LockMode,
    page_id: PageId,
    page: Page,
    offset: usize,
    dirty: bool,
}

impl<'s, S: PageStore + ?Sized> PageCursor<'s, S> {
    fn open(store: &'s mut S, page_id: PageId, mode: LockMode) -> Result<Self, StoreError> {
        let page = store.read_page(page_id)?;
        Ok(Self {
            store,
            mode,
            page_id,
            page,
            offset: 0,
            dirty: false,
        })
    }

    /// Id of the page the cursor is on.
    #[must_use]
    pub const fn current_page_id(&self) -> PageId {
        self.page_id
    }

    /// Lock mode the cursor was opened with.
    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    /// Page size of the underlying store.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page.len()
    }

    /// Current byte offset.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Move to a byte offset within the current page.
    pub const fn seek(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// Read-only access to the current page.
    #[must_use]
    pub const fn page(&self) -> &Page {
        &self.page
    }

    /// Mutable access to the current page. Marks the page dirty.
    pub fn page_mut(&mut self) -> Result<&mut Page, StoreError> {
        self.ensure_writable()?;
        self.dirty = true;
        Ok(&mut self.page)
    }

    /// Read `len` bytes at the current offset and advance.
    pub fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        let bytes = self.page.read_bytes(self.offset, len).to_vec();
        self.offset += len;
        bytes
    }

    /// Write bytes at the current offset and advance.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        let offset = self.offset;
        self.page_mut()?.write_bytes(offset, bytes);
        self.offset += bytes.len();
        Ok(())
    }

    pub fn read_u8(&mut self) -> u8 {
        let value = self.page.read_u8(self.offset);
        self.offset += 1;
        value
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), StoreError> {
        let offset = self.offset;
        self.page_mut()?.write_u8(offset, value);
        self.offset += 1;
        Ok(())
    }

    pub fn read_u32(&mut self) -> u32 {
        let value = self.page.read_u32(self.offset);
        self.offset += 4;
        value
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), StoreError> {
        let offset = self.offset;
        self.page_mut()?.write_u32(offset, value);
        self.offset += 4;
        Ok(())
    }

    /// Read a u64 at the current offset and advance.
    pub fn read_u64(&mut self) -> u64 {
        let value = self.page.read_u64(self.offset);
        self.offset += 8;
        value
    }

    /// Write a u64 at the current offset and advance.
    pub fn write_u64(&mut self, value: u64) -> Result<(), StoreError> {
        let offset = self.offset;
        self.page_mut()?.write_u64(offset, value);
        self.offset += 8;
        Ok(())
    }

    /// Read an i64 at the current offset and advance.
    pub fn read_i64(&mut self) -> i64 {
        let value = self.page.read_i64(self.offset);
        self.offset += 8;
        value
    }

    /// Write an i64 at the current offset and advance.
    pub fn write_i64(&mut self, value: i64) -> Result<(), StoreError> {
        let offset = self.offset;
        self.page_mut()?.write_i64(offset, value);
        self.offset += 8;
        Ok(())
    }

    /// Redirect the cursor to another page without leaving the scope.
    ///
    /// The current page is written back first if dirty. The offset resets to 0.
    pub fn goto(&mut self, page_id: PageId) -> Result<(), StoreError> {
        if page_id == self.page_id {
            self.offset = 0;
            return Ok(());
        }
        self.flush()?;
        self.page = self.store.read_page(page_id)?;
        self.page_id = page_id;
        self.offset = 0;
        Ok(())
    }

    /// Allocate a new page in the underlying store.
    pub fn allocate(&mut self) -> Result<PageId, StoreError> {
        self.ensure_writable()?;
        self.store.allocate()
    }

    /// Release a page. Freeing the current page zeroes the cursor's copy.
    pub fn free(&mut self, page_id: PageId) -> Result<(), StoreError> {
        self.ensure_writable()?;
        if page_id == self.page_id {
            self.page.clear();
            self.dirty = true;
            return Ok(());
        }
        self.store.free(page_id)
    }

    /// Whether the store saw a conflicting write to the current page.
    pub fn should_retry(&mut self) -> bool {
        self.store.should_retry(self.page_id)
    }

    /// Re-read the current page from the store, discarding local changes.
    fn reload(&mut self) -> Result<(), StoreError> {
        self.page = self.store.read_page(self.page_id)?;
        self.offset = 0;
        self.dirty = false;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.dirty {
            self.store.write_page(self.page_id, &self.page)?;
            self.dirty = false;
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            LockMode::Exclusive => Ok(()),
            LockMode::Shared => Err(StoreError::ReadOnlyCursor(self.page_id)),
        }
    }
}

/// Run `f` with a cursor positioned on `page_id`.
///
/// The cursor is released (and dirty pages written back) when `f` returns.
/// An error from `f` skips the write-back of the page the cursor is on.
pub fn with_cursor<S, T, E, F>(
    store: &mut S,
    page_id: PageId,
    mode: LockMode,
    mut f: F,
) -> Result<T, E>
where
    S: PageStore + ?Sized,
    E: From<StoreError>,
    F: FnMut(&mut PageCursor<'_, S>) -> Result<T, E>,
{
    let mut cursor = PageCursor::open(store, page_id, mode)?;
    let mut attempts = 0;
    loop {
        let result = f(&mut cursor)?;
        if mode == LockMode::Shared && cursor.should_retry() {
            if attempts == MAX_CURSOR_RETRIES {
                tracing::warn!(
                    "shared read of page {page_id} still conflicts after {attempts} retries"
                );
                return Err(StoreError::RetryLimitExceeded(page_id).into());
            }
            attempts += 1;
            cursor.goto(page_id)?;
            cursor.reload()?;
            continue;
        }
        cursor.flush()?;
        return Ok(result);
    }
}

/// Errors that can occur in a page store.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(std::path::PathBuf),
    /// Superblock error.
    Superblock(SuperblockError),
    /// Page ID out of bounds.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// Page size not supported.
    InvalidPageSize(usize),
    /// A page buffer of the wrong length was handed to the store.
    PageLengthMismatch { expected: usize, actual: usize },
    /// A write was attempted through a shared cursor.
    ReadOnlyCursor(PageId),
    /// A shared read kept conflicting with writes past the retry limit.
    RetryLimitExceeded(PageId),
    /// The file was created for a different key width.
    KeyWidthMismatch { stored: u32, configured: u32 },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => {
                write!(
                    f,
                    "page {page_id} out of bounds (total pages: {total_pages})"
                )
            }
            Self::InvalidPageSize(size) => write!(
                f,
                "invalid page size {size} (multiple of 8 in {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE})"
            ),
            Self::PageLengthMismatch { expected, actual } => {
                write!(f, "page buffer is {actual} bytes, store pages are {expected}")
            }
            Self::ReadOnlyCursor(page_id) => {
                write!(f, "write to page {page_id} through a shared cursor")
            }
            Self::RetryLimitExceeded(page_id) => write!(
                f,
                "page {page_id} still conflicts after {MAX_CURSOR_RETRIES} read retries"
            ),
            Self::KeyWidthMismatch { stored, configured } => write!(
                f,
                "file stores key width {stored}, configured key width is {configured}"
            ),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Superblock(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SuperblockError> for StoreError {
    fn from(e: SuperblockError) -> Self {
        Self::Superblock(e)
    }
}
