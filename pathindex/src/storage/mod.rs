//! Page storage for the path index.
//!
//! The B+-tree sees storage only through the `PageStore` trait and scoped
//! `PageCursor`s. Two stores are provided:
//!
//! - `MemoryPageStore`: pages in a `Vec`, used for tests and staging.
//! - `FilePageStore`: a single file with a checksummed superblock in
//!   physical page 0 followed by fixed-size node pages.
//!
//! # Usage
//!
//! ```
//! use pathindex::storage::{LockMode, MemoryPageStore, PageStore, StoreError, with_cursor};
//!
//! let mut store = MemoryPageStore::new(4096).unwrap();
//! let page_id = store.allocate().unwrap();
//!
//! with_cursor::<_, _, StoreError, _>(&mut store, page_id, LockMode::Exclusive, |cursor| {
//!     cursor.seek(32);
//!     cursor.write_u64(7)
//! })
//! .unwrap();
//!
//! assert_eq!(store.read_page(page_id).unwrap().read_u64(32), 7);
//! ```

mod file;
mod memory;
mod page;
mod store;
mod superblock;

pub use file::FilePageStore;
pub use memory::{MemoryPageStore, MemoryStoreStats};
pub use page::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, NO_PAGE, Page, PageId};
pub use store::{
    LockMode, MAX_CURSOR_RETRIES, PageCursor, PageStore, StoreError, validate_page_size,
    with_cursor,
};
pub use superblock::{Superblock, SuperblockError};
