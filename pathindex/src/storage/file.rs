//! File-backed page store.
//!
//! Layout: physical page 0 is the superblock, logical node page `n` lives at
//! physical page `n + 1`. The superblock records the node page count and is
//! rewritten on `sync`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::page::{Page, PageId};
use crate::storage::store::{PageStore, StoreError, validate_page_size};
use crate::storage::superblock::{Superblock, SuperblockError};

/// An index file with page-granular I/O.
pub struct FilePageStore {
    file: File,
    path: PathBuf,
    superblock: Superblock,
}

impl FilePageStore {
    /// Create a new index file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, page_size: usize) -> Result<Self, StoreError> {
        validate_page_size(page_size)?;
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let page_size_u32 =
            u32::try_from(page_size).map_err(|_| StoreError::InvalidPageSize(page_size))?;
        let superblock = Superblock::new(page_size_u32);
        file.write_all(superblock.to_page().as_bytes())?;
        file.sync_all()?;

        tracing::info!("Created index file {} (page size {page_size})", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
            superblock,
        })
    }

    /// Open an existing index file. The page size is taken from the superblock.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut head = [0u8; 64];
        file.read_exact(&mut head)?;
        let page_size = Superblock::peek_page_size(&head)
            .ok_or_else(|| {
                let mut magic = [0u8; 8];
                magic.copy_from_slice(&head[..8]);
                SuperblockError::InvalidMagic(magic)
            })? as usize;
        validate_page_size(page_size)?;

        let mut buf = vec![0u8; page_size];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        let superblock = Superblock::from_page(&Page::from_bytes(buf), page_size)?;

        tracing::info!(
            "Opened index file {} ({} node pages)",
            path.display(),
            superblock.node_page_count
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            superblock,
        })
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a reference to the superblock.
    #[must_use]
    pub const fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Get a mutable reference to the superblock.
    ///
    /// Changes are persisted on the next `sync`.
    pub const fn superblock_mut(&mut self) -> &mut Superblock {
        &mut self.superblock
    }

    /// Write the superblock to physical page 0.
    pub fn write_superblock(&mut self) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(self.superblock.to_page().as_bytes())?;
        Ok(())
    }

    fn page_size_u64(&self) -> u64 {
        u64::from(self.superblock.page_size)
    }

    fn check_bounds(&self, page_id: PageId) -> Result<(), StoreError> {
        if page_id >= self.superblock.node_page_count {
            return Err(StoreError::PageOutOfBounds {
                page_id,
                total_pages: self.superblock.node_page_count,
            });
        }
        Ok(())
    }

    fn file_offset(&self, page_id: PageId) -> u64 {
        (page_id + 1) * self.page_size_u64()
    }
}

impl PageStore for FilePageStore {
    fn page_size(&self) -> usize {
        self.superblock.page_size as usize
    }

    fn page_count(&self) -> u64 {
        self.superblock.node_page_count
    }

    fn allocate(&mut self) -> Result<PageId, StoreError> {
        let page_id = self.superblock.node_page_count;
        let new_len = (page_id + 2) * self.page_size_u64();
        self.file.set_len(new_len)?;
        self.superblock.node_page_count = page_id + 1;
        Ok(page_id)
    }

    fn read_page(&mut self, page_id: PageId) -> Result<Page, StoreError> {
        self.check_bounds(page_id)?;
        let offset = self.file_offset(page_id);
        let mut buf = vec![0u8; self.page_size()];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(Page::from_bytes(buf))
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StoreError> {
        self.check_bounds(page_id)?;
        if page.len() != self.page_size() {
            return Err(StoreError::PageLengthMismatch {
                expected: self.page_size(),
                actual: page.len(),
            });
        }
        let offset = self.file_offset(page_id);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(page.as_bytes())?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.write_superblock()?;
        self.file.sync_all()?;
        Ok(())
    }
}
