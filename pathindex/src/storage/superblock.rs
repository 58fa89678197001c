//! Superblock structure and serialization.
//!
//! The superblock occupies physical page 0 of an index file and contains
//! metadata about the file. Node pages follow it.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{NO_PAGE, Page, PageId};

/// Magic number identifying a path index file: "PATHIDX1"
pub const MAGIC: [u8; 8] = *b"PATHIDX1";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Superblock field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const PAGE_SIZE: usize = 12;
    pub const NODE_PAGE_COUNT: usize = 16;
    pub const INDEX_ROOT: usize = 24;
    pub const INDEX_KEY_WIDTH: usize = 32;
    pub const CHECKSUM: usize = 36;
    // 40..page end: reserved
}

/// The superblock contains all metadata about the index file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Format version number.
    pub format_version: u32,
    /// Page size in bytes.
    pub page_size: u32,
    /// Number of node pages after the superblock.
    pub node_page_count: u64,
    /// Root node of the index, maintained by whoever owns the tree.
    /// `NO_PAGE` until a tree is stored.
    pub index_root: PageId,
    /// Key width of the index in words (0 = variable length).
    pub index_key_width: u32,
}

impl Superblock {
    /// Create a new superblock for a fresh file.
    #[must_use]
    pub const fn new(page_size: u32) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size,
            node_page_count: 0,
            index_root: NO_PAGE,
            index_key_width: 0,
        }
    }

    /// Serialize the superblock into a page of `page_size` bytes.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new(self.page_size as usize);

        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, self.format_version);
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u64(offsets::NODE_PAGE_COUNT, self.node_page_count);
        page.write_u64(offsets::INDEX_ROOT, self.index_root);
        page.write_u32(offsets::INDEX_KEY_WIDTH, self.index_key_width);
        let checksum = page.checksum(0, offsets::CHECKSUM);
        page.write_u32(offsets::CHECKSUM, checksum);

        page
    }

    /// Deserialize a superblock from a page.
    ///
    /// `expected_page_size` is the page size the caller opened the file with.
    pub fn from_page(page: &Page, expected_page_size: usize) -> Result<Self, SuperblockError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(page.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let stored = page.read_u32(offsets::CHECKSUM);
        let actual = page.checksum(0, offsets::CHECKSUM);
        if stored != actual {
            return Err(SuperblockError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size as usize != expected_page_size {
            return Err(SuperblockError::PageSizeMismatch {
                stored: page_size,
                expected: expected_page_size,
            });
        }

        Ok(Self {
            format_version,
            page_size,
            node_page_count: page.read_u64(offsets::NODE_PAGE_COUNT),
            index_root: page.read_u64(offsets::INDEX_ROOT),
            index_key_width: page.read_u32(offsets::INDEX_KEY_WIDTH),
        })
    }

    /// Read just the page size field, for opening a file whose page size is
    /// not known yet.
    #[must_use]
    pub fn peek_page_size(header: &[u8]) -> Option<u32> {
        if header.len() < offsets::PAGE_SIZE + 4 || header[..8] != MAGIC {
            return None;
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&header[offsets::PAGE_SIZE..offsets::PAGE_SIZE + 4]);
        Some(u32::from_le_bytes(buf))
    }
}

/// Errors that can occur when reading a superblock.
#[derive(Debug)]
pub enum SuperblockError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Page size on disk differs from the requested one.
    PageSizeMismatch { stored: u32, expected: usize },
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::PageSizeMismatch { stored, expected } => {
                write!(f, "page size mismatch: file has {stored}, expected {expected}")
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for SuperblockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_roundtrip() {
        let mut sb = Superblock::new(4096);
        sb.node_page_count = 128;
        sb.index_root = 17;
        sb.index_key_width = 4;

        let page = sb.to_page();
        let restored = Superblock::from_page(&page, 4096).expect("should parse");
        assert_eq!(restored, sb);
    }

    #[test]
    fn test_superblock_invalid_magic() {
        let mut page = Page::new(4096);
        page.write_bytes(0, b"BADMAGIC");

        let result = Superblock::from_page(&page, 4096);
        assert!(matches!(result, Err(SuperblockError::InvalidMagic(_))));
    }

    #[test]
    fn test_superblock_detects_corruption() {
        let mut page = Superblock::new(4096).to_page();
        page.write_u64(16, 999);

        let result = Superblock::from_page(&page, 4096);
        assert!(matches!(
            result,
            Err(SuperblockError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_superblock_page_size_mismatch() {
        let page = Superblock::new(4096).to_page();
        let result = Superblock::from_page(&page, 8192);
        assert!(matches!(
            result,
            Err(SuperblockError::PageSizeMismatch {
                stored: 4096,
                expected: 8192
            })
        ));
    }

    #[test]
    fn test_peek_page_size() {
        let page = Superblock::new(512).to_page();
        assert_eq!(Superblock::peek_page_size(page.as_bytes()), Some(512));
        assert_eq!(Superblock::peek_page_size(&[0u8; 64]), None);
    }
}
