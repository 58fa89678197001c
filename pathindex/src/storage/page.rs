//! Page buffers and page identifiers.
//!
//! A page is the unit of I/O for every store. The page size is fixed per
//! store instance (8KB unless configured otherwise); all integers inside a
//! page are little-endian.

/// Default page size in bytes (8KB).
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest page size a store accepts.
pub const MIN_PAGE_SIZE: usize = 64;

/// Largest page size a store accepts (1MB).
pub const MAX_PAGE_SIZE: usize = 1 << 20;

/// A page identifier (0-indexed node page number).
pub type PageId = u64;

/// Sentinel for "no page", stored on disk as the 64-bit value -1.
pub const NO_PAGE: PageId = u64::MAX;

/// A raw page buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Create a page from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into_boxed_slice(),
        }
    }

    /// Size of the page in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the page has zero length (never true for store pages).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the raw page data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable access to the raw page data.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero the whole page.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a u8 at the given offset.
    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    /// Write a u8 at the given offset.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Read a u32 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Write a u32 (little-endian) at the given offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u64 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    /// Write a u64 (little-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Read an i64 (little-endian) at the given offset.
    #[must_use]
    pub fn read_i64(&self, offset: usize) -> i64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        i64::from_le_bytes(buf)
    }

    /// Write an i64 (little-endian) at the given offset.
    pub fn write_i64(&mut self, offset: usize, value: i64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Shift `[offset, used_end)` right by `len` bytes, leaving a gap at
    /// `offset`. The caller guarantees `used_end + len` fits in the page.
    pub fn open_gap(&mut self, offset: usize, len: usize, used_end: usize) {
        self.data.copy_within(offset..used_end, offset + len);
    }

    /// Remove `len` bytes at `offset` by shifting `[offset + len, used_end)`
    /// left. The freed tail is zeroed.
    pub fn close_gap(&mut self, offset: usize, len: usize, used_end: usize) {
        self.data.copy_within(offset + len..used_end, offset);
        self.data[used_end - len..used_end].fill(0);
    }

    /// Compute the CRC32 checksum of `len` bytes starting at `offset`.
    #[must_use]
    pub fn checksum(&self, offset: usize, len: usize) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[offset..offset + len]);
        hasher.finalize()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.data.len().min(32);
        f.debug_struct("Page")
            .field("len", &self.data.len())
            .field("head", &&self.data[..shown])
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_read_write() {
        let mut page = Page::new(DEFAULT_PAGE_SIZE);

        page.write_u8(0, 0xFF);
        assert_eq!(page.read_u8(0), 0xFF);

        page.write_u32(100, 0x1234_5678);
        assert_eq!(page.read_u32(100), 0x1234_5678);

        page.write_u64(200, 0x0102_0304_0506_0708);
        assert_eq!(page.read_u64(200), 0x0102_0304_0506_0708);

        page.write_i64(300, -42);
        assert_eq!(page.read_i64(300), -42);

        page.write_bytes(500, b"hello");
        assert_eq!(page.read_bytes(500, 5), b"hello");
    }

    #[test]
    fn test_no_page_is_minus_one_on_disk() {
        let mut page = Page::new(MIN_PAGE_SIZE);
        page.write_u64(8, NO_PAGE);
        assert_eq!(page.read_i64(8), -1);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let mut page = Page::new(MIN_PAGE_SIZE);
        let before = page.checksum(0, MIN_PAGE_SIZE);
        page.write_u8(10, 1);
        assert_ne!(before, page.checksum(0, MIN_PAGE_SIZE));
    }

    #[test]
    fn test_open_and_close_gap() {
        let mut page = Page::new(MIN_PAGE_SIZE);
        page.write_bytes(0, b"abcdef");

        page.open_gap(2, 3, 6);
        page.write_bytes(2, b"XYZ");
        assert_eq!(page.read_bytes(0, 9), b"abXYZcdef");

        page.close_gap(2, 3, 9);
        assert_eq!(page.read_bytes(0, 9), b"abcdef\0\0\0");
    }
}
