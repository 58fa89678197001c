//! Search within a single node.

use std::cmp::Ordering;

use crate::btree::header;
use crate::btree::key::{KeyEncoding, KeyFormat, compare};
use crate::btree::node::keys_offset;
use crate::storage::Page;

/// Position of a key inside a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    /// Index of the matching key, or the number of keys strictly less than
    /// the query.
    pub index: usize,
    /// Byte offset where the key at `index` starts (the end of the key
    /// region if `index == key_count`).
    pub offset: usize,
    /// Whether the key at `index` equals the query.
    pub found: bool,
}

impl SearchResult {
    /// Child to descend into when this result comes from an internal node.
    /// A key equal to a separator lives in the subtree right of it.
    #[must_use]
    pub const fn child_index(&self) -> usize {
        if self.found { self.index + 1 } else { self.index }
    }
}

/// Locate `key` in the node on `page`.
#[must_use]
pub fn search_node(page: &Page, format: KeyFormat, key: &[i64]) -> SearchResult {
    let count = header::number_of_keys(page);
    let start = keys_offset(page);
    match format.stride() {
        Some(stride) => binary_search(page, format, key, start, stride, count),
        None => linear_search(page, format, key, start, count),
    }
}

fn binary_search(
    page: &Page,
    format: KeyFormat,
    key: &[i64],
    start: usize,
    stride: usize,
    count: usize,
) -> SearchResult {
    let mut low = 0;
    let mut high = count;
    while low < high {
        let mid = low + (high - low) / 2;
        let probe = format.read_key(page, start + mid * stride);
        match compare(&probe, key) {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid,
            Ordering::Equal => {
                return SearchResult {
                    index: mid,
                    offset: start + mid * stride,
                    found: true,
                };
            }
        }
    }
    SearchResult {
        index: low,
        offset: start + low * stride,
        found: false,
    }
}

fn linear_search(
    page: &Page,
    format: KeyFormat,
    key: &[i64],
    start: usize,
    count: usize,
) -> SearchResult {
    let mut offset = start;
    for index in 0..count {
        let probe = format.read_key(page, offset);
        match compare(&probe, key) {
            Ordering::Less => offset += format.span_at(page, offset),
            Ordering::Equal => {
                return SearchResult {
                    index,
                    offset,
                    found: true,
                };
            }
            Ordering::Greater => {
                return SearchResult {
                    index,
                    offset,
                    found: false,
                };
            }
        }
    }
    SearchResult {
        index: count,
        offset,
        found: false,
    }
}
