//! Node body layout.
//!
//! After the header, a leaf holds its keys back to back. An internal node
//! holds `key_count + 1` child ids (8 bytes each) followed by its keys.
//! `Child[i]` covers keys below `Key[i]`, `Child[i + 1]` covers keys at or
//! above it.

#![allow(clippy::cast_possible_truncation)]

use crate::btree::header::{self, HEADER_LEN, NodeHeader, NodeKind};
use crate::btree::key::{Key, KeyEncoding, KeyFormat};
use crate::storage::{Page, PageId};

/// Size of one child pointer.
pub const CHILD_SIZE: usize = 8;

/// Byte offset of child pointer `index`.
#[must_use]
pub const fn child_offset(index: usize) -> usize {
    HEADER_LEN + index * CHILD_SIZE
}

/// Byte offset where the key region starts.
#[must_use]
pub fn keys_offset(page: &Page) -> usize {
    if header::is_leaf_node(page) {
        HEADER_LEN
    } else {
        child_offset(header::number_of_keys(page) + 1)
    }
}

/// Byte offset of key `index` (or of the end of the key region when
/// `index == key_count`).
#[must_use]
pub fn key_offset(page: &Page, format: KeyFormat, index: usize) -> usize {
    let start = keys_offset(page);
    match format.stride() {
        Some(stride) => start + index * stride,
        None => (0..index).fold(start, |offset, _| offset + format.span_at(page, offset)),
    }
}

/// First byte past the node's used region.
#[must_use]
pub fn used_end(page: &Page, format: KeyFormat) -> usize {
    key_offset(page, format, header::number_of_keys(page))
}

/// Decode every key of the node.
#[must_use]
pub fn read_keys(page: &Page, format: KeyFormat) -> Vec<Key> {
    let count = header::number_of_keys(page);
    let mut keys = Vec::with_capacity(count);
    let mut offset = keys_offset(page);
    for _ in 0..count {
        keys.push(format.read_key(page, offset));
        offset += format.span_at(page, offset);
    }
    keys
}

/// Child ids of an internal node (empty for a leaf).
#[must_use]
pub fn read_children(page: &Page) -> Vec<PageId> {
    if header::is_leaf_node(page) {
        return Vec::new();
    }
    (0..=header::number_of_keys(page))
        .map(|i| page.read_u64(child_offset(i)))
        .collect()
}

/// Bytes a node body with these keys and `children` pointers occupies.
#[must_use]
pub fn body_len(format: KeyFormat, keys: &[Key], children: usize) -> usize {
    children * CHILD_SIZE + keys.iter().map(|k| format.encoded_len(k)).sum::<usize>()
}

/// Replace a leaf's body with `keys`.
pub fn write_leaf_body(page: &mut Page, format: KeyFormat, keys: &[Key]) -> Result<(), NodeError> {
    write_body(page, format, &[], keys)
}

/// Replace an internal node's body with `children` and `keys`.
pub fn write_internal_body(
    page: &mut Page,
    format: KeyFormat,
    children: &[PageId],
    keys: &[Key],
) -> Result<(), NodeError> {
    if children.len() != keys.len() + 1 {
        return Err(NodeError::Corrupt {
            page_id: None,
            reason: format!("{} children for {} keys", children.len(), keys.len()),
        });
    }
    write_body(page, format, children, keys)
}

fn write_body(
    page: &mut Page,
    format: KeyFormat,
    children: &[PageId],
    keys: &[Key],
) -> Result<(), NodeError> {
    let needed = HEADER_LEN + body_len(format, keys, children.len());
    if needed > page.len() {
        return Err(NodeError::Overflow {
            needed,
            available: page.len(),
        });
    }

    let page_len = page.len();
    page.as_bytes_mut()[HEADER_LEN..page_len].fill(0);
    let mut offset = HEADER_LEN;
    for child in children {
        page.write_u64(offset, *child);
        offset += CHILD_SIZE;
    }
    for key in keys {
        offset += format.write_key(page, offset, key);
    }
    header::set_number_of_keys(page, keys.len());
    Ok(())
}

/// Splice key `key_index` and child `child_index` out of an internal node.
pub fn remove_entry(page: &mut Page, format: KeyFormat, key_index: usize, child_index: usize) {
    let count = header::number_of_keys(page);
    let end = used_end(page, format);
    let key_at = key_offset(page, format, key_index);
    let removed = format.splice_out(page, key_at, end);
    page.close_gap(child_offset(child_index), CHILD_SIZE, end - removed);
    header::set_number_of_keys(page, count - 1);
}

/// Splice a key and a child into an internal node that has room for them.
pub fn insert_entry_in_place(
    page: &mut Page,
    format: KeyFormat,
    key_index: usize,
    child_index: usize,
    key: &[i64],
    child: PageId,
) {
    let count = header::number_of_keys(page);
    let end = used_end(page, format);
    let key_at = key_offset(page, format, key_index) + CHILD_SIZE;
    let child_at = child_offset(child_index);
    page.open_gap(child_at, CHILD_SIZE, end);
    page.write_u64(child_at, child);
    format.splice_in(page, key_at, end + CHILD_SIZE, key);
    header::set_number_of_keys(page, count + 1);
}

/// Smallest `s` such that the first `s` sizes make up at least half of the
/// total.
fn half_point(sizes: &[usize]) -> usize {
    let total: usize = sizes.iter().sum();
    let mut sum = 0;
    for (i, size) in sizes.iter().enumerate() {
        if sum * 2 >= total {
            return i;
        }
        sum += size;
    }
    sizes.len()
}

/// Number of keys that stay in the left node when an overflowing leaf with
/// `keys` is split. Always leaves both halves non-empty.
#[must_use]
pub fn leaf_split_index(format: KeyFormat, keys: &[Key]) -> usize {
    let sizes: Vec<usize> = keys.iter().map(|k| format.encoded_len(k)).collect();
    half_point(&sizes).clamp(1, keys.len().saturating_sub(1).max(1))
}

/// Index of the key promoted out of an overflowing internal node. Keys
/// before it stay left, keys after it move right; neither side is empty.
#[must_use]
pub fn internal_split_index(format: KeyFormat, keys: &[Key]) -> usize {
    let sizes: Vec<usize> = keys
        .iter()
        .map(|k| format.encoded_len(k) + CHILD_SIZE)
        .collect();
    half_point(&sizes)
        .saturating_sub(1)
        .clamp(1, keys.len().saturating_sub(2).max(1))
}

/// Validate the header of a node reached by the tree.
///
/// Zero-key internal nodes only exist inside a deletion and are reported as
/// corruption anywhere else.
pub fn check_node(page: &Page, page_id: PageId, format: KeyFormat) -> Result<NodeKind, NodeError> {
    let Some(header) = NodeHeader::from_page(page) else {
        return Err(corrupt(page_id, "unknown node kind"));
    };
    match header.kind {
        NodeKind::Uninitialized => {
            tracing::warn!("Reached uninitialized page {page_id}");
            Err(NodeError::Uninitialized(page_id))
        }
        _ if header.key_length != format.key_length_field() => {
            tracing::warn!(
                "Page {page_id} has key length {}, tree uses {}",
                header.key_length,
                format.key_length_field()
            );
            Err(NodeError::KeyLengthMismatch {
                page_id,
                expected: format.key_length_field(),
                actual: header.key_length,
            })
        }
        NodeKind::Internal if header.key_count == 0 => {
            Err(corrupt(page_id, "internal node without keys"))
        }
        kind => {
            if used_end(page, format) > page.len() {
                return Err(corrupt(page_id, "key count exceeds page"));
            }
            Ok(kind)
        }
    }
}

/// Build a `Corrupt` error and log it.
pub fn corrupt(page_id: PageId, reason: &str) -> NodeError {
    tracing::warn!("Corrupt node {page_id}: {reason}");
    NodeError::Corrupt {
        page_id: Some(page_id),
        reason: reason.to_string(),
    }
}

/// Errors for malformed or unexpected node pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The tree reached a page that holds no node.
    Uninitialized(PageId),
    /// Leaf where an internal node was required or vice versa.
    WrongNodeType(PageId),
    /// Node key length disagrees with the tree.
    KeyLengthMismatch {
        page_id: PageId,
        expected: u32,
        actual: u32,
    },
    /// Node body does not fit its page.
    Overflow { needed: usize, available: usize },
    /// A structural invariant does not hold.
    Corrupt {
        page_id: Option<PageId>,
        reason: String,
    },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized(id) => write!(f, "page {id} is not an initialized node"),
            Self::WrongNodeType(id) => write!(f, "wrong node type at page {id}"),
            Self::KeyLengthMismatch {
                page_id,
                expected,
                actual,
            } => write!(
                f,
                "page {page_id} has key length {actual}, expected {expected}"
            ),
            Self::Overflow { needed, available } => {
                write!(f, "node needs {needed} bytes, page has {available}")
            }
            Self::Corrupt {
                page_id: Some(id),
                reason,
            } => write!(f, "corrupt node {id}: {reason}"),
            Self::Corrupt {
                page_id: None,
                reason,
            } => write!(f, "corrupt node: {reason}"),
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::header::{initialize_internal_node, initialize_leaf_node};

    fn keys(raw: &[&[i64]]) -> Vec<Key> {
        raw.iter().map(|k| k.to_vec()).collect()
    }

    #[test]
    fn test_leaf_body_roundtrip() {
        let mut page = Page::new(256);
        initialize_leaf_node(&mut page, KeyFormat::Variable);
        let input = keys(&[&[1], &[1, 2, 3], &[4, 5]]);
        write_leaf_body(&mut page, KeyFormat::Variable, &input).expect("fits");

        assert_eq!(header::number_of_keys(&page), 3);
        assert_eq!(read_keys(&page, KeyFormat::Variable), input);
        assert!(read_children(&page).is_empty());
        assert_eq!(used_end(&page, KeyFormat::Variable), HEADER_LEN + 16 + 32 + 24);
        assert_eq!(key_offset(&page, KeyFormat::Variable, 2), HEADER_LEN + 48);
    }

    #[test]
    fn test_internal_body_roundtrip() {
        let mut page = Page::new(256);
        let format = KeyFormat::Fixed(2);
        initialize_internal_node(&mut page, format);
        let input = keys(&[&[2, 0], &[5, 0]]);
        write_internal_body(&mut page, format, &[10, 11, 12], &input).expect("fits");

        assert_eq!(read_children(&page), vec![10, 11, 12]);
        assert_eq!(read_keys(&page, format), input);
        assert_eq!(keys_offset(&page), HEADER_LEN + 24);
    }

    #[test]
    fn test_write_body_rejects_overflow() {
        let mut page = Page::new(64);
        initialize_leaf_node(&mut page, KeyFormat::Fixed(2));
        let input = keys(&[&[1, 1], &[2, 2], &[3, 3]]);
        let result = write_leaf_body(&mut page, KeyFormat::Fixed(2), &input);
        assert_eq!(
            result,
            Err(NodeError::Overflow {
                needed: HEADER_LEN + 48,
                available: 64
            })
        );
    }

    #[test]
    fn test_internal_splice_entries() {
        let mut page = Page::new(256);
        let format = KeyFormat::Variable;
        initialize_internal_node(&mut page, format);
        write_internal_body(&mut page, format, &[1, 3], &keys(&[&[30]])).expect("fits");

        insert_entry_in_place(&mut page, format, 0, 1, &[20, 1], 2);
        assert_eq!(read_children(&page), vec![1, 2, 3]);
        assert_eq!(read_keys(&page, format), keys(&[&[20, 1], &[30]]));

        insert_entry_in_place(&mut page, format, 2, 3, &[40], 4);
        assert_eq!(read_children(&page), vec![1, 2, 3, 4]);
        assert_eq!(read_keys(&page, format), keys(&[&[20, 1], &[30], &[40]]));

        remove_entry(&mut page, format, 1, 2);
        assert_eq!(read_children(&page), vec![1, 2, 4]);
        assert_eq!(read_keys(&page, format), keys(&[&[20, 1], &[40]]));

        remove_entry(&mut page, format, 0, 0);
        assert_eq!(read_children(&page), vec![2, 4]);
        assert_eq!(read_keys(&page, format), keys(&[&[40]]));
        let end = used_end(&page, format);
        assert!(page.as_bytes()[end..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_split_indices() {
        let format = KeyFormat::Fixed(1);
        let three = keys(&[&[1], &[2], &[3]]);
        assert_eq!(leaf_split_index(format, &three), 2);
        assert_eq!(internal_split_index(format, &three), 1);

        let four = keys(&[&[1], &[2], &[3], &[4]]);
        assert_eq!(leaf_split_index(format, &four), 2);
        assert_eq!(internal_split_index(format, &four), 1);

        let five = keys(&[&[1], &[2], &[3], &[4], &[5]]);
        assert_eq!(leaf_split_index(format, &five), 3);
        assert_eq!(internal_split_index(format, &five), 2);
    }

    #[test]
    fn test_leaf_split_balances_bytes() {
        let format = KeyFormat::Variable;
        let skewed = keys(&[&[1, 1, 1, 1, 1, 1, 1, 1], &[2], &[3], &[4]]);
        assert_eq!(leaf_split_index(format, &skewed), 1);
    }

    #[test]
    fn test_check_node() {
        let format = KeyFormat::Fixed(1);
        let mut page = Page::new(128);
        assert_eq!(
            check_node(&page, 3, format),
            Err(NodeError::Uninitialized(3))
        );

        initialize_leaf_node(&mut page, KeyFormat::Fixed(2));
        assert!(matches!(
            check_node(&page, 3, format),
            Err(NodeError::KeyLengthMismatch { .. })
        ));

        initialize_internal_node(&mut page, format);
        assert!(matches!(
            check_node(&page, 3, format),
            Err(NodeError::Corrupt { .. })
        ));

        initialize_leaf_node(&mut page, format);
        assert_eq!(check_node(&page, 3, format), Ok(NodeKind::Leaf));
    }
}
