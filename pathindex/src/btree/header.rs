//! Node header layout.
//!
//! Every node page starts with a fixed 25-byte header:
//!
//! | offset | width | field |
//! |---|---|---|
//! | 0 | 1 | node kind (0 uninitialized, 1 leaf, 2 internal) |
//! | 1 | 4 | key length in words (0 = variable) |
//! | 5 | 4 | key count |
//! | 9 | 8 | sibling id (-1 if none) |
//! | 17 | 8 | preceding id (-1 if none) |
//!
//! A zeroed page therefore reads as an uninitialized node.

#![allow(clippy::cast_possible_truncation)]

use crate::btree::key::KeyFormat;
use crate::storage::{NO_PAGE, Page, PageId};

/// Length of the node header in bytes.
pub const HEADER_LEN: usize = 1 + 4 + 4 + 8 + 8;

mod offsets {
    pub const KIND: usize = 0;
    pub const KEY_LENGTH: usize = 1;
    pub const KEY_COUNT: usize = 5;
    pub const SIBLING: usize = 9;
    pub const PRECEDING: usize = 17;
}

/// Node kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    Uninitialized = 0,
    Leaf = 1,
    Internal = 2,
}

impl TryFrom<u8> for NodeKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Uninitialized),
            1 => Ok(Self::Leaf),
            2 => Ok(Self::Internal),
            _ => Err(value),
        }
    }
}

#[must_use]
pub fn is_leaf_node(page: &Page) -> bool {
    page.read_u8(offsets::KIND) == NodeKind::Leaf as u8
}

#[must_use]
pub fn is_uninitialized_node(page: &Page) -> bool {
    page.read_u8(offsets::KIND) == NodeKind::Uninitialized as u8
}

#[must_use]
pub fn number_of_keys(page: &Page) -> usize {
    page.read_u32(offsets::KEY_COUNT) as usize
}

pub fn set_number_of_keys(page: &mut Page, count: usize) {
    page.write_u32(offsets::KEY_COUNT, count as u32);
}

#[must_use]
pub fn key_length(page: &Page) -> u32 {
    page.read_u32(offsets::KEY_LENGTH)
}

pub fn set_key_length(page: &mut Page, words: u32) {
    page.write_u32(offsets::KEY_LENGTH, words);
}

#[must_use]
pub fn sibling_id(page: &Page) -> PageId {
    page.read_u64(offsets::SIBLING)
}

/// Only the navigator rewrites sibling links.
pub fn set_sibling_id(page: &mut Page, id: PageId) {
    page.write_u64(offsets::SIBLING, id);
}

#[must_use]
pub fn preceding_id(page: &Page) -> PageId {
    page.read_u64(offsets::PRECEDING)
}

/// Only the navigator rewrites preceding links.
pub fn set_preceding_id(page: &mut Page, id: PageId) {
    page.write_u64(offsets::PRECEDING, id);
}

/// Make `page` an empty, unlinked leaf.
pub fn initialize_leaf_node(page: &mut Page, format: KeyFormat) {
    initialize(page, NodeKind::Leaf, format);
}

/// Make `page` an empty, unlinked internal node.
pub fn initialize_internal_node(page: &mut Page, format: KeyFormat) {
    initialize(page, NodeKind::Internal, format);
}

fn initialize(page: &mut Page, kind: NodeKind, format: KeyFormat) {
    page.write_u8(offsets::KIND, kind as u8);
    set_key_length(page, format.key_length_field());
    set_number_of_keys(page, 0);
    page.write_u64(offsets::SIBLING, NO_PAGE);
    page.write_u64(offsets::PRECEDING, NO_PAGE);
}

/// Decoded copy of a node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub kind: NodeKind,
    pub key_length: u32,
    pub key_count: usize,
    pub sibling: PageId,
    pub preceding: PageId,
}

impl NodeHeader {
    /// Read a node header from a page. `None` if the kind byte is unknown.
    #[must_use]
    pub fn from_page(page: &Page) -> Option<Self> {
        let kind = NodeKind::try_from(page.read_u8(offsets::KIND)).ok()?;
        Some(Self {
            kind,
            key_length: key_length(page),
            key_count: number_of_keys(page),
            sibling: sibling_id(page),
            preceding: preceding_id(page),
        })
    }

    #[must_use]
    pub const fn key_format(&self) -> KeyFormat {
        KeyFormat::from_key_length_field(self.key_length)
    }
}
