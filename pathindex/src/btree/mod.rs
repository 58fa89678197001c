//! B+-tree over composite path keys.
//!
//! Keys are sequences of `i64` node ids compared word by word, a shorter key
//! sorting before any key it is a prefix of. Every node is one page:
//!
//! - a 25-byte header (kind, key length, key count, sibling, preceding),
//! - for internal nodes, `key_count + 1` child ids,
//! - the keys, either fixed-width or terminated by `-1`.
//!
//! Nodes on one level form a doubly-linked chain, so scans walk the leaves
//! without going back through the parents.
//!
//! # Usage
//!
//! ```
//! use pathindex::btree::{KeyFormat, Tree, TreeConfig};
//! use pathindex::storage::MemoryPageStore;
//!
//! let mut store = MemoryPageStore::new(4096).unwrap();
//! let mut tree = Tree::create(&mut store, TreeConfig::new(KeyFormat::Variable)).unwrap();
//!
//! tree.insert(&[1, 2, 3]).unwrap();
//! tree.insert(&[1, 2]).unwrap();
//! tree.insert(&[2]).unwrap();
//!
//! assert_eq!(tree.prefix_scan(&[1]).unwrap(), vec![vec![1, 2], vec![1, 2, 3]]);
//! ```

mod bulk;
mod delete;
mod header;
mod insert;
mod key;
mod navigator;
mod node;
mod search;
mod tree;

pub use bulk::{BulkLoader, DEFAULT_FILL_PERCENT, LeafWriter};
pub use header::{HEADER_LEN, NodeHeader, NodeKind};
pub use key::{
    FixedWidth, KEY_TERMINATOR, Key, KeyEncoding, KeyError, KeyFormat, VariableWidth, WORD_SIZE,
    compare, valid_prefix,
};
pub use node::NodeError;
pub use search::{SearchResult, search_node};
pub use tree::{
    BTreeError, InsertOutcome, KeyLocation, RemoveOutcome, Tree, TreeConfig, TreeStats,
};
