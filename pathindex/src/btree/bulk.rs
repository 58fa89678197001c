//! Bottom-up tree construction from sorted leaves.
//!
//! `LeafWriter` turns a strictly ascending key stream into linked leaf pages
//! `0..n` of an empty store. `BulkLoader` then builds the internal levels
//! above those leaves one level at a time, without going through insertion.

use crate::btree::header::{
    HEADER_LEN, NodeKind, initialize_internal_node, initialize_leaf_node, number_of_keys,
    sibling_id,
};
use crate::btree::key::{Key, KeyEncoding, KeyError, compare};
use crate::btree::navigator::{NodeIdAllocator, child_at, link_after};
use crate::btree::node::{
    self, CHILD_SIZE, check_node, keys_offset, remove_entry, write_internal_body, write_leaf_body,
};
use crate::btree::tree::{BTreeError, Tree, TreeConfig};
use crate::storage::{LockMode, NO_PAGE, PageId, PageStore, StoreError, with_cursor};

/// Default share of a leaf page filled by `LeafWriter`.
pub const DEFAULT_FILL_PERCENT: usize = 100;

/// Writes sorted keys into consecutive leaf pages of an empty store.
pub struct LeafWriter<'a, S: PageStore> {
    store: &'a mut S,
    config: TreeConfig,
    fill_percent: usize,
    pending: Vec<Key>,
    pending_bytes: usize,
    last_key: Option<Key>,
    last_leaf: Option<PageId>,
    leaf_count: u64,
}

impl<'a, S: PageStore> LeafWriter<'a, S> {
    pub fn new(store: &'a mut S, config: TreeConfig) -> Result<Self, BTreeError> {
        config.validate(store.page_size())?;
        let page_count = store.page_count();
        if page_count != 0 {
            return Err(BTreeError::StoreNotEmpty { page_count });
        }
        Ok(Self {
            store,
            config,
            fill_percent: DEFAULT_FILL_PERCENT,
            pending: Vec::new(),
            pending_bytes: 0,
            last_key: None,
            last_leaf: None,
            leaf_count: 0,
        })
    }

    /// Fill leaves only up to `percent` of the page, leaving room for later
    /// inserts. Clamped to `1..=100`. Every leaf holds at least one key.
    #[must_use]
    pub fn with_fill_percent(mut self, percent: usize) -> Self {
        self.fill_percent = percent.clamp(1, 100);
        self
    }

    /// Append a key. Keys must arrive in strictly ascending order.
    pub fn push(&mut self, key: &[i64]) -> Result<(), BTreeError> {
        let format = self.config.key_format;
        format.validate(key, self.config.max_key_words(self.store.page_size()))?;
        if let Some(previous) = &self.last_key
            && compare(previous, key).is_ge()
        {
            return Err(KeyError::NotAscending {
                previous: previous.clone(),
                next: key.to_vec(),
            }
            .into());
        }

        let len = format.encoded_len(key);
        let limit = self.store.page_size() * self.fill_percent / 100;
        let fits = self.config.fits(
            self.store.page_size(),
            self.pending.len() + 1,
            HEADER_LEN + self.pending_bytes + len,
        ) && HEADER_LEN + self.pending_bytes + len <= limit;
        if !self.pending.is_empty() && !fits {
            self.flush()?;
        }

        self.pending.push(key.to_vec());
        self.pending_bytes += len;
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    /// Write the last partial leaf and return how many leaves were written.
    /// An empty stream still produces one (empty) leaf.
    pub fn finish(mut self) -> Result<u64, BTreeError> {
        if !self.pending.is_empty() || self.leaf_count == 0 {
            self.flush()?;
        }
        tracing::debug!("Wrote {} sorted leaves", self.leaf_count);
        Ok(self.leaf_count)
    }

    fn flush(&mut self) -> Result<(), BTreeError> {
        let format = self.config.key_format;
        let keys = std::mem::take(&mut self.pending);
        self.pending_bytes = 0;

        let id = self.store.allocate()?;
        let previous = self.last_leaf;
        with_cursor::<_, _, BTreeError, _>(&mut *self.store, id, LockMode::Exclusive, |cursor| {
            let page = cursor.page_mut()?;
            initialize_leaf_node(page, format);
            write_leaf_body(page, format, &keys)?;
            if let Some(previous) = previous {
                link_after(cursor, previous, id)?;
            }
            Ok(())
        })?;

        self.last_leaf = Some(id);
        self.leaf_count += 1;
        Ok(())
    }
}

/// A node on the level being built over, with the smallest key in its
/// subtree.
#[derive(Debug, Clone)]
struct LevelEntry {
    page_id: PageId,
    first_key: Key,
}

/// Children and separators of the parent currently being filled.
#[derive(Debug, Default)]
struct ParentBuffer {
    children: Vec<PageId>,
    keys: Vec<Key>,
    key_bytes: usize,
    first_key: Key,
}

impl ParentBuffer {
    fn start(&mut self, child: LevelEntry) {
        self.children.push(child.page_id);
        self.first_key = child.first_key;
    }

    fn fits(&self, config: &TreeConfig, page_size: usize, key_len: usize) -> bool {
        let used = HEADER_LEN + (self.children.len() + 1) * CHILD_SIZE + self.key_bytes + key_len;
        config.fits(page_size, self.keys.len() + 1, used)
    }

    fn push(&mut self, child: LevelEntry, key_len: usize) {
        self.children.push(child.page_id);
        self.keys.push(child.first_key);
        self.key_bytes += key_len;
    }
}

/// Builds the internal levels above leaves `0..leaf_count`.
pub struct BulkLoader<'a, S: PageStore> {
    store: &'a mut S,
    leaf_count: u64,
    config: TreeConfig,
}

impl<'a, S: PageStore> BulkLoader<'a, S> {
    /// The leaves must already be written, in key order, and linked
    /// (see `LeafWriter`).
    #[must_use]
    pub const fn new(store: &'a mut S, leaf_count: u64, config: TreeConfig) -> Self {
        Self {
            store,
            leaf_count,
            config,
        }
    }

    pub fn run(self) -> Result<Tree<'a, S>, BTreeError> {
        let Self {
            store,
            leaf_count,
            config,
        } = self;
        config.validate(store.page_size())?;
        if leaf_count == 0 {
            return Err(BTreeError::EmptyBulkLoad);
        }
        if leaf_count > store.page_count() {
            return Err(StoreError::PageOutOfBounds {
                page_id: leaf_count - 1,
                total_pages: store.page_count(),
            }
            .into());
        }

        let mut level = read_leaves(&mut *store, leaf_count, &config)?;
        let mut ids = NodeIdAllocator::new(store.page_count());
        let mut height = 1;
        while level.len() > 1 {
            level = build_level(&mut *store, &mut ids, &config, level)?;
            height += 1;
            tracing::debug!("Bulk load built level {height} with {} nodes", level.len());
        }

        let root = level
            .first()
            .map(|entry| entry.page_id)
            .ok_or(BTreeError::EmptyBulkLoad)?;
        tracing::info!("Bulk loaded {leaf_count} leaves into {height} levels, root {root}");
        Ok(Tree::from_parts(store, root, config, ids))
    }
}

/// Check the input leaves and collect their first keys.
fn read_leaves<S: PageStore>(
    store: &mut S,
    leaf_count: u64,
    config: &TreeConfig,
) -> Result<Vec<LevelEntry>, BTreeError> {
    let format = config.key_format;
    with_cursor::<_, _, BTreeError, _>(store, 0, LockMode::Shared, |cursor| {
        let mut entries = Vec::new();
        for page_id in 0..leaf_count {
            cursor.goto(page_id)?;
            let page = cursor.page();
            if check_node(page, page_id, format)? != NodeKind::Leaf {
                return Err(node::NodeError::WrongNodeType(page_id).into());
            }
            let expected_sibling = if page_id + 1 == leaf_count {
                NO_PAGE
            } else {
                page_id + 1
            };
            if sibling_id(page) != expected_sibling {
                return Err(
                    node::corrupt(page_id, "bulk input leaves are not linked in order").into(),
                );
            }
            let first_key = if number_of_keys(page) == 0 {
                if leaf_count > 1 {
                    return Err(node::corrupt(page_id, "empty leaf in bulk input").into());
                }
                Key::new()
            } else {
                format.read_key(page, keys_offset(page))
            };
            entries.push(LevelEntry {
                page_id,
                first_key,
            });
        }
        Ok(entries)
    })
}

/// Build one level of parents over `children` and return it.
fn build_level<S: PageStore>(
    store: &mut S,
    ids: &mut NodeIdAllocator,
    config: &TreeConfig,
    children: Vec<LevelEntry>,
) -> Result<Vec<LevelEntry>, BTreeError> {
    let page_size = store.page_size();
    let mut parents = Vec::new();
    let mut buffer = ParentBuffer::default();

    for child in children {
        if buffer.children.is_empty() {
            buffer.start(child);
            continue;
        }
        let key_len = config.key_format.encoded_len(&child.first_key);
        if buffer.fits(config, page_size, key_len) {
            buffer.push(child, key_len);
        } else {
            flush_parent(store, ids, config, &mut buffer, &mut parents)?;
            buffer.start(child);
        }
    }

    if buffer.children.len() == 1
        && let Some(previous) = parents.last()
    {
        take_last_child(store, config, previous.page_id, &mut buffer)?;
    }
    flush_parent(store, ids, config, &mut buffer, &mut parents)?;
    Ok(parents)
}

/// Move the last child of the already written parent `previous` to the
/// front of `buffer`, so no parent ends up with a single child.
fn take_last_child<S: PageStore>(
    store: &mut S,
    config: &TreeConfig,
    previous: PageId,
    buffer: &mut ParentBuffer,
) -> Result<(), BTreeError> {
    let format = config.key_format;
    let (child, separator) =
        with_cursor::<_, _, BTreeError, _>(store, previous, LockMode::Exclusive, |cursor| {
            let page = cursor.page_mut()?;
            let count = number_of_keys(page);
            if count < 2 {
                return Err(node::corrupt(previous, "parent too small to give up a child").into());
            }
            let child = child_at(page, count);
            let separator = format.read_key(page, node::key_offset(page, format, count - 1));
            remove_entry(page, format, count - 1, count);
            Ok((child, separator))
        })?;

    let separator_len = format.encoded_len(&buffer.first_key);
    buffer.children.insert(0, child);
    buffer.keys.insert(0, std::mem::replace(&mut buffer.first_key, separator));
    buffer.key_bytes += separator_len;
    tracing::debug!("Moved child {child} from parent {previous} to the last parent");
    Ok(())
}

fn flush_parent<S: PageStore>(
    store: &mut S,
    ids: &mut NodeIdAllocator,
    config: &TreeConfig,
    buffer: &mut ParentBuffer,
    parents: &mut Vec<LevelEntry>,
) -> Result<(), BTreeError> {
    let ParentBuffer {
        children,
        keys,
        first_key,
        ..
    } = std::mem::take(buffer);
    let format = config.key_format;
    let previous = parents.last().map(|entry| entry.page_id);
    let anchor = children.first().copied().ok_or(BTreeError::EmptyBulkLoad)?;

    let page_id = with_cursor::<_, _, BTreeError, _>(store, anchor, LockMode::Exclusive, |cursor| {
        let id = ids.allocate(cursor)?;
        cursor.goto(id)?;
        let page = cursor.page_mut()?;
        initialize_internal_node(page, format);
        write_internal_body(page, format, &children, &keys)?;
        if let Some(previous) = previous {
            link_after(cursor, previous, id)?;
        }
        Ok(id)
    })?;

    parents.push(LevelEntry {
        page_id,
        first_key,
    });
    Ok(())
}
