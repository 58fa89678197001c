//! The tree handle.
//!
//! `Tree` borrows a page store, tracks the root id and drives the node-level
//! operations recursively: every descent opens one scoped cursor per level,
//! and repairs reopen the parent on the way back up. The root id lives only
//! here; whoever owns the store decides where to persist it.

use crate::btree::delete::{RemoveResult, handle_removed_child, remove_from_leaf};
use crate::btree::header::{
    self, NodeKind, initialize_internal_node, initialize_leaf_node, is_leaf_node,
    number_of_keys, preceding_id, sibling_id,
};
use crate::btree::insert::{InsertResult, insert_into_internal, insert_into_leaf};
use crate::btree::key::{Key, KeyError, KeyFormat, WORD_SIZE, compare, valid_prefix};
use crate::btree::navigator::{NodeIdAllocator, child_at};
use crate::btree::node::{
    self, CHILD_SIZE, NodeError, check_node, read_children, read_keys, write_internal_body,
};
use crate::btree::search::search_node;
use crate::config::ConfigError;
use crate::storage::{
    LockMode, NO_PAGE, Page, PageCursor, PageId, PageStore, StoreError, with_cursor,
};

/// Per-tree settings fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Key encoding shared by every node.
    pub key_format: KeyFormat,
    /// Optional cap on keys per node, on top of the page capacity.
    pub max_node_keys: Option<usize>,
}

impl TreeConfig {
    #[must_use]
    pub const fn new(key_format: KeyFormat) -> Self {
        Self {
            key_format,
            max_node_keys: None,
        }
    }

    #[must_use]
    pub const fn with_max_node_keys(mut self, max_node_keys: usize) -> Self {
        self.max_node_keys = Some(max_node_keys);
        self
    }

    /// Longest key (in words) for this page size. Any node must hold three
    /// such keys plus four child pointers so that a split always produces
    /// two halves that fit.
    #[must_use]
    pub const fn max_key_words(&self, page_size: usize) -> usize {
        let per_key = page_size.saturating_sub(header::HEADER_LEN + 4 * CHILD_SIZE) / 3;
        match self.key_format {
            KeyFormat::Fixed(_) => per_key / WORD_SIZE,
            KeyFormat::Variable => (per_key / WORD_SIZE).saturating_sub(1),
        }
    }

    /// Reject settings that could produce a node no split can fix.
    pub fn validate(&self, page_size: usize) -> Result<(), BTreeError> {
        if self.key_format == KeyFormat::Fixed(0) {
            return Err(ConfigError::InvalidValue {
                name: "key_width".to_string(),
                message: "fixed-width keys need at least one word".to_string(),
            }
            .into());
        }
        if let Some(max) = self.max_node_keys
            && max < 2
        {
            return Err(ConfigError::InvalidValue {
                name: "max_node_keys".to_string(),
                message: format!("{max} is below the minimum of 2"),
            }
            .into());
        }

        let max_words = self.max_key_words(page_size);
        let too_large = match self.key_format {
            KeyFormat::Fixed(words) => (words as usize > max_words).then_some(words as usize),
            KeyFormat::Variable => (max_words == 0).then_some(1),
        };
        if let Some(words) = too_large {
            return Err(KeyError::TooLarge { words, max_words }.into());
        }
        Ok(())
    }

    /// Whether a node with `key_count` keys whose used region ends at
    /// `used_end` fits a page.
    #[must_use]
    pub fn fits(&self, page_size: usize, key_count: usize, used_end: usize) -> bool {
        used_end <= page_size && self.max_node_keys.is_none_or(|max| key_count <= max)
    }
}

/// Where a key was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLocation {
    pub page_id: PageId,
    pub index: usize,
}

/// Result of `Tree::insert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

/// Result of `Tree::remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Shape of a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels, leaves included.
    pub height: usize,
    pub leaf_count: usize,
    pub internal_count: usize,
    pub key_count: usize,
}

/// `with_cursor` with tree errors.
fn visit<S, T, F>(store: &mut S, page_id: PageId, mode: LockMode, f: F) -> Result<T, BTreeError>
where
    S: PageStore + ?Sized,
    F: FnMut(&mut PageCursor<'_, S>) -> Result<T, BTreeError>,
{
    with_cursor(store, page_id, mode, f)
}

enum Step<T> {
    Descend(PageId),
    Finished(T),
}

/// A B+-tree over composite keys stored in a `PageStore`.
pub struct Tree<'a, S: PageStore> {
    store: &'a mut S,
    root: PageId,
    config: TreeConfig,
    ids: NodeIdAllocator,
}

impl<'a, S: PageStore> Tree<'a, S> {
    /// Create an empty tree whose root is a new leaf.
    pub fn create(store: &'a mut S, config: TreeConfig) -> Result<Self, BTreeError> {
        config.validate(store.page_size())?;
        let root = store.allocate()?;
        visit(&mut *store, root, LockMode::Exclusive, |cursor| {
            initialize_leaf_node(cursor.page_mut()?, config.key_format);
            Ok(())
        })?;
        let ids = NodeIdAllocator::new(store.page_count());

        tracing::info!("Created tree with root {root} ({:?} keys)", config.key_format);
        Ok(Self {
            store,
            root,
            config,
            ids,
        })
    }

    /// Reopen a tree whose root is `root`.
    pub fn open(store: &'a mut S, root: PageId, config: TreeConfig) -> Result<Self, BTreeError> {
        config.validate(store.page_size())?;
        if root == NO_PAGE || root >= store.page_count() {
            return Err(StoreError::PageOutOfBounds {
                page_id: root,
                total_pages: store.page_count(),
            }
            .into());
        }
        visit(&mut *store, root, LockMode::Shared, |cursor| {
            check_node(cursor.page(), root, config.key_format)?;
            Ok(())
        })?;
        let ids = NodeIdAllocator::new(store.page_count());
        Ok(Self {
            store,
            root,
            config,
            ids,
        })
    }

    /// Handle over a tree built elsewhere in the crate, such as by the bulk
    /// loader.
    pub(crate) const fn from_parts(
        store: &'a mut S,
        root: PageId,
        config: TreeConfig,
        ids: NodeIdAllocator,
    ) -> Self {
        Self {
            store,
            root,
            config,
            ids,
        }
    }

    /// Current root node.
    #[must_use]
    pub const fn root_id(&self) -> PageId {
        self.root
    }

    #[must_use]
    pub const fn key_format(&self) -> KeyFormat {
        self.config.key_format
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &*self.store
    }

    /// Whether `key` is in the tree.
    pub fn contains(&mut self, key: &[i64]) -> Result<bool, BTreeError> {
        Ok(self.search(key)?.is_some())
    }

    /// Locate `key`.
    pub fn search(&mut self, key: &[i64]) -> Result<Option<KeyLocation>, BTreeError> {
        self.validate_key(key)?;
        let leaf = self.find_leaf(key)?;
        let format = self.config.key_format;
        visit(&mut *self.store, leaf, LockMode::Shared, |cursor| {
            let position = search_node(cursor.page(), format, key);
            Ok(position.found.then_some(KeyLocation {
                page_id: leaf,
                index: position.index,
            }))
        })
    }

    /// Insert `key`. Keys form a set; inserting a present key changes nothing.
    pub fn insert(&mut self, key: &[i64]) -> Result<InsertOutcome, BTreeError> {
        self.validate_key(key)?;
        match self.insert_into(self.root, key)? {
            InsertResult::Done => Ok(InsertOutcome::Inserted),
            InsertResult::AlreadyPresent => Ok(InsertOutcome::AlreadyPresent),
            InsertResult::Split { separator, right } => {
                self.grow_root(&separator, right)?;
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    /// Remove `key`.
    pub fn remove(&mut self, key: &[i64]) -> Result<RemoveOutcome, BTreeError> {
        self.validate_key(key)?;
        match self.remove_from(self.root, key, true)? {
            RemoveResult::NotFound => Ok(RemoveOutcome::NotFound),
            RemoveResult::Done => Ok(RemoveOutcome::Removed),
            RemoveResult::Collapsed(_) => {
                self.collapse_root()?;
                Ok(RemoveOutcome::Removed)
            }
            RemoveResult::Split { separator, right } => {
                self.grow_root(&separator, right)?;
                Ok(RemoveOutcome::Removed)
            }
        }
    }

    /// Every key that starts with `prefix`, in order.
    pub fn prefix_scan(&mut self, prefix: &[i64]) -> Result<Vec<Key>, BTreeError> {
        self.scan(Some(prefix), |key| valid_prefix(prefix, key))
    }

    /// Every key at or after `start`, in order.
    pub fn range_from(&mut self, start: &[i64]) -> Result<Vec<Key>, BTreeError> {
        self.scan(Some(start), |_| true)
    }

    /// Every key, in order.
    pub fn keys(&mut self) -> Result<Vec<Key>, BTreeError> {
        self.scan(None, |_| true)
    }

    /// Leaf ids from left to right along the sibling chain.
    pub fn leaf_ids(&mut self) -> Result<Vec<PageId>, BTreeError> {
        let first = self.edge_leaf(Edge::Left)?;
        self.walk_chain(first, sibling_id)
    }

    /// Leaf ids from right to left along the preceding chain.
    pub fn leaf_ids_backward(&mut self) -> Result<Vec<PageId>, BTreeError> {
        let last = self.edge_leaf(Edge::Right)?;
        self.walk_chain(last, preceding_id)
    }

    /// Count levels, nodes and keys.
    pub fn stats(&mut self) -> Result<TreeStats, BTreeError> {
        let mut stats = TreeStats::default();
        let mut level = vec![self.root];
        while !level.is_empty() {
            stats.height += 1;
            let mut next = Vec::new();
            for page_id in level {
                let page = self.load(page_id)?;
                if is_leaf_node(&page) {
                    stats.leaf_count += 1;
                    stats.key_count += number_of_keys(&page);
                } else {
                    stats.internal_count += 1;
                    next.extend(read_children(&page));
                }
            }
            level = next;
        }
        Ok(stats)
    }

    /// Walk the whole tree and verify its structure: key order inside nodes,
    /// separator bounds, non-empty internal nodes, equal leaf depth and a
    /// consistent doubly-linked chain on every level.
    pub fn check_invariants(&mut self) -> Result<(), BTreeError> {
        let mut levels: Vec<Vec<PageId>> = Vec::new();
        let mut leaf_depth = None;
        self.check_subtree(self.root, None, None, 0, &mut levels, &mut leaf_depth)?;

        for level in &levels {
            for (i, page_id) in level.iter().enumerate() {
                let page = self.load(*page_id)?;
                let expected_preceding = if i == 0 { NO_PAGE } else { level[i - 1] };
                let expected_sibling = level.get(i + 1).copied().unwrap_or(NO_PAGE);
                if preceding_id(&page) != expected_preceding {
                    return Err(node::corrupt(*page_id, "preceding link out of order").into());
                }
                if sibling_id(&page) != expected_sibling {
                    return Err(node::corrupt(*page_id, "sibling link out of order").into());
                }
            }
        }
        Ok(())
    }

    fn check_subtree(
        &mut self,
        page_id: PageId,
        lower: Option<&Key>,
        upper: Option<&Key>,
        depth: usize,
        levels: &mut Vec<Vec<PageId>>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<(), BTreeError> {
        let format = self.config.key_format;
        let page = self.load(page_id)?;
        let kind = check_node(&page, page_id, format)?;
        if levels.len() <= depth {
            levels.push(Vec::new());
        }
        levels[depth].push(page_id);

        let keys = read_keys(&page, format);
        if keys.windows(2).any(|w| compare(&w[0], &w[1]).is_ge()) {
            return Err(node::corrupt(page_id, "keys out of order").into());
        }
        if let (Some(lower), Some(first)) = (lower, keys.first())
            && compare(first, lower).is_lt()
        {
            return Err(node::corrupt(page_id, "key below its separator").into());
        }
        if let (Some(upper), Some(last)) = (upper, keys.last())
            && compare(last, upper).is_ge()
        {
            return Err(node::corrupt(page_id, "key at or above the next separator").into());
        }

        if kind == NodeKind::Leaf {
            if keys.is_empty() && page_id != self.root {
                return Err(node::corrupt(page_id, "empty leaf below the root").into());
            }
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(node::corrupt(page_id, "leaves at different depths").into());
                }
                Some(_) => {}
            }
            return Ok(());
        }

        let children = read_children(&page);
        for (i, child) in children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(&keys[i - 1]) };
            let child_upper = if i == keys.len() { upper } else { Some(&keys[i]) };
            self.check_subtree(*child, child_lower, child_upper, depth + 1, levels, leaf_depth)?;
        }
        Ok(())
    }

    fn validate_key(&self, key: &[i64]) -> Result<(), BTreeError> {
        let max_words = self.config.max_key_words(self.store.page_size());
        self.config.key_format.validate(key, max_words)?;
        Ok(())
    }

    fn load(&mut self, page_id: PageId) -> Result<Page, BTreeError> {
        visit(&mut *self.store, page_id, LockMode::Shared, |cursor| {
            Ok(cursor.page().clone())
        })
    }

    /// Descend to the leaf that holds (or would hold) `key`.
    fn find_leaf(&mut self, key: &[i64]) -> Result<PageId, BTreeError> {
        let format = self.config.key_format;
        let mut page_id = self.root;
        loop {
            let step = visit(&mut *self.store, page_id, LockMode::Shared, |cursor| {
                match check_node(cursor.page(), page_id, format)? {
                    NodeKind::Leaf => Ok(Step::Finished(page_id)),
                    _ => {
                        let position = search_node(cursor.page(), format, key);
                        Ok(Step::Descend(child_at(cursor.page(), position.child_index())))
                    }
                }
            })?;
            match step {
                Step::Finished(leaf) => return Ok(leaf),
                Step::Descend(child) => {
                    tracing::trace!("Descending from {page_id} to {child}");
                    page_id = child;
                }
            }
        }
    }

    fn edge_leaf(&mut self, edge: Edge) -> Result<PageId, BTreeError> {
        let format = self.config.key_format;
        let mut page_id = self.root;
        loop {
            let step = visit(&mut *self.store, page_id, LockMode::Shared, |cursor| {
                match check_node(cursor.page(), page_id, format)? {
                    NodeKind::Leaf => Ok(Step::Finished(page_id)),
                    _ => {
                        let index = match edge {
                            Edge::Left => 0,
                            Edge::Right => number_of_keys(cursor.page()),
                        };
                        Ok(Step::Descend(child_at(cursor.page(), index)))
                    }
                }
            })?;
            match step {
                Step::Finished(leaf) => return Ok(leaf),
                Step::Descend(child) => page_id = child,
            }
        }
    }

    fn walk_chain(
        &mut self,
        start: PageId,
        next: fn(&Page) -> PageId,
    ) -> Result<Vec<PageId>, BTreeError> {
        let limit = self.store.page_count();
        visit(&mut *self.store, start, LockMode::Shared, |cursor| {
            let mut ids = vec![start];
            loop {
                let following = next(cursor.page());
                if following == NO_PAGE {
                    return Ok(ids);
                }
                if ids.len() as u64 > limit {
                    return Err(node::corrupt(following, "cycle in sibling chain").into());
                }
                ids.push(following);
                cursor.goto(following)?;
            }
        })
    }

    /// Collect keys in order, starting at `start` (or the first key), until
    /// `keep` rejects one.
    fn scan<F>(&mut self, start: Option<&[i64]>, mut keep: F) -> Result<Vec<Key>, BTreeError>
    where
        F: FnMut(&[i64]) -> bool,
    {
        let format = self.config.key_format;
        let leaf = match start {
            Some(key) => self.find_leaf(key)?,
            None => self.edge_leaf(Edge::Left)?,
        };
        visit(&mut *self.store, leaf, LockMode::Shared, |cursor| {
            let mut out = Vec::new();
            let mut skip = start.map_or(0, |key| search_node(cursor.page(), format, key).index);
            loop {
                for key in read_keys(cursor.page(), format).into_iter().skip(skip) {
                    if !keep(&key) {
                        return Ok(out);
                    }
                    out.push(key);
                }
                let next = sibling_id(cursor.page());
                if next == NO_PAGE {
                    return Ok(out);
                }
                cursor.goto(next)?;
                skip = 0;
            }
        })
    }

    fn insert_into(&mut self, page_id: PageId, key: &[i64]) -> Result<InsertResult, BTreeError> {
        let config = self.config;
        let ids = &mut self.ids;
        let step = visit(&mut *self.store, page_id, LockMode::Exclusive, |cursor| {
            match check_node(cursor.page(), page_id, config.key_format)? {
                NodeKind::Leaf => Ok(Step::Finished(insert_into_leaf(cursor, ids, &config, key)?)),
                _ => {
                    let position = search_node(cursor.page(), config.key_format, key);
                    Ok(Step::Descend(child_at(cursor.page(), position.child_index())))
                }
            }
        })?;

        let child = match step {
            Step::Finished(result) => return Ok(result),
            Step::Descend(child) => child,
        };
        tracing::trace!("Insert descending from {page_id} to {child}");
        match self.insert_into(child, key)? {
            InsertResult::Split { separator, right } => {
                let ids = &mut self.ids;
                visit(&mut *self.store, page_id, LockMode::Exclusive, |cursor| {
                    insert_into_internal(cursor, ids, &config, &separator, right)
                })
            }
            other => Ok(other),
        }
    }

    fn remove_from(
        &mut self,
        page_id: PageId,
        key: &[i64],
        is_root: bool,
    ) -> Result<RemoveResult, BTreeError> {
        let config = self.config;
        let step = visit(&mut *self.store, page_id, LockMode::Exclusive, |cursor| {
            match check_node(cursor.page(), page_id, config.key_format)? {
                NodeKind::Leaf => {
                    let result = remove_from_leaf(cursor, &config, key, is_root)?;
                    Ok(Step::Finished(result))
                }
                _ => {
                    let position = search_node(cursor.page(), config.key_format, key);
                    Ok(Step::Descend(child_at(cursor.page(), position.child_index())))
                }
            }
        })?;

        let child = match step {
            Step::Finished(result) => return Ok(result),
            Step::Descend(child) => child,
        };
        tracing::trace!("Remove descending from {page_id} to {child}");
        match self.remove_from(child, key, false)? {
            RemoveResult::Collapsed(collapsed) => {
                let ids = &mut self.ids;
                visit(&mut *self.store, page_id, LockMode::Exclusive, |cursor| {
                    handle_removed_child(cursor, ids, &config, collapsed)
                })
            }
            RemoveResult::Split { separator, right } => {
                let ids = &mut self.ids;
                let result = visit(&mut *self.store, page_id, LockMode::Exclusive, |cursor| {
                    insert_into_internal(cursor, ids, &config, &separator, right)
                })?;
                Ok(match result {
                    InsertResult::Split { separator, right } => {
                        RemoveResult::Split { separator, right }
                    }
                    InsertResult::Done | InsertResult::AlreadyPresent => RemoveResult::Done,
                })
            }
            other => Ok(other),
        }
    }

    /// Put a new internal root above the old root and `right`.
    fn grow_root(&mut self, separator: &[i64], right: PageId) -> Result<(), BTreeError> {
        let old_root = self.root;
        let format = self.config.key_format;
        let ids = &mut self.ids;
        let new_root = visit(&mut *self.store, old_root, LockMode::Exclusive, |cursor| {
            let id = ids.allocate(cursor)?;
            cursor.goto(id)?;
            let page = cursor.page_mut()?;
            initialize_internal_node(page, format);
            write_internal_body(page, format, &[old_root, right], &[separator.to_vec()])?;
            Ok(id)
        })?;
        tracing::debug!("Tree grew: new root {new_root} over {old_root} and {right}");
        self.root = new_root;
        Ok(())
    }

    /// Replace an internal root that ran out of keys by its only child,
    /// until the root has keys or is a leaf.
    fn collapse_root(&mut self) -> Result<(), BTreeError> {
        loop {
            let root = self.root;
            let page = self.load(root)?;
            if is_leaf_node(&page) || number_of_keys(&page) > 0 {
                return Ok(());
            }
            let only_child = child_at(&page, 0);
            visit(&mut *self.store, root, LockMode::Exclusive, |cursor| {
                cursor.free(root).map_err(BTreeError::from)
            })?;
            tracing::debug!("Root {root} collapsed into {only_child}");
            self.root = only_child;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Left,
    Right,
}

/// Errors from tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Page store error.
    Store(StoreError),
    /// Malformed node.
    Node(NodeError),
    /// Key rejected.
    Key(KeyError),
    /// Invalid tree settings.
    Config(ConfigError),
    /// The bulk loader was given no leaves.
    EmptyBulkLoad,
    /// Leaves can only be written into an empty store.
    StoreNotEmpty { page_count: u64 },
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Key(e) => write!(f, "key error: {e}"),
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::EmptyBulkLoad => write!(f, "bulk load needs at least one leaf"),
            Self::StoreNotEmpty { page_count } => {
                write!(f, "store already holds {page_count} pages")
            }
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Key(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::EmptyBulkLoad | Self::StoreNotEmpty { .. } => None,
        }
    }
}

impl From<StoreError> for BTreeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<KeyError> for BTreeError {
    fn from(e: KeyError) -> Self {
        Self::Key(e)
    }
}

impl From<ConfigError> for BTreeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
