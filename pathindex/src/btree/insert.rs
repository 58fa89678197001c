//! Insertion into a single node, splitting on overflow.
//!
//! Keys are spliced into the page in place when they fit. Otherwise the node
//! is rebuilt from its decoded contents, split in two, and the new right
//! node is linked into the level's chain. The caller receives the separator
//! and the right node's id and inserts them one level up.

use crate::btree::header::{self, initialize_internal_node, initialize_leaf_node};
use crate::btree::key::{Key, KeyEncoding};
use crate::btree::navigator::{NodeIdAllocator, link_after};
use crate::btree::node::{
    self, CHILD_SIZE, insert_entry_in_place, internal_split_index, leaf_split_index,
    read_children, read_keys, used_end, write_internal_body, write_leaf_body,
};
use crate::btree::search::search_node;
use crate::btree::tree::{BTreeError, TreeConfig};
use crate::storage::{PageCursor, PageId, PageStore};

/// What a node insertion reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// The key was stored and no split happened.
    Done,
    /// The key was already present; nothing changed.
    AlreadyPresent,
    /// The node split. `separator` and `right` go into the parent.
    Split { separator: Key, right: PageId },
}

/// Insert `key` into the leaf under the cursor.
pub fn insert_into_leaf<S: PageStore + ?Sized>(
    cursor: &mut PageCursor<'_, S>,
    ids: &mut NodeIdAllocator,
    config: &TreeConfig,
    key: &[i64],
) -> Result<InsertResult, BTreeError> {
    let format = config.key_format;
    let page_id = cursor.current_page_id();
    let page_size = cursor.page_size();

    let position = search_node(cursor.page(), format, key);
    if position.found {
        return Ok(InsertResult::AlreadyPresent);
    }

    let count = header::number_of_keys(cursor.page());
    let end = used_end(cursor.page(), format);
    let grown = end + format.encoded_len(key);
    if config.fits(page_size, count + 1, grown) {
        let page = cursor.page_mut()?;
        format.splice_in(page, position.offset, end, key);
        header::set_number_of_keys(page, count + 1);
        return Ok(InsertResult::Done);
    }

    let mut keys = read_keys(cursor.page(), format);
    keys.insert(position.index, key.to_vec());
    let split = leaf_split_index(format, &keys);
    let right_keys = keys.split_off(split);
    let separator = right_keys[0].clone();
    write_leaf_body(cursor.page_mut()?, format, &keys)?;

    let right = ids.allocate(cursor)?;
    cursor.goto(right)?;
    let page = cursor.page_mut()?;
    initialize_leaf_node(page, format);
    write_leaf_body(page, format, &right_keys)?;
    link_after(cursor, page_id, right)?;

    tracing::debug!("Split leaf {page_id} into {right} at {separator:?}");
    Ok(InsertResult::Split { separator, right })
}

/// Insert a separator and the child to its right into the internal node
/// under the cursor, after a child split.
pub fn insert_into_internal<S: PageStore + ?Sized>(
    cursor: &mut PageCursor<'_, S>,
    ids: &mut NodeIdAllocator,
    config: &TreeConfig,
    separator: &[i64],
    right: PageId,
) -> Result<InsertResult, BTreeError> {
    let position = search_node(cursor.page(), config.key_format, separator);
    if position.found {
        return Err(node::corrupt(
            cursor.current_page_id(),
            "separator from a child split already present in parent",
        )
        .into());
    }
    insert_entry_at(
        cursor,
        ids,
        config,
        position.index,
        position.index + 1,
        separator,
        right,
    )
}

/// Insert `key` as key `key_index` and `child` as child `child_index` of the
/// internal node under the cursor, splitting if it overflows.
///
/// Normal inserts place the child right of the key; adopting a node at
/// either end of the children uses `(0, 0)` or `(count, count + 1)`.
pub fn insert_entry_at<S: PageStore + ?Sized>(
    cursor: &mut PageCursor<'_, S>,
    ids: &mut NodeIdAllocator,
    config: &TreeConfig,
    key_index: usize,
    child_index: usize,
    key: &[i64],
    child: PageId,
) -> Result<InsertResult, BTreeError> {
    let format = config.key_format;
    let page_id = cursor.current_page_id();
    let page_size = cursor.page_size();

    let count = header::number_of_keys(cursor.page());
    let grown = used_end(cursor.page(), format) + CHILD_SIZE + format.encoded_len(key);
    if config.fits(page_size, count + 1, grown) {
        insert_entry_in_place(cursor.page_mut()?, format, key_index, child_index, key, child);
        return Ok(InsertResult::Done);
    }

    let mut keys = read_keys(cursor.page(), format);
    let mut children = read_children(cursor.page());
    keys.insert(key_index, key.to_vec());
    children.insert(child_index, child);

    let split = internal_split_index(format, &keys);
    let right_keys = keys.split_off(split + 1);
    let right_children = children.split_off(split + 1);
    let Some(separator) = keys.pop() else {
        return Err(node::corrupt(page_id, "split of an internal node without keys").into());
    };
    write_internal_body(cursor.page_mut()?, format, &children, &keys)?;

    let right = ids.allocate(cursor)?;
    cursor.goto(right)?;
    let page = cursor.page_mut()?;
    initialize_internal_node(page, format);
    write_internal_body(page, format, &right_children, &right_keys)?;
    link_after(cursor, page_id, right)?;

    tracing::debug!("Split internal node {page_id} into {right} at {separator:?}");
    Ok(InsertResult::Split { separator, right })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::header::{preceding_id, sibling_id};
    use crate::btree::key::KeyFormat;
    use crate::storage::{LockMode, MemoryPageStore, NO_PAGE, with_cursor};

    fn leaf_store(config: &TreeConfig) -> MemoryPageStore {
        let mut store = MemoryPageStore::new(256).expect("store");
        let id = store.allocate().expect("allocate");
        let mut page = store.read_page(id).expect("read");
        initialize_leaf_node(&mut page, config.key_format);
        store.write_page(id, &page).expect("write");
        store
    }

    fn insert(
        store: &mut MemoryPageStore,
        ids: &mut NodeIdAllocator,
        config: &TreeConfig,
        page_id: PageId,
        key: &[i64],
    ) -> InsertResult {
        with_cursor(store, page_id, LockMode::Exclusive, |cursor| {
            insert_into_leaf(cursor, ids, config, key)
        })
        .expect("insert")
    }

    #[test]
    fn test_leaf_insert_in_place_keeps_order() {
        let config = TreeConfig::new(KeyFormat::Variable);
        let mut store = leaf_store(&config);
        let mut ids = NodeIdAllocator::new(store.page_count());

        for key in [vec![3, 1], vec![1, 1], vec![2], vec![1, 1, 5]] {
            assert_eq!(
                insert(&mut store, &mut ids, &config, 0, &key),
                InsertResult::Done
            );
        }
        assert_eq!(
            insert(&mut store, &mut ids, &config, 0, &[2]),
            InsertResult::AlreadyPresent
        );

        let page = store.read_page(0).expect("read");
        assert_eq!(
            read_keys(&page, KeyFormat::Variable),
            vec![vec![1, 1], vec![1, 1, 5], vec![2], vec![3, 1]]
        );
    }

    #[test]
    fn test_leaf_split_links_new_node() {
        let config = TreeConfig::new(KeyFormat::Fixed(2)).with_max_node_keys(2);
        let mut store = leaf_store(&config);
        let mut ids = NodeIdAllocator::new(store.page_count());

        insert(&mut store, &mut ids, &config, 0, &[1, 1]);
        insert(&mut store, &mut ids, &config, 0, &[1, 2]);
        let result = insert(&mut store, &mut ids, &config, 0, &[2, 1]);
        assert_eq!(
            result,
            InsertResult::Split {
                separator: vec![2, 1],
                right: 1
            }
        );

        let left = store.read_page(0).expect("read");
        let right = store.read_page(1).expect("read");
        assert_eq!(read_keys(&left, config.key_format), vec![vec![1, 1], vec![1, 2]]);
        assert_eq!(read_keys(&right, config.key_format), vec![vec![2, 1]]);
        assert_eq!(sibling_id(&left), 1);
        assert_eq!(preceding_id(&right), 0);
        assert_eq!(sibling_id(&right), NO_PAGE);
        assert!(header::is_leaf_node(&right));
    }

    #[test]
    fn test_split_in_middle_of_chain() {
        let config = TreeConfig::new(KeyFormat::Fixed(1)).with_max_node_keys(2);
        let mut store = leaf_store(&config);
        let mut ids = NodeIdAllocator::new(store.page_count());

        insert(&mut store, &mut ids, &config, 0, &[10]);
        insert(&mut store, &mut ids, &config, 0, &[20]);
        insert(&mut store, &mut ids, &config, 0, &[30]);
        // 0: [10, 20] -> 1: [30]
        insert(&mut store, &mut ids, &config, 0, &[15]);
        // 0: [10, 15] -> 2: [20] -> 1: [30]

        let first = store.read_page(0).expect("read");
        let middle = store.read_page(2).expect("read");
        let last = store.read_page(1).expect("read");
        assert_eq!(sibling_id(&first), 2);
        assert_eq!(preceding_id(&middle), 0);
        assert_eq!(sibling_id(&middle), 1);
        assert_eq!(preceding_id(&last), 2);
        assert_eq!(read_keys(&middle, config.key_format), vec![vec![20]]);
    }

    #[test]
    fn test_internal_split_promotes_middle_key() {
        let config = TreeConfig::new(KeyFormat::Fixed(1)).with_max_node_keys(2);
        let mut store = MemoryPageStore::new(256).expect("store");
        let id = store.allocate().expect("allocate");
        let mut page = store.read_page(id).expect("read");
        initialize_internal_node(&mut page, config.key_format);
        write_internal_body(&mut page, config.key_format, &[100, 101, 102], &[vec![10], vec![20]])
            .expect("fits");
        store.write_page(id, &page).expect("write");
        let mut ids = NodeIdAllocator::new(store.page_count());

        let result = with_cursor(&mut store, id, LockMode::Exclusive, |cursor| {
            insert_into_internal(cursor, &mut ids, &config, &[30], 103)
        })
        .expect("insert");
        assert_eq!(
            result,
            InsertResult::Split {
                separator: vec![20],
                right: 1
            }
        );

        let left = store.read_page(0).expect("read");
        let right = store.read_page(1).expect("read");
        assert_eq!(read_keys(&left, config.key_format), vec![vec![10]]);
        assert_eq!(read_children(&left), vec![100, 101]);
        assert_eq!(read_keys(&right, config.key_format), vec![vec![30]]);
        assert_eq!(read_children(&right), vec![102, 103]);
        assert_eq!(sibling_id(&left), 1);
        assert_eq!(preceding_id(&right), 0);
    }

    #[test]
    fn test_internal_insert_rejects_existing_separator() {
        let config = TreeConfig::new(KeyFormat::Fixed(1));
        let mut store = MemoryPageStore::new(256).expect("store");
        let id = store.allocate().expect("allocate");
        let mut page = store.read_page(id).expect("read");
        initialize_internal_node(&mut page, config.key_format);
        write_internal_body(&mut page, config.key_format, &[5, 6], &[vec![10]]).expect("fits");
        store.write_page(id, &page).expect("write");
        let mut ids = NodeIdAllocator::new(store.page_count());

        let result = with_cursor(&mut store, id, LockMode::Exclusive, |cursor| {
            insert_into_internal(cursor, &mut ids, &config, &[10], 7)
        });
        assert!(matches!(result, Err(BTreeError::Node(_))));
    }

    #[test]
    fn test_adopt_at_front() {
        let config = TreeConfig::new(KeyFormat::Variable);
        let mut store = MemoryPageStore::new(256).expect("store");
        let id = store.allocate().expect("allocate");
        let mut page = store.read_page(id).expect("read");
        initialize_internal_node(&mut page, config.key_format);
        write_internal_body(&mut page, config.key_format, &[5, 6], &[vec![10]]).expect("fits");
        store.write_page(id, &page).expect("write");
        let mut ids = NodeIdAllocator::new(store.page_count());

        with_cursor(&mut store, id, LockMode::Exclusive, |cursor| {
            insert_entry_at(cursor, &mut ids, &config, 0, 0, &[4, 4], 3)
        })
        .expect("adopt");

        let page = store.read_page(id).expect("read");
        assert_eq!(read_children(&page), vec![3, 5, 6]);
        assert_eq!(read_keys(&page, config.key_format), vec![vec![4, 4], vec![10]]);
    }
}
