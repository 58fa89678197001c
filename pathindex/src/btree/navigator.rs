//! Node id allocation, child pointer access and sibling chain maintenance.
//!
//! Every level of the tree is a doubly-linked chain: `sibling` points right,
//! `preceding` points left, `NO_PAGE` marks the ends. The two functions that
//! rewrite those links live here and nowhere else.

use crate::btree::BTreeError;
use crate::btree::header;
use crate::btree::node::{NodeError, child_offset};
use crate::storage::{NO_PAGE, Page, PageCursor, PageId, PageStore, StoreError};

/// Hands out ids for new nodes.
///
/// Seeded from the store's high-water mark when a tree is opened, so new
/// nodes always land above anything already written (bulk-loaded leaves
/// included). Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdAllocator {
    next: PageId,
}

impl NodeIdAllocator {
    #[must_use]
    pub const fn new(high_water_mark: PageId) -> Self {
        Self {
            next: high_water_mark,
        }
    }

    /// Allocate a page for a new node through `cursor`.
    pub fn allocate<S: PageStore + ?Sized>(
        &mut self,
        cursor: &mut PageCursor<'_, S>,
    ) -> Result<PageId, BTreeError> {
        let id = cursor.allocate()?;
        if id < self.next {
            return Err(NodeError::Corrupt {
                page_id: Some(id),
                reason: format!("store handed out id {id} below high-water mark {}", self.next),
            }
            .into());
        }
        self.next = id + 1;
        Ok(id)
    }
}

/// Child pointer `index` of an internal node.
#[must_use]
pub fn child_at(page: &Page, index: usize) -> PageId {
    page.read_u64(child_offset(index))
}

/// Position of `child` among the children of an internal node.
#[must_use]
pub fn index_of_child(page: &Page, child: PageId) -> Option<usize> {
    (0..=header::number_of_keys(page)).find(|i| child_at(page, *i) == child)
}

/// Link `new` into the chain directly after `left`.
///
/// The cursor ends up on whichever page was touched last.
pub fn link_after<S: PageStore + ?Sized>(
    cursor: &mut PageCursor<'_, S>,
    left: PageId,
    new: PageId,
) -> Result<(), StoreError> {
    cursor.goto(left)?;
    let old_sibling = header::sibling_id(cursor.page());
    header::set_sibling_id(cursor.page_mut()?, new);

    cursor.goto(new)?;
    let page = cursor.page_mut()?;
    header::set_preceding_id(page, left);
    header::set_sibling_id(page, old_sibling);

    if old_sibling != NO_PAGE {
        cursor.goto(old_sibling)?;
        header::set_preceding_id(cursor.page_mut()?, new);
    }
    Ok(())
}

/// Take `removed` out of its chain, joining its neighbours. The removed
/// node's own links are cleared.
pub fn unlink<S: PageStore + ?Sized>(
    cursor: &mut PageCursor<'_, S>,
    removed: PageId,
) -> Result<(), StoreError> {
    cursor.goto(removed)?;
    let preceding = header::preceding_id(cursor.page());
    let sibling = header::sibling_id(cursor.page());
    if preceding == NO_PAGE && sibling == NO_PAGE {
        return Ok(());
    }
    let page = cursor.page_mut()?;
    header::set_preceding_id(page, NO_PAGE);
    header::set_sibling_id(page, NO_PAGE);

    if preceding != NO_PAGE {
        cursor.goto(preceding)?;
        header::set_sibling_id(cursor.page_mut()?, sibling);
    }
    if sibling != NO_PAGE {
        cursor.goto(sibling)?;
        header::set_preceding_id(cursor.page_mut()?, preceding);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::header::{initialize_leaf_node, preceding_id, sibling_id};
    use crate::btree::key::KeyFormat;
    use crate::storage::{LockMode, MemoryPageStore, with_cursor};

    fn store_with_leaves(count: usize) -> MemoryPageStore {
        let mut store = MemoryPageStore::new(128).expect("store");
        for _ in 0..count {
            let id = store.allocate().expect("allocate");
            let mut page = Page::new(128);
            initialize_leaf_node(&mut page, KeyFormat::Variable);
            store.write_page(id, &page).expect("write");
        }
        store
    }

    fn links(store: &mut MemoryPageStore, id: PageId) -> (PageId, PageId) {
        let page = store.read_page(id).expect("read");
        (preceding_id(&page), sibling_id(&page))
    }

    #[test]
    fn test_link_after_keeps_chain_symmetric() {
        let mut store = store_with_leaves(3);
        with_cursor::<_, _, StoreError, _>(&mut store, 0, LockMode::Exclusive, |cursor| {
            link_after(cursor, 0, 1)?;
            link_after(cursor, 0, 2)
        })
        .expect("link");

        // Chain is now 0 -> 2 -> 1.
        assert_eq!(links(&mut store, 0), (NO_PAGE, 2));
        assert_eq!(links(&mut store, 2), (0, 1));
        assert_eq!(links(&mut store, 1), (2, NO_PAGE));
    }

    #[test]
    fn test_unlink_joins_neighbours() {
        let mut store = store_with_leaves(3);
        with_cursor::<_, _, StoreError, _>(&mut store, 0, LockMode::Exclusive, |cursor| {
            link_after(cursor, 0, 1)?;
            link_after(cursor, 1, 2)?;
            unlink(cursor, 1)
        })
        .expect("unlink");

        assert_eq!(links(&mut store, 0), (NO_PAGE, 2));
        assert_eq!(links(&mut store, 2), (0, NO_PAGE));
        assert_eq!(links(&mut store, 1), (NO_PAGE, NO_PAGE));
    }

    #[test]
    fn test_unlink_chain_ends() {
        let mut store = store_with_leaves(2);
        with_cursor::<_, _, StoreError, _>(&mut store, 0, LockMode::Exclusive, |cursor| {
            link_after(cursor, 0, 1)?;
            unlink(cursor, 0)
        })
        .expect("unlink");
        assert_eq!(links(&mut store, 1), (NO_PAGE, NO_PAGE));
    }

    #[test]
    fn test_allocator_is_seeded_above_existing_pages() {
        let mut store = store_with_leaves(4);
        let mut ids = NodeIdAllocator::new(store.page_count());
        let allocated =
            with_cursor::<_, _, BTreeError, _>(&mut store, 0, LockMode::Exclusive, |cursor| {
                Ok((ids.allocate(cursor)?, ids.allocate(cursor)?))
            })
            .expect("allocate");
        assert_eq!(allocated, (4, 5));
        assert_eq!(ids, NodeIdAllocator::new(6));
    }

    #[test]
    fn test_allocator_rejects_reused_ids() {
        let mut store = store_with_leaves(1);
        let mut ids = NodeIdAllocator::new(10);
        let result =
            with_cursor::<_, _, BTreeError, _>(&mut store, 0, LockMode::Exclusive, |cursor| {
                ids.allocate(cursor)
            });
        assert!(matches!(result, Err(BTreeError::Node(NodeError::Corrupt { .. }))));
    }

    #[test]
    fn test_child_lookup() {
        let mut page = Page::new(128);
        header::initialize_internal_node(&mut page, KeyFormat::Fixed(1));
        header::set_number_of_keys(&mut page, 2);
        for (i, id) in [40, 41, 42].into_iter().enumerate() {
            page.write_u64(child_offset(i), id);
        }
        assert_eq!(child_at(&page, 1), 41);
        assert_eq!(index_of_child(&page, 42), Some(2));
        assert_eq!(index_of_child(&page, 99), None);
    }
}
