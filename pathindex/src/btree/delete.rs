//! Removal from a single node and repair of the parent above it.
//!
//! A leaf losing its last key is not emptied in place. It is unlinked from
//! its chain and reported upward as collapsed, still holding the key, and
//! its page is reclaimed only once the parent no longer points at it.
//!
//! The parent drops the child pointer and one separator: the separator
//! left of the child if the child was the rightmost one, otherwise the one
//! right of it. When the collapsed child was an internal node, its single
//! remaining child is handed to the neighbouring node together with the
//! dropped separator, so no subtree is lost. A parent left with no keys is
//! in turn reported upward as collapsed.

use crate::btree::header::{self, number_of_keys, sibling_id};
use crate::btree::insert::{InsertResult, insert_entry_at, insert_into_internal};
use crate::btree::key::{Key, KeyEncoding};
use crate::btree::navigator::{NodeIdAllocator, child_at, index_of_child, unlink};
use crate::btree::node::{self, key_offset, remove_entry, used_end};
use crate::btree::search::search_node;
use crate::btree::tree::{BTreeError, TreeConfig};
use crate::storage::{PageCursor, PageId, PageStore};

/// A node that lost its last key and must be detached by its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollapsedNode {
    pub removed_id: PageId,
    pub sibling_id: PageId,
    pub is_leaf: bool,
}

/// What a node removal reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveResult {
    /// The key is not in the tree.
    NotFound,
    /// The key was removed; nothing to repair above.
    Done,
    /// The node emptied and is already out of its chain.
    Collapsed(CollapsedNode),
    /// Re-homing an orphan split this node. Insert the entry one level up.
    Split { separator: Key, right: PageId },
}

/// Remove `key` from the leaf under the cursor.
///
/// The root leaf may become empty; any other leaf collapses instead.
pub fn remove_from_leaf<S: PageStore + ?Sized>(
    cursor: &mut PageCursor<'_, S>,
    config: &TreeConfig,
    key: &[i64],
    is_root: bool,
) -> Result<RemoveResult, BTreeError> {
    let format = config.key_format;
    let page_id = cursor.current_page_id();
    let position = search_node(cursor.page(), format, key);
    if !position.found {
        return Ok(RemoveResult::NotFound);
    }

    let count = number_of_keys(cursor.page());
    if count == 1 && !is_root {
        let sibling = sibling_id(cursor.page());
        unlink(cursor, page_id)?;
        tracing::debug!("Leaf {page_id} emptied");
        return Ok(RemoveResult::Collapsed(CollapsedNode {
            removed_id: page_id,
            sibling_id: sibling,
            is_leaf: true,
        }));
    }

    let end = used_end(cursor.page(), format);
    let page = cursor.page_mut()?;
    format.splice_out(page, position.offset, end);
    header::set_number_of_keys(page, count - 1);
    Ok(RemoveResult::Done)
}

/// Detach a collapsed child from the internal node under the cursor.
pub fn handle_removed_child<S: PageStore + ?Sized>(
    cursor: &mut PageCursor<'_, S>,
    ids: &mut NodeIdAllocator,
    config: &TreeConfig,
    collapsed: CollapsedNode,
) -> Result<RemoveResult, BTreeError> {
    let format = config.key_format;
    let parent = cursor.current_page_id();
    let removed = collapsed.removed_id;

    let count = number_of_keys(cursor.page());
    if count == 0 {
        return Err(node::corrupt(parent, "internal node without keys").into());
    }
    let Some(index) = index_of_child(cursor.page(), removed) else {
        return Err(node::corrupt(parent, "collapsed child is not a child of its parent").into());
    };

    let rightmost = index == count;
    let key_index = if rightmost { index - 1 } else { index };
    let neighbor = if rightmost {
        child_at(cursor.page(), index - 1)
    } else {
        child_at(cursor.page(), index + 1)
    };
    let separator = format.read_key(cursor.page(), key_offset(cursor.page(), format, key_index));
    remove_entry(cursor.page_mut()?, format, key_index, index);

    let mut result = RemoveResult::Done;
    if !collapsed.is_leaf {
        cursor.goto(removed)?;
        let orphan = child_at(cursor.page(), 0);

        cursor.goto(neighbor)?;
        let neighbor_keys = number_of_keys(cursor.page());
        let (key_at, child_at_index) = if rightmost {
            (neighbor_keys, neighbor_keys + 1)
        } else {
            (0, 0)
        };
        let adopted = insert_entry_at(
            cursor,
            ids,
            config,
            key_at,
            child_at_index,
            &separator,
            orphan,
        )?;
        tracing::debug!("Node {neighbor} adopted {orphan} from collapsed node {removed}");

        if let InsertResult::Split {
            separator: promoted,
            right,
        } = adopted
        {
            cursor.goto(parent)?;
            if let InsertResult::Split { separator, right } =
                insert_into_internal(cursor, ids, config, &promoted, right)?
            {
                result = RemoveResult::Split { separator, right };
            }
        }
    }

    cursor.free(removed)?;
    tracing::debug!("Reclaimed page {removed}");

    cursor.goto(parent)?;
    if number_of_keys(cursor.page()) == 0 {
        let sibling = sibling_id(cursor.page());
        unlink(cursor, parent)?;
        tracing::debug!("Internal node {parent} emptied");
        return Ok(RemoveResult::Collapsed(CollapsedNode {
            removed_id: parent,
            sibling_id: sibling,
            is_leaf: false,
        }));
    }
    Ok(result)
}
