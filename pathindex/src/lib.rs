#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

// Layers, bottom up:
//  - storage: fixed-size pages behind the `PageStore` trait, reached through
//    scoped cursors (memory and single-file implementations)
//  - btree: node layout, search, insertion, deletion, bulk loading and the
//    `Tree` handle that drives them
//  - config: environment-driven settings for opening an index file
//
// The tree does not own the store. The caller keeps the root id (the file
// store has a superblock slot for it) and hands it back to `Tree::open`.

pub mod btree;
pub mod config;
pub mod storage;

#[cfg(test)]
mod testing;
