use std::collections::BTreeSet;

use rand::Rng;
use rand::rngs::StdRng;

use crate::btree::Key;
use crate::storage::MemoryPageStore;

/// Route `tracing` output to the test harness. Filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An empty in-memory store with the given page size.
pub fn memory_store(page_size: usize) -> MemoryPageStore {
    MemoryPageStore::new(page_size).expect("valid page size")
}

/// `count` distinct random paths, sorted. Each has 1 to `max_len` node ids
/// drawn from `0..max_node`.
pub fn random_paths(rng: &mut StdRng, count: usize, max_len: usize, max_node: i64) -> Vec<Key> {
    let mut paths = BTreeSet::new();
    while paths.len() < count {
        let len = rng.random_range(1..=max_len);
        let path: Key = (0..len).map(|_| rng.random_range(0..max_node)).collect();
        paths.insert(path);
    }
    paths.into_iter().collect()
}
