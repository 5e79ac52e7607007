//! Collections running over the write-behind cache

use std::sync::Arc;

use ledgerview_collections::{Prefix, SchemaBuilder};
use ledgerview_core::{KvStore, ScanOrder};
use ledgerview_storage::{CacheStore, MemoryStore};

#[test]
fn test_map_reads_own_writes_before_flush() {
    let durable = MemoryStore::new();
    let cache = CacheStore::new(Arc::new(durable.clone()), 4);
    let builder = SchemaBuilder::new();
    let map = builder.add_map::<u64, String>(Prefix::new("t", 1), "rows").unwrap();
    let seq = builder.add_sequence(Prefix::new("t", 2), "seq").unwrap();
    builder.seal().unwrap();

    for _ in 0..10 {
        let id = seq.next(&cache).unwrap();
        map.set(&cache, &id, &format!("row-{}", id)).unwrap();
    }
    assert_eq!(map.get(&cache, &9).unwrap(), "row-9");
    assert!(durable.is_empty());

    cache.write().unwrap();
    assert_eq!(seq.peek(&durable).unwrap(), 10);
    assert_eq!(map.get(&durable, &0).unwrap(), "row-0");
}

#[test]
fn test_range_clear_through_cache_hides_pending_rows() {
    let durable = MemoryStore::new();
    let cache = CacheStore::new(Arc::new(durable.clone()), 4);
    let builder = SchemaBuilder::new();
    let map = builder.add_map::<u64, u64>(Prefix::new("t", 1), "rows").unwrap();

    for i in 0..5u64 {
        map.set(&cache, &i, &i).unwrap();
    }
    cache.write().unwrap();
    for i in 5..10u64 {
        map.set(&cache, &i, &i).unwrap();
    }

    map.clear(&cache, ..=6).unwrap();
    let left = map.keys(&cache, .., ScanOrder::Forward, None).unwrap();
    assert_eq!(left, vec![7, 8, 9]);

    cache.write().unwrap();
    let left = map.keys(&durable, .., ScanOrder::Forward, None).unwrap();
    assert_eq!(left, vec![7, 8, 9]);
    assert!(!durable.has(&Prefix::new("t", 1).join(&[0; 8])).unwrap());
}
