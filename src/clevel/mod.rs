//! The Clevel hash index engine: arena-backed entries, tagged slots,
//! fixed-associativity buckets, a stack of levels, and the lock-free
//! find/insert/search/update/erase protocols plus the background resizer
//! that migrates the bottom level upward.

pub mod bucket;
pub mod entry;
pub mod find;
pub mod hashing;
pub mod level;
pub mod level_meta;
pub mod mutators;
pub mod recovery;
pub mod resizer;
pub mod slot;
pub mod table;

pub use mutators::{FoundResult, InsertResult};
pub use recovery::RecoveryReport;
pub use table::ClevelHash;

#[cfg(test)]
mod concurrency_tests {
    use super::*;
    use crate::core::config::Config;
    use std::sync::Arc;

    fn small_table() -> ClevelHash<u64, u64> {
        let mut config = Config::default();
        config.hash_power = 4; // initial_capacity = 16, bootstrap bottom=8/top=16
        config.region_size = 16 * 1024 * 1024;
        ClevelHash::new(config).unwrap()
    }

    #[test]
    fn insert_then_search_roundtrips() {
        let table = small_table();
        let res = table.insert(1, 100, 0).unwrap();
        assert!(!res.found);
        assert_eq!(table.search(&1).unwrap(), Some(100));
    }

    #[test]
    fn duplicate_insert_reports_found() {
        let table = small_table();
        table.insert(1, 100, 0).unwrap();
        let res = table.insert(1, 200, 0).unwrap();
        assert!(res.found);
        // unique-insert semantics: value is unchanged
        assert_eq!(table.search(&1).unwrap(), Some(100));
    }

    #[test]
    fn update_changes_value_only_if_present() {
        let table = small_table();
        let missing = table.update(1, 5, 0).unwrap();
        assert!(!missing.found);

        table.insert(1, 5, 0).unwrap();
        let present = table.update(1, 9, 0).unwrap();
        assert!(present.found);
        assert_eq!(table.search(&1).unwrap(), Some(9));
    }

    #[test]
    fn erase_removes_key() {
        let table = small_table();
        table.insert(1, 5, 0).unwrap();
        let res = table.erase(&1, 0).unwrap();
        assert!(res.found);
        assert_eq!(table.search(&1).unwrap(), None);
        assert!(!table.erase(&1, 0).unwrap().found);
    }

    #[test]
    fn single_threaded_resize_scenario() {
        // spec scenario: hashpower=4, 1..1000 keys, single thread, expect
        // every key survives repeated resizing.
        let table = small_table();
        for i in 1..1000u64 {
            let res = table.insert(i, i * 10, 0).unwrap();
            assert!(!res.found, "key {i} should be fresh");
        }
        for i in 1..1000u64 {
            assert_eq!(table.search(&i).unwrap(), Some(i * 10), "key {i} missing after resize");
        }
    }

    #[test]
    fn concurrent_disjoint_key_insert() {
        let table = Arc::new(small_table());
        let mut handles = Vec::new();
        for t in 0..8usize {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for i in 0..10_000u64 {
                    let key = (t as u64) * 100_000 + i;
                    table.insert(key, key, t).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for t in 0..8usize {
            for i in 0..10_000u64 {
                let key = (t as u64) * 100_000 + i;
                assert_eq!(table.search(&key).unwrap(), Some(key));
            }
        }
    }

    #[test]
    fn repeated_insert_erase_search_cycles() {
        let table = small_table();
        for i in 0..1000u64 {
            table.insert(i, i, 0).unwrap();
            assert_eq!(table.search(&i).unwrap(), Some(i));
            table.erase(&i, 0).unwrap();
            assert_eq!(table.search(&i).unwrap(), None);
        }
    }

    #[test]
    fn capacity_of_matches_public_capacity() {
        use crossbeam_epoch as epoch;
        let table = small_table();
        table.insert(1, 1, 0).unwrap();
        let guard = epoch::pin();
        let meta = table.meta(&guard);
        assert_eq!(level_meta::capacity_of(meta, &guard), table.capacity());
    }

    #[test]
    fn get_entry_reads_back_the_slot_an_insert_wrote() {
        let table = small_table();
        table.insert(7, 77, 0).unwrap();
        let guard = crossbeam_epoch::pin();
        let meta = table.meta(&guard);
        let hash = crate::clevel::hashing::hash64(&7u64, &table.inner.build_hasher);
        let partial = crate::clevel::hashing::get_partial(hash);
        let found = find::find::<u64, u64>(meta, table.arena(), &7u64, hash, partial, false, &guard)
            .unwrap()
            .expect("key must be findable");

        // level index counted from the bottom via `up` links.
        let mut level_idx = 0;
        let mut cur = meta.last_level(&guard);
        while !std::ptr::eq(cur, found.locator.level) {
            cur = cur.up(&guard).expect("target level must be reachable from the bottom");
            level_idx += 1;
        }

        let (k, v) = table
            .get_entry(level_idx, found.locator.bucket_idx, found.locator.slot_idx)
            .expect("slot must decode");
        assert_eq!((k, v), (7, 77));
        assert_eq!(table.get_key(level_idx, found.locator.bucket_idx, found.locator.slot_idx), Some(7));
    }

    #[test]
    fn concurrent_update_race_converges() {
        let table = Arc::new(small_table());
        table.insert(1, 0, 0).unwrap();
        let mut handles = Vec::new();
        for t in 1..=4u64 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let _ = table.update(1, t, t as usize);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let final_value = table.search(&1).unwrap().unwrap();
        assert!((1..=4).contains(&final_value));
    }
}
