//! The background resizer thread: Expand (append a new top level) and
//! Migration (bulk rehash bottom buckets into it), spec.md §4.7.
//!
//! Spawned once per table and joined in `Drop`; the poll-sleep-loop shape
//! is the same as `massive-graph-core::structures::segmented_stream`'s
//! `StreamPagePool` background recycler thread, adapted to check a
//! shutdown flag each iteration instead of running forever.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_epoch::{self as epoch, Owned};

use crate::clevel::level::Level;
use crate::clevel::level_meta::LevelMeta;
use crate::clevel::slot::TaggedSlot;
use crate::clevel::table::Inner;
use crate::constants::{ASSOC, WORKER_PARK_TIMEOUT_MS};

/// Spawn the dedicated resizer thread for `inner`.
pub(crate) fn spawn<K, V, S>(inner: Arc<Inner<K, V, S>>) -> JoinHandle<()>
where
    K: serde::de::DeserializeOwned + std::hash::Hash + Send + Sync + 'static,
    V: serde::de::DeserializeOwned + Send + Sync + 'static,
    S: std::hash::BuildHasher + Send + Sync + 'static,
{
    std::thread::spawn(move || {
        while !inner.shutdown.load(Ordering::Acquire) {
            let guard = epoch::pin();
            let meta = unsafe { inner.root.load(Ordering::Acquire, &guard).deref() };

            let last = meta.last_level(&guard);
            let first = meta.first_level(&guard);

            // Nothing to migrate: only the bootstrap two levels exist and
            // the bottom is already fully migrated, or a migration just
            // finished. Park briefly rather than busy-spin.
            let n_levels = count_levels(last, &guard);
            if n_levels <= 2 && !meta.is_resizing() {
                std::thread::sleep(Duration::from_millis(WORKER_PARK_TIMEOUT_MS));
                continue;
            }

            migrate_bulk(&inner, meta, last, first, &guard);
        }
    })
}

fn count_levels(mut level: &Level, guard: &epoch::Guard) -> usize {
    let mut n = 1;
    while let Some(up) = level.up(guard) {
        level = up;
        n += 1;
    }
    n
}

/// Mutator-triggered Expand: a mutator that saw `ABSENT_AND_NO_VACANCY`
/// (find_empty_slot returned nothing) calls this to take the table out of
/// quiescence. Appends a new top level if one isn't already there, then
/// publishes a fresh `LevelMeta` with `is_resizing = true` so the resizer
/// thread picks up migration on its next iteration. Mirrors
/// `clevel_hash.hpp`'s two-phase `up`-then-`meta` Expand CAS (spec.md §4.7):
/// whichever thread wins the `up` CAS, every thread still races to publish
/// the new root, and only one wins.
pub(crate) fn trigger_expand<K, V, S>(inner: &Inner<K, V, S>, guard: &epoch::Guard) {
    let root = inner.root.load(Ordering::Acquire, guard);
    let meta = unsafe { root.deref() };
    if meta.is_resizing() {
        // Someone already took the table out of quiescence; let the
        // resizer thread drive the migration it started.
        return;
    }

    let top = meta.first_level(guard);
    if top.up(guard).is_none() {
        let _ = top.try_install_up(Level::new(top.capacity() * 2));
    }
    let Some(new_top) = top.up(guard) else {
        return;
    };

    let new_top_shared = unsafe { epoch::Shared::from(new_top as *const Level) };
    let last_shared = meta.last_level_shared(guard);
    let new_meta = Owned::new(LevelMeta::new(new_top_shared, last_shared, true));

    match inner
        .root
        .compare_exchange(root, new_meta, Ordering::AcqRel, Ordering::Acquire, guard)
    {
        Ok(_) => {
            unsafe {
                guard.defer_destroy(root);
            }
            crate::log_info!("mutator-triggered expand: new top capacity {}", new_top.capacity());
        }
        Err(_) => {
            // Lost the publish race; whoever won already moved the table
            // out of quiescence, which is all the caller needed.
        }
    }
}

/// Migrate up to `resize_bulk` buckets of the bottom level into the top
/// level, expanding (appending a new, larger top level) whenever a
/// destination bucket is full. Mirrors `clevel_hash.hpp`'s `resize()` inner
/// loop.
fn migrate_bulk<K, V, S>(
    inner: &Inner<K, V, S>,
    meta: &LevelMeta,
    bottom: &Level,
    mut top: &Level,
    guard: &epoch::Guard,
) where
    K: serde::de::DeserializeOwned + std::hash::Hash,
    V: serde::de::DeserializeOwned,
    S: std::hash::BuildHasher,
{
    let start = inner.expand_bucket.load(Ordering::Acquire) as usize;
    let bottom_capacity = bottom.capacity();

    // Narrow the migration-in-flight window to just the buckets this bulk
    // step is about to touch, so Update/Erase only re-check context for
    // buckets that are actually moving right now.
    inner.expand_bucket_old.store(start as u64, Ordering::Release);

    for bucket_idx in start..(start + inner.resize_bulk).min(bottom_capacity) {
        migrate_bucket(inner, bottom, &mut top, bucket_idx, guard);
    }

    let migrated_to = (start + inner.resize_bulk).min(bottom_capacity);
    inner.expand_bucket.store(migrated_to as u64, Ordering::Release);

    if migrated_to >= bottom_capacity {
        // Bottom level is fully drained: publish a new LevelMeta dropping
        // it, matching spec.md §4.7's "publish new LevelMeta ... reset
        // expand_bucket = 0, retire old bottom level after quiescence".
        publish_after_full_migration(inner, meta, bottom, guard);
    }
}

fn migrate_bucket<K, V, S>(
    inner: &Inner<K, V, S>,
    bottom: &Level,
    top: &mut &Level,
    bucket_idx: usize,
    guard: &epoch::Guard,
) where
    K: serde::de::DeserializeOwned + std::hash::Hash,
    V: serde::de::DeserializeOwned,
    S: std::hash::BuildHasher,
{
    let bucket = bottom.bucket(bucket_idx);
    for slot_idx in 0..ASSOC {
        let cell = bucket.slot(slot_idx);
        loop {
            let slot = cell.load(Ordering::Acquire);
            if slot.is_empty() {
                break;
            }

            // The slot only carries a 16-bit partial, not the full hash
            // needed to place the entry in a level of different capacity,
            // so recompute it from the stored key. Migration moves entries,
            // not pre-hashed locators.
            let (key, _value): (K, V) = match crate::clevel::entry::read_entry(&inner.arena, slot.offset()) {
                Ok(kv) => kv,
                Err(e) => {
                    crate::log_error!("resizer: failed to read entry during migration: {}", e);
                    break;
                }
            };
            let hash = crate::clevel::hashing::hash64(&key, &inner.build_hasher);
            let partial = crate::clevel::hashing::get_partial(hash);
            debug_assert_eq!(partial, slot.partial(), "partial must be stable across levels");

            let installed = install_in_level(top, hash, partial, slot.offset());

            if !installed {
                // Top level has no room: expand, then retry this slot
                // against the freshly appended level.
                expand(inner, top, guard);
                continue;
            }

            // Source slot cleared only after the destination write
            // succeeded, so a crash mid-migration leaves the entry
            // reachable from the bottom level rather than losing it.
            if cell.compare_exchange(slot, TaggedSlot::EMPTY).is_ok() {
                break;
            }
            // Someone else mutated the source slot concurrently (an erase
            // raced us); re-read and retry.
        }
    }
}

/// Try both candidate buckets in `level` for `hash`/`partial`, preferring
/// the less-loaded one, and CAS `offset` into the first empty slot found.
fn install_in_level(level: &Level, hash: u64, partial: u16, offset: u64) -> bool {
    use crate::clevel::hashing::{first_index, second_index};

    let capacity = level.capacity();
    let first_idx = first_index(hash, capacity);
    let second_idx = second_index(partial, first_idx, capacity);

    let first_bucket = level.bucket(first_idx);
    let second_bucket = level.bucket(second_idx);
    let (preferred, fallback) = if first_bucket.load() <= second_bucket.load() {
        (first_bucket, second_bucket)
    } else {
        (second_bucket, first_bucket)
    };

    for bucket in [preferred, fallback] {
        for i in 0..ASSOC {
            let cell = bucket.slot(i);
            if cell
                .compare_exchange(TaggedSlot::EMPTY, TaggedSlot::new(partial, offset))
                .is_ok()
            {
                return true;
            }
        }
    }
    false
}

fn expand<K, V, S>(inner: &Inner<K, V, S>, top: &mut &Level, guard: &epoch::Guard) {
    let new_capacity = top.capacity() * 2;
    match top.try_install_up(Level::new(new_capacity)) {
        Ok(()) => {
            crate::log_info!("resizer: expanded to a new top level of capacity {}", new_capacity);
        }
        Err(_already_installed) => {
            // another thread (or a previous call in this same loop) beat
            // us to it; fall through and read whatever is there now.
        }
    }
    if let Some(new_top) = top.up(guard) {
        *top = new_top;
    }
}

fn publish_after_full_migration<K, V, S>(
    inner: &Inner<K, V, S>,
    meta: &LevelMeta,
    old_bottom: &Level,
    guard: &epoch::Guard,
) {
    let new_bottom = match old_bottom.up(guard) {
        Some(l) => l,
        None => return,
    };
    // Recompute the true top of the chain: migration may have expanded
    // past the level the caller originally observed.
    let mut top = new_bottom;
    while let Some(up) = top.up(guard) {
        top = up;
    }
    let first_shared = unsafe { epoch::Shared::from(top as *const Level) };
    let new_bottom_shared = unsafe { epoch::Shared::from(new_bottom as *const Level) };

    let still_resizing = !std::ptr::eq(new_bottom, top);
    let new_meta = Owned::new(LevelMeta::new(first_shared, new_bottom_shared, still_resizing));

    let old_root = inner.root.load(Ordering::Acquire, guard);
    if inner
        .root
        .compare_exchange(old_root, new_meta, Ordering::AcqRel, Ordering::Acquire, guard)
        .is_ok()
    {
        inner.expand_bucket.store(0, Ordering::Release);
        inner.expand_bucket_old.store(0, Ordering::Release);
        unsafe {
            let old_bottom_shared = meta.last_level_shared(guard);
            guard.defer_destroy(old_bottom_shared);
            guard.defer_destroy(old_root);
        }
        crate::log_info!("resizer: retired exhausted bottom level, new bottom capacity {}", new_bottom.capacity());
    }
}
