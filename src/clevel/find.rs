//! The Find protocol: bottom-to-top candidate-bucket scan with fingerprint
//! quick-rejection, full-key verification, and cross-level duplicate
//! reconciliation (spec.md §4.5).

use crossbeam_epoch::Guard;

use crate::arena::Arena;
use crate::clevel::bucket::Bucket;
use crate::clevel::entry::read_entry;
use crate::clevel::hashing::{first_index, second_index};
use crate::clevel::level::Level;
use crate::clevel::level_meta::LevelMeta;
use crate::clevel::slot::TaggedSlot;
use crate::constants::ASSOC;
use crate::types::error::ClevelError;
use serde::de::DeserializeOwned;

/// A resolved slot location: which level, which bucket, which slot index.
#[derive(Clone, Copy)]
pub struct Locator<'g> {
    pub level: &'g Level,
    pub bucket_idx: usize,
    pub slot_idx: usize,
}

impl<'g> Locator<'g> {
    fn bucket(&self) -> &'g Bucket {
        self.level.bucket(self.bucket_idx)
    }

    pub fn load(&self) -> TaggedSlot {
        self.bucket().slot(self.slot_idx).load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn compare_exchange(&self, current: TaggedSlot, new: TaggedSlot) -> Result<TaggedSlot, TaggedSlot> {
        self.bucket().slot(self.slot_idx).compare_exchange(current, new)
    }
}

/// Outcome of a key search across the level chain.
pub struct Found<'g> {
    pub locator: Locator<'g>,
    pub entry_offset: u64,
}

/// Walk every level from `last_level` (bottom/oldest) to `first_level`
/// (top/newest), scanning both candidate buckets at each level for a slot
/// whose partial matches and whose stored entry's key compares equal.
///
/// If `fix_dup` is set and the same key is found at more than one level
/// (the bottom copy not yet erased by a lagging migration), the stale
/// (lower-level) slot is CAS-cleared and freed here, matching
/// `clevel_hash.hpp`'s `del_dup`; the surviving locator is always the one
/// at the higher level, since migration always copies bottom-to-top.
pub fn find<'g, K, V>(
    meta: &LevelMeta,
    arena: &Arena,
    key: &K,
    hash: u64,
    partial: u16,
    fix_dup: bool,
    guard: &'g Guard,
) -> Result<Option<Found<'g>>, ClevelError>
where
    K: PartialEq + DeserializeOwned,
    V: DeserializeOwned,
{
    let mut best: Option<Found<'g>> = None;
    let mut current = Some(meta.last_level(guard));

    while let Some(level) = current {
        let capacity = level.capacity();
        let first_idx = first_index(hash, capacity);
        let second_idx = second_index(partial, first_idx, capacity);

        for &bucket_idx in &[first_idx, second_idx] {
            let bucket = level.bucket(bucket_idx);
            for slot_idx in 0..ASSOC {
                let slot = bucket.slot(slot_idx).load(std::sync::atomic::Ordering::Acquire);
                if slot.is_empty() || slot.partial() != partial {
                    continue;
                }
                let (stored_key, _): (K, V) = read_entry(arena, slot.offset())?;
                if &stored_key != key {
                    continue;
                }

                let locator = Locator { level, bucket_idx, slot_idx };
                if let Some(prev) = best.take() {
                    // `prev` was found at a lower (older) level than this
                    // one, since we scan bottom-to-top; it is the stale
                    // duplicate.
                    if fix_dup {
                        if prev
                            .locator
                            .compare_exchange(prev.locator.load(), TaggedSlot::EMPTY)
                            .is_ok()
                        {
                            crate::log_debug!(
                                "find: cleared stale duplicate at bucket {} slot {}",
                                prev.locator.bucket_idx,
                                prev.locator.slot_idx
                            );
                        }
                    }
                }
                best = Some(Found { locator, entry_offset: slot.offset() });
            }
        }

        current = level.up(guard);
    }

    Ok(best)
}

/// Find the first empty slot for a fresh insert, preferring the top
/// (newest/largest) level and, within a level, the less-loaded of the two
/// candidate buckets, matching `clevel_hash.hpp`'s `find_empty_slot`
/// (spec.md §4.5/§4.6).
pub fn find_empty_slot<'g>(
    meta: &LevelMeta,
    hash: u64,
    partial: u16,
    guard: &'g Guard,
) -> Option<Locator<'g>> {
    let mut levels = Vec::new();
    let mut current = Some(meta.last_level(guard));
    while let Some(level) = current {
        levels.push(level);
        current = level.up(guard);
    }
    // top-down: iterate in reverse (levels[last] is the top/newest level).
    for level in levels.into_iter().rev() {
        let capacity = level.capacity();
        let first_idx = first_index(hash, capacity);
        let second_idx = second_index(partial, first_idx, capacity);

        let first_bucket = level.bucket(first_idx);
        let second_bucket = level.bucket(second_idx);
        let (preferred_idx, preferred, fallback_idx, fallback) =
            if first_bucket.load() <= second_bucket.load() {
                (first_idx, first_bucket, second_idx, second_bucket)
            } else {
                (second_idx, second_bucket, first_idx, first_bucket)
            };

        if let Some(slot_idx) = empty_slot_in(preferred) {
            return Some(Locator { level, bucket_idx: preferred_idx, slot_idx });
        }
        if let Some(slot_idx) = empty_slot_in(fallback) {
            return Some(Locator { level, bucket_idx: fallback_idx, slot_idx });
        }
    }
    None
}

fn empty_slot_in(bucket: &Bucket) -> Option<usize> {
    for i in 0..ASSOC {
        if bucket.slot(i).load(std::sync::atomic::Ordering::Acquire).is_empty() {
            return Some(i);
        }
    }
    None
}
