//! Insert, Search, Update, Erase — spec.md §4.6 and §6.

use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clevel::entry;
use crate::clevel::find::{self, Locator};
use crate::clevel::level_meta::LevelMeta;
use crate::clevel::resizer;
use crate::clevel::slot::TaggedSlot;
use crate::clevel::table::{ClevelHash, Inner};
use crate::types::error::ClevelError;

/// Outcome of [`ClevelHash::insert`].
#[derive(Debug, Clone, Copy)]
pub struct InsertResult {
    /// `true` if the key already existed (unique-insert semantics: no
    /// value was written).
    pub found: bool,
    /// `true` if this insert observed a resize start that had not been
    /// underway when the call began.
    pub expanded: bool,
    /// Total table capacity immediately after this call.
    pub capacity: u64,
}

/// Outcome of [`ClevelHash::update`] / [`ClevelHash::erase`].
#[derive(Debug, Clone, Copy)]
pub struct FoundResult {
    /// Whether the key was present.
    pub found: bool,
}

const MAX_RETRIES: usize = 64;

impl<K, V, S> ClevelHash<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Insert `key -> value` if `key` is not already present.
    ///
    /// `found = true` means the key already existed and no value was
    /// written (spec.md §6: unique-insert semantics).
    pub fn insert(&self, key: K, value: V, tid: usize) -> Result<InsertResult, ClevelError> {
        // Set once we've committed a CAS but a resize race (see below)
        // means we can't yet report success: the offset of our own entry,
        // so a later attempt recognizes it instead of reporting our own
        // write back to us as a duplicate.
        let mut own_write: Option<u64> = None;

        for attempt in 0..MAX_RETRIES {
            let guard = epoch::pin();
            let meta = self.meta(&guard);
            let hash = crate::clevel::hashing::hash64(&key, &self.inner.build_hasher);
            let partial = crate::clevel::hashing::get_partial(hash);

            if own_write.is_some() {
                // We already won our CAS on a previous attempt; this pass
                // only runs Find-with-dedup once more to reconcile a
                // racing top-level copy (spec.md §4.6 Insert step 4), then
                // reports the success we already achieved.
                let _ = find::find::<K, V>(meta, &self.inner.arena, &key, hash, partial, true, &guard)?;
                return Ok(InsertResult {
                    found: false,
                    expanded: true,
                    capacity: meta.total_capacity(&guard),
                });
            }

            if find::find::<K, V>(meta, &self.inner.arena, &key, hash, partial, false, &guard)?
                .is_some()
            {
                return Ok(InsertResult {
                    found: true,
                    expanded: false,
                    capacity: meta.total_capacity(&guard),
                });
            }

            let was_resizing = meta.is_resizing();
            let Some(locator) = find::find_empty_slot(meta, hash, partial, &guard) else {
                // ABSENT_AND_NO_VACANCY: take the table out of quiescence
                // (or let an in-flight expand finish), then retry.
                resizer::trigger_expand(&self.inner, &guard);
                continue;
            };

            let is_bottom_vacancy = std::ptr::eq(locator.level, meta.last_level(&guard));
            if is_bottom_vacancy && was_resizing {
                // spec.md §4.6 step 4: a bottom-level vacancy is only safe
                // to use when the level is not actively being migrated out
                // from under us; otherwise the resizer could drain this
                // bucket before we ever get a chance to copy our write
                // forward, losing it when the bottom level is retired.
                std::thread::sleep(std::time::Duration::from_micros(50));
                continue;
            }

            let offset = entry::write_entry(&self.inner.arena, &key, &value)?;
            // Mark our scratch cell before attempting to publish: if this
            // thread dies between the allocation above and the CAS below,
            // `recover()` finds the offset here unreachable from any level
            // and reclaims it rather than leaking it.
            self.inner.scratch_mark(tid, offset);
            let new_slot = TaggedSlot::new(partial, offset);

            if locator.compare_exchange(TaggedSlot::EMPTY, new_slot).is_ok() {
                self.inner.scratch_clear(tid);
                let now_resizing = self.meta(&guard).is_resizing();
                if is_bottom_vacancy && now_resizing && !was_resizing {
                    // A resize began between our snapshot and this CAS,
                    // and our slot landed in the bottom level: a migration
                    // pass may already have scanned past this bucket, so
                    // our write might never get copied to the new top.
                    // Restart with fix_dup so a racing top-level copy (or
                    // the resizer's own migration) gets reconciled before
                    // we report success.
                    own_write = Some(offset);
                    continue;
                }
                return Ok(InsertResult {
                    found: false,
                    expanded: now_resizing && !was_resizing,
                    capacity: meta.total_capacity(&guard),
                });
            }

            // Lost the race for that slot; the entry we wrote is now
            // unreachable, free it and retry the whole operation.
            self.inner.scratch_clear(tid);
            self.inner.arena.free(offset, entry::encoded_size(&key, &value));
            let _ = attempt;
        }
        Err(ClevelError::Corrupt("insert: exceeded retry budget".into()))
    }

    /// Look up `key`, lock-free.
    pub fn search(&self, key: &K) -> Result<Option<V>, ClevelError> {
        for _ in 0..MAX_RETRIES {
            let guard = epoch::pin();
            let meta = self.meta(&guard);
            let hash = crate::clevel::hashing::hash64(key, &self.inner.build_hasher);
            let partial = crate::clevel::hashing::get_partial(hash);

            match find::find::<K, V>(meta, &self.inner.arena, key, hash, partial, true, &guard)? {
                Some(found) => {
                    let (_k, v): (K, V) = entry::read_entry(&self.inner.arena, found.entry_offset)?;
                    return Ok(Some(v));
                }
                None => {
                    // Context check: if the root has moved on since we
                    // started, a concurrent migrating resize may have
                    // relocated the key; re-snapshot and retry once more
                    // before declaring an authoritative miss (spec.md §4.6).
                    let guard2 = epoch::pin();
                    let meta2 = self.meta(&guard2);
                    if std::ptr::eq(meta as *const LevelMeta, meta2 as *const LevelMeta) {
                        return Ok(None);
                    }
                }
            }
        }
        Err(ClevelError::Corrupt("search: exceeded retry budget".into()))
    }

    /// Replace the value for `key` if present.
    pub fn update(&self, key: K, value: V, tid: usize) -> Result<FoundResult, ClevelError> {
        for _ in 0..MAX_RETRIES {
            let guard = epoch::pin();
            let meta = self.meta(&guard);
            let hash = crate::clevel::hashing::hash64(&key, &self.inner.build_hasher);
            let partial = crate::clevel::hashing::get_partial(hash);

            let Some(found) = find::find::<K, V>(meta, &self.inner.arena, &key, hash, partial, true, &guard)? else {
                return Ok(FoundResult { found: false });
            };

            if in_migration_window(&self.inner, meta, &found.locator, &guard) {
                // The bucket this slot lives in may be mid-migration;
                // re-check context before committing the CAS.
                continue;
            }

            let old_slot = found.locator.load();
            if old_slot.offset() != found.entry_offset {
                continue; // raced with another mutator; retry
            }

            let new_offset = entry::write_entry(&self.inner.arena, &key, &value)?;
            self.inner.scratch_mark(tid, new_offset);
            let new_slot = TaggedSlot::new(partial, new_offset);

            if found.locator.compare_exchange(old_slot, new_slot).is_ok() {
                self.inner.scratch_clear(tid);
                self.inner.arena.free(found.entry_offset, entry::stored_size(&self.inner.arena, found.entry_offset));
                return Ok(FoundResult { found: true });
            }
            self.inner.scratch_clear(tid);
            self.inner.arena.free(new_offset, entry::encoded_size(&key, &value));
        }
        Err(ClevelError::Corrupt("update: exceeded retry budget".into()))
    }

    /// Remove `key` if present.
    ///
    /// `tid` is accepted for API symmetry with `insert`/`update` but unused:
    /// erase never allocates an `Entry`, so there is nothing of this
    /// thread's to track in the per-thread scratch cells.
    pub fn erase(&self, key: &K, _tid: usize) -> Result<FoundResult, ClevelError> {
        for _ in 0..MAX_RETRIES {
            let guard = epoch::pin();
            let meta = self.meta(&guard);
            let hash = crate::clevel::hashing::hash64(key, &self.inner.build_hasher);
            let partial = crate::clevel::hashing::get_partial(hash);

            let Some(found) = find::find::<K, V>(meta, &self.inner.arena, key, hash, partial, true, &guard)? else {
                return Ok(FoundResult { found: false });
            };

            if in_migration_window(&self.inner, meta, &found.locator, &guard) {
                continue;
            }

            let old_slot = found.locator.load();
            if old_slot.offset() != found.entry_offset {
                continue;
            }

            if found.locator.compare_exchange(old_slot, TaggedSlot::EMPTY).is_ok() {
                let size = entry::stored_size(&self.inner.arena, found.entry_offset);
                self.inner.arena.free(found.entry_offset, size);
                return Ok(FoundResult { found: true });
            }
        }
        Err(ClevelError::Corrupt("erase: exceeded retry budget".into()))
    }
}

/// Whether `locator` sits in the bottom level's bucket range the resizer
/// is currently migrating, per spec.md §4.6's context-check requirement on
/// Update/Erase.
fn in_migration_window<K, V, S>(
    inner: &Inner<K, V, S>,
    meta: &LevelMeta,
    locator: &Locator<'_>,
    guard: &epoch::Guard,
) -> bool {
    if !std::ptr::eq(locator.level, meta.last_level(guard)) {
        return false;
    }
    let lo = inner.expand_bucket_old.load(Ordering::Acquire) as usize;
    let hi = inner.expand_bucket.load(Ordering::Acquire) as usize;
    locator.bucket_idx >= lo && locator.bucket_idx <= hi
}
