//! `LevelMeta`: the sole externally observable root (spec.md §3). Immutable
//! after publication; replaced wholesale by allocating a new `LevelMeta`,
//! CAS-swapping it into the table's root, and retiring the old one once the
//! epoch guarantees no reader still holds it — the same publish-swap-retire
//! shape `skytable-skytable`'s `mtchm::RawTree::compress` uses for its own
//! node-graph compaction.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Shared};

use crate::clevel::level::Level;

/// `first_level` is the newest (largest) level; `last_level` is the oldest
/// (smallest), and the unique owning entry point into the whole `up` chain:
/// freeing a level chain means walking from `last_level` forward.
pub struct LevelMeta {
    first_level: Atomic<Level>,
    last_level: Atomic<Level>,
    is_resizing: AtomicBool,
}

impl LevelMeta {
    /// Construct a new, published `LevelMeta` snapshot.
    pub fn new(first_level: Shared<'_, Level>, last_level: Shared<'_, Level>, is_resizing: bool) -> Self {
        let meta = LevelMeta {
            first_level: Atomic::null(),
            last_level: Atomic::null(),
            is_resizing: AtomicBool::new(is_resizing),
        };
        meta.first_level.store(first_level, Ordering::Release);
        meta.last_level.store(last_level, Ordering::Release);
        meta
    }

    /// The newest (largest) level.
    pub fn first_level<'g>(&self, guard: &'g Guard) -> &'g Level {
        unsafe {
            self.first_level
                .load(Ordering::Acquire, guard)
                .deref()
        }
    }

    /// The oldest (smallest) level.
    pub fn last_level<'g>(&self, guard: &'g Guard) -> &'g Level {
        unsafe {
            self.last_level
                .load(Ordering::Acquire, guard)
                .deref()
        }
    }

    /// Raw `Shared` to the last (bottom) level, for callers that need to
    /// retire it rather than merely read through it.
    pub fn last_level_shared<'g>(&self, guard: &'g Guard) -> Shared<'g, Level> {
        self.last_level.load(Ordering::Acquire, guard)
    }

    /// Raw `Shared` to the first (top) level.
    pub fn first_level_shared<'g>(&self, guard: &'g Guard) -> Shared<'g, Level> {
        self.first_level.load(Ordering::Acquire, guard)
    }

    /// Whether a resize is currently in flight: at least one level beyond
    /// the initial two exists and migration has not yet completed.
    pub fn is_resizing(&self) -> bool {
        self.is_resizing.load(Ordering::Acquire)
    }

    /// Total slot capacity across every level in the chain, from `last` up
    /// to `first`: `sum(capacity * ASSOC)`. Ported from `clevel_hash.hpp`'s
    /// `capacity()`, which walks the same `up` chain.
    pub fn total_capacity(&self, guard: &Guard) -> u64 {
        let mut total = 0u64;
        let mut current = self.last_level_shared(guard);
        while !current.is_null() {
            let level = unsafe { current.deref() };
            total += (level.capacity() * crate::constants::ASSOC) as u64;
            current = level.up.load(Ordering::Acquire, guard);
        }
        total
    }
}

/// Total slot capacity of a published `LevelMeta`, ported verbatim from
/// `clevel_hash.hpp`'s `capacity()` walk as a free function usable without a
/// live `ClevelHash` (e.g. from a recovery pass holding only a root meta).
pub fn capacity_of(meta: &LevelMeta, guard: &Guard) -> u64 {
    meta.total_capacity(guard)
}

/// Allocate and pin the two-level bootstrap `LevelMeta` a fresh table
/// starts with: a bottom level of `initial_capacity / 2` buckets and a top
/// level of `initial_capacity` buckets, already linked via `up`.
pub fn bootstrap(initial_capacity: usize) -> LevelMeta {
    let guard = epoch::pin();
    let bottom_capacity = (initial_capacity / 2).max(2);
    let bottom = Level::new(bottom_capacity);
    let top = Level::new(initial_capacity);
    bottom
        .try_install_up(top)
        .unwrap_or_else(|_| unreachable!("fresh level cannot already have an up link"));

    let bottom_owned = crossbeam_epoch::Owned::new(bottom);
    let bottom_shared = bottom_owned.into_shared(&guard);
    let top_shared = unsafe { bottom_shared.deref() }
        .up
        .load(Ordering::Acquire, &guard);

    LevelMeta::new(top_shared, bottom_shared, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_links_two_levels() {
        let guard = epoch::pin();
        let meta = bootstrap(16);
        assert_eq!(meta.first_level(&guard).capacity(), 16);
        assert_eq!(meta.last_level(&guard).capacity(), 8);
        assert!(!meta.is_resizing());
        assert_eq!(meta.total_capacity(&guard), (16 + 8) as u64 * crate::constants::ASSOC as u64);
    }
}
