//! Fixed-associativity bucket: `ASSOC` slots, no per-bucket lock. All
//! coordination is per-slot CAS, matching spec.md §4.2 ("no per-bucket
//! lock, pure per-slot CAS coordination").

use crate::clevel::slot::{AtomicSlot, TaggedSlot};
use crate::constants::ASSOC;

/// A bucket of `ASSOC` atomic slots.
pub struct Bucket {
    slots: [AtomicSlot; ASSOC],
}

impl Bucket {
    /// A freshly initialized, all-empty bucket.
    pub fn empty() -> Self {
        Bucket {
            slots: std::array::from_fn(|_| AtomicSlot::empty()),
        }
    }

    /// The fixed number of slots per bucket.
    #[inline]
    pub fn assoc(&self) -> usize {
        self.slots.len()
    }

    /// Access slot `i`.
    #[inline]
    pub fn slot(&self, i: usize) -> &AtomicSlot {
        &self.slots[i]
    }

    /// Count of occupied slots, used to break empty-slot ties in favor of
    /// the less-loaded bucket (spec.md §4.5 Find protocol).
    pub fn load(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !s.load(std::sync::atomic::Ordering::Acquire).is_empty())
            .count()
    }

    /// Iterate `(index, slot value)` for every slot.
    pub fn iter(&self) -> impl Iterator<Item = (usize, TaggedSlot)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.load(std::sync::atomic::Ordering::Acquire)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bucket_has_zero_load() {
        let b = Bucket::empty();
        assert_eq!(b.load(), 0);
        assert_eq!(b.assoc(), ASSOC);
    }

    #[test]
    fn load_counts_occupied_slots() {
        let b = Bucket::empty();
        b.slot(0)
            .compare_exchange(TaggedSlot::EMPTY, TaggedSlot::new(1, 64))
            .unwrap();
        assert_eq!(b.load(), 1);
    }
}
