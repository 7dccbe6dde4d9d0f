//! Hashing and index-derivation helpers.
//!
//! `hash64` follows the teacher's `mph_delta_index::util::hash64` (ahash over
//! `Hash`). The bucket-index formulas (`first_index`/`second_index`/
//! `alt_index`) and the fingerprint extractor (`get_partial`) are ported
//! directly from `clevel_hash.hpp`'s `first_index`/`second_index`/
//! `alt_index`/`h.get_part()` rather than invented, since exact bit-for-bit
//! behavior there determines `alt_index` symmetry (spec.md §8).

use std::hash::{BuildHasher, Hash, Hasher};

use crate::constants::HASH_MIXER;

/// Hash a key with the table's configured `BuildHasher`.
#[inline]
pub fn hash64<K: Hash, S: BuildHasher>(key: &K, build_hasher: &S) -> u64 {
    let mut h = build_hasher.build_hasher();
    key.hash(&mut h);
    h.finish()
}

/// Top 16 bits of the full hash: the per-key partial fingerprint carried in
/// every slot's low bits. Matches `clevel_hash.hpp`'s
/// `key_hash.get_partial() == hv >> (64 - partial_ext_bits)`.
#[inline]
pub fn get_partial(hash: u64) -> u16 {
    (hash >> (64 - 16)) as u16
}

/// A zero partial is reserved to mean "no fingerprint recorded"; OR in the
/// low bit so a real partial is never confused with that sentinel, matching
/// `nonzero(partial) = partial | 1` in `clevel_hash.hpp`.
#[inline]
pub fn nonzero(partial: u16) -> u64 {
    (partial as u64) | 1
}

/// First candidate bucket for a level of `capacity` buckets:
/// `hv % (capacity / 2)`.
#[inline]
pub fn first_index(hash: u64, capacity: usize) -> usize {
    (hash % (capacity as u64 / 2)) as usize
}

/// Second candidate bucket, derived from the first via the MurmurHash2
/// mixer constant, always landing in the upper half `[capacity/2, capacity)`.
#[inline]
pub fn second_index(partial: u16, first_idx: usize, capacity: usize) -> usize {
    let half = capacity as u64 / 2;
    let mixed = (first_idx as u64) ^ nonzero(partial).wrapping_mul(HASH_MIXER);
    (mixed % half) as usize + half as usize
}

/// The "other" bucket for a given `(partial, idx)` pair: if `idx` is in the
/// lower half, returns the corresponding upper-half bucket (same formula as
/// [`second_index`]); if in the upper half, returns the corresponding
/// lower-half bucket. Applying `alt_index` twice returns the original index
/// (spec.md §8 alt-symmetry invariant).
#[inline]
pub fn alt_index(partial: u16, idx: usize, capacity: usize) -> usize {
    let half = capacity as u64 / 2;
    if (idx as u64) < half {
        let mixed = (idx as u64) ^ nonzero(partial).wrapping_mul(HASH_MIXER);
        (mixed % half) as usize + half as usize
    } else {
        let lower_view = idx as u64 - half;
        let mixed = lower_view ^ nonzero(partial).wrapping_mul(HASH_MIXER);
        (mixed % half) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alt_index_is_involution() {
        let capacity = 256usize;
        for partial in [0u16, 1, 7, 255, 65535] {
            for idx in 0..capacity {
                let alt = alt_index(partial, idx, capacity);
                assert!(alt < capacity);
                let back = alt_index(partial, alt, capacity);
                assert_eq!(back, idx, "partial={partial} idx={idx} alt={alt}");
            }
        }
    }

    #[test]
    fn second_index_lands_in_upper_half() {
        let capacity = 128usize;
        for partial in [0u16, 3, 99] {
            for first_idx in 0..capacity / 2 {
                let s = second_index(partial, first_idx, capacity);
                assert!(s >= capacity / 2 && s < capacity);
            }
        }
    }

    #[test]
    fn first_index_within_lower_half() {
        let capacity = 64usize;
        for hash in [0u64, 1, 12345, u64::MAX] {
            let idx = first_index(hash, capacity);
            assert!(idx < capacity / 2);
        }
    }
}
