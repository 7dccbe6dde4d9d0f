//! Immutable `{key, value}` entries, arena-allocated and addressed only by
//! offset (spec.md §3's `Entry`). Encoding is a `u64` length prefix followed
//! by a `bincode` payload, mirroring the teacher's preference for `bincode`
//! as the compact wire format for colocated arena records.

use serde::{de::DeserializeOwned, Serialize};

use crate::arena::Arena;
use crate::types::error::ClevelError;

const LEN_PREFIX: usize = std::mem::size_of::<u64>();

/// Serialize `(key, value)` into the arena and return its offset.
pub fn write_entry<K: Serialize, V: Serialize>(
    arena: &Arena,
    key: &K,
    value: &V,
) -> Result<u64, ClevelError> {
    let payload = bincode::serialize(&(key, value))
        .map_err(|e| ClevelError::Corrupt(format!("entry encode failed: {e}")))?;
    let total = LEN_PREFIX + payload.len();
    let offset = arena.alloc(total)?;
    unsafe {
        let base = arena.direct_mut(offset);
        base.cast::<u64>().write_unaligned(payload.len() as u64);
        std::ptr::copy_nonoverlapping(payload.as_ptr(), base.add(LEN_PREFIX), payload.len());
    }
    arena.persist(offset, total);
    Ok(offset)
}

/// Decode the `(key, value)` entry stored at `offset`.
pub fn read_entry<K: DeserializeOwned, V: DeserializeOwned>(
    arena: &Arena,
    offset: u64,
) -> Result<(K, V), ClevelError> {
    let len = unsafe {
        let base = arena.direct(offset);
        base.cast::<u64>().read_unaligned() as usize
    };
    let bytes = unsafe {
        let base = arena.direct(offset).add(LEN_PREFIX);
        std::slice::from_raw_parts(base, len)
    };
    bincode::deserialize(bytes).map_err(|e| ClevelError::Corrupt(format!("entry decode failed: {e}")))
}

/// Total bytes an encoded `(key, value)` will occupy, used to `free` the
/// right size class.
pub fn encoded_size<K: Serialize, V: Serialize>(key: &K, value: &V) -> usize {
    LEN_PREFIX
        + bincode::serialized_size(&(key, value)).unwrap_or(0) as usize
}

/// Total bytes occupied by the entry already stored at `offset`, read back
/// from its length prefix. Used to `free` an entry whose original
/// `(key, value)` is no longer in hand (e.g. during erase).
pub fn stored_size(arena: &Arena, offset: u64) -> usize {
    let len = unsafe {
        let base = arena.direct(offset);
        base.cast::<u64>().read_unaligned() as usize
    };
    LEN_PREFIX + len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips() {
        let arena = Arena::new_anonymous(4096).unwrap();
        let offset = write_entry(&arena, &"hello".to_string(), &42u32).unwrap();
        let (k, v): (String, u32) = read_entry(&arena, offset).unwrap();
        assert_eq!(k, "hello");
        assert_eq!(v, 42);
    }
}
