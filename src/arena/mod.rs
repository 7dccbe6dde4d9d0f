//! Arena: an opaque, offset-addressed allocator backing every Clevel
//! structure (entries, levels, level-meta, buckets).
//!
//! Generalizes the teacher's region-chained bump allocator
//! (`mph_delta_index::arena::Arena`) from process-local pointers to
//! persistence-flavored 64-bit offsets into a single memory-mapped region,
//! since every Clevel slot stores an *offset*, never a raw pointer, so that
//! the table can in principle be reopened from the same backing file.
//!
//! `alloc`/`free`/`persist`/`drain`/`direct` match the contract spec.md §6
//! assigns to the arena collaborator; this module is the one place
//! SPEC_FULL.md supplies a concrete implementation for what the data model
//! otherwise treats as an opaque dependency (see SPEC_FULL.md §5.1).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;
use dashmap::DashSet;
use memmap2::MmapMut;
use uuid::Uuid;

use crate::types::error::ClevelError;

/// A 16-byte persistent object identifier: which pool, and where in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid {
    /// Identifies the backing arena/pool this offset belongs to.
    pub uuid: Uuid,
    /// Byte offset within the pool.
    pub offset: u64,
}

impl Oid {
    /// The null OID: offset zero never holds an allocation.
    pub const NULL: u64 = 0;
}

/// Allocation statistics, exposed for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ArenaStats {
    /// Bytes bump-allocated so far (including freed-and-reused bytes).
    pub bytes_allocated: usize,
    /// Count of `alloc` calls that returned a fresh offset rather than a
    /// recycled one.
    pub num_allocations: usize,
    /// Count of `free` calls that actually released an offset (excludes
    /// double-frees, which are no-ops).
    pub num_freed: usize,
}

/// Offset-addressed bump allocator over a single memory-mapped region.
///
/// Unlike the teacher's `Arena`, which chains regions to grow without
/// bound, this arena is fixed-size: its capacity is the caller-chosen
/// `region_size`, and exhaustion surfaces as
/// [`ClevelError::AllocatorFull`] rather than an OS allocation. This
/// matches spec.md §7: allocator exhaustion is a *user-visible*, fully
/// recoverable error, not a process abort.
pub struct Arena {
    /// This pool's identity, carried in every [`Oid`] it mints.
    pub pool_uuid: Uuid,
    mmap: MmapMut,
    region_size: u64,
    /// Next unused byte offset. Offset 0 is reserved as "empty"/null.
    bump: AtomicU64,
    /// Per-size free lists of offsets released by `free`, so that reuse is
    /// possible within the same fixed region instead of only ever bumping
    /// forward.
    free_lists: dashmap::DashMap<usize, SegQueue<u64>>,
    /// Guards against double-free: an offset already in here is ignored by
    /// a second `free` call, per spec.md §6's idempotence requirement.
    freed: DashSet<u64>,
    bytes_allocated: AtomicUsize,
    num_allocations: AtomicUsize,
    num_freed: AtomicUsize,
}

const ALIGN: u64 = 8;

impl Arena {
    /// Create a new anonymous (non-file-backed) arena of `region_size`
    /// bytes. Suitable for tests and for tables that do not need to survive
    /// a process restart.
    pub fn new_anonymous(region_size: usize) -> Result<Self, ClevelError> {
        let mmap = MmapMut::map_anon(region_size)?;
        Ok(Self::from_mmap(mmap, region_size))
    }

    /// Create (or reopen) a file-backed arena of `region_size` bytes.
    pub fn new_file_backed(path: &std::path::Path, region_size: usize) -> Result<Self, ClevelError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(region_size as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self::from_mmap(mmap, region_size))
    }

    fn from_mmap(mmap: MmapMut, region_size: usize) -> Self {
        Self {
            pool_uuid: Uuid::new_v4(),
            mmap,
            region_size: region_size as u64,
            // offset 0 means "empty"; start the bump pointer at ALIGN so a
            // real allocation never lands there.
            bump: AtomicU64::new(ALIGN),
            free_lists: dashmap::DashMap::new(),
            freed: DashSet::new(),
            bytes_allocated: AtomicUsize::new(0),
            num_allocations: AtomicUsize::new(0),
            num_freed: AtomicUsize::new(0),
        }
    }

    /// Allocate `size` bytes, 8-byte aligned, returning its offset.
    ///
    /// First tries a freed offset of the same size class; falls back to
    /// bumping the arena's tail. Returns [`ClevelError::AllocatorFull`] when
    /// neither succeeds, leaving arena state unchanged.
    pub fn alloc(&self, size: usize) -> Result<u64, ClevelError> {
        if let Some(queue) = self.free_lists.get(&size) {
            if let Some(offset) = queue.pop() {
                self.freed.remove(&offset);
                return Ok(offset);
            }
        }

        let aligned_size = align_up(size as u64, ALIGN);
        loop {
            let current = self.bump.load(Ordering::Acquire);
            let new_bump = current + aligned_size;
            if new_bump > self.region_size {
                crate::log_warn!(
                    "arena {} exhausted: requested {} bytes, {} remaining",
                    self.pool_uuid,
                    size,
                    self.region_size.saturating_sub(current)
                );
                return Err(ClevelError::AllocatorFull);
            }
            if self
                .bump
                .compare_exchange(current, new_bump, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.bytes_allocated.fetch_add(size, Ordering::Relaxed);
                self.num_allocations.fetch_add(1, Ordering::Relaxed);
                return Ok(current);
            }
        }
    }

    /// Release `offset` (of `size` bytes) back to its size-class free list.
    /// Idempotent: freeing an already-freed (or never-allocated-by-us)
    /// offset a second time is a no-op, tolerating the double-free a crash
    /// mid-recovery can otherwise produce (spec.md §6, §7).
    pub fn free(&self, offset: u64, size: usize) {
        if offset == Oid::NULL {
            return;
        }
        if !self.freed.insert(offset) {
            // already freed; idempotent no-op
            return;
        }
        self.num_freed.fetch_add(1, Ordering::Relaxed);
        self.free_lists
            .entry(size)
            .or_insert_with(SegQueue::new)
            .push(offset);
    }

    /// Translate an offset to a raw pointer into the mapped region.
    ///
    /// # Safety
    /// The caller must ensure `offset + len` stays within the region and
    /// that the resulting pointer's use obeys Rust's aliasing rules; this
    /// is the one place raw pointers are allowed to exist, and they must
    /// never be persisted or sent across the API boundary (spec.md §6).
    pub unsafe fn direct(&self, offset: u64) -> *const u8 {
        self.mmap.as_ptr().add(offset as usize)
    }

    /// Mutable translation, for writers that just allocated `offset`.
    ///
    /// # Safety
    /// See [`Arena::direct`].
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn direct_mut(&self, offset: u64) -> *mut u8 {
        self.mmap.as_ptr().add(offset as usize) as *mut u8
    }

    /// Flush the cache lines covering `[offset, offset + len)` to the
    /// backing store. On commodity mmap (no real persistent-memory
    /// hardware available to this crate) this is `msync`-equivalent rather
    /// than a `clwb`; see SPEC_FULL.md §5.1.
    pub fn persist(&self, offset: u64, len: usize) {
        if let Err(e) = self.mmap.flush_range(offset as usize, len) {
            crate::log_error!("arena persist({}, {}) failed: {}", offset, len, e);
        }
    }

    /// Durability barrier: every `persist` issued before this call is
    /// guaranteed ordered before any issued after it returns.
    pub fn drain(&self) {
        std::sync::atomic::fence(Ordering::SeqCst);
    }

    /// Snapshot of allocation counters.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            num_allocations: self.num_allocations.load(Ordering::Relaxed),
            num_freed: self.num_freed.load(Ordering::Relaxed),
        }
    }

    /// Mint an [`Oid`] for `offset` in this arena.
    pub fn oid(&self, offset: u64) -> Oid {
        Oid {
            uuid: self.pool_uuid,
            offset,
        }
    }
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

#[inline]
fn align_up(size: u64, align: u64) -> u64 {
    (size + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocations_are_disjoint() {
        let arena = Arena::new_anonymous(4096).unwrap();
        let a = arena.alloc(32).unwrap();
        let b = arena.alloc(32).unwrap();
        assert_ne!(a, b);
        assert!(a >= 8);
    }

    #[test]
    fn exhaustion_surfaces_allocator_full() {
        let arena = Arena::new_anonymous(64).unwrap();
        assert!(arena.alloc(32).is_ok());
        assert!(arena.alloc(32).is_ok());
        match arena.alloc(32) {
            Err(ClevelError::AllocatorFull) => {}
            other => panic!("expected AllocatorFull, got {other:?}"),
        }
    }

    #[test]
    fn free_is_idempotent_and_recycles() {
        let arena = Arena::new_anonymous(4096).unwrap();
        let a = arena.alloc(32).unwrap();
        arena.free(a, 32);
        arena.free(a, 32); // must not panic or double-count
        assert_eq!(arena.stats().num_freed, 1);
        let b = arena.alloc(32).unwrap();
        assert_eq!(a, b); // recycled
    }

    #[test]
    fn direct_round_trips_writes() {
        let arena = Arena::new_anonymous(4096).unwrap();
        let off = arena.alloc(8).unwrap();
        unsafe {
            let ptr = arena.direct_mut(off);
            ptr.write(0xAB);
        }
        unsafe {
            assert_eq!(*arena.direct(off), 0xAB);
        }
    }
}
