//! `ClevelHash<K, V, S>`: the public table type and its constructor/shutdown
//! lifecycle. Mutators live in `mutators.rs`, the resizer in `resizer.rs`;
//! this file owns the shared state both sides touch.
//!
//! The background-resizer-thread lifecycle (`Arc`-shared inner state,
//! `AtomicBool` shutdown flag, `JoinHandle` joined on `Drop`) is grounded on
//! `massive-graph-core::structures::segmented_stream::StreamPagePool`'s
//! `with_recycler` background thread, generalized from an unbounded loop to
//! a shutdown-checked one.

use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_epoch::{self as epoch, Atomic};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::arena::Arena;
use crate::clevel::level_meta::{self, LevelMeta};
use crate::core::config::Config;
use crate::types::error::ClevelError;

/// Shared state reachable from both `ClevelHash` itself and its background
/// resizer thread.
pub(crate) struct Inner<K, V, S> {
    pub(crate) arena: Arena,
    pub(crate) root: Atomic<LevelMeta>,
    pub(crate) build_hasher: S,
    /// Bucket index of the bottom level the resizer has migrated up to.
    pub(crate) expand_bucket: AtomicU64,
    /// Low edge of the in-flight migration window; mutators must re-check
    /// context if their target bucket falls in
    /// `[expand_bucket_old, expand_bucket]` (spec.md §4.6).
    pub(crate) expand_bucket_old: AtomicU64,
    pub(crate) resize_bulk: usize,
    pub(crate) thread_count: std::sync::atomic::AtomicUsize,
    pub(crate) shutdown: AtomicBool,
    /// Per-thread scratch cells (spec.md §3 Lifecycle, §5 "Per-thread
    /// resources"): while a mutator has allocated an `Entry` but has not
    /// yet published it into a slot, its offset lives here keyed by `tid`,
    /// so a crash between the allocation and the publishing CAS leaves a
    /// trail `recover()` can use to reclaim the orphaned allocation, the
    /// way `clevel_hash.hpp`'s per-thread scratch array backs its own
    /// recovery path. Keyed by `tid` rather than sized to `thread_count`
    /// since callers are free to pass any `tid` value; `dashmap` already
    /// backs the arena's own free lists, same crate, same shape.
    pub(crate) scratch: DashMap<usize, AtomicU64>,
    pub(crate) _pd: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S> Inner<K, V, S> {
    /// Record that thread `tid` is about to attempt publishing the entry at
    /// `offset`, before the CAS that would make it reachable.
    pub(crate) fn scratch_mark(&self, tid: usize, offset: u64) {
        self.scratch
            .entry(tid)
            .or_insert_with(|| AtomicU64::new(0))
            .store(offset, Ordering::Release);
    }

    /// Clear thread `tid`'s scratch cell once its in-flight allocation is
    /// either reachable (CAS won) or freed (CAS lost).
    pub(crate) fn scratch_clear(&self, tid: usize) {
        if let Some(cell) = self.scratch.get(&tid) {
            cell.store(0, Ordering::Release);
        }
    }
}

/// A lock-free, crash-consistent, dynamically resizable persistent-memory
/// hash index.
pub struct ClevelHash<K, V, S = ahash::RandomState> {
    pub(crate) inner: Arc<Inner<K, V, S>>,
    resizer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> ClevelHash<K, V, ahash::RandomState>
where
    K: Eq + Hash + Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Build a table with an in-memory (non-file-backed) arena and the
    /// default `ahash` hasher, per `config`.
    pub fn new(config: Config) -> Result<Self, ClevelError> {
        Self::with_hasher(config, ahash::RandomState::new())
    }

    /// Build a table whose arena is backed by `path`, so its entries persist
    /// across process restarts.
    pub fn open(config: Config, path: PathBuf) -> Result<Self, ClevelError> {
        Self::with_hasher_and_arena_path(config, ahash::RandomState::new(), Some(path))
    }
}

impl<K, V, S> ClevelHash<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Build a table with a caller-supplied hasher.
    pub fn with_hasher(config: Config, build_hasher: S) -> Result<Self, ClevelError> {
        Self::with_hasher_and_arena_path(config, build_hasher, None)
    }

    fn with_hasher_and_arena_path(
        config: Config,
        build_hasher: S,
        arena_path: Option<PathBuf>,
    ) -> Result<Self, ClevelError> {
        config.validate()?;
        let path = arena_path.or_else(|| config.arena_path.clone());
        let arena = match path {
            Some(p) => Arena::new_file_backed(&p, config.region_size)?,
            None => Arena::new_anonymous(config.region_size)?,
        };

        let meta = level_meta::bootstrap(config.initial_capacity());
        let root = Atomic::new(meta);

        let inner = Arc::new(Inner {
            arena,
            root,
            build_hasher,
            expand_bucket: AtomicU64::new(0),
            expand_bucket_old: AtomicU64::new(0),
            resize_bulk: config.resize_bulk,
            thread_count: std::sync::atomic::AtomicUsize::new(config.thread_count),
            shutdown: AtomicBool::new(false),
            scratch: DashMap::new(),
            _pd: PhantomData,
        });

        let handle = crate::clevel::resizer::spawn(Arc::clone(&inner));

        Ok(ClevelHash {
            inner,
            resizer_handle: Mutex::new(Some(handle)),
        })
    }

    /// Total slot capacity across every currently published level.
    pub fn capacity(&self) -> u64 {
        let guard = epoch::pin();
        let meta = self.meta(&guard);
        meta.total_capacity(&guard)
    }

    /// Adjust the table's notion of how many mutator threads are active.
    /// Informational only: it does not resize any level, just the hint the
    /// resizer and future diagnostics use.
    pub fn set_thread_count(&self, n: usize) {
        self.inner.thread_count.store(n.max(1), Ordering::Relaxed);
    }

    pub(crate) fn meta<'g>(&self, guard: &'g epoch::Guard) -> &'g LevelMeta {
        unsafe {
            self.inner
                .root
                .load(Ordering::Acquire, guard)
                .deref()
        }
    }

    #[cfg(test)]
    pub(crate) fn arena(&self) -> &Arena {
        &self.inner.arena
    }

    /// Debug-only introspection: decode the `(key, value)` stored at a
    /// specific `(level, bucket, slot)` locator, counting levels from the
    /// bottom (0 = `last_level`). Mirrors `clevel_hash.hpp`'s `get_entry`,
    /// used by its CLI harness; kept here only for tests since this crate
    /// excludes CLI harnesses themselves.
    #[cfg(test)]
    pub(crate) fn get_entry(&self, level: usize, bucket: usize, slot: usize) -> Option<(K, V)> {
        let guard = epoch::pin();
        let meta = self.meta(&guard);
        let mut current = meta.last_level(&guard);
        for _ in 0..level {
            current = current.up(&guard)?;
        }
        let cell = current.bucket(bucket).slot(slot);
        let value = cell.load(Ordering::Acquire);
        if value.is_empty() {
            return None;
        }
        crate::clevel::entry::read_entry(&self.inner.arena, value.offset()).ok()
    }

    /// Debug-only introspection: the key stored at a `(level, bucket, slot)`
    /// locator, without decoding the value. Mirrors `clevel_hash.hpp`'s
    /// `get_key`.
    #[cfg(test)]
    pub(crate) fn get_key(&self, level: usize, bucket: usize, slot: usize) -> Option<K> {
        self.get_entry(level, bucket, slot).map(|(k, _)| k)
    }
}

impl<K, V, S> Drop for ClevelHash<K, V, S> {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.resizer_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
