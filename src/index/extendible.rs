//! # Extendible Hash Table
//!
//! A dynamic-hashing associative map used as the page-id-to-frame lookup
//! index of a buffer pool. The table grows by splitting individual buckets;
//! the directory of bucket references doubles only when a splitting bucket
//! is already at the directory's resolution.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                 ExtendibleTable (global_depth = 2)               │
//!   │                                                                  │
//!   │   Directory (2^global_depth slots)        Bucket arena           │
//!   │   ─────────────────────────────────       ──────────────         │
//!   │                                                                  │
//!   │   slot 00 ──────────────────────────────▶ bucket 0 (depth 2)     │
//!   │   slot 01 ──────────────┐                                        │
//!   │   slot 10 ──────────────┼───────────────▶ bucket 2 (depth 2)     │
//!   │   slot 11 ──────────────┴───────────────▶ bucket 1 (depth 1)     │
//!   │                                                                  │
//!   │   A bucket with local depth d is referenced by exactly           │
//!   │   2^(global_depth − d) slots, all sharing their low d bits.      │
//!   │                                                                  │
//!   │   index_of(key) = hash(key) & (2^global_depth − 1)               │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Buckets live in an append-only arena (`Vec<Bucket>`); directory slots
//! store arena indices, so slot aliasing is plain index equality and no
//! reference counting is needed. Buckets are never merged or freed — the
//! table does not shrink.
//!
//! ## Key Components
//!
//! | Component                    | Description                                |
//! |------------------------------|--------------------------------------------|
//! | `ExtendibleTable<K, V, S>`   | Single-threaded core                       |
//! | `ConcurrentExtendibleTable`  | Thread-safe wrapper (one mutex)            |
//! | `TableMetrics`               | Snapshot of operation counters             |
//!
//! ## Core Operations
//!
//! | Method          | Complexity | Description                               |
//! |-----------------|------------|-------------------------------------------|
//! | `find` / `get`  | O(b)       | Lookup within one bucket of ≤ b entries   |
//! | `insert`        | O(b)*      | Upsert; may split and/or double directory |
//! | `remove`        | O(b)       | Delete; never merges or shrinks           |
//! | `global_depth`  | O(1)       | Directory resolution in bits              |
//! | `local_depth`   | O(1)       | Resolution of the bucket behind a slot    |
//! | `num_buckets`   | O(1)       | Distinct buckets referenced               |
//!
//! *An insert into a full bucket loops: double the directory if needed,
//! split, redistribute, retry. A degenerate hash can drive `global_depth`
//! arbitrarily high, but the loop terminates for any finite working set as
//! long as the bucket capacity is at least 1.
//!
//! ## Hashing
//!
//! The table is generic over `S: BuildHasher` (default
//! [`FxBuildHasher`](rustc_hash::FxBuildHasher)), and routes a key through
//! the low `global_depth` bits of its hash. The hash must be a pure,
//! deterministic function of the key's logical value; `FxHasher` is, and is
//! the hasher the rest of this crate uses. Tests inject an identity hasher
//! through [`with_hasher`](ExtendibleTable::with_hasher) to force collision
//! patterns.
//!
//! ## Example Usage
//!
//! ```
//! use framekit::index::ConcurrentExtendibleTable;
//!
//! let table: ConcurrentExtendibleTable<u64, usize> = ConcurrentExtendibleTable::new(4);
//!
//! table.insert(42, 7);       // page 42 lives in frame 7
//! assert_eq!(table.find(&42), Some(7));
//!
//! table.insert(42, 9);       // relocated: overwrite in place
//! assert_eq!(table.find(&42), Some(9));
//!
//! assert!(table.remove(&42));
//! assert_eq!(table.find(&42), None);
//! ```
//!
//! ## Thread Safety
//!
//! - `ExtendibleTable` is **NOT** thread-safe.
//! - `ConcurrentExtendibleTable` serializes every public operation, the
//!   observational getters included, behind a single `parking_lot::Mutex`;
//!   callers rely on coherent reads of depth and count together.
//!
//! ## Academic Reference
//!
//! Fagin, R., Nievergelt, J., Pippenger, N., & Strong, H. R. (1979).
//! "Extendible hashing — a fast access method for dynamic files."
//! ACM Transactions on Database Systems, 4(3), 315-344.

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};

use crate::error::{ConfigError, InvariantError};
use crate::traits::FrameIndex;

// =============================================================================
// Metrics counters
// =============================================================================

/// Snapshot of table operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableMetrics {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub updates: u64,
    pub removes: u64,
    pub splits: u64,
    pub directory_doublings: u64,
}

/// Table counters using atomics so lookups can record through `&self`.
#[derive(Debug, Default)]
struct TableCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    removes: AtomicU64,
    splits: AtomicU64,
    directory_doublings: AtomicU64,
}

impl TableCounters {
    fn snapshot(&self) -> TableMetrics {
        TableMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            directory_doublings: self.directory_doublings.load(Ordering::Relaxed),
        }
    }

    fn inc_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_split(&self) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_directory_doubling(&self) {
        self.directory_doublings.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Bucket
// =============================================================================

/// Outcome of a bounded bucket upsert.
enum BucketInsert<K, V> {
    /// A new entry was added.
    Inserted,
    /// An existing entry's value was overwritten.
    Updated,
    /// The bucket is full and the key is new; the pair is handed back.
    Full(K, V),
}

/// One bucket: at most `bucket_capacity` entries with unique keys, plus the
/// number of hash bits that distinguish it.
struct Bucket<K, V> {
    entries: Vec<(K, V)>,
    local_depth: usize,
}

impl<K, V> Bucket<K, V>
where
    K: Eq,
{
    fn new(capacity: usize, local_depth: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            local_depth,
        }
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Updates in place if `key` is present (even when full), inserts if
    /// there is room, hands the pair back otherwise.
    fn try_upsert(&mut self, key: K, value: V, capacity: usize) -> BucketInsert<K, V> {
        if let Some((_, v)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            *v = value;
            return BucketInsert::Updated;
        }
        if self.entries.len() >= capacity {
            return BucketInsert::Full(key, value);
        }
        self.entries.push((key, value));
        BucketInsert::Inserted
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.entries.iter().position(|(k, _)| k == key) {
            Some(idx) => {
                self.entries.swap_remove(idx);
                true
            },
            None => false,
        }
    }
}

// =============================================================================
// Single-threaded ExtendibleTable
// =============================================================================

/// Single-threaded extendible hash table core.
///
/// Maps keys to values through a directory of `2^global_depth` slots, each
/// referencing a bucket of at most `bucket_capacity` entries. Splits are
/// local: only the overflowing bucket is rewritten, and the directory
/// doubles only when that bucket's resolution already equals the
/// directory's.
///
/// # Type Parameters
///
/// - `K`: Key type, `Eq + Hash`
/// - `V`: Value type; handed out by clone from lookups
/// - `S`: Hasher, `BuildHasher` (default `FxBuildHasher`)
///
/// # Example
///
/// ```
/// use framekit::index::ExtendibleTable;
///
/// let mut table: ExtendibleTable<u64, u64> = ExtendibleTable::new(2);
///
/// for page in 0..16u64 {
///     table.insert(page, page * 10);
/// }
///
/// assert_eq!(table.len(), 16);
/// assert_eq!(table.find(&3), Some(30));
/// assert!(table.num_buckets() > 1);
/// table.check_invariants().unwrap();
/// ```
pub struct ExtendibleTable<K, V, S = FxBuildHasher> {
    hasher: S,
    bucket_capacity: usize,
    global_depth: usize,
    /// Directory of arena indices; length is always `2^global_depth`.
    dir: Vec<usize>,
    /// Append-only bucket arena. Never shrinks; every bucket stays
    /// referenced by at least one directory slot.
    buckets: Vec<Bucket<K, V>>,
    len: usize,
    metrics: TableCounters,
}

impl<K, V> ExtendibleTable<K, V, FxBuildHasher>
where
    K: Eq + Hash,
{
    /// Creates a table whose buckets hold at most `bucket_capacity` entries.
    ///
    /// A `bucket_capacity` of 0 is clamped to 1; use
    /// [`try_new`](Self::try_new) to reject it instead.
    pub fn new(bucket_capacity: usize) -> Self {
        Self::with_hasher(bucket_capacity, FxBuildHasher::default())
    }

    /// Fallible constructor for user-configurable parameters.
    ///
    /// # Example
    ///
    /// ```
    /// use framekit::index::ExtendibleTable;
    ///
    /// assert!(ExtendibleTable::<u64, u64>::try_new(4).is_ok());
    /// assert!(ExtendibleTable::<u64, u64>::try_new(0).is_err());
    /// ```
    pub fn try_new(bucket_capacity: usize) -> Result<Self, ConfigError> {
        if bucket_capacity == 0 {
            return Err(ConfigError::new("bucket_capacity must be at least 1"));
        }
        Ok(Self::new(bucket_capacity))
    }
}

impl<K, V, S> ExtendibleTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Creates a table with a custom hasher.
    ///
    /// The hasher must be a pure, deterministic function of the key's
    /// logical value: the low `global_depth` bits of the hash select a
    /// directory slot, and a key hashed differently on re-lookup would
    /// simply go missing.
    pub fn with_hasher(bucket_capacity: usize, hasher: S) -> Self {
        let bucket_capacity = bucket_capacity.max(1);
        Self {
            hasher,
            bucket_capacity,
            global_depth: 0,
            dir: vec![0],
            buckets: vec![Bucket::new(bucket_capacity, 0)],
            len: 0,
            metrics: TableCounters::default(),
        }
    }

    /// Directory slot for `key` at the current global depth.
    #[inline]
    fn slot_of(&self, key: &K) -> usize {
        let mask = (1usize << self.global_depth) - 1;
        (self.hasher.hash_one(key) as usize) & mask
    }

    /// Fetches a reference to the value for `key`, if present.
    pub fn get(&self, key: &K) -> Option<&V> {
        match self.buckets[self.dir[self.slot_of(key)]].get(key) {
            Some(value) => {
                self.metrics.inc_hit();
                Some(value)
            },
            None => {
                self.metrics.inc_miss();
                None
            },
        }
    }

    /// Returns a clone of the value for `key`, if present.
    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.get(key).cloned()
    }

    /// Returns whether `key` is present. Does not touch metrics.
    pub fn contains(&self, key: &K) -> bool {
        self.buckets[self.dir[self.slot_of(key)]].get(key).is_some()
    }

    /// Inserts `value` under `key`, overwriting any existing value.
    ///
    /// An insert that updates an existing key never splits, even when the
    /// bucket is full. A fresh insert into a full bucket splits that bucket
    /// (doubling the directory first when the bucket's local depth equals
    /// the global depth) and retries until the key finds room; with a
    /// pathological hash this can repeat several times, raising
    /// `global_depth` as far as it must go.
    pub fn insert(&mut self, key: K, value: V) {
        let mut pending = (key, value);
        loop {
            let bucket_idx = self.dir[self.slot_of(&pending.0)];
            match self.buckets[bucket_idx].try_upsert(pending.0, pending.1, self.bucket_capacity) {
                BucketInsert::Inserted => {
                    self.len += 1;
                    self.metrics.inc_insert();
                    return;
                },
                BucketInsert::Updated => {
                    self.metrics.inc_update();
                    return;
                },
                BucketInsert::Full(k, v) => {
                    pending = (k, v);
                    self.split(bucket_idx);
                },
            }
        }
    }

    /// Splits `bucket_idx` in two, raising its local depth by one.
    ///
    /// Doubles the directory first if the bucket is already at directory
    /// resolution. Of the slots referencing the bucket, those with the new
    /// depth bit set are rebound to the new bucket; entries are then
    /// redistributed to wherever the directory now routes them.
    fn split(&mut self, bucket_idx: usize) {
        if self.buckets[bucket_idx].local_depth == self.global_depth {
            self.dir.extend_from_within(..);
            self.global_depth += 1;
            self.metrics.inc_directory_doubling();
        }

        let new_depth = self.buckets[bucket_idx].local_depth + 1;
        self.buckets[bucket_idx].local_depth = new_depth;
        let new_idx = self.buckets.len();
        self.buckets.push(Bucket::new(self.bucket_capacity, new_depth));

        // Slots referencing the old bucket already share their low
        // (new_depth − 1) bits; the new bit decides which half rebinds.
        let high_bit = 1usize << (new_depth - 1);
        for slot in 0..self.dir.len() {
            if self.dir[slot] == bucket_idx && slot & high_bit != 0 {
                self.dir[slot] = new_idx;
            }
        }

        // Collect-then-route: every drained entry lands in one of the two
        // buckets, so no bucket exceeds its capacity here.
        let drained = std::mem::take(&mut self.buckets[bucket_idx].entries);
        for (k, v) in drained {
            let target = self.dir[self.slot_of(&k)];
            self.buckets[target].entries.push((k, v));
        }

        self.metrics.inc_split();
    }

    /// Removes the entry for `key`. Returns whether it existed.
    ///
    /// Buckets are never merged and the directory never shrinks.
    pub fn remove(&mut self, key: &K) -> bool {
        let bucket_idx = self.dir[self.slot_of(key)];
        let removed = self.buckets[bucket_idx].remove(key);
        if removed {
            self.len -= 1;
            self.metrics.inc_remove();
        }
        removed
    }

    /// Returns the number of hash bits the directory resolves.
    #[inline]
    pub fn global_depth(&self) -> usize {
        self.global_depth
    }

    /// Returns the local depth of the bucket behind directory slot
    /// `dir_index`.
    ///
    /// # Panics
    ///
    /// Panics if `dir_index >= 2^global_depth`.
    #[inline]
    pub fn local_depth(&self, dir_index: usize) -> usize {
        self.buckets[self.dir[dir_index]].local_depth
    }

    /// Returns the number of distinct buckets referenced by the directory.
    #[inline]
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the number of entries in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the table holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the per-bucket entry capacity.
    #[inline]
    pub fn bucket_capacity(&self) -> usize {
        self.bucket_capacity
    }

    /// Returns a snapshot of the operation counters.
    pub fn metrics(&self) -> TableMetrics {
        self.metrics.snapshot()
    }

    /// Validates every structural invariant of the table.
    ///
    /// - the directory has exactly `2^global_depth` slots;
    /// - every bucket's local depth is at most the global depth;
    /// - a bucket of local depth `d` is referenced by exactly
    ///   `2^(global_depth − d)` slots, all congruent modulo `2^d`;
    /// - every entry is reachable through the slot its key hashes to, keys
    ///   are unique, and no bucket overflows its capacity;
    /// - `num_buckets` and `len` agree with the arena and entry counts.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        if self.dir.len() != 1usize << self.global_depth {
            return Err(InvariantError::new(format!(
                "directory length {} != 2^global_depth (depth {})",
                self.dir.len(),
                self.global_depth
            )));
        }

        let mut slots_by_bucket: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for (slot, &bucket_idx) in self.dir.iter().enumerate() {
            if bucket_idx >= self.buckets.len() {
                return Err(InvariantError::new(format!(
                    "slot {slot} references bucket {bucket_idx} outside the arena"
                )));
            }
            slots_by_bucket.entry(bucket_idx).or_default().push(slot);
        }

        if slots_by_bucket.len() != self.buckets.len() {
            return Err(InvariantError::new(format!(
                "{} buckets allocated but {} referenced by the directory",
                self.buckets.len(),
                slots_by_bucket.len()
            )));
        }

        for (&bucket_idx, slots) in &slots_by_bucket {
            let depth = self.buckets[bucket_idx].local_depth;
            if depth > self.global_depth {
                return Err(InvariantError::new(format!(
                    "bucket {bucket_idx} local depth {depth} exceeds global depth {}",
                    self.global_depth
                )));
            }
            let expected = 1usize << (self.global_depth - depth);
            if slots.len() != expected {
                return Err(InvariantError::new(format!(
                    "bucket {bucket_idx} (depth {depth}) referenced by {} slots, expected {expected}",
                    slots.len()
                )));
            }
            let mask = (1usize << depth) - 1;
            let residue = slots[0] & mask;
            if slots.iter().any(|&slot| slot & mask != residue) {
                return Err(InvariantError::new(format!(
                    "slots referencing bucket {bucket_idx} disagree modulo 2^{depth}"
                )));
            }
        }

        let mut total = 0;
        let mut seen: FxHashSet<&K> = FxHashSet::default();
        for (bucket_idx, bucket) in self.buckets.iter().enumerate() {
            if bucket.entries.len() > self.bucket_capacity {
                return Err(InvariantError::new(format!(
                    "bucket {bucket_idx} holds {} entries, capacity {}",
                    bucket.entries.len(),
                    self.bucket_capacity
                )));
            }
            for (key, _) in &bucket.entries {
                if !seen.insert(key) {
                    return Err(InvariantError::new("duplicate key across buckets"));
                }
                if self.dir[self.slot_of(key)] != bucket_idx {
                    return Err(InvariantError::new(format!(
                        "entry in bucket {bucket_idx} not reachable through its slot"
                    )));
                }
            }
            total += bucket.entries.len();
        }
        if total != self.len {
            return Err(InvariantError::new(format!(
                "len {} disagrees with stored entry count {total}",
                self.len
            )));
        }

        Ok(())
    }
}

impl<K, V, S> fmt::Debug for ExtendibleTable<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendibleTable")
            .field("global_depth", &self.global_depth)
            .field("num_buckets", &self.buckets.len())
            .field("len", &self.len)
            .field("bucket_capacity", &self.bucket_capacity)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Concurrent wrapper
// =============================================================================

/// Thread-safe extendible hash table.
///
/// A single `parking_lot::Mutex` serializes all public operations — the
/// observational getters included, so a caller reading `global_depth` and
/// `num_buckets` back to back sees a coherent pair. Cloning the handle
/// shares the underlying table.
///
/// # Example
///
/// ```
/// use std::thread;
///
/// use framekit::index::ConcurrentExtendibleTable;
///
/// let table: ConcurrentExtendibleTable<u64, u64> = ConcurrentExtendibleTable::new(4);
///
/// let handles: Vec<_> = (0..4u64)
///     .map(|t| {
///         let table = table.clone();
///         thread::spawn(move || {
///             for i in 0..64 {
///                 table.insert(t * 64 + i, i);
///             }
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// assert_eq!(table.len(), 256);
/// table.check_invariants().unwrap();
/// ```
pub struct ConcurrentExtendibleTable<K, V, S = FxBuildHasher> {
    inner: Arc<Mutex<ExtendibleTable<K, V, S>>>,
}

impl<K, V, S> Clone for ConcurrentExtendibleTable<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ConcurrentExtendibleTable<K, V, FxBuildHasher>
where
    K: Eq + Hash,
{
    /// Creates a table whose buckets hold at most `bucket_capacity` entries.
    ///
    /// A `bucket_capacity` of 0 is clamped to 1; use
    /// [`try_new`](Self::try_new) to reject it instead.
    pub fn new(bucket_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ExtendibleTable::new(bucket_capacity))),
        }
    }

    /// Fallible constructor for user-configurable parameters.
    pub fn try_new(bucket_capacity: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: Arc::new(Mutex::new(ExtendibleTable::try_new(bucket_capacity)?)),
        })
    }
}

impl<K, V, S> ConcurrentExtendibleTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Creates a table with a custom hasher.
    pub fn with_hasher(bucket_capacity: usize, hasher: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ExtendibleTable::with_hasher(
                bucket_capacity,
                hasher,
            ))),
        }
    }

    /// Returns a clone of the value for `key`, if present.
    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.lock().find(key)
    }

    /// Inserts `value` under `key`, overwriting any existing value.
    pub fn insert(&self, key: K, value: V) {
        self.inner.lock().insert(key, value);
    }

    /// Removes the entry for `key`. Returns whether it existed.
    pub fn remove(&self, key: &K) -> bool {
        self.inner.lock().remove(key)
    }

    /// Returns whether `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    /// Returns the number of hash bits the directory resolves.
    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth()
    }

    /// Returns the local depth of the bucket behind directory slot
    /// `dir_index`.
    ///
    /// # Panics
    ///
    /// Panics if `dir_index >= 2^global_depth`.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        self.inner.lock().local_depth(dir_index)
    }

    /// Returns the number of distinct buckets referenced by the directory.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets()
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns the per-bucket entry capacity.
    pub fn bucket_capacity(&self) -> usize {
        self.inner.lock().bucket_capacity()
    }

    /// Returns a snapshot of the operation counters.
    pub fn metrics(&self) -> TableMetrics {
        self.inner.lock().metrics()
    }

    /// Validates every structural invariant of the table.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        self.inner.lock().check_invariants()
    }
}

impl<K, V, S> fmt::Debug for ConcurrentExtendibleTable<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.inner.lock();
        f.debug_struct("ConcurrentExtendibleTable")
            .field("global_depth", &table.global_depth)
            .field("num_buckets", &table.buckets.len())
            .field("len", &table.len)
            .finish_non_exhaustive()
    }
}

impl<K, V, S> FrameIndex<K, V> for ConcurrentExtendibleTable<K, V, S>
where
    K: Eq + Hash,
    V: Clone,
    S: BuildHasher,
{
    fn find(&self, key: &K) -> Option<V> {
        ConcurrentExtendibleTable::find(self, key)
    }

    fn insert(&self, key: K, value: V) {
        ConcurrentExtendibleTable::insert(self, key, value);
    }

    fn remove(&self, key: &K) -> bool {
        ConcurrentExtendibleTable::remove(self, key)
    }

    fn contains(&self, key: &K) -> bool {
        ConcurrentExtendibleTable::contains(self, key)
    }

    fn len(&self) -> usize {
        ConcurrentExtendibleTable::len(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Pass-through hasher: a key's hash is its own value. Forces exact
    /// collision patterns on the low bits.
    #[derive(Debug, Default, Clone)]
    struct IdentityState;

    struct IdentityHasher(u64);

    impl std::hash::Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = (self.0 << 8) | u64::from(b);
            }
        }

        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }

        fn write_usize(&mut self, n: usize) {
            self.0 = n as u64;
        }
    }

    impl BuildHasher for IdentityState {
        type Hasher = IdentityHasher;

        fn build_hasher(&self) -> IdentityHasher {
            IdentityHasher(0)
        }
    }

    fn identity_table(bucket_capacity: usize) -> ExtendibleTable<u64, &'static str, IdentityState> {
        ExtendibleTable::with_hasher(bucket_capacity, IdentityState)
    }

    mod basic_behavior {
        use super::*;

        #[test]
        fn starts_with_single_empty_bucket_at_depth_zero() {
            let table: ExtendibleTable<u64, u64> = ExtendibleTable::new(2);
            assert_eq!(table.global_depth(), 0);
            assert_eq!(table.num_buckets(), 1);
            assert_eq!(table.local_depth(0), 0);
            assert!(table.is_empty());
            table.check_invariants().unwrap();
        }

        #[test]
        fn round_trip_insert_find_remove() {
            let mut table: ExtendibleTable<u64, String> = ExtendibleTable::new(2);

            table.insert(1, "a".to_string());
            assert_eq!(table.find(&1).as_deref(), Some("a"));

            table.insert(1, "b".to_string());
            assert_eq!(table.find(&1).as_deref(), Some("b"));

            assert!(table.remove(&1));
            assert_eq!(table.find(&1), None);
        }

        #[test]
        fn remove_of_absent_key_is_noop() {
            let mut table: ExtendibleTable<u64, u64> = ExtendibleTable::new(2);
            assert!(!table.remove(&7));
            table.insert(7, 70);
            assert!(table.remove(&7));
            assert!(!table.remove(&7));
            assert_eq!(table.len(), 0);
            table.check_invariants().unwrap();
        }

        #[test]
        fn find_is_side_effect_free() {
            let mut table: ExtendibleTable<u64, u64> = ExtendibleTable::new(2);
            table.insert(1, 10);
            let depth = table.global_depth();
            let buckets = table.num_buckets();
            for _ in 0..8 {
                assert_eq!(table.find(&1), Some(10));
                assert_eq!(table.find(&99), None);
            }
            assert_eq!(table.global_depth(), depth);
            assert_eq!(table.num_buckets(), buckets);
            assert_eq!(table.len(), 1);
        }

        #[test]
        fn zero_bucket_capacity_is_clamped() {
            let mut table: ExtendibleTable<u64, u64> = ExtendibleTable::new(0);
            assert_eq!(table.bucket_capacity(), 1);
            table.insert(1, 10);
            table.insert(2, 20);
            assert_eq!(table.find(&1), Some(10));
            assert_eq!(table.find(&2), Some(20));
            table.check_invariants().unwrap();
        }

        #[test]
        fn try_new_rejects_zero_bucket_capacity() {
            assert!(ExtendibleTable::<u64, u64>::try_new(0).is_err());
            assert!(ExtendibleTable::<u64, u64>::try_new(1).is_ok());
        }
    }

    mod splitting {
        use super::*;

        #[test]
        fn overflow_doubles_directory_and_splits() {
            // Keys 0 and 2 share low bit 0; key 1 does not. With capacity 2
            // the third insert overflows the sole bucket, doubling the
            // directory once and splitting odd keys away from even ones.
            let mut table = identity_table(2);
            table.insert(0, "a");
            table.insert(2, "b");
            assert_eq!(table.global_depth(), 0);

            table.insert(1, "c");
            assert_eq!(table.global_depth(), 1);
            assert_eq!(table.num_buckets(), 2);
            assert_eq!(table.find(&0), Some("a"));
            assert_eq!(table.find(&2), Some("b"));
            assert_eq!(table.find(&1), Some("c"));
            table.check_invariants().unwrap();
        }

        #[test]
        fn deep_collisions_grow_directory_until_keys_separate() {
            // 0, 4 and 8 agree on their low two bits, and 0 and 8 agree on
            // their low three; placing all three in capacity-2 buckets
            // forces repeated splits of the same slot up to depth 3.
            let mut table = identity_table(2);
            table.insert(0, "a");
            table.insert(4, "b");
            table.insert(8, "c");

            assert_eq!(table.global_depth(), 3);
            assert_eq!(table.find(&0), Some("a"));
            assert_eq!(table.find(&4), Some("b"));
            assert_eq!(table.find(&8), Some("c"));
            table.check_invariants().unwrap();

            let metrics = table.metrics();
            assert_eq!(metrics.directory_doublings, 3);
            assert!(metrics.splits >= 3);
        }

        #[test]
        fn repeated_splits_at_same_slot_keep_all_keys_reachable() {
            let mut table = identity_table(2);
            for (i, key) in [0u64, 8, 16, 24, 32].into_iter().enumerate() {
                table.insert(key, "v");
                assert_eq!(table.len(), i + 1);
                table.check_invariants().unwrap();
            }
            for key in [0u64, 8, 16, 24, 32] {
                assert_eq!(table.find(&key), Some("v"));
            }
            assert!(table.global_depth() >= 3);
        }

        #[test]
        fn update_on_full_bucket_never_splits() {
            let mut table = identity_table(2);
            table.insert(1, "x");
            table.insert(2, "y");
            assert_eq!(table.num_buckets(), 1);

            table.insert(1, "z");
            assert_eq!(table.num_buckets(), 1);
            assert_eq!(table.global_depth(), 0);
            assert_eq!(table.find(&1), Some("z"));
            assert_eq!(table.len(), 2);
            table.check_invariants().unwrap();
        }

        #[test]
        fn split_of_deep_bucket_does_not_double_directory() {
            // Grow the directory with colliding keys, then overflow a
            // shallow bucket: its split must reuse the existing directory.
            let mut table = identity_table(1);
            table.insert(0, "a");
            table.insert(4, "b"); // depth grows to 3 separating 0 from 4
            assert_eq!(table.global_depth(), 3);

            let before = table.metrics().directory_doublings;
            table.insert(1, "c");
            table.insert(3, "d"); // 1 and 3 differ in bit 1: one local split
            assert_eq!(table.global_depth(), 3);
            assert_eq!(table.metrics().directory_doublings, before);
            table.check_invariants().unwrap();
        }

        #[test]
        fn local_depths_never_exceed_global_depth() {
            let mut table = identity_table(2);
            for key in 0..64u64 {
                table.insert(key, "v");
            }
            let depth = table.global_depth();
            for slot in 0..(1usize << depth) {
                assert!(table.local_depth(slot) <= depth);
            }
            table.check_invariants().unwrap();
        }
    }

    mod default_hasher {
        use super::*;

        #[test]
        fn fx_hashing_routes_consistently() {
            let mut table: ExtendibleTable<u64, u64> = ExtendibleTable::new(4);
            for key in 0..512u64 {
                table.insert(key, key * 2);
            }
            assert_eq!(table.len(), 512);
            for key in 0..512u64 {
                assert_eq!(table.find(&key), Some(key * 2), "key {key} lost");
            }
            table.check_invariants().unwrap();
        }

        #[test]
        fn interleaved_inserts_and_removes_preserve_invariants() {
            let mut table: ExtendibleTable<u64, u64> = ExtendibleTable::new(2);
            // Deterministic mixed workload; no dependence on iteration order.
            let mut state = 0x9e3779b97f4a7c15u64;
            for round in 0..2_000u64 {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let key = state >> 33;
                if round % 3 == 0 {
                    table.remove(&key);
                } else {
                    table.insert(key, round);
                }
            }
            table.check_invariants().unwrap();
        }

        #[test]
        fn metrics_track_hits_and_misses() {
            let mut table: ExtendibleTable<u64, u64> = ExtendibleTable::new(4);
            table.insert(1, 10);
            let _ = table.find(&1);
            let _ = table.find(&2);
            let metrics = table.metrics();
            assert_eq!(metrics.hits, 1);
            assert_eq!(metrics.misses, 1);
            assert_eq!(metrics.inserts, 1);
        }
    }

    mod concurrent_wrapper {
        use std::thread;

        use super::*;

        #[test]
        fn shared_handle_observes_writes() {
            let table: ConcurrentExtendibleTable<u64, u64> = ConcurrentExtendibleTable::new(2);
            let clone = table.clone();
            clone.insert(5, 50);
            assert_eq!(table.find(&5), Some(50));
            assert_eq!(table.len(), 1);
        }

        #[test]
        fn parallel_inserts_land_exactly_once() {
            let table: ConcurrentExtendibleTable<u64, u64> = ConcurrentExtendibleTable::new(2);
            let threads = 8u64;
            let per_thread = 200u64;

            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let table = table.clone();
                    thread::spawn(move || {
                        for i in 0..per_thread {
                            let key = t * per_thread + i;
                            table.insert(key, key);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(table.len(), (threads * per_thread) as usize);
            for key in 0..threads * per_thread {
                assert_eq!(table.find(&key), Some(key));
            }
            table.check_invariants().unwrap();
        }

        #[test]
        fn frame_index_trait_object_usable() {
            fn through_seam(index: &dyn FrameIndex<u64, usize>) {
                index.insert(1, 7);
                assert_eq!(index.find(&1), Some(7));
                assert!(index.remove(&1));
                assert!(index.is_empty());
            }
            let table: ConcurrentExtendibleTable<u64, usize> = ConcurrentExtendibleTable::new(4);
            through_seam(&table);
        }
    }
}
