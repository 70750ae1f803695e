//! # LRU-K Frame Replacer
//!
//! A pinning-aware eviction policy for buffer-pool frames. LRU-K improves on
//! plain LRU by ranking frames on the timestamp of their K-th most recent
//! access, which keeps one-shot sequential scans from flushing hot pages.
//!
//! ## Eviction Policy
//!
//! ```text
//!   Among frames with is_evictable == true:
//!   ═══════════════════════════════════════════════════════════════════
//!
//!   PRIORITY 1: frames with fewer than K recorded accesses
//!   ───────────────────────────────────────────────────────────────────
//!     • Backward k-distance is +inf — they have not proven their heat
//!     • Among them, evict the one with the EARLIEST first access
//!
//!     frame_A: [t1]        ← 1 access, earliest = t1  ← EVICT THIS
//!     frame_B: [t3]        ← 1 access, earliest = t3
//!
//!   PRIORITY 2: frames with K or more accesses
//!   ───────────────────────────────────────────────────────────────────
//!     • Only reached once no +inf candidate exists
//!     • Evict the LARGEST backward k-distance, i.e. the OLDEST K-th
//!       most recent access
//!
//!     frame_C: [t2, t8]    ← k-distance = now − t2  ← EVICT THIS
//!     frame_D: [t5, t9]    ← k-distance = now − t5
//!
//!   ═══════════════════════════════════════════════════════════════════
//!
//!   Backward k-distance (K = 2, history = [t5, t9], front = oldest):
//!
//!     history caps at K, so once full its front IS the K-th most
//!     recent access:  k_distance = current_timestamp − history.front
//! ```
//!
//! Ties — notably several +inf candidates — fall back to the earliest
//! recorded timestamp, classical LRU. The same rule applies to any tied set.
//!
//! ## Key Components
//!
//! | Component                 | Description                                              |
//! |---------------------------|----------------------------------------------------------|
//! | `LrukReplacer`            | Single-threaded core                                     |
//! | `ConcurrentLrukReplacer`  | Thread-safe wrapper (one mutex)                          |
//! | `KDistance`               | Ordered backward k-distance (`Infinite` > any `Finite`)  |
//! | `ReplacerMetrics`         | Snapshot of operation counters                           |
//!
//! ## Core Operations
//!
//! | Method          | Complexity | Description                            |
//! |-----------------|------------|----------------------------------------|
//! | `record_access` | O(1)       | Append timestamp, trim history to K    |
//! | `set_evictable` | O(1)       | Pin/unpin; adjusts evictable count     |
//! | `evict`         | O(n)       | Scan evictable frames for the victim   |
//! | `remove`        | O(1)       | Erase all state for an unpinned frame  |
//! | `size`          | O(1)       | Number of evictable frames             |
//!
//! The timestamp is a logical `u64` counter advanced only by
//! `record_access`; `evict`, `set_evictable` and `remove` never perturb it.
//! Wraparound would take ~10^19 accesses and is out of reach for a
//! buffer-pool lifetime.
//!
//! ## Pinning Contract
//!
//! The buffer-pool manager pins a frame (`set_evictable(id, false)`) before
//! handing its page out and unpins it after. Calling `remove` on a pinned
//! frame is a caller bug and fails with
//! [`ReplacerError::RemoveNonEvictable`]; an out-of-range frame id fails
//! `record_access`/`set_evictable` with [`ReplacerError::InvalidFrame`].
//!
//! ## Example Usage
//!
//! ```
//! use framekit::policy::LrukReplacer;
//!
//! let mut replacer = LrukReplacer::new(8, 2);
//!
//! replacer.record_access(0).unwrap();
//! replacer.record_access(1).unwrap();
//! replacer.record_access(0).unwrap();
//!
//! replacer.set_evictable(0, true).unwrap();
//! replacer.set_evictable(1, true).unwrap();
//!
//! // Frame 1 has a single access (k-distance +inf), frame 0 has two:
//! // the unproven frame goes first.
//! assert_eq!(replacer.evict(), Some(1));
//! assert_eq!(replacer.evict(), Some(0));
//! assert_eq!(replacer.evict(), None);
//! ```
//!
//! ## Thread Safety
//!
//! - `LrukReplacer` is **NOT** thread-safe.
//! - `ConcurrentLrukReplacer` serializes all operations behind a single
//!   `parking_lot::Mutex`; no operation blocks on another frame's state.
//!
//! ## Academic Reference
//!
//! O'Neil, E. J., O'Neil, P. E., & Weikum, G. (1993).
//! "The LRU-K page replacement algorithm for database disk buffering."
//! ACM SIGMOD Record, 22(2), 297-306.

use std::cmp::Reverse;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::ds::AccessHistory;
use crate::error::{ConfigError, InvariantError, ReplacerError};
use crate::traits::{FrameId, Replacer};

// =============================================================================
// Metrics counters
// =============================================================================

/// Snapshot of replacer operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplacerMetrics {
    pub accesses: u64,
    pub evictions: u64,
    /// `evict` calls that found no evictable candidate.
    pub evict_misses: u64,
    pub removes: u64,
}

#[derive(Debug, Default)]
struct ReplacerCounters {
    accesses: AtomicU64,
    evictions: AtomicU64,
    evict_misses: AtomicU64,
    removes: AtomicU64,
}

impl ReplacerCounters {
    fn snapshot(&self) -> ReplacerMetrics {
        ReplacerMetrics {
            accesses: self.accesses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            evict_misses: self.evict_misses.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
        }
    }

    fn inc_access(&self) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_evict_miss(&self) {
        self.evict_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// KDistance
// =============================================================================

/// Backward k-distance of a frame.
///
/// `Infinite` for frames with fewer than K recorded accesses, otherwise the
/// logical-time distance between now and the K-th most recent access. The
/// ordering puts `Infinite` above every `Finite` value, so victim selection
/// is a plain maximum.
///
/// # Example
///
/// ```
/// use framekit::policy::KDistance;
///
/// assert!(KDistance::Infinite > KDistance::Finite(u64::MAX));
/// assert!(KDistance::Finite(9) > KDistance::Finite(4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KDistance {
    /// At least K accesses recorded; distance from now to the K-th most
    /// recent.
    Finite(u64),
    /// Fewer than K accesses recorded.
    Infinite,
}

// =============================================================================
// Frame records
// =============================================================================

/// Per-frame replacer state: bounded access history plus the pin flag.
#[derive(Debug)]
struct FrameRecord {
    history: AccessHistory,
    evictable: bool,
}

impl FrameRecord {
    fn new(k: usize) -> Self {
        Self {
            history: AccessHistory::new(k),
            evictable: false,
        }
    }

    /// Backward k-distance measured against `now`.
    ///
    /// The history's capacity is K, so a full history's oldest entry is the
    /// K-th most recent access.
    fn k_distance(&self, now: u64) -> KDistance {
        match self.history.oldest() {
            Some(ts) if self.history.is_full() => KDistance::Finite(now - ts),
            _ => KDistance::Infinite,
        }
    }

    /// Earliest retained timestamp; the tie-break key.
    fn earliest_access(&self) -> u64 {
        self.history.oldest().unwrap_or(u64::MAX)
    }
}

// =============================================================================
// Single-threaded LrukReplacer
// =============================================================================

/// Single-threaded LRU-K replacer core.
///
/// Tracks at most `capacity` frames, each with a history of its last K
/// access timestamps and an evictable flag (default: pinned). A record is
/// created on first `record_access` and destroyed by `remove` or a
/// successful `evict`; records survive pinned periods unchanged.
///
/// # Example
///
/// ```
/// use framekit::policy::LrukReplacer;
///
/// let mut replacer = LrukReplacer::new(4, 2);
///
/// replacer.record_access(2).unwrap();
/// assert_eq!(replacer.size(), 0); // new records start pinned
///
/// replacer.set_evictable(2, true).unwrap();
/// assert_eq!(replacer.size(), 1);
///
/// assert_eq!(replacer.evict(), Some(2));
/// assert_eq!(replacer.size(), 0);
/// ```
pub struct LrukReplacer {
    frames: FxHashMap<FrameId, FrameRecord>,
    capacity: usize,
    k: usize,
    current_timestamp: u64,
    evictable_count: usize,
    metrics: ReplacerCounters,
}

impl LrukReplacer {
    /// Creates a replacer for frame ids in `[0, capacity)` tracking the last
    /// `k` accesses per frame.
    ///
    /// A `k` of 0 is clamped to 1 (plain LRU); use [`try_new`](Self::try_new)
    /// to reject degenerate parameters instead.
    pub fn new(capacity: usize, k: usize) -> Self {
        let k = k.max(1);
        Self {
            frames: FxHashMap::default(),
            capacity,
            k,
            current_timestamp: 0,
            evictable_count: 0,
            metrics: ReplacerCounters::default(),
        }
    }

    /// Fallible constructor for user-configurable parameters.
    ///
    /// # Example
    ///
    /// ```
    /// use framekit::policy::LrukReplacer;
    ///
    /// assert!(LrukReplacer::try_new(16, 2).is_ok());
    /// assert!(LrukReplacer::try_new(0, 2).is_err());
    /// assert!(LrukReplacer::try_new(16, 0).is_err());
    /// ```
    pub fn try_new(capacity: usize, k: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::new("replacer capacity must be at least 1"));
        }
        if k == 0 {
            return Err(ConfigError::new("k must be at least 1"));
        }
        Ok(Self::new(capacity, k))
    }

    /// Records an access to `frame_id` at the current logical timestamp,
    /// then advances the timestamp.
    ///
    /// Creates the frame's record on first use (pinned). The history is
    /// trimmed to the last K entries.
    ///
    /// # Errors
    ///
    /// [`ReplacerError::InvalidFrame`] if `frame_id >= capacity`.
    pub fn record_access(&mut self, frame_id: FrameId) -> Result<(), ReplacerError> {
        if frame_id >= self.capacity {
            return Err(ReplacerError::InvalidFrame {
                frame_id,
                capacity: self.capacity,
            });
        }

        let k = self.k;
        let record = self
            .frames
            .entry(frame_id)
            .or_insert_with(|| FrameRecord::new(k));
        record.history.record(self.current_timestamp);
        self.current_timestamp = self.current_timestamp.saturating_add(1);
        self.metrics.inc_access();
        Ok(())
    }

    /// Pins (`false`) or unpins (`true`) a frame.
    ///
    /// Adjusts the evictable count only on an actual transition; a no-op if
    /// the frame has no record or the flag is unchanged.
    ///
    /// # Errors
    ///
    /// [`ReplacerError::InvalidFrame`] if `frame_id >= capacity`.
    pub fn set_evictable(
        &mut self,
        frame_id: FrameId,
        evictable: bool,
    ) -> Result<(), ReplacerError> {
        if frame_id >= self.capacity {
            return Err(ReplacerError::InvalidFrame {
                frame_id,
                capacity: self.capacity,
            });
        }

        if let Some(record) = self.frames.get_mut(&frame_id) {
            if record.evictable != evictable {
                record.evictable = evictable;
                if evictable {
                    self.evictable_count += 1;
                } else {
                    self.evictable_count -= 1;
                }
            }
        }
        Ok(())
    }

    /// Selects, removes and returns the eviction victim.
    ///
    /// The victim is the evictable frame with the largest backward
    /// k-distance measured against the current timestamp; ties — notably
    /// several infinite distances — go to the earliest recorded timestamp.
    /// Returns `None` when no frame is evictable. Does not advance the
    /// timestamp.
    pub fn evict(&mut self) -> Option<FrameId> {
        if self.evictable_count == 0 {
            self.metrics.inc_evict_miss();
            return None;
        }

        let now = self.current_timestamp;
        let victim = self
            .frames
            .iter()
            .filter(|(_, record)| record.evictable)
            .max_by_key(|(_, record)| (record.k_distance(now), Reverse(record.earliest_access())))
            .map(|(&frame_id, _)| frame_id)?;

        self.frames.remove(&victim);
        self.evictable_count -= 1;
        self.metrics.inc_eviction();
        Some(victim)
    }

    /// Erases all replacer state for `frame_id`.
    ///
    /// A no-op if the frame has no record. Does not advance the timestamp.
    ///
    /// # Errors
    ///
    /// [`ReplacerError::RemoveNonEvictable`] if the frame is present and
    /// pinned.
    pub fn remove(&mut self, frame_id: FrameId) -> Result<(), ReplacerError> {
        let evictable = match self.frames.get(&frame_id) {
            None => return Ok(()),
            Some(record) => record.evictable,
        };
        if !evictable {
            return Err(ReplacerError::RemoveNonEvictable { frame_id });
        }

        self.frames.remove(&frame_id);
        self.evictable_count -= 1;
        self.metrics.inc_remove();
        Ok(())
    }

    /// Returns the number of currently evictable frames.
    #[inline]
    pub fn size(&self) -> usize {
        self.evictable_count
    }

    /// Returns the number of tracked frames, pinned ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns whether no frames are tracked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Returns the fixed frame capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the K value used by this replacer.
    #[inline]
    pub fn k_value(&self) -> usize {
        self.k
    }

    /// Returns the current logical timestamp.
    ///
    /// Advanced only by [`record_access`](Self::record_access).
    #[inline]
    pub fn current_timestamp(&self) -> u64 {
        self.current_timestamp
    }

    /// Returns whether `frame_id` is evictable; `None` if untracked.
    pub fn is_evictable(&self, frame_id: FrameId) -> Option<bool> {
        self.frames.get(&frame_id).map(|record| record.evictable)
    }

    /// Returns the access history for a frame, most recent first.
    ///
    /// The history is capped at K entries. Timestamps are logical ticks.
    pub fn access_history(&self, frame_id: FrameId) -> Option<Vec<u64>> {
        self.frames
            .get(&frame_id)
            .map(|record| record.history.to_vec_mru())
    }

    /// Returns the frame's backward k-distance measured against the current
    /// timestamp; `None` if untracked.
    pub fn k_distance(&self, frame_id: FrameId) -> Option<KDistance> {
        self.frames
            .get(&frame_id)
            .map(|record| record.k_distance(self.current_timestamp))
    }

    /// Returns a snapshot of the operation counters.
    pub fn metrics(&self) -> ReplacerMetrics {
        self.metrics.snapshot()
    }

    /// Validates the replacer's bookkeeping invariants.
    ///
    /// - every tracked frame id is inside `[0, capacity)`;
    /// - the evictable count equals the number of evictable records;
    /// - each history holds between 1 and K strictly increasing timestamps,
    ///   all in the past of the current timestamp.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let evictable = self
            .frames
            .values()
            .filter(|record| record.evictable)
            .count();
        if evictable != self.evictable_count {
            return Err(InvariantError::new(format!(
                "evictable_count {} but {} records are evictable",
                self.evictable_count, evictable
            )));
        }

        for (&frame_id, record) in &self.frames {
            if frame_id >= self.capacity {
                return Err(InvariantError::new(format!(
                    "tracked frame {frame_id} outside capacity {}",
                    self.capacity
                )));
            }
            let history = record.history.to_vec_mru();
            if history.is_empty() || history.len() > self.k {
                return Err(InvariantError::new(format!(
                    "frame {frame_id} history length {} outside 1..={}",
                    history.len(),
                    self.k
                )));
            }
            // MRU-first, so strictly increasing means strictly descending here.
            if history.windows(2).any(|pair| pair[0] <= pair[1]) {
                return Err(InvariantError::new(format!(
                    "frame {frame_id} history is not strictly increasing"
                )));
            }
            if history[0] >= self.current_timestamp {
                return Err(InvariantError::new(format!(
                    "frame {frame_id} recorded at or after the current timestamp"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for LrukReplacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LrukReplacer")
            .field("capacity", &self.capacity)
            .field("k", &self.k)
            .field("tracked", &self.frames.len())
            .field("evictable", &self.evictable_count)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Concurrent wrapper
// =============================================================================

/// Thread-safe LRU-K replacer.
///
/// A single `parking_lot::Mutex` serializes all operations; no operation
/// blocks waiting for another frame's state, and there is no condition
/// signalling. Cloning the handle shares the underlying replacer.
///
/// # Example
///
/// ```
/// use std::thread;
///
/// use framekit::policy::ConcurrentLrukReplacer;
///
/// let replacer = ConcurrentLrukReplacer::new(64, 2);
///
/// let handles: Vec<_> = (0..4usize)
///     .map(|t| {
///         let replacer = replacer.clone();
///         thread::spawn(move || {
///             for id in (t * 16)..(t * 16 + 16) {
///                 replacer.record_access(id).unwrap();
///                 replacer.set_evictable(id, true).unwrap();
///             }
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// assert_eq!(replacer.size(), 64);
/// assert!(replacer.evict().is_some());
/// assert_eq!(replacer.size(), 63);
/// ```
pub struct ConcurrentLrukReplacer {
    inner: Arc<Mutex<LrukReplacer>>,
}

impl Clone for ConcurrentLrukReplacer {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConcurrentLrukReplacer {
    /// Creates a replacer for frame ids in `[0, capacity)` tracking the last
    /// `k` accesses per frame.
    ///
    /// A `k` of 0 is clamped to 1; use [`try_new`](Self::try_new) to reject
    /// degenerate parameters instead.
    pub fn new(capacity: usize, k: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LrukReplacer::new(capacity, k))),
        }
    }

    /// Fallible constructor for user-configurable parameters.
    pub fn try_new(capacity: usize, k: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: Arc::new(Mutex::new(LrukReplacer::try_new(capacity, k)?)),
        })
    }

    /// Records an access to `frame_id` at the current logical timestamp.
    pub fn record_access(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        self.inner.lock().record_access(frame_id)
    }

    /// Pins (`false`) or unpins (`true`) a frame.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<(), ReplacerError> {
        self.inner.lock().set_evictable(frame_id, evictable)
    }

    /// Selects, removes and returns the eviction victim, or `None` if no
    /// frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        self.inner.lock().evict()
    }

    /// Erases all replacer state for `frame_id`.
    pub fn remove(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        self.inner.lock().remove(frame_id)
    }

    /// Returns the number of currently evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().size()
    }

    /// Returns the number of tracked frames, pinned ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns whether no frames are tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns the fixed frame capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    /// Returns the K value used by this replacer.
    pub fn k_value(&self) -> usize {
        self.inner.lock().k_value()
    }

    /// Returns whether `frame_id` is evictable; `None` if untracked.
    pub fn is_evictable(&self, frame_id: FrameId) -> Option<bool> {
        self.inner.lock().is_evictable(frame_id)
    }

    /// Returns the access history for a frame, most recent first.
    pub fn access_history(&self, frame_id: FrameId) -> Option<Vec<u64>> {
        self.inner.lock().access_history(frame_id)
    }

    /// Returns the frame's backward k-distance measured against the current
    /// timestamp; `None` if untracked.
    pub fn k_distance(&self, frame_id: FrameId) -> Option<KDistance> {
        self.inner.lock().k_distance(frame_id)
    }

    /// Returns a snapshot of the operation counters.
    pub fn metrics(&self) -> ReplacerMetrics {
        self.inner.lock().metrics()
    }

    /// Validates the replacer's bookkeeping invariants.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        self.inner.lock().check_invariants()
    }
}

impl fmt::Debug for ConcurrentLrukReplacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let replacer = self.inner.lock();
        f.debug_struct("ConcurrentLrukReplacer")
            .field("capacity", &replacer.capacity)
            .field("k", &replacer.k)
            .field("tracked", &replacer.frames.len())
            .field("evictable", &replacer.evictable_count)
            .finish_non_exhaustive()
    }
}

impl Replacer for ConcurrentLrukReplacer {
    fn record_access(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        ConcurrentLrukReplacer::record_access(self, frame_id)
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<(), ReplacerError> {
        ConcurrentLrukReplacer::set_evictable(self, frame_id, evictable)
    }

    fn evict(&self) -> Option<FrameId> {
        ConcurrentLrukReplacer::evict(self)
    }

    fn remove(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        ConcurrentLrukReplacer::remove(self, frame_id)
    }

    fn size(&self) -> usize {
        ConcurrentLrukReplacer::size(self)
    }

    fn capacity(&self) -> usize {
        ConcurrentLrukReplacer::capacity(self)
    }
}

// =============================================================================
// Tests
// =============================================================================
