//! # Consumer Seams
//!
//! The trait surface a buffer-pool manager programs against. The two
//! components of this crate are independent; the manager composes them, so
//! each gets its own seam and nothing couples the two.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────┐   ┌──────────────────────────────────┐
//!   │       FrameIndex<K, V>       │   │            Replacer              │
//!   │                              │   │                                  │
//!   │  find(&K) → Option<V>        │   │  record_access(id) → Result      │
//!   │  insert(K, V)                │   │  set_evictable(id, bool)         │
//!   │  remove(&K) → bool           │   │  evict() → Option<FrameId>       │
//!   │  contains(&K) → bool         │   │  remove(id) → Result             │
//!   │  len() / is_empty()          │   │  size() / capacity()             │
//!   └──────────────┬───────────────┘   └────────────────┬─────────────────┘
//!                  │                                    │
//!                  ▼                                    ▼
//!     ConcurrentExtendibleTable              ConcurrentLrukReplacer
//! ```
//!
//! Both seams take `&self`: implementations are internally synchronized, and
//! the manager holds each behind a shared handle. Between the two there is no
//! cross-ordering guarantee; the manager provides whatever composition it
//! needs (pin before use, unpin after, evict then drop the index entry).

use std::hash::Hash;

use crate::error::ReplacerError;

/// Identifier of a fixed-size buffer-pool frame slot.
///
/// Frame ids are non-negative and strictly less than the replacer capacity
/// fixed at construction.
pub type FrameId = usize;

/// Thread-safe associative index from page keys to frame handles.
///
/// Implemented by
/// [`ConcurrentExtendibleTable`](crate::index::ConcurrentExtendibleTable).
/// Values are handed out by clone under the implementation's internal lock;
/// in the intended use `V` is a small `Copy` frame handle.
pub trait FrameIndex<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Returns the value currently mapped to `key`, if any.
    fn find(&self, key: &K) -> Option<V>;

    /// Inserts `value` under `key`, overwriting any existing mapping.
    fn insert(&self, key: K, value: V);

    /// Removes the mapping for `key`. Returns whether it existed.
    fn remove(&self, key: &K) -> bool;

    /// Returns whether `key` is currently mapped.
    fn contains(&self, key: &K) -> bool;

    /// Returns the number of entries in the index.
    fn len(&self) -> usize;

    /// Returns whether the index holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Thread-safe frame eviction policy.
///
/// Implemented by
/// [`ConcurrentLrukReplacer`](crate::policy::ConcurrentLrukReplacer).
///
/// The calling manager pins a frame by `set_evictable(id, false)` before use
/// and unpins with `set_evictable(id, true)` after; it must not `remove` a
/// pinned frame.
pub trait Replacer {
    /// Records an access to `frame_id` at the current logical timestamp.
    fn record_access(&self, frame_id: FrameId) -> Result<(), ReplacerError>;

    /// Marks `frame_id` as evictable (unpinned) or not (pinned).
    fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<(), ReplacerError>;

    /// Selects, removes and returns the eviction victim, or `None` if no
    /// frame is currently evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Erases all replacer state for `frame_id`. No-op if the frame is
    /// untracked; an error if it is tracked and pinned.
    fn remove(&self, frame_id: FrameId) -> Result<(), ReplacerError>;

    /// Returns the number of currently evictable frames.
    fn size(&self) -> usize;

    /// Returns the fixed frame capacity.
    fn capacity(&self) -> usize;
}
