//! Process-wide tunables. Distinct from the generational-heap `GcConfig`
//! this crate's ancestor carried: this collector is not generational, so the
//! only knobs left are the blob small-buffer threshold and the map's trie
//! depth limit. The latter is additionally exposed as a settable override
//! (clamped to `MAP_MAX_DEPTH`) so the depth-exhausted error path is
//! reachable in tests without crafting an actual 128-bit hash collision.

use std::sync::atomic::{AtomicU8, Ordering};

/// Inline-storage threshold for `Blob`, in bytes. Buffers this size or
/// smaller live directly in the header; larger ones get a heap allocation.
/// Matches the original C implementation's small-buffer cutoff exactly.
pub const BLOB_INLINE_CAPACITY: usize = 19;

/// Maximum trie depth for `Map`, i.e. the number of hash-digest bytes that
/// can be consumed before a collision is reported as exhausted. Array
/// capacities that scale with trie depth (e.g. the map iterator's per-level
/// cursor stack) are sized against this compile-time constant regardless of
/// the runtime override below, so the override can only ever lower the
/// effective limit, never raise it past what's allocated.
pub const MAP_MAX_DEPTH: u8 = 16;

static MAP_MAX_DEPTH_OVERRIDE: AtomicU8 = AtomicU8::new(MAP_MAX_DEPTH);

/// The trie depth actually enforced by the map's `set`/`get`/`unset`. Equal
/// to [`MAP_MAX_DEPTH`] unless [`set_map_max_depth_override`] has lowered
/// it for a test.
pub(crate) fn effective_map_max_depth() -> u8 {
    MAP_MAX_DEPTH_OVERRIDE.load(Ordering::Relaxed)
}

/// Lowers (or restores) the trie depth limit the map enforces, without
/// touching the compile-time capacity of anything sized off
/// `MAP_MAX_DEPTH`. Clamped to `[1, MAP_MAX_DEPTH]`. Exists so a test can
/// force [`crate::error::SafeTypesError::TrieDepthExhausted`] with a
/// realistic number of keys instead of needing an astronomically unlikely
/// genuine SipHash collision at all 16 levels.
pub(crate) fn set_map_max_depth_override(depth: u8) {
    MAP_MAX_DEPTH_OVERRIDE.store(depth.clamp(1, MAP_MAX_DEPTH), Ordering::Relaxed);
}

#[derive(Copy, Clone, Debug)]
pub struct GcConfig {
    pub blob_inline_capacity: usize,
    pub map_max_depth: u8,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            blob_inline_capacity: BLOB_INLINE_CAPACITY,
            map_max_depth: MAP_MAX_DEPTH,
        }
    }
}
