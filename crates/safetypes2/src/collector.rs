//! Mark-and-sweep collector (C5), run exclusively under the writer side of
//! the GC lock (§4.3) via [`crate::lock::collect`].
//!
//! The epoch counter `mark_last` starts at 0 and advances by 2 per
//! collection, so `(mark_last, mark_last | 1)` form the "seeded" /
//! "seeded and visited" pair for that cycle (§4.4). This is the spec's
//! even/odd epoch scheme, not the teacher crate's tri-color (white/gray/
//! black) scheme — the two aren't equivalent: tri-color needs a distinct
//! gray worklist, while this scheme folds "seeded" and "visited" into one
//! field's low bit, which is what lets a bare roster walk (no auxiliary
//! worklist) implement transitive closure.

use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "gc_logging")]
use tracing::{debug, trace};

use crate::object::global_registry;

static MARK_LAST: AtomicU32 = AtomicU32::new(0);

/// The epoch value as of the *last completed* collection. Read by
/// [`crate::object::destroy`] to tag objects destroyed mid-collection (via
/// a finalizer's cascading `release`/`leave`) with a value guaranteed to
/// read as stale relative to the in-flight collection's new epoch.
pub fn last_epoch() -> u32 {
    MARK_LAST.load(Ordering::Relaxed)
}

/// Runs one full collection cycle: seed-and-propagate, finalize
/// unreachables, sweep. Called by the GC lock's elected operator with
/// exclusive access to every object (§4.3, §4.4).
pub fn run() {
    let epoch = MARK_LAST.load(Ordering::Relaxed).wrapping_add(2);
    #[cfg(feature = "gc_logging")]
    debug!(epoch, objects = global_registry().len(), "collect: starting");

    seed_and_propagate(epoch);
    let finalized = finalize_unreachables(epoch);
    let reclaimed = sweep(epoch);

    MARK_LAST.store(epoch, Ordering::Relaxed);
    #[cfg(feature = "gc_logging")]
    debug!(epoch, finalized, reclaimed, "collect: finished");
}

/// Phase 1 (§4.4): flood-fill `E` out from every `ref_count > 0` root,
/// repeating the roster walk until a full pass marks nothing new — a
/// fixed-point computation of transitive closure, valid because mutator
/// threads are frozen for the duration of the writer lock.
fn seed_and_propagate(epoch: u32) {
    loop {
        let mut changed = false;

        global_registry().for_each(|h| {
            let hdr = unsafe { &mut *h.as_ptr() };
            if hdr.guard {
                return;
            }
            if hdr.ref_count > 0 && hdr.mark != epoch && hdr.mark != (epoch | 1) {
                hdr.mark = epoch;
                changed = true;
            }
        });

        global_registry().for_each(|h| {
            let mark = unsafe { (*h.as_ptr()).mark };
            if mark != epoch {
                return;
            }
            let vtable = unsafe { (*h.as_ptr()).vtable };
            if let Some(iter_fn) = vtable.iter_create {
                if let Some(mut it) = unsafe { iter_fn(h) } {
                    while let Some(item) = it.next() {
                        let c = item.value;
                        let chdr = unsafe { &mut *c.as_ptr() };
                        if !chdr.guard && chdr.mark != epoch && chdr.mark != (epoch | 1) {
                            chdr.mark = epoch;
                            changed = true;
                        }
                    }
                }
            }
            unsafe { (*h.as_ptr()).mark |= 1 };
        });

        #[cfg(feature = "gc_logging")]
        trace!(epoch, changed, "collect: seed-and-propagate pass");

        if !changed {
            break;
        }
    }
}

/// Phase 2 (§4.4): any object whose mark didn't end Phase 1 at `E | 1` is
/// unreachable; finalize it (exactly once, guarded by `guard`). A
/// finalizer's `release`/`leave` calls may cascade into `object::destroy`
/// for other unreachable objects this same loop hasn't reached yet — those
/// see `guard == 1` already set by the cascade and are skipped here.
fn finalize_unreachables(epoch: u32) -> usize {
    let mut finalized = 0usize;
    global_registry().for_each(|h| {
        let hdr = unsafe { &mut *h.as_ptr() };
        if (hdr.mark | 1) != (epoch | 1) && !hdr.guard {
            hdr.guard = true;
            unsafe { (hdr.vtable.finalize)(h) };
            finalized += 1;
        }
    });
    finalized
}

/// Phase 3 (§4.4): reclaim every object that didn't end Phase 1 at
/// `E | 1`. The registry's `for_each` captures each node's `gc_next`
/// before invoking the callback, so splicing the current node out of the
/// roster (which only touches its immediate neighbors' links, never the
/// next node's own links) doesn't corrupt the walk — a single linear pass
/// suffices here without the defensive from-head restart the design notes
/// describe for naive list implementations.
fn sweep(epoch: u32) -> usize {
    let mut reclaimed = 0usize;
    let mut dead = Vec::new();
    global_registry().for_each(|h| {
        let mark = unsafe { (*h.as_ptr()).mark };
        if (mark | 1) != (epoch | 1) {
            dead.push(h);
        }
    });
    for h in dead {
        global_registry().unregister(h);
        let dealloc = unsafe { (*h.as_ptr()).vtable.dealloc };
        unsafe { dealloc(h) };
        reclaimed += 1;
    }
    reclaimed
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::*;
    use crate::iter::{IterItem, IterKey, ObjectIterator};
    use crate::object::{self, Handle, ObjectHeader, ObjectVTable};
    use crate::types::TypeId;

    static LEAF_VTABLE: ObjectVTable = ObjectVTable {
        iter_create: None,
        finalize: |_| {},
        dealloc: |h| unsafe { drop(Box::from_raw(h.as_ptr())) },
    };

    fn alloc_leaf() -> Handle {
        let boxed = Box::new(ObjectHeader::new(TypeId::BLOB, &LEAF_VTABLE));
        let handle = NonNull::new(Box::into_raw(boxed)).unwrap();
        object::register_new(handle);
        handle
    }

    #[test]
    fn unreferenced_kept_only_object_is_collected() {
        let h = alloc_leaf();
        unsafe {
            object::keep(h);
            object::release(h); // ref_count 0, kept_count 1 -> not destroyed yet
        }
        assert_eq!(global_registry().len(), 1);
        run();
        assert_eq!(global_registry().len(), 0);
    }

    struct SelfCycleIter(Option<Handle>);
    impl ObjectIterator for SelfCycleIter {
        fn next(&mut self) -> Option<IterItem> {
            self.0.take().map(|h| IterItem {
                key: IterKey::Index(0),
                value: h,
            })
        }
    }

    #[test]
    fn self_referential_cycle_with_no_lexical_root_is_collected() {
        static CYCLE_VTABLE: ObjectVTable = ObjectVTable {
            iter_create: Some(|h| Some(Box::new(SelfCycleIter(Some(h))))),
            finalize: |h| unsafe { object::leave(h) },
            dealloc: |h| unsafe { drop(Box::from_raw(h.as_ptr())) },
        };
        let boxed = Box::new(ObjectHeader::new(TypeId::SEQUENCE, &CYCLE_VTABLE));
        let h = NonNull::new(Box::into_raw(boxed)).unwrap();
        object::register_new(h);
        unsafe {
            object::keep(h); // the object "holds" a kept edge to itself
            object::release(h); // drop the only lexical root
        }
        assert_eq!(global_registry().len(), 1);
        run();
        assert_eq!(global_registry().len(), 0);
    }

    #[test]
    fn reachable_object_survives_collection() {
        let h = alloc_leaf();
        assert_eq!(global_registry().len(), 1);
        run();
        assert_eq!(global_registry().len(), 1);
        unsafe { object::release(h) };
        assert_eq!(global_registry().len(), 0);
    }
}
