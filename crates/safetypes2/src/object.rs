//! Object header & global registry (C2), and the dual-count lifetime
//! protocol (C3) built directly on top of it.
//!
//! Every container type begins with an [`ObjectHeader`] as its first field
//! (`#[repr(C)]`), the same discipline the original C implementation uses
//! via its `s2obj_base` macro. A [`Handle`] is simply a non-null pointer to
//! that leading header; the header's `type_id` and `vtable` fields are what
//! let code recover the concrete type and call into it polymorphically,
//! matching the "vtable pointer in the header" design note.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::iter::IterCreateFn;
use crate::types::TypeId;

/// The universal object handle: a non-null pointer to an object's leading
/// [`ObjectHeader`]. Application code never sees a raw pointer; every public
/// container API traffics in `Handle`.
pub type Handle = NonNull<ObjectHeader>;

/// The polymorphic capability record baked into every header. Matches the
/// "two function pointers... baked into the header" option from the design
/// notes over a sum-type/enum dispatch, because the map's value slots are
/// genuinely heterogeneous and an open set of container types (including an
/// opaque escape hatch, C10) doesn't fit a closed enum.
pub struct ObjectVTable {
    /// `None` for containers with no children to traverse (blob, external
    /// reference).
    pub iter_create: Option<IterCreateFn>,
    /// Releases owned resources: for plain values, nothing; for containers,
    /// this is where child slots get `leave`/`release`d, which is what lets
    /// ordinary acyclic teardown cascade deterministically. Runs exactly
    /// once per object (I5).
    pub finalize: unsafe fn(Handle),
    /// Frees the Rust-level memory backing the object (its own buffers,
    /// trie nodes, list nodes, and finally the header-carrying allocation
    /// itself). Must not touch `ref_count`/`kept_count` of anything — by the
    /// time this runs, `finalize` has already discharged those edges.
    pub dealloc: unsafe fn(Handle),
}

/// Every allocated value begins with one of these (§3).
#[repr(C)]
pub struct ObjectHeader {
    pub gc_prev: Option<Handle>,
    pub gc_next: Option<Handle>,
    pub type_id: TypeId,
    /// 1 once finalized: the collector must not traverse this object and
    /// `release`/`leave` become no-ops.
    pub guard: bool,
    /// Compared against the collector's epoch; low bit distinguishes
    /// "marked but children not yet visited" (even) from "marked and
    /// visited" (odd).
    pub mark: u32,
    pub ref_count: u32,
    pub kept_count: u32,
    pub vtable: &'static ObjectVTable,
}

impl ObjectHeader {
    /// Initializes a fresh header with `ref_count = 1`, `kept_count = 0`,
    /// per the lifecycle rule in §3. Does not register it — callers do that
    /// once the full object (header plus payload) is heap-allocated.
    pub fn new(type_id: TypeId, vtable: &'static ObjectVTable) -> Self {
        Self {
            gc_prev: None,
            gc_next: None,
            type_id,
            guard: false,
            mark: 0,
            ref_count: 1,
            kept_count: 0,
            vtable,
        }
    }
}

/// The global doubly-linked roster of live objects (I6). A linked list, not
/// an array or arena, because individual registration/unregistration must be
/// O(1) regardless of how many collections have run, and the collector
/// already needs to walk it in full for marking.
struct Roster {
    head: Option<Handle>,
    tail: Option<Handle>,
    len: usize,
}

// SAFETY: the roster only ever holds pointers to heap objects that are
// themselves required to be `Send`-safe by the caller allocating them (the
// whole point of the GC lock is that access to any given object is confined
// to whichever thread currently holds the reader lock, or to the sole
// collector thread during a collection).
unsafe impl Send for Roster {}

pub struct Registry {
    roster: Mutex<Roster>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            roster: Mutex::new(Roster {
                head: None,
                tail: None,
                len: 0,
            }),
        }
    }

    /// Appends `handle` to the roster tail under the roster's short-term
    /// mutex (§4.1).
    pub fn register(&self, handle: Handle) {
        let mut roster = self.roster.lock();
        unsafe {
            (*handle.as_ptr()).gc_prev = roster.tail;
            (*handle.as_ptr()).gc_next = None;
        }
        match roster.tail {
            Some(tail) => unsafe { (*tail.as_ptr()).gc_next = Some(handle) },
            None => roster.head = Some(handle),
        }
        roster.tail = Some(handle);
        roster.len += 1;
    }

    /// Splices `handle` out of the roster under the same mutex.
    pub fn unregister(&self, handle: Handle) {
        let mut roster = self.roster.lock();
        let (prev, next) = unsafe { ((*handle.as_ptr()).gc_prev, (*handle.as_ptr()).gc_next) };
        match prev {
            Some(p) => unsafe { (*p.as_ptr()).gc_next = next },
            None => roster.head = next,
        }
        match next {
            Some(n) => unsafe { (*n.as_ptr()).gc_prev = prev },
            None => roster.tail = prev,
        }
        roster.len -= 1;
    }

    pub fn len(&self) -> usize {
        self.roster.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn head(&self) -> Option<Handle> {
        self.roster.lock().head
    }

    /// Walks the live roster front to back, calling `f` on each handle.
    /// Only safe to call while holding the GC writer lock (the collector is
    /// the only caller) or, for read-only diagnostic purposes, while no
    /// concurrent mutation of the roster's *linkage* (registration or
    /// unregistration) can occur.
    pub fn for_each(&self, mut f: impl FnMut(Handle)) {
        let mut cur = self.head();
        while let Some(h) = cur {
            let next = unsafe { (*h.as_ptr()).gc_next };
            f(h);
            cur = next;
        }
    }
}

static REGISTRY: Registry = Registry::new();

pub fn global_registry() -> &'static Registry {
    &REGISTRY
}

/// `+1` to `ref_count` (lexical reference).
///
/// # Safety
/// `handle` must point to a live, registered object.
pub unsafe fn retain(handle: Handle) {
    unsafe { (*handle.as_ptr()).ref_count += 1 };
}

/// `+1` to `kept_count` (container-slot reference).
///
/// # Safety
/// `handle` must point to a live, registered object.
pub unsafe fn keep(handle: Handle) {
    unsafe { (*handle.as_ptr()).kept_count += 1 };
}

/// `-1` to `ref_count`; destroys the object if both counts reach zero.
///
/// # Safety
/// `handle` must point to a live, registered object, and the caller must
/// hold the reader lock (or be the collector operator).
pub unsafe fn release(handle: Handle) {
    let hdr = unsafe { &mut *handle.as_ptr() };
    if hdr.guard {
        return;
    }
    assert!(hdr.ref_count > 0, "release: ref_count underflow (I4 violation)");
    hdr.ref_count -= 1;
    if hdr.ref_count == 0 && hdr.kept_count == 0 {
        unsafe { destroy(handle) };
    }
}

/// `-1` to `kept_count`; destroys the object if both counts reach zero.
///
/// # Safety
/// `handle` must point to a live, registered object, and the caller must
/// hold the reader lock (or be the collector operator).
pub unsafe fn leave(handle: Handle) {
    let hdr = unsafe { &mut *handle.as_ptr() };
    if hdr.guard {
        return;
    }
    assert!(hdr.kept_count > 0, "leave: kept_count underflow (I4 violation)");
    hdr.kept_count -= 1;
    if hdr.ref_count == 0 && hdr.kept_count == 0 {
        unsafe { destroy(handle) };
    }
}

/// Discharges the setter-semantics sum type (§4.2) in one call: `Kept`
/// leaves the caller's reference alone, `Gave` releases it on the caller's
/// behalf after the container's own `keep`.
///
/// # Safety
/// `handle` must point to a live, registered object the caller currently
/// holds a lexical reference to (required for `Gave`).
pub unsafe fn discharge_setter(handle: Handle, semantics: crate::error::SetterSemantics) {
    unsafe { keep(handle) };
    if semantics == crate::error::SetterSemantics::Gave {
        unsafe { release(handle) };
    }
}

/// `ref_count == 0 && kept_count == 0` transition. Finalizes unconditionally
/// exactly once (I5); only actually frees memory immediately when no
/// collection is in progress — during a collection, memory reclamation is
/// deferred to the sweep phase, matching the original C's dual-path
/// `destroy`.
///
/// # Safety
/// Must only be called once per object, at the moment its counts reach
/// zero.
unsafe fn destroy(handle: Handle) {
    let hdr = unsafe { &mut *handle.as_ptr() };
    debug_assert!(!hdr.guard, "destroy invoked twice on the same object");
    hdr.guard = true;
    let collecting = crate::lock::is_collector_running();
    if collecting {
        // The epoch `mark_last` hasn't advanced to the new value yet (the
        // collector only does that once, at the very end of `collect`), so
        // tagging with the *old* epoch's visited value is guaranteed to
        // read as stale relative to the new epoch, which is exactly what
        // the sweep phase's `mark | 1 != epoch | 1` criterion needs to pick
        // this object up.
        hdr.mark = crate::collector::last_epoch() | 1;
    }
    unsafe { (hdr.vtable.finalize)(handle) };
    if !collecting {
        global_registry().unregister(handle);
        unsafe { (hdr.vtable.dealloc)(handle) };
    }
}

/// Registers a freshly allocated, fully initialized object with the global
/// roster. Every container constructor must call this exactly once.
pub fn register_new(handle: Handle) {
    global_registry().register(handle);
}
