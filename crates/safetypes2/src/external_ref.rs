//! External reference (C10): a single-pointer wrapper around externally
//! managed memory, with an optional finalizer. Absent a finalizer it is a
//! weak reference — the pointer is simply forgotten at teardown.
//!
//! Grounded in `original_source/src/s2ref.c`/`s2ref.h`'s `s2ref_create`/
//! `s2ref_create_weakref`/`s2ref_unwrap`, and in `otter-vm-gc::weak_ref::
//! WeakRefCell` for the Rust idiom of a non-tracing cell holding a raw
//! pointer — adapted here to additionally carry the strong-reference
//! finalizer-callback case the teacher's weak-only cell doesn't need.
//!
//! Owns no child objects: `iter_create` is absent (§4.5), same as blob.

use std::ptr::NonNull;

use crate::object::{self, Handle, ObjectHeader, ObjectVTable};
use crate::types::TypeId;

/// Finalizer callback invoked with the wrapped pointer when the reference's
/// counts reach zero. Absent means "weak reference": the pointer is
/// forgotten without any call.
pub type Finalizer = unsafe fn(*mut std::ffi::c_void);

struct ExternalRefBody {
    header: ObjectHeader,
    ptr: *mut std::ffi::c_void,
    finalizer: Option<Finalizer>,
}

fn body_ptr(h: Handle) -> *mut ExternalRefBody {
    h.as_ptr() as *mut ExternalRefBody
}

static EXTERNAL_REF_VTABLE: ObjectVTable = ObjectVTable {
    iter_create: None,
    finalize: |h| {
        let body = unsafe { &*body_ptr(h) };
        if let Some(finalizer) = body.finalizer {
            unsafe { finalizer(body.ptr) };
        }
    },
    dealloc: |h| unsafe {
        drop(Box::from_raw(body_ptr(h)));
    },
};

/// `s2ref_create` (§4.9): wraps `ptr`, calling `finalizer(ptr)` when the
/// reference's counts reach zero.
pub fn create(ptr: *mut std::ffi::c_void, finalizer: Finalizer) -> Handle {
    create_inner(ptr, Some(finalizer))
}

/// `s2ref_create_weakref` (§4.9): wraps `ptr` with no finalizer — a weak
/// reference whose pointer is simply forgotten at teardown.
pub fn create_weakref(ptr: *mut std::ffi::c_void) -> Handle {
    create_inner(ptr, None)
}

fn create_inner(ptr: *mut std::ffi::c_void, finalizer: Option<Finalizer>) -> Handle {
    let body = Box::new(ExternalRefBody {
        header: ObjectHeader::new(TypeId::EXTERNAL_REF, &EXTERNAL_REF_VTABLE),
        ptr,
        finalizer,
    });
    let handle = NonNull::new(Box::into_raw(body) as *mut ObjectHeader).unwrap();
    object::register_new(handle);
    handle
}

/// `s2ref_unwrap` (§4.9): retrieves the underlying pointer.
pub fn unwrap(h: Handle) -> *mut std::ffi::c_void {
    unsafe { (*body_ptr(h)).ptr }
}
