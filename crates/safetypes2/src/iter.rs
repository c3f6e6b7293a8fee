//! Uniform traversal surface (C6) consumed by the collector and available
//! to application code for read-only enumeration of a container's children.
//!
//! Iterators do not retain or keep the items they surface: they are valid
//! only within the time-slice of the reader lock the caller already holds.

use crate::object::Handle;

/// One step of iteration. `key` is an opaque per-container key: the
/// sequence encodes the element's 0-based index, the map encodes the
/// element's key blob.
pub enum IterKey {
    Index(usize),
    MapKey(Handle),
}

pub struct IterItem {
    pub key: IterKey,
    pub value: Handle,
}

/// Implemented by the iterator a container's `iter_create` capability
/// produces. `next` returns `Some(item)` on success and `None` at end;
/// there is no error case at this layer (errors are reported by
/// `iter_create` itself, which returns `Option`).
pub trait ObjectIterator {
    fn next(&mut self) -> Option<IterItem>;
}

/// Blanket type-erased form stored in the header's vtable.
pub type IterCreateFn = unsafe fn(Handle) -> Option<Box<dyn ObjectIterator>>;
