//! Blob container (C7): a resizable byte buffer with small-buffer
//! optimization, map/unmap exposure tracking, and a NUL sentinel for
//! C-string-style consumption.
//!
//! Grounded in `original_source/src/s2data.h`'s documented small-buffer
//! cutoff (19 bytes) and its `[2024-03-06-nul-term]` note on when the
//! sentinel byte is written; the inline-vs-heap split itself follows the
//! same idea `smallvec`-style types in the Rust ecosystem use, expressed by
//! hand here since the layout (header-embedded inline bytes plus a
//! `map_count` and staging area) doesn't map onto an off-the-shelf crate.
//!
//! Owns no child objects: `iter_create` is absent (§4.5).

use std::cmp::Ordering as CmpOrdering;
use std::ptr::NonNull;

use crate::config::BLOB_INLINE_CAPACITY;
use crate::error::SafeTypesError;
use crate::object::{self, Handle, ObjectHeader, ObjectVTable};
use crate::types::TypeId;

enum Storage {
    Inline { buf: [u8; BLOB_INLINE_CAPACITY + 1], len: usize },
    Heap { buf: Vec<u8> },
}

/// A blob's payload, allocated immediately after its [`ObjectHeader`].
struct BlobBody {
    header: ObjectHeader,
    storage: Storage,
    /// Outstanding `map()` exposures; `truncate` is rejected while nonzero.
    map_count: u32,
    /// Byte-by-byte append staging area, flushed by `append_finish`.
    staging: Vec<u8>,
}

static BLOB_VTABLE: ObjectVTable = ObjectVTable {
    iter_create: None,
    finalize: |_h| {},
    dealloc: |h| unsafe {
        let body = h.as_ptr() as *mut BlobBody;
        drop(Box::from_raw(body));
    },
};

fn body_ptr(h: Handle) -> *mut BlobBody {
    h.as_ptr() as *mut BlobBody
}

/// `create(len)` (§4.6): allocates a zero-filled blob of length `len`.
pub fn create(len: usize) -> Handle {
    let storage = if len <= BLOB_INLINE_CAPACITY {
        let mut buf = [0u8; BLOB_INLINE_CAPACITY + 1];
        buf[len] = 0;
        Storage::Inline { buf, len }
    } else {
        let mut v = vec![0u8; len + 1];
        v[len] = 0;
        Storage::Heap { buf: v }
    };
    let body = Box::new(BlobBody {
        header: ObjectHeader::new(TypeId::BLOB, &BLOB_VTABLE),
        storage,
        map_count: 0,
        staging: Vec::new(),
    });
    let handle = NonNull::new(Box::into_raw(body) as *mut ObjectHeader).unwrap();
    object::register_new(handle);
    handle
}

/// `from_cstring(s)` (§4.6): convenience wrapper copying a NUL-free byte
/// slice into a fresh blob of exactly that length.
pub fn from_cstring(s: &[u8]) -> Handle {
    let h = create(s.len());
    let body = unsafe { &mut *body_ptr(h) };
    body_bytes_mut(body)[..s.len()].copy_from_slice(s);
    h
}

fn body_bytes(body: &BlobBody) -> &[u8] {
    match &body.storage {
        Storage::Inline { buf, len } => &buf[..*len],
        Storage::Heap { buf } => &buf[..buf.len() - 1],
    }
}

fn body_bytes_mut(body: &mut BlobBody) -> &mut [u8] {
    match &mut body.storage {
        Storage::Inline { buf, len } => &mut buf[..*len],
        Storage::Heap { buf } => {
            let n = buf.len() - 1;
            &mut buf[..n]
        }
    }
}

/// `length(b)` (§4.6).
pub fn length(h: Handle) -> usize {
    let body = unsafe { &*body_ptr(h) };
    body_bytes(body).len()
}

/// Borrows the blob's content without going through `map`/`unmap`. Used by
/// the map container (C8) to feed key bytes to the digest function; valid
/// only for the duration of the reader lock the caller already holds, same
/// as every other raw-pointer access in this crate.
pub(crate) fn bytes<'a>(h: Handle) -> &'a [u8] {
    let body = unsafe { &*body_ptr(h) };
    body_bytes(body)
}

/// `map(b, offset, len)` (§4.6): range-checked exposure. `offset == length`
/// with `len == 0` succeeds and returns a one-past-end pointer into the NUL
/// sentinel (the relaxed `>` check the design notes resolve in favor of);
/// anything past that fails. The sentinel byte is (re)written here, not
/// lazily, so it is present whenever the caller can observe it — callers
/// must serialize writers externally, same as for the buffer bytes proper.
pub fn map(h: Handle, offset: usize, len: usize) -> Result<NonNull<u8>, SafeTypesError> {
    let body = unsafe { &mut *body_ptr(h) };
    let total = body_bytes(body).len();
    if offset.checked_add(len).map(|end| end > total).unwrap_or(true) {
        return Err(SafeTypesError::OutOfRange(offset as isize, total));
    }
    write_sentinel(body);
    body.map_count += 1;
    let base = match &mut body.storage {
        Storage::Inline { buf, .. } => buf.as_mut_ptr(),
        Storage::Heap { buf } => buf.as_mut_ptr(),
    };
    Ok(unsafe { NonNull::new_unchecked(base.add(offset)) })
}

fn write_sentinel(body: &mut BlobBody) {
    match &mut body.storage {
        Storage::Inline { buf, len } => buf[*len] = 0,
        Storage::Heap { buf } => {
            let last = buf.len() - 1;
            buf[last] = 0;
        }
    }
}

/// `unmap(b)` (§4.6).
pub fn unmap(h: Handle) {
    let body = unsafe { &mut *body_ptr(h) };
    debug_assert!(body.map_count > 0, "unmap without a matching map");
    body.map_count -= 1;
}

/// `weakmap(b)` (§4.6): the buffer pointer without bumping `map_count`.
/// Caller must not resize the blob while holding it.
pub fn weakmap(h: Handle) -> NonNull<u8> {
    let body = unsafe { &mut *body_ptr(h) };
    write_sentinel(body);
    let base = match &mut body.storage {
        Storage::Inline { buf, .. } => buf.as_mut_ptr(),
        Storage::Heap { buf } => buf.as_mut_ptr(),
    };
    unsafe { NonNull::new_unchecked(base) }
}

/// `truncate(b, len)` (§4.6): resizes to `len`, rejected while mapped.
/// Crossings of the small-buffer threshold in either direction are handled.
pub fn truncate(h: Handle, len: usize) -> Result<(), SafeTypesError> {
    let body = unsafe { &mut *body_ptr(h) };
    if body.map_count > 0 {
        return Err(SafeTypesError::BufferMapped(body.map_count));
    }
    let old_len = body_bytes(body).len();
    let keep = old_len.min(len);

    match (&body.storage, len <= BLOB_INLINE_CAPACITY) {
        (Storage::Inline { .. }, true) => {
            if let Storage::Inline { buf, len: cur_len } = &mut body.storage {
                if len > *cur_len {
                    buf[*cur_len..len].fill(0);
                }
                *cur_len = len;
                buf[len] = 0;
            }
        }
        (Storage::Heap { .. }, false) => {
            if let Storage::Heap { buf } = &mut body.storage {
                buf.resize(len + 1, 0);
                buf[len] = 0;
            }
        }
        (Storage::Inline { buf, len: cur_len }, false) => {
            let mut v = vec![0u8; len + 1];
            v[..keep].copy_from_slice(&buf[..keep]);
            let _ = cur_len;
            body.storage = Storage::Heap { buf: v };
        }
        (Storage::Heap { buf }, true) => {
            let mut inline = [0u8; BLOB_INLINE_CAPACITY + 1];
            inline[..keep].copy_from_slice(&buf[..keep]);
            inline[len] = 0;
            body.storage = Storage::Inline { buf: inline, len };
        }
    }
    Ok(())
}

/// `compare(a, b)` (§4.6): lexicographic byte-order total ordering with
/// prefix-shorter-first tiebreak.
pub fn compare(a: Handle, b: Handle) -> CmpOrdering {
    let ab = unsafe { &*body_ptr(a) };
    let bb = unsafe { &*body_ptr(b) };
    body_bytes(ab).cmp(body_bytes(bb))
}

/// `append_byte(b, c)` (§4.6): stages a single byte without reallocating
/// the main buffer per call.
pub fn append_byte(h: Handle, c: u8) {
    let body = unsafe { &mut *body_ptr(h) };
    body.staging.push(c);
}

/// `append_bytes(b, p, n)` (§4.6): stages `p[..n]`.
pub fn append_bytes(h: Handle, p: &[u8]) {
    let body = unsafe { &mut *body_ptr(h) };
    body.staging.extend_from_slice(p);
}

/// `append_finish(b)` (§4.6): flushes the staging buffer into the main
/// buffer. No-op (but cheap) if nothing was staged.
pub fn append_finish(h: Handle) -> Result<(), SafeTypesError> {
    let body = unsafe { &mut *body_ptr(h) };
    if body.staging.is_empty() {
        return Ok(());
    }
    if body.map_count > 0 {
        return Err(SafeTypesError::BufferMapped(body.map_count));
    }
    let staged = std::mem::take(&mut body.staging);
    let old_len = body_bytes(body).len();
    truncate(h, old_len + staged.len())?;
    let body = unsafe { &mut *body_ptr(h) };
    body_bytes_mut(body)[old_len..].copy_from_slice(&staged);
    Ok(())
}
