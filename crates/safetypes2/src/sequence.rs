//! Sequence container (C9): a cursor-bearing doubly-linked list bracketed
//! by permanent head/tail sentinels.
//!
//! Grounded in `original_source/src/s2list.c`/`s2list.h`'s
//! `s2ctx_list_element`/`s2ctx_list` layout and operations. The C source
//! resolves an ambiguity the distilled spec's prose glosses over: `insert`
//! links the new node in before the cursor and then moves the cursor to
//! point at that new node (`position` unchanged — the new node takes over
//! the old cursor's slot), while `push` links the new node in the same way
//! but leaves the cursor on its original target and increments `position`
//! instead — so a sequence of `push` calls with the cursor parked at the
//! tail sentinel builds up in call order, matching an append. `pop` is
//! kept for interface compatibility per the source's own "redundant and
//! anti-logical" note (§9's Open Questions), not removed.

use std::ptr::NonNull;

use crate::error::{AccessResult, SafeTypesError, SeekWhence, SetterSemantics};
use crate::iter::{IterCreateFn, IterItem, IterKey, ObjectIterator};
use crate::object::{self, Handle, ObjectHeader, ObjectVTable};
use crate::types::TypeId;

/// An internal list node. Sentinels (`head`/`tail`) have `value == None`;
/// every other node holds a kept [`Handle`] reference to its payload.
struct Node {
    prev: Option<NonNull<Node>>,
    next: Option<NonNull<Node>>,
    value: Option<Handle>,
}

/// A sequence's payload, allocated immediately after its [`ObjectHeader`].
struct SequenceBody {
    header: ObjectHeader,
    head: NonNull<Node>,
    tail: NonNull<Node>,
    cursor: NonNull<Node>,
    position: usize,
    length: usize,
}

fn new_node(value: Option<Handle>) -> NonNull<Node> {
    let boxed = Box::new(Node { prev: None, next: None, value });
    NonNull::new(Box::into_raw(boxed)).unwrap()
}

fn body_ptr(h: Handle) -> *mut SequenceBody {
    h.as_ptr() as *mut SequenceBody
}

struct SequenceIter {
    cur: Option<NonNull<Node>>,
    tail: NonNull<Node>,
    index: usize,
}

impl ObjectIterator for SequenceIter {
    fn next(&mut self) -> Option<IterItem> {
        loop {
            let cur = self.cur?;
            if cur == self.tail {
                self.cur = None;
                return None;
            }
            let node = unsafe { &*cur.as_ptr() };
            self.cur = node.next;
            let idx = self.index;
            self.index += 1;
            if let Some(value) = node.value {
                return Some(IterItem { key: IterKey::Index(idx), value });
            }
        }
    }
}

fn iter_create(h: Handle) -> Option<Box<dyn ObjectIterator>> {
    let body = unsafe { &*body_ptr(h) };
    let first = unsafe { (*body.head.as_ptr()).next };
    Some(Box::new(SequenceIter { cur: first, tail: body.tail, index: 0 }))
}

const SEQUENCE_ITER_CREATE: IterCreateFn = iter_create;

static SEQUENCE_VTABLE: ObjectVTable = ObjectVTable {
    iter_create: Some(SEQUENCE_ITER_CREATE),
    finalize: |h| {
        let body = unsafe { &mut *body_ptr(h) };
        let mut cur = unsafe { (*body.head.as_ptr()).next };
        while let Some(n) = cur {
            if n == body.tail {
                break;
            }
            let node = unsafe { &*n.as_ptr() };
            if let Some(v) = node.value {
                unsafe { object::leave(v) };
            }
            cur = node.next;
        }
    },
    dealloc: |h| unsafe {
        let body = &mut *body_ptr(h);
        let mut cur = Some(body.head);
        while let Some(n) = cur {
            let next = (*n.as_ptr()).next;
            drop(Box::from_raw(n.as_ptr()));
            cur = next;
        }
        drop(Box::from_raw(body_ptr(h)));
    },
};

/// Creates an empty sequence. The cursor starts at position 0, pointed at
/// the tail sentinel (i.e. "end").
pub fn create() -> Handle {
    let head = new_node(None);
    let tail = new_node(None);
    unsafe {
        (*head.as_ptr()).next = Some(tail);
        (*tail.as_ptr()).prev = Some(head);
    }
    let body = Box::new(SequenceBody {
        header: ObjectHeader::new(TypeId::SEQUENCE, &SEQUENCE_VTABLE),
        head,
        tail,
        cursor: tail,
        position: 0,
        length: 0,
    });
    let handle = NonNull::new(Box::into_raw(body) as *mut ObjectHeader).unwrap();
    object::register_new(handle);
    handle
}

/// Splices `node` in immediately before `before`, relinking both sides.
fn link_before(node: NonNull<Node>, before: NonNull<Node>) {
    unsafe {
        let p = (*before.as_ptr()).prev.unwrap();
        (*p.as_ptr()).next = Some(node);
        (*node.as_ptr()).prev = Some(p);
        (*node.as_ptr()).next = Some(before);
        (*before.as_ptr()).prev = Some(node);
    }
}

fn unlink(node: NonNull<Node>) {
    unsafe {
        let p = (*node.as_ptr()).prev.unwrap();
        let n = (*node.as_ptr()).next.unwrap();
        (*p.as_ptr()).next = Some(n);
        (*n.as_ptr()).prev = Some(p);
    }
}

/// `insert(seq, obj, semantic)` (§4.8): creates a new node holding `obj`,
/// links it in immediately before the cursor, and moves the cursor to that
/// new node. `position` is left unchanged — the new node takes over the
/// cursor's old slot.
pub fn insert(h: Handle, obj: Handle, semantics: SetterSemantics) {
    let body = unsafe { &mut *body_ptr(h) };
    unsafe { object::discharge_setter(obj, semantics) };
    let node = new_node(Some(obj));
    link_before(node, body.cursor);
    body.cursor = node;
    body.length += 1;
}

/// `push(seq, obj, semantic)` (§4.8): creates a new node holding `obj` and
/// links it in immediately before the cursor — like `insert` — but, unlike
/// `insert`, leaves the cursor pointing at its original target and instead
/// advances `position` by one. With the cursor parked at the tail
/// sentinel, repeated `push` calls therefore build up a sequence in call
/// order (each new element lands right before the still-unmoved cursor).
pub fn push(h: Handle, obj: Handle, semantics: SetterSemantics) {
    let body = unsafe { &mut *body_ptr(h) };
    unsafe { object::discharge_setter(obj, semantics) };
    let node = new_node(Some(obj));
    link_before(node, body.cursor);
    body.length += 1;
    body.position += 1;
}

/// `shift(seq, out)` (§4.8): removes the element at the cursor; the cursor
/// now points to the next element. Transfers ownership out: internally
/// `keep` -> `retain`, then drops the container's `kept_count`.
pub fn shift(h: Handle) -> Option<Handle> {
    let body = unsafe { &mut *body_ptr(h) };
    if body.length == 0 || body.position >= body.length {
        return None;
    }
    let node = body.cursor;
    let value = unsafe { (*node.as_ptr()).value.unwrap() };
    let next = unsafe { (*node.as_ptr()).next.unwrap() };
    unlink(node);
    unsafe { drop(Box::from_raw(node.as_ptr())) };
    body.cursor = next;
    body.length -= 1;
    unsafe {
        object::retain(value);
        object::leave(value);
    }
    Some(value)
}

/// `pop(seq, out)` (§4.8): backs the cursor up by one, then `shift`s — so
/// the element immediately before the original cursor position is removed
/// and the cursor ends up back where it started.
pub fn pop(h: Handle) -> Option<Handle> {
    let body = unsafe { &mut *body_ptr(h) };
    if body.length == 0 || body.position == 0 || body.length < body.position {
        return None;
    }
    body.position -= 1;
    body.cursor = unsafe { (*body.cursor.as_ptr()).prev.unwrap() };
    shift(h)
}

/// `get(seq, out)` (§4.8): read without mutation; no count changes.
pub fn get(h: Handle) -> Option<Handle> {
    let body = unsafe { &*body_ptr(h) };
    if body.position >= body.length {
        return None;
    }
    unsafe { (*body.cursor.as_ptr()).value }
}

/// `put(seq, obj, semantic)` (§4.8): replaces the element at the cursor.
pub fn put(h: Handle, obj: Handle, semantics: SetterSemantics) -> AccessResult {
    let body = unsafe { &mut *body_ptr(h) };
    if body.position >= body.length {
        return AccessResult::Error;
    }
    unsafe { object::discharge_setter(obj, semantics) };
    let old = unsafe { (*body.cursor.as_ptr()).value.replace(obj) };
    if let Some(old) = old {
        unsafe { object::leave(old) };
    }
    AccessResult::Success
}

/// `seek(seq, offset, whence)` (§4.8): repositions the cursor; returns the
/// new position, or an error if the target is out of `[0, length]`.
/// `End` additionally requires `offset <= 0`, matching
/// `original_source/src/s2list.c`'s `s2list_seek` (seeking forward past
/// the end via `END` is never valid, unlike `SET`/`CUR`).
pub fn seek(h: Handle, offset: isize, whence: SeekWhence) -> Result<usize, SafeTypesError> {
    let body = unsafe { &mut *body_ptr(h) };
    let target = match whence {
        SeekWhence::Set => offset,
        SeekWhence::End => {
            if offset > 0 {
                return Err(SafeTypesError::OutOfRange(offset, body.length));
            }
            body.length as isize + offset
        }
        SeekWhence::Cur => body.position as isize + offset,
    };
    if target < 0 || target as usize > body.length {
        return Err(SafeTypesError::OutOfRange(target, body.length));
    }
    let target = target as usize;

    // Walk from whichever sentinel (or the current cursor, for `Cur`) is
    // closest, stepping one node at a time. The head branch starts at
    // `head.next` (the first real element, or `tail` itself on an empty
    // list), matching `s2list_seek`'s own `anch_head.next` starting point —
    // starting at `head` itself is off by one, since `head` carries no
    // value and doesn't correspond to any valid cursor position.
    let from_head = !matches!(whence, SeekWhence::Cur) && target <= body.length - target;
    let mut node = match whence {
        SeekWhence::Cur => body.cursor,
        _ if from_head => unsafe { (*body.head.as_ptr()).next.unwrap() },
        _ => body.tail,
    };
    match whence {
        SeekWhence::Cur => {
            let mut steps = offset;
            while steps > 0 {
                node = unsafe { (*node.as_ptr()).next.unwrap() };
                steps -= 1;
            }
            while steps < 0 {
                node = unsafe { (*node.as_ptr()).prev.unwrap() };
                steps += 1;
            }
        }
        _ => {
            if from_head {
                for _ in 0..target {
                    node = unsafe { (*node.as_ptr()).next.unwrap() };
                }
            } else {
                for _ in 0..(body.length - target) {
                    node = unsafe { (*node.as_ptr()).prev.unwrap() };
                }
            }
        }
    }
    body.cursor = node;
    body.position = target;
    Ok(target)
}

/// `sort(seq, less)` (§4.8): stable insertion sort using a caller-supplied
/// less-than predicate. O(n^2) worst case; documented tradeoff.
///
/// Detaches the existing chain and rebuilds it by repeatedly scanning the
/// (initially empty) sorted portion from the front and splicing each
/// element into place — exactly the algorithm `original_source/src/
/// s2list.c`'s `s2list_sort` documents (chosen for O(1) auxiliary space
/// over an O(n log n) algorithm needing extra storage). Where the C source
/// leaves its internal walking cursor dangling past the list's end once
/// sorting completes, this port instead parks the cursor at the sorted
/// list's head (`position = 0`) — a deliberate safety-motivated deviation,
/// since a dangling cursor would be undefined behavior in Rust.
pub fn sort(h: Handle, less: impl Fn(Handle, Handle) -> bool) {
    let body = unsafe { &mut *body_ptr(h) };
    let n = body.length;
    if n <= 1 {
        return;
    }
    let old_head = unsafe { (*body.head.as_ptr()).next.unwrap() };
    unsafe {
        (*body.head.as_ptr()).next = Some(body.tail);
        (*body.tail.as_ptr()).prev = Some(body.head);
    }

    let mut remaining = n;
    let mut cur = old_head;
    while remaining > 0 {
        let next = unsafe { (*cur.as_ptr()).next.unwrap() };
        let cur_value = unsafe { (*cur.as_ptr()).value.unwrap() };

        let mut o = unsafe { (*body.head.as_ptr()).next.unwrap() };
        while o != body.tail {
            let o_value = unsafe { (*o.as_ptr()).value.unwrap() };
            // `<=` (i.e. !less(cur, o)) keeps scanning, preserving the
            // relative order of equal elements (stability).
            if less(cur_value, o_value) {
                break;
            }
            o = unsafe { (*o.as_ptr()).next.unwrap() };
        }
        link_before(cur, o);
        cur = next;
        remaining -= 1;
    }

    body.cursor = unsafe { (*body.head.as_ptr()).next.unwrap() };
    body.position = 0;
}

/// Current cursor position, `[0, length]`.
pub fn position(h: Handle) -> usize {
    unsafe { (*body_ptr(h)).position }
}

/// Current element count.
pub fn length(h: Handle) -> usize {
    unsafe { (*body_ptr(h)).length }
}
