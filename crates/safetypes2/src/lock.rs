//! Recursive, rewindable reader/writer GC lock (C4).
//!
//! This cannot be a standard `parking_lot::RwLock`: a thread already holding
//! the reader lock must be able to call `collect()` and have the collector
//! actually run, which a normal rwlock's writer acquisition can't do without
//! first releasing the reader lock. The construction here — one mutex, two
//! condition variables, a state variable and two counters (`thr_count`,
//! `gc_pending`) — is exactly the primitive set the design notes call for,
//! ported from `original_source/src/s2obj.c`'s `s2gc_thrd_lock` /
//! `s2gc_thrd_unlock` / `s2gc_gcop_lock` / `s2gc_gcop_unlock`, using
//! `parking_lot::{Mutex, Condvar}` the way the teacher crate's `concurrent`
//! module uses those primitives for its own (differently shaped) mutator
//! coordination.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

#[cfg(feature = "gc_logging")]
use tracing::trace;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum LockState {
    Free,
    GcWaiting,
    GcOperating,
    GcCompleting,
}

struct Inner {
    state: LockState,
    /// Threads currently at reader-lock recursion depth >= 1.
    thr_count: u64,
    /// Reader-holding threads that are also GC-requesters (the rewind set).
    gc_pending: u64,
    /// Number of threads that have entered `collect()` for the in-flight
    /// request and not yet completed the exit handshake.
    gc_waiting: u64,
    /// Single-threaded mode: disables all coordination, `collect()`
    /// transitions state directly.
    threaded: bool,
}

pub struct GcLock {
    inner: Mutex<Inner>,
    /// Signaled when a reader may attempt to (re)acquire the reader lock,
    /// and on full collector-exit broadcast.
    cv_threads: Condvar,
    /// Signaled on every GC state-machine transition.
    cv_gc: Condvar,
}

thread_local! {
    static RECURSION: Cell<u32> = const { Cell::new(0) };
}

/// True exactly while the sole collector thread is running the mark-sweep
/// algorithm (state == GcOperating). Read by `object::destroy` to decide
/// whether memory reclamation happens immediately or is deferred to sweep.
static GC_OPERATING: AtomicBool = AtomicBool::new(false);

pub(crate) fn is_collector_running() -> bool {
    GC_OPERATING.load(Ordering::Acquire)
}

impl GcLock {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LockState::Free,
                thr_count: 0,
                gc_pending: 0,
                gc_waiting: 0,
                threaded: true,
            }),
            cv_threads: Condvar::new(),
            cv_gc: Condvar::new(),
        }
    }

    /// Disables the reader/writer coordination entirely; `collect()` then
    /// transitions directly to gc-operating and back. Only valid before any
    /// thread but the current one has touched the object system.
    pub fn set_threading_enabled(&self, enabled: bool) {
        let mut g = self.inner.lock();
        g.threaded = enabled;
    }

    /// Acquires the reader lock, recursively. A thread may call this while
    /// already holding the lock (nesting depth up to whatever the
    /// application needs); the shared `thr_count` only moves on the 0->1 and
    /// 1->0 recursion transitions.
    pub fn reader_lock(&self) {
        let depth = RECURSION.get();
        if depth == 0 {
            let mut g = self.inner.lock();
            while !matches!(g.state, LockState::Free | LockState::GcWaiting) {
                self.cv_threads.wait(&mut g);
            }
            g.thr_count += 1;
        }
        RECURSION.set(depth + 1);
    }

    /// Releases one level of reader-lock recursion.
    pub fn reader_unlock(&self) {
        let depth = RECURSION.get();
        assert!(depth > 0, "reader_unlock called without a matching reader_lock");
        RECURSION.set(depth - 1);
        if depth == 1 {
            let mut g = self.inner.lock();
            g.thr_count -= 1;
            if g.state == LockState::GcWaiting && g.gc_pending == g.thr_count {
                self.cv_gc.notify_all();
            }
        }
    }

    /// Runs `collector` with exclusive access to every object, implementing
    /// the full collector-entry / collector-exit protocol from §4.3,
    /// including the rewind property for a thread that already holds the
    /// reader lock.
    pub fn collect(&self, collector: impl FnOnce()) {
        let mut g = self.inner.lock();

        if !g.threaded {
            g.state = LockState::GcOperating;
            GC_OPERATING.store(true, Ordering::Release);
            drop(g);
            collector();
            GC_OPERATING.store(false, Ordering::Release);
            g = self.inner.lock();
            g.state = LockState::Free;
            return;
        }

        let was_holding_reader = RECURSION.get() > 0;

        // --- Collector entry ---
        if g.state == LockState::Free {
            g.state = LockState::GcWaiting;
        }
        g.gc_waiting += 1;
        if was_holding_reader {
            g.gc_pending += 1;
        }
        self.cv_gc.notify_all();

        while g.gc_pending != g.thr_count {
            self.cv_gc.wait(&mut g);
        }

        let is_operator = g.state == LockState::GcWaiting;
        if is_operator {
            g.state = LockState::GcOperating;
            GC_OPERATING.store(true, Ordering::Release);
            self.cv_gc.notify_all();
            #[cfg(feature = "gc_logging")]
            trace!("gc lock: elected operator, thr_count={}", g.thr_count);
        }
        drop(g);

        if is_operator {
            collector();
            GC_OPERATING.store(false, Ordering::Release);
            g = self.inner.lock();
        } else {
            g = self.inner.lock();
            while g.state == LockState::GcOperating {
                self.cv_gc.wait(&mut g);
            }
        }

        // --- Collector exit --- (every participant, operator or not, runs
        // this same handshake so the whole request is atomic as observed by
        // mutators: §4.3 "Collector exit".)
        g.state = LockState::GcCompleting;
        g.gc_waiting -= 1;
        self.cv_gc.notify_all();
        while g.gc_waiting != 0 {
            self.cv_gc.wait(&mut g);
        }
        if was_holding_reader {
            g.gc_pending -= 1;
        }
        g.state = LockState::Free;
        self.cv_gc.notify_all();
        self.cv_threads.notify_all();
    }
}

impl Default for GcLock {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_LOCK: GcLock = GcLock::new();

pub fn global_lock() -> &'static GcLock {
    &GLOBAL_LOCK
}

pub fn thread_reader_lock() {
    global_lock().reader_lock();
}

pub fn thread_reader_unlock() {
    global_lock().reader_unlock();
}

pub fn set_threading_enabled(enabled: bool) {
    global_lock().set_threading_enabled(enabled);
}

pub fn collect() {
    global_lock().collect(|| crate::collector::run());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn reader_lock_nests_within_one_thread() {
        let lock = Arc::new(GcLock::new());
        lock.reader_lock();
        lock.reader_lock();
        lock.reader_unlock();
        lock.reader_unlock();
    }

    #[test]
    fn collect_runs_the_given_closure_exactly_once() {
        let lock = GcLock::new();
        let mut ran = 0;
        lock.collect(|| ran += 1);
        assert_eq!(ran, 1);
    }

    #[test]
    fn rewind_allows_collect_from_within_a_reader_lock() {
        let lock = Arc::new(GcLock::new());
        lock.reader_lock();
        lock.collect(|| {});
        lock.reader_unlock();
    }

    #[test]
    fn concurrent_readers_and_collectors_never_deadlock() {
        let lock = Arc::new(GcLock::new());
        let mut handles = Vec::new();
        for _ in 0..5 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    if i % 7 == 0 {
                        lock.reader_lock();
                        lock.collect(|| {});
                        lock.reader_unlock();
                    } else if i % 3 == 0 {
                        lock.collect(|| {});
                    } else {
                        lock.reader_lock();
                        lock.reader_lock();
                        lock.reader_unlock();
                        lock.reader_unlock();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
