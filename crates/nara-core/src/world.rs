//! Stop-the-world coordination.
//!
//! `WorldState` lets one thread (the stopper, typically the collector)
//! pause every other managed thread at a checkpoint, hold the world
//! quiescent while it works, and then resume them. A managed thread may
//! also declare itself *independent* (outside managed execution, e.g.
//! blocked in a native call) so the stopper does not wait on it.
//!
//! ## Per-thread states
//!
//! - **Dependent**: may touch the heap; counted in `pending_threads`.
//! - **Independent**: must not touch the heap; not counted.
//! - **Parked**: reached a checkpoint during a stop; not counted until the
//!   world restarts.
//!
//! ## Episode timeline
//!
//! 1. The stopper sets `should_stop`, excuses itself from the count, and
//!    waits on `waiting_to_stop`.
//! 2. Each dependent thread reaches a checkpoint, decrements, signals, and
//!    parks on `waiting_to_run`.
//! 3. When the count hits zero the stopper's wait returns. The mutex is
//!    not held during the stopper's work; quiescence is ensured by
//!    `should_stop` plus the parked-until-broadcast invariant.
//! 4. `wake_all_waiters` clears the flag, rejoins the stopper, and
//!    broadcasts.
//!
//! All waits are unbounded: the protocol trusts that every managed thread
//! checkpoints bounded-often, and the preemption timer exists to make that
//! trust hold.

use crate::defaults::STOP_WARN_TIMEOUT;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Fields the world mutex protects.
struct WorldInner {
    /// Threads currently in the dependent state (the stopper included,
    /// until it excuses itself in `wait_til_alone`).
    pending_threads: u32,
}

/// The mutex and both condition variables, grouped so `reinit` can replace
/// them wholesale after a fork.
struct WorldSync {
    lock: Mutex<WorldInner>,
    /// Signalled (one waiter: the stopper) when a thread becomes quiescent.
    waiting_to_stop: Condvar,
    /// Broadcast (many waiters) when the world restarts.
    waiting_to_run: Condvar,
}

impl WorldSync {
    fn fresh() -> Self {
        Self {
            lock: Mutex::new(WorldInner { pending_threads: 1 }),
            waiting_to_stop: Condvar::new(),
            waiting_to_run: Condvar::new(),
        }
    }
}

/// Coordination object for stop-the-world episodes.
///
/// One per runtime instance. Created counting the bootstrap thread as the
/// single dependent thread.
pub struct WorldState {
    /// Replaced in-place by `reinit`; see the safety contract there.
    sync: UnsafeCell<WorldSync>,

    /// Read without the lock in `checkpoint`; written only under the lock.
    /// The mutex and condvars provide the ordering, so relaxed loads are
    /// enough: a stale `false` is corrected at the next checkpoint and a
    /// stale `true` costs one harmless lock acquisition.
    should_stop: AtomicBool,

    /// Cumulative nanoseconds the stopper spent blocked waiting for the
    /// world to quiesce.
    time_waiting: AtomicU64,
}

// SAFETY: `sync` is only written by `reinit`, whose contract requires the
// post-fork child to be the process's sole thread. Every other access goes
// through the shared reference returned by `sync()`.
unsafe impl Send for WorldState {}
unsafe impl Sync for WorldState {}

impl WorldState {
    /// Create a world with the bootstrap thread counted as dependent.
    pub fn new() -> Self {
        Self {
            sync: UnsafeCell::new(WorldSync::fresh()),
            should_stop: AtomicBool::new(false),
            time_waiting: AtomicU64::new(0),
        }
    }

    fn sync(&self) -> &WorldSync {
        // SAFETY: see the struct-level invariant on `sync`.
        unsafe { &*self.sync.get() }
    }

    /// Cumulative stopper-wait time in nanoseconds. Monotonic between
    /// calls to `reinit`.
    pub fn time_waiting(&self) -> u64 {
        self.time_waiting.load(Ordering::Relaxed)
    }

    /// Number of threads currently counted as dependent.
    pub fn pending_threads(&self) -> u32 {
        self.sync().lock.lock().pending_threads
    }

    /// Whether a stop is requested or in progress.
    pub fn is_stopping(&self) -> bool {
        self.should_stop.load(Ordering::Relaxed)
    }

    /// Reset the world after a `fork()`.
    ///
    /// Replaces the mutex and both condition variables with pristine ones
    /// and restores the initial state: one dependent thread (the caller),
    /// no stop in progress, wait-time accumulator zeroed. Thread records
    /// for the parent's other threads must already have been discarded.
    ///
    /// # Safety
    ///
    /// The caller must be the process's sole thread (the post-fork child
    /// before it spawns anything). Any concurrent use of this world is
    /// undefined behavior.
    pub unsafe fn reinit(&self) {
        // Deliberately does not drop the old primitives: the inherited
        // mutex may still appear held by a thread that only exists in the
        // parent.
        unsafe {
            ptr::write(self.sync.get(), WorldSync::fresh());
        }
        self.should_stop.store(false, Ordering::Relaxed);
        self.time_waiting.store(0, Ordering::Relaxed);
    }

    /// Safepoint poll. Hot path: called on every managed thread, often
    /// millions of times per second.
    ///
    /// Reads `should_stop` without the lock and only takes it when a stop
    /// was observed. Returns with the thread still dependent; it may have
    /// parked and resumed in between.
    #[inline(always)]
    pub fn checkpoint(&self) {
        if self.should_stop.load(Ordering::Relaxed) {
            self.park();
        }
    }

    #[cold]
    #[inline(never)]
    fn park(&self) {
        let sync = self.sync();
        let mut inner = sync.lock.lock();
        self.wait_to_run(sync, &mut inner);
    }

    /// Leave managed execution (e.g. before a blocking native call).
    ///
    /// If a stop is in progress the caller first participates in it; the
    /// final decrement never blocks. After return the caller is not
    /// counted, so the stopper will not wait on it, and it must not touch
    /// the heap until `become_dependent` returns.
    pub fn become_independent(&self) {
        let sync = self.sync();
        let mut inner = sync.lock.lock();

        // If someone is waiting on us to stop, stop now.
        if self.should_stop.load(Ordering::Relaxed) {
            self.wait_to_run(sync, &mut inner);
        }

        debug_assert!(
            inner.pending_threads > 0,
            "become_independent called by a thread that is not dependent"
        );
        inner.pending_threads -= 1;
    }

    /// Re-enter managed execution.
    ///
    /// Blocks while a stop is in progress; the loop re-tests the flag
    /// because wakeups may be spurious and another stop can begin
    /// immediately after a broadcast.
    pub fn become_dependent(&self) {
        let sync = self.sync();
        let mut inner = sync.lock.lock();

        while self.should_stop.load(Ordering::Relaxed) {
            sync.waiting_to_run.wait(&mut inner);
        }

        inner.pending_threads += 1;
    }

    /// Initiate a stop-the-world episode. Caller must be dependent.
    ///
    /// Returns with every other live thread parked or independent and
    /// `should_stop` still set: the caller now has exclusive logical
    /// access to managed memory until `wake_all_waiters`.
    pub fn wait_til_alone(&self) {
        let sync = self.sync();
        let mut inner = sync.lock.lock();

        debug_assert!(
            !self.should_stop.load(Ordering::Relaxed),
            "wait_til_alone while another stop is in progress"
        );
        self.should_stop.store(true, Ordering::Relaxed);

        // For ourself..
        debug_assert!(inner.pending_threads > 0);
        inner.pending_threads -= 1;

        let _timer = WaitTimer::start(&self.time_waiting);

        let mut warned = false;
        while inner.pending_threads > 0 {
            let timed_out = sync
                .waiting_to_stop
                .wait_for(&mut inner, STOP_WARN_TIMEOUT)
                .timed_out();
            if timed_out && !warned && inner.pending_threads > 0 {
                tracing::warn!(
                    pending = inner.pending_threads,
                    "world is slow to quiesce; a thread is not reaching checkpoints"
                );
                warned = true;
            }
        }
    }

    /// End a stop-the-world episode: clear the flag, rejoin the count, and
    /// release every parked thread.
    pub fn wake_all_waiters(&self) {
        let sync = self.sync();
        let mut inner = sync.lock.lock();

        debug_assert!(
            self.should_stop.load(Ordering::Relaxed),
            "wake_all_waiters without a stop in progress"
        );
        self.should_stop.store(false, Ordering::Relaxed);

        // For ourself..
        inner.pending_threads += 1;

        sync.waiting_to_run.notify_all();
    }

    /// The single point that converts a dependent thread into a quiescent
    /// waiter and back. Mutex already held.
    fn wait_to_run(&self, sync: &WorldSync, inner: &mut MutexGuard<'_, WorldInner>) {
        debug_assert!(inner.pending_threads > 0);
        inner.pending_threads -= 1;
        sync.waiting_to_stop.notify_one();

        while self.should_stop.load(Ordering::Relaxed) {
            sync.waiting_to_run.wait(inner);
        }

        inner.pending_threads += 1;
    }
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates elapsed wall time into a counter when it goes out of scope.
struct WaitTimer<'a> {
    total: &'a AtomicU64,
    started: Instant,
}

impl<'a> WaitTimer<'a> {
    fn start(total: &'a AtomicU64) -> Self {
        Self {
            total,
            started: Instant::now(),
        }
    }
}

impl Drop for WaitTimer<'_> {
    fn drop(&mut self) {
        self.total
            .fetch_add(self.started.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }
}
