//! Preemption timer.
//!
//! A dedicated OS thread that periodically raises the timer interrupt
//! flag so that running threads reach a checkpoint promptly. Without this
//! poke, a tight compute loop between checkpoints could delay a
//! stop-the-world episode arbitrarily.
//!
//! The thread masks all signals on entry so the kernel never targets it
//! for delivery, and it never terminates: it is torn down by process exit.

use crate::defaults::PREEMPT_INTERVAL;
use crate::interrupts::Interrupts;
use std::process;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Owner of the at-most-once preemption timer thread.
pub struct PreemptionTimer {
    started: AtomicBool,
}

impl PreemptionTimer {
    /// Create a timer that has not been started yet.
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
        }
    }

    /// Whether the timer thread has been started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Start the timer thread and enable preemption. Idempotent: at most
    /// one thread is ever created per runtime.
    ///
    /// Exits the process if the OS refuses to create the thread; the
    /// runtime cannot honor its checkpoint-latency bound without it.
    pub fn enable(&self, interrupts: Arc<Interrupts>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let ints = Arc::clone(&interrupts);
        let spawned = thread::Builder::new()
            .name("nara-preempt-timer".to_string())
            .spawn(move || Self::timer_loop(ints));

        if let Err(err) = spawned {
            tracing::error!("unable to create preemption timer thread: {err}");
            process::exit(1);
        }

        interrupts.set_enable_preempt(true);
    }

    /// Runs forever, raising the timer interrupt flag every tick.
    fn timer_loop(interrupts: Arc<Interrupts>) -> ! {
        // This thread must never be chosen for signal delivery.
        mask_all_signals();

        loop {
            thread::sleep(PREEMPT_INTERVAL);
            if interrupts.preempt_enabled() {
                interrupts.set_timer();
            }
        }
    }
}

impl Default for PreemptionTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Block every signal on the calling thread; aborts if the mask cannot
/// be installed.
fn mask_all_signals() {
    // SAFETY: sigset_t is plain data; sigfillset and pthread_sigmask only
    // touch the set and the calling thread's mask.
    unsafe {
        let mut mask: libc::sigset_t = std::mem::zeroed();
        if libc::sigfillset(&mut mask) != 0
            || libc::pthread_sigmask(libc::SIG_SETMASK, &mask, ptr::null_mut()) != 0
        {
            process::abort();
        }
    }
}
