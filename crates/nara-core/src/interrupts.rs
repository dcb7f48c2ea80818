//! Interrupt flags shared between the preemption timer and dispatch loops.

use std::sync::atomic::{AtomicBool, Ordering};

/// Advisory interrupt flags for the running threads.
///
/// The preemption timer sets `timer`; dispatch loops poll it between
/// instruction bursts and reach a checkpoint shortly after observing it
/// set. All flags are relaxed atomics: a delayed observation only delays
/// the next checkpoint by one burst.
#[derive(Debug, Default)]
pub struct Interrupts {
    /// Whether the preemption timer should raise the timer flag at all.
    enable_preempt: AtomicBool,

    /// Set by the preemption timer; consumed by dispatch loops.
    timer: AtomicBool,
}

impl Interrupts {
    /// Create a new flag set with preemption disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable preemption-timer ticks.
    pub fn set_enable_preempt(&self, enabled: bool) {
        self.enable_preempt.store(enabled, Ordering::Relaxed);
    }

    /// Whether the preemption timer is currently raising ticks.
    pub fn preempt_enabled(&self) -> bool {
        self.enable_preempt.load(Ordering::Relaxed)
    }

    /// Raise the timer interrupt flag.
    pub fn set_timer(&self) {
        self.timer.store(true, Ordering::Relaxed);
    }

    /// Whether the timer interrupt flag is raised.
    pub fn timer_expired(&self) -> bool {
        self.timer.load(Ordering::Relaxed)
    }

    /// Acknowledge the timer interrupt flag.
    pub fn clear_timer(&self) {
        self.timer.store(false, Ordering::Relaxed);
    }
}
