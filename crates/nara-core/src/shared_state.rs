//! Process-wide shared state.
//!
//! `SharedState` is the container every managed thread hangs off of: the
//! world-coordination object, the thread registry, the interrupt flags,
//! the preemption timer, and configuration. It is the runtime's lifetime
//! anchor: construction hands out an `Arc`, each registered thread record
//! holds one, and teardown runs when the last handle drops.

use crate::config::VmConfig;
use crate::interrupts::Interrupts;
use crate::preempt::PreemptionTimer;
use crate::registry::ThreadRegistry;
use crate::thread::{ManagedThread, ManagedThreadId, ThreadKind};
use crate::world::WorldState;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// The process-wide runtime state.
pub struct SharedState {
    /// Set by `initialize` once the runtime is fully booted; teardown
    /// effects only run for an initialized runtime.
    initialized: AtomicBool,

    world: WorldState,
    registry: ThreadRegistry,
    interrupts: Arc<Interrupts>,
    config: VmConfig,
    preemption: PreemptionTimer,

    /// Allocator for managed-thread ids. Id 0 is reserved.
    next_thread_id: AtomicU64,
}

impl SharedState {
    /// Create the shared state. The calling thread is the bootstrap
    /// thread and is already counted as dependent.
    pub fn new(config: VmConfig) -> Arc<Self> {
        Arc::new(Self {
            initialized: AtomicBool::new(false),
            world: WorldState::new(),
            registry: ThreadRegistry::new(),
            interrupts: Arc::new(Interrupts::new()),
            config,
            preemption: PreemptionTimer::new(),
            next_thread_id: AtomicU64::new(1),
        })
    }

    /// Mark the runtime fully booted.
    pub fn initialize(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// The world-coordination object.
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// The managed-thread registry.
    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    /// The interrupt flags shared with dispatch loops.
    pub fn interrupts(&self) -> &Arc<Interrupts> {
        &self.interrupts
    }

    /// The runtime configuration.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    fn alloc_thread_id(&self) -> ManagedThreadId {
        ManagedThreadId::from_u64(self.next_thread_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate and register a VM thread record.
    ///
    /// The record arrives dependent, its call-frame slot joins the
    /// collector's root-pointer list, and the first VM thread registered
    /// becomes the root thread. The returned handle (and the registry's)
    /// keeps the runtime alive.
    pub fn new_vm(self: &Arc<Self>, name: &str) -> Arc<ManagedThread> {
        let thread = ManagedThread::new(
            self.alloc_thread_id(),
            name.to_string(),
            ThreadKind::Vm,
            Arc::clone(self),
        );
        self.registry.add(&thread);
        tracing::debug!(id = thread.id().as_u64(), name, "registered vm thread");
        thread
    }

    /// Unregister a VM thread: its slot leaves the root-pointer list and
    /// the registry drops its handle. The record itself is not torn down
    /// here; the caller's stack may still reference it.
    pub fn remove_vm(&self, thread: &ManagedThread) {
        self.registry.remove(thread);
        tracing::debug!(
            id = thread.id().as_u64(),
            name = thread.name(),
            "unregistered vm thread"
        );
    }

    /// Register an externally-owned managed thread (no interpreter
    /// frames, e.g. the query agent's thread).
    pub fn add_managed_thread(self: &Arc<Self>, name: &str) -> Arc<ManagedThread> {
        let thread = ManagedThread::new(
            self.alloc_thread_id(),
            name.to_string(),
            ThreadKind::External,
            Arc::clone(self),
        );
        self.registry.add(&thread);
        thread
    }

    /// Unregister an externally-owned managed thread.
    pub fn remove_managed_thread(&self, thread: &ManagedThread) {
        self.registry.remove(thread);
    }

    /// Quiesce every other managed thread. Caller must be dependent and
    /// holds the episode until `restart_world`.
    pub fn stop_the_world(&self) {
        self.world.wait_til_alone();
    }

    /// End the stop-the-world episode and release every parked thread.
    pub fn restart_world(&self) {
        self.world.wake_all_waiters();
    }

    /// Safepoint poll; see [`WorldState::checkpoint`].
    #[inline(always)]
    pub fn checkpoint(&self) {
        self.world.checkpoint();
    }

    /// Re-enter managed execution; see [`WorldState::become_dependent`].
    pub fn gc_dependent(&self) {
        self.world.become_dependent();
    }

    /// Leave managed execution; see [`WorldState::become_independent`].
    pub fn gc_independent(&self) {
        self.world.become_independent();
    }

    /// Bracket a native region: independent on entry, dependent again
    /// when the guard drops.
    pub fn gc_independent_scope(&self) -> GcIndependentScope<'_> {
        GcIndependentScope::enter(self)
    }

    /// Cumulative nanoseconds stoppers spent waiting for quiescence.
    pub fn time_waiting(&self) -> u64 {
        self.world.time_waiting()
    }

    /// Start the preemption timer. Idempotent.
    pub fn enable_preemption(&self) {
        self.preemption.enable(Arc::clone(&self.interrupts));
    }

    /// Reinitialize after a `fork()`.
    ///
    /// Forces dispatch tracing off (interleaving with the parent's output
    /// would be confusing) and resets the world to a single dependent
    /// thread. Thread records for the parent's other threads must already
    /// have been discarded.
    ///
    /// # Safety
    ///
    /// The caller must be the process's sole thread (the post-fork child
    /// before it spawns anything).
    pub unsafe fn reinit(&self) {
        self.config.set_trace_dispatch(false);
        // SAFETY: forwarded contract.
        unsafe { self.world.reinit() };
    }
}

impl Drop for SharedState {
    fn drop(&mut self) {
        if !self.initialized.load(Ordering::Acquire) {
            return;
        }
        // Teardown happens after every managed thread has exited; a
        // populated registry here means a thread could still touch the
        // runtime we are about to drop.
        debug_assert!(
            self.registry.is_empty(),
            "shared state dropped while managed threads are registered"
        );
        tracing::debug!(
            time_waiting_ns = self.world.time_waiting(),
            "shared state torn down"
        );
    }
}

/// RAII bracket for a native region.
///
/// Entering declares the thread independent; dropping the guard re-enters
/// managed execution (blocking if a stop is in progress). The thread must
/// not touch the heap while the guard is alive.
#[must_use = "dropping the guard immediately re-enters managed execution"]
pub struct GcIndependentScope<'a> {
    shared: &'a SharedState,
}

impl<'a> GcIndependentScope<'a> {
    fn enter(shared: &'a SharedState) -> Self {
        shared.gc_independent();
        Self { shared }
    }
}

impl Drop for GcIndependentScope<'_> {
    fn drop(&mut self) {
        self.shared.gc_dependent();
    }
}
