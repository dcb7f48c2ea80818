//! Managed-thread registry.
//!
//! Insertion-ordered collection of every live managed thread, the root
//! thread designation, and the parallel list of call-frame locations the
//! collector reads as its root set. The registry owns only the pointers
//! to the slots, not the slots themselves.
//!
//! The registry's own mutex protects only these lists; the heap is
//! protected by the world's quiescence protocol, not by a lock.

use crate::thread::{CallFrame, CallFrameLocation, ManagedThread, ManagedThreadId, ThreadKind};
use parking_lot::Mutex;
use std::sync::Arc;

struct RegistryInner {
    /// Live threads, in registration order.
    threads: Vec<Arc<ManagedThread>>,

    /// Call-frame slots of the VM threads, in registration order. This is
    /// the collector's root-pointer list.
    cf_locations: Vec<CallFrameLocation>,

    /// The first VM thread ever registered. The designation survives the
    /// root thread's removal.
    root_thread: Option<ManagedThreadId>,
}

/// Registry of live managed threads.
pub struct ThreadRegistry {
    inner: Mutex<RegistryInner>,
}

impl ThreadRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                threads: Vec::new(),
                cf_locations: Vec::new(),
                root_thread: None,
            }),
        }
    }

    /// Append a thread. VM threads contribute their call-frame slot to
    /// the root-pointer list, and the first one registered becomes root.
    /// The record arrives in the dependent state.
    pub(crate) fn add(&self, thread: &Arc<ManagedThread>) {
        let mut inner = self.inner.lock();

        if thread.kind() == ThreadKind::Vm {
            inner.cf_locations.push(thread.call_frame_location());
            if inner.root_thread.is_none() {
                inner.root_thread = Some(thread.id());
            }
        }

        inner.threads.push(Arc::clone(thread));
    }

    /// Remove a thread and, for VM threads, its slot from the
    /// root-pointer list. The record itself is not torn down here.
    pub(crate) fn remove(&self, thread: &ManagedThread) {
        let mut inner = self.inner.lock();

        if thread.kind() == ThreadKind::Vm {
            let location = thread.call_frame_location();
            inner.cf_locations.retain(|l| *l != location);
        }

        inner.threads.retain(|t| t.id() != thread.id());
    }

    /// Discard every record except `survivor`'s. Used by the post-fork
    /// child, where the other records refer to threads that only exist in
    /// the parent.
    pub(crate) fn retain_only(&self, survivor: ManagedThreadId) {
        let mut inner = self.inner.lock();

        inner.threads.retain(|t| t.id() == survivor);
        let keep = inner
            .threads
            .first()
            .map(|t| t.call_frame_location());
        inner
            .cf_locations
            .retain(|l| Some(*l) == keep);
    }

    /// Snapshot of the live threads, in registration order.
    pub fn threads(&self) -> Vec<Arc<ManagedThread>> {
        self.inner.lock().threads.clone()
    }

    /// Snapshot of the root-pointer list, in registration order. Only
    /// meaningful to the collector while the world is stopped.
    ///
    /// The snapshot holds the owning thread records, so its locations
    /// stay readable even if a thread unregisters and drops its own
    /// handle while the snapshot is still being walked.
    pub fn root_snapshot(&self) -> RootSnapshot {
        let inner = self.inner.lock();
        RootSnapshot {
            threads: inner
                .threads
                .iter()
                .filter(|t| t.kind() == ThreadKind::Vm)
                .cloned()
                .collect(),
            locations: inner.cf_locations.clone(),
        }
    }

    /// The designated root thread, if one was ever registered.
    pub fn root_thread(&self) -> Option<ManagedThreadId> {
        self.inner.lock().root_thread
    }

    /// Number of live threads.
    pub fn len(&self) -> usize {
        self.inner.lock().threads.len()
    }

    /// Whether no threads are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the collector's root-pointer list.
///
/// Built under the registry lock. Every location's owning record is held
/// by the snapshot, which is what makes `frames` safe to call.
pub struct RootSnapshot {
    /// The VM-thread records backing `locations`.
    threads: Vec<Arc<ManagedThread>>,

    /// Call-frame slots, in registration order.
    locations: Vec<CallFrameLocation>,
}

impl RootSnapshot {
    /// The call-frame locations, in registration order.
    pub fn locations(&self) -> &[CallFrameLocation] {
        &self.locations
    }

    /// The thread records pinned by this snapshot, in registration order.
    pub fn threads(&self) -> &[Arc<ManagedThread>] {
        &self.threads
    }

    /// Read every published frame pointer, in registration order.
    pub fn frames(&self) -> impl Iterator<Item = *mut CallFrame> + '_ {
        // SAFETY: the snapshot holds the owning records alive.
        self.locations.iter().map(|l| unsafe { l.load() })
    }

    /// Number of root locations.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Whether the snapshot has no root locations.
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::shared_state::SharedState;

    #[test]
    fn test_first_vm_thread_becomes_root() {
        let shared = SharedState::new(VmConfig::default());
        assert_eq!(shared.registry().root_thread(), None);

        let main = shared.new_vm("main");
        let worker = shared.new_vm("worker");
        assert_eq!(shared.registry().root_thread(), Some(main.id()));

        // Root designation survives removal.
        shared.remove_vm(&main);
        assert_eq!(shared.registry().root_thread(), Some(main.id()));

        shared.remove_vm(&worker);
    }

    #[test]
    fn test_registration_order_is_preserved() {
        let shared = SharedState::new(VmConfig::default());
        let a = shared.new_vm("a");
        let b = shared.new_vm("b");
        let c = shared.new_vm("c");

        let ids: Vec<_> = shared
            .registry()
            .threads()
            .iter()
            .map(|t| t.id())
            .collect();
        assert_eq!(ids, vec![a.id(), b.id(), c.id()]);

        shared.remove_vm(&b);
        let ids: Vec<_> = shared
            .registry()
            .threads()
            .iter()
            .map(|t| t.id())
            .collect();
        assert_eq!(ids, vec![a.id(), c.id()]);

        shared.remove_vm(&a);
        shared.remove_vm(&c);
    }

    #[test]
    fn test_external_threads_have_no_root_slot() {
        let shared = SharedState::new(VmConfig::default());

        let agent = shared.add_managed_thread("agent");
        assert_eq!(shared.registry().len(), 1);
        assert!(shared.registry().root_snapshot().is_empty());
        // External threads never become root.
        assert_eq!(shared.registry().root_thread(), None);

        shared.remove_managed_thread(&agent);
        assert!(shared.registry().is_empty());
    }

    #[test]
    fn test_remove_drops_the_call_frame_slot() {
        let shared = SharedState::new(VmConfig::default());
        let a = shared.new_vm("a");
        let b = shared.new_vm("b");

        assert_eq!(shared.registry().root_snapshot().len(), 2);

        shared.remove_vm(&a);
        let snapshot = shared.registry().root_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.locations()[0], b.call_frame_location());
        assert_eq!(snapshot.threads()[0].name(), "b");

        shared.remove_vm(&b);
    }

    #[test]
    fn test_snapshot_outlives_thread_removal() {
        let shared = SharedState::new(VmConfig::default());
        let main = shared.new_vm("main");
        let worker = shared.new_vm("worker");

        let fake = 0x2000usize as *mut crate::thread::CallFrame;
        worker.set_call_frame(fake);

        let snapshot = shared.registry().root_snapshot();

        // The worker unregisters and its last handle drops while the
        // snapshot is still being walked.
        shared.remove_vm(&worker);
        drop(worker);

        let frames: Vec<_> = snapshot.frames().collect();
        assert_eq!(frames, vec![std::ptr::null_mut(), fake]);

        shared.remove_vm(&main);
    }
}
