//! Managed-thread records.
//!
//! A `ManagedThread` is the registry's record of one thread that may
//! touch the runtime's heap. VM-kind records carry a call-frame slot that
//! the collector reads as part of its root set; external-kind records
//! (e.g. the query agent's thread) do not.

use crate::shared_state::SharedState;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// Identifier for a managed thread, stable for the record's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagedThreadId(u64);

impl ManagedThreadId {
    pub(crate) fn from_u64(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Opaque interpreter call frame.
///
/// The coordination core only transports frame addresses for the
/// collector's root set; it never dereferences them.
#[repr(C)]
pub struct CallFrame {
    _opaque: [u8; 0],
}

/// Which kind of thread a registry record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    /// A thread executing managed code, with interpreter frames of its
    /// own. Its call-frame slot is on the collector's root-pointer list.
    Vm,
    /// An externally-owned thread that touches the heap but has no
    /// interpreter frames (e.g. the query agent).
    External,
}

/// Registry record for one managed thread.
///
/// The record holds a strong handle on the runtime's `SharedState`, so
/// the runtime outlives every thread still registered or referenced.
pub struct ManagedThread {
    id: ManagedThreadId,
    name: String,
    kind: ThreadKind,

    /// The thread-owned slot the collector reads. The thread publishes
    /// its current top frame here; the registry only borrows the slot's
    /// address.
    call_frame: AtomicPtr<CallFrame>,

    shared: Arc<SharedState>,
}

impl ManagedThread {
    pub(crate) fn new(
        id: ManagedThreadId,
        name: String,
        kind: ThreadKind,
        shared: Arc<SharedState>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            kind,
            call_frame: AtomicPtr::new(std::ptr::null_mut()),
            shared,
        })
    }

    /// This thread's identifier.
    pub fn id(&self) -> ManagedThreadId {
        self.id
    }

    /// This thread's name (diagnostics only).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is a VM thread or an externally-owned one.
    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    /// The runtime this thread belongs to.
    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Publish the thread's current top frame for the collector.
    pub fn set_call_frame(&self, frame: *mut CallFrame) {
        self.call_frame.store(frame, Ordering::Release);
    }

    /// The frame pointer currently published in the slot.
    pub fn call_frame(&self) -> *mut CallFrame {
        self.call_frame.load(Ordering::Acquire)
    }

    /// Address of the thread-owned frame slot.
    ///
    /// Valid for the life of this record; the registry keeps it on the
    /// collector's root-pointer list while the thread is registered.
    pub fn call_frame_location(&self) -> CallFrameLocation {
        CallFrameLocation(NonNull::from(&self.call_frame))
    }
}

/// Address of a thread's call-frame slot (a pointer to a pointer).
///
/// Equality is identity of the slot address, which is how the registry
/// removes entries. The thread owns the slot; holders of a location only
/// borrow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrameLocation(NonNull<AtomicPtr<CallFrame>>);

impl CallFrameLocation {
    /// Read the frame pointer currently published in the slot.
    ///
    /// # Safety
    ///
    /// The owning [`ManagedThread`] record must still be alive. The
    /// registry only guarantees that while the thread is registered: a
    /// thread may unregister and drop its last handle at any point after
    /// a location was handed out. Collectors should read through a
    /// [`RootSnapshot`](crate::registry::RootSnapshot), which holds the
    /// owning records for exactly this reason.
    pub unsafe fn load(&self) -> *mut CallFrame {
        // SAFETY: the owning record is alive per this function's contract.
        unsafe { self.0.as_ref() }.load(Ordering::Acquire)
    }
}

// SAFETY: the location is an address of an AtomicPtr inside an Arc'd
// record; all access goes through the atomic.
unsafe impl Send for CallFrameLocation {}
unsafe impl Sync for CallFrameLocation {}
