//! Nara VM world-coordination core
//!
//! This crate provides the runtime machinery that lets one thread pause
//! every other managed thread at a well-defined safepoint:
//! - Stop-the-world protocol (`WorldState`)
//! - Managed-thread registry and the collector's root-pointer list
//! - Preemption timer (bounds checkpoint latency)
//! - Process-wide `SharedState` facade and post-`fork` reinitialization

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod defaults;
pub mod fork;
pub mod interrupts;
pub mod preempt;
pub mod registry;
pub mod shared_state;
pub mod thread;
pub mod world;

pub use config::VmConfig;
pub use fork::{gc_safe_fork, ForkOutcome};
pub use interrupts::Interrupts;
pub use preempt::PreemptionTimer;
pub use registry::{RootSnapshot, ThreadRegistry};
pub use shared_state::{GcIndependentScope, SharedState};
pub use thread::{CallFrame, CallFrameLocation, ManagedThread, ManagedThreadId, ThreadKind};
pub use world::WorldState;

/// VM runtime errors
///
/// The coordination protocol itself has no error channel: contract
/// violations are debug assertions and OS primitive failures abort the
/// process. Only the fork path is fallible.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// fork(2) failed
    #[error("fork failed: {0}")]
    ForkFailed(#[from] std::io::Error),
}

/// VM runtime result
pub type VmResult<T> = Result<T, VmError>;
