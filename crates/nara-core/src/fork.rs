//! Fork support.
//!
//! `fork(2)` in a runtime with managed threads is only safe while the
//! world is quiescent: the child inherits a single thread and a memory
//! image that must not contain a half-finished heap mutation. This module
//! brackets the syscall with a stop-the-world episode and reinitializes
//! the child's coordination state.

use crate::thread::ManagedThread;
use crate::{VmError, VmResult};
use std::sync::Arc;

/// Which side of the fork the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// The parent process, with the child's pid.
    Parent(libc::pid_t),
    /// The child process, reinitialized to a single managed thread.
    Child,
}

/// Fork with the world stopped.
///
/// The calling thread must be dependent and must be running `surviving`'s
/// managed thread; the runtime that stops is the one `surviving` belongs
/// to. The parent restarts the world and returns the child's pid. The
/// child discards every registry record except `surviving`'s and
/// reinitializes the world to a single dependent thread; `time_waiting`
/// restarts from zero.
pub fn gc_safe_fork(surviving: &Arc<ManagedThread>) -> VmResult<ForkOutcome> {
    let shared = surviving.shared();

    shared.stop_the_world();

    // SAFETY: every other managed thread is parked or independent, so the
    // child's memory image contains no in-flight heap mutation.
    let pid = unsafe { libc::fork() };

    if pid < 0 {
        let err = std::io::Error::last_os_error();
        shared.restart_world();
        return Err(VmError::ForkFailed(err));
    }

    if pid == 0 {
        // The records for the parent's other threads refer to threads
        // that do not exist here.
        shared.registry().retain_only(surviving.id());
        // SAFETY: the child is the process's sole thread until reinit
        // returns.
        unsafe { shared.reinit() };
        Ok(ForkOutcome::Child)
    } else {
        shared.restart_world();
        Ok(ForkOutcome::Parent(pid))
    }
}
