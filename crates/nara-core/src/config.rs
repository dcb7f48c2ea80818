//! Runtime configuration.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Configuration for one runtime instance.
///
/// Knobs that flip at runtime are atomics so the facade can adjust them
/// without exclusive access (`reinit` forces `trace_dispatch` off in the
/// post-fork child).
pub struct VmConfig {
    /// Emit per-dispatch trace output. Forced off after a fork, where
    /// interleaving with the parent's output would be confusing.
    trace_dispatch: AtomicBool,

    /// Free-form `key=value` settings passed through from the embedder.
    user_variables: Mutex<FxHashMap<String, String>>,
}

impl VmConfig {
    /// Configuration with default knobs and no user variables.
    pub fn new() -> Self {
        Self {
            trace_dispatch: AtomicBool::new(false),
            user_variables: Mutex::new(FxHashMap::default()),
        }
    }

    /// Whether per-dispatch tracing is enabled.
    pub fn trace_dispatch(&self) -> bool {
        self.trace_dispatch.load(Ordering::Relaxed)
    }

    /// Enable or disable per-dispatch tracing.
    pub fn set_trace_dispatch(&self, enabled: bool) {
        self.trace_dispatch.store(enabled, Ordering::Relaxed);
    }

    /// Set a user variable, replacing any previous value.
    pub fn set_user_variable(&self, key: &str, value: &str) {
        self.user_variables
            .lock()
            .insert(key.to_string(), value.to_string());
    }

    /// Look up a user variable.
    pub fn user_variable(&self, key: &str) -> Option<String> {
        self.user_variables.lock().get(key).cloned()
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}
