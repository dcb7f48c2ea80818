//! Default constants for runtime configuration.
//!
//! Centralizes the timing knobs shared by the world protocol and the
//! preemption timer.

use std::time::Duration;

/// Interval between preemption-timer ticks.
///
/// Bounds the latency between a stop request and the next checkpoint of a
/// thread stuck in a long computation.
pub const PREEMPT_INTERVAL: Duration = Duration::from_millis(10);

/// How long the stopper waits for quiescence before logging a warning.
///
/// The wait itself is unbounded; this only controls observability.
pub const STOP_WARN_TIMEOUT: Duration = Duration::from_secs(1);
