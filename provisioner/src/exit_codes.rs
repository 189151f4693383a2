//! Stable exit codes for the `provision` CLI.
//!
//! A failed command step exits with that command's own status, so these only
//! cover outcomes the orchestrator produces itself.

/// Run completed (or the command succeeded).
pub const OK: i32 = 0;
/// Invalid plan/config, or a postcondition or secret capture failed.
pub const INVALID: i32 = 1;
/// An environmental precondition (root, disk, network) was not met.
pub const PREFLIGHT: i32 = 2;
/// Another run holds the run lock.
pub const LOCKED: i32 = 3;
/// A command exceeded its timeout and was killed.
pub const TIMED_OUT: i32 = 124;
/// A command could not be spawned.
pub const SPAWN_FAILED: i32 = 127;
/// Base for statuses caused by a signal (`128 + signo`).
pub const SIGNAL_BASE: i32 = 128;

/// Exit status for a run or child terminated by `signal`.
pub fn from_signal(signal: i32) -> i32 {
    SIGNAL_BASE + signal
}
