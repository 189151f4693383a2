//! I/O helpers for provisioning runs.

pub mod checks;
pub mod config;
pub mod executor;
pub mod lock;
pub mod plan;
pub mod preflight;
pub mod process;
pub mod run_log;
pub mod secrets;
pub mod signals;
pub mod template;
