//! Fail-fast, idempotent provisioning step orchestrator.
//!
//! A provisioning run interprets a declared, ordered list of steps read from a
//! plan file. Each step may be skipped by its precondition, performs its action
//! through a single command executor, and is verified by its postcondition.
//! The architecture follows a strict separation:
//!
//! - **[`core`]**: Pure, deterministic types and rules (step model, outcomes,
//!   run phases, plan invariants). No I/O.
//! - **[`io`]**: Side-effecting operations (child processes, the durable run log,
//!   plan loading, checks, locking, signals, secret files).
//!
//! Orchestration modules ([`step`], [`run`], [`orchestrate`]) combine the two to
//! implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod run;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
