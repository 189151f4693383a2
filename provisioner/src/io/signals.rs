//! External interrupt handling.
//!
//! SIGINT, SIGTERM and SIGHUP are recorded, not acted on: the command in
//! flight runs to completion (the terminal usually delivers the signal to it
//! too), and the step runner observes the pending interrupt before starting
//! anything else. The run then aborts through the normal cleanup path.

use std::sync::atomic::{AtomicI32, Ordering};

use anyhow::{Context, Result};
use nix::libc;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

static PENDING: AtomicI32 = AtomicI32::new(0);
static NEVER: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(signal: libc::c_int) {
    PENDING.store(signal, Ordering::SeqCst);
}

/// Handle to an interrupt flag (0 = none pending, otherwise the signal number).
#[derive(Debug, Clone, Copy)]
pub struct Interrupt {
    flag: &'static AtomicI32,
}

impl Interrupt {
    /// Install process signal handlers and return a handle to their flag.
    #[allow(unsafe_code)]
    pub fn install() -> Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(record_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
            // SAFETY: the handler only performs an atomic store.
            unsafe { sigaction(signal, &action) }
                .with_context(|| format!("install {signal} handler"))?;
        }
        Ok(Self { flag: &PENDING })
    }

    /// A handle that never reports an interrupt.
    pub fn never() -> Self {
        Self { flag: &NEVER }
    }

    /// A private flag, independent of process signals.
    #[cfg(any(test, feature = "test-support"))]
    pub fn detached() -> Self {
        Self {
            flag: Box::leak(Box::new(AtomicI32::new(0))),
        }
    }

    /// Mark `signal` as pending on this handle.
    #[cfg(any(test, feature = "test-support"))]
    pub fn raise(&self, signal: i32) {
        self.flag.store(signal, Ordering::SeqCst);
    }

    /// The pending signal number, if any.
    pub fn pending(&self) -> Option<i32> {
        match self.flag.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal),
        }
    }
}
