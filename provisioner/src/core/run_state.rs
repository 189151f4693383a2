//! Run lifecycle state machine.
//!
//! `Running → {Succeeded, Aborted} → Finalized`. Finalization happens exactly
//! once; every other transition is rejected.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Running,
    Succeeded,
    Aborted,
    Finalized,
}

/// Rejected phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: RunPhase,
    pub to: RunPhase,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

impl RunPhase {
    pub fn transition(self, to: RunPhase) -> Result<RunPhase, InvalidTransition> {
        let allowed = matches!(
            (self, to),
            (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Aborted)
                | (Self::Succeeded, Self::Finalized)
                | (Self::Aborted, Self::Finalized)
        );
        if allowed {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_reaches_both_terminal_states() {
        assert_eq!(
            RunPhase::Running.transition(RunPhase::Succeeded),
            Ok(RunPhase::Succeeded)
        );
        assert_eq!(
            RunPhase::Running.transition(RunPhase::Aborted),
            Ok(RunPhase::Aborted)
        );
    }

    #[test]
    fn finalize_only_from_terminal_states() {
        assert!(RunPhase::Succeeded.transition(RunPhase::Finalized).is_ok());
        assert!(RunPhase::Aborted.transition(RunPhase::Finalized).is_ok());
        assert!(RunPhase::Running.transition(RunPhase::Finalized).is_err());
    }

    #[test]
    fn finalized_is_final() {
        for to in [
            RunPhase::Running,
            RunPhase::Succeeded,
            RunPhase::Aborted,
            RunPhase::Finalized,
        ] {
            assert!(RunPhase::Finalized.transition(to).is_err());
        }
    }

    #[test]
    fn terminal_states_cannot_flip() {
        let err = RunPhase::Succeeded
            .transition(RunPhase::Aborted)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid run transition Succeeded -> Aborted");
    }
}
