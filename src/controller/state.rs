//! Controller states and the retry decision.

use std::fmt;

use super::AcceptedPatch;
use crate::workspace::AppliedPatch;

/// Everything needed to record and undo a rejected attempt.
#[derive(Debug)]
pub struct Rejection {
    pub prompt: String,
    /// Empty when the service call failed
    pub response: String,
    /// Patch still present in the scoped copy, if one was written
    pub applied: Option<AppliedPatch>,
    pub diagnostics: String,
}

#[derive(Debug)]
pub enum ControllerState {
    Init,
    Generating {
        attempt: u32,
    },
    Validating {
        attempt: u32,
        prompt: String,
        response: String,
    },
    Retrying {
        attempt: u32,
        rejection: Rejection,
    },
    Accepted(Box<AcceptedPatch>),
    Exhausted,
}

impl ControllerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted(_) | Self::Exhausted)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Generating { .. } => "generating",
            Self::Validating { .. } => "validating",
            Self::Retrying { .. } => "retrying",
            Self::Accepted(_) => "accepted",
            Self::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generating { attempt }
            | Self::Validating { attempt, .. }
            | Self::Retrying { attempt, .. } => write!(f, "{} (attempt {})", self.name(), attempt),
            _ => f.write_str(self.name()),
        }
    }
}

/// State after `attempt` finished without an acceptable patch: another
/// attempt while under the ceiling, otherwise exhausted.
pub fn transition(attempt: u32, max_attempts: u32) -> ControllerState {
    if attempt < max_attempts {
        ControllerState::Generating {
            attempt: attempt + 1,
        }
    } else {
        ControllerState::Exhausted
    }
}

/// State after initialization. A ceiling of zero allows no attempts.
pub fn first_attempt(max_attempts: u32) -> ControllerState {
    transition(0, max_attempts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_until_ceiling() {
        assert!(matches!(transition(1, 3), ControllerState::Generating { attempt: 2 }));
        assert!(matches!(transition(2, 3), ControllerState::Generating { attempt: 3 }));
        assert!(matches!(transition(3, 3), ControllerState::Exhausted));
        assert!(matches!(transition(4, 3), ControllerState::Exhausted));
    }

    #[test]
    fn test_first_attempt() {
        assert!(matches!(first_attempt(3), ControllerState::Generating { attempt: 1 }));
        assert!(matches!(first_attempt(0), ControllerState::Exhausted));
    }

    #[test]
    fn test_attempt_count_never_exceeds_ceiling() {
        for ceiling in 0..6 {
            let mut state = first_attempt(ceiling);
            let mut attempts = 0;
            while let ControllerState::Generating { attempt } = state {
                attempts += 1;
                assert!(attempt <= ceiling);
                state = transition(attempt, ceiling);
            }
            assert_eq!(attempts, ceiling);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ControllerState::Generating { attempt: 2 }.to_string(), "generating (attempt 2)");
        assert_eq!(ControllerState::Exhausted.to_string(), "exhausted");
        assert!(ControllerState::Exhausted.is_terminal());
        assert!(!ControllerState::Init.is_terminal());
    }
}
