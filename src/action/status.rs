//! Governance action status state machine

use crate::error::{invalid_parameter, SequencerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Governance action status in the sequencing workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceActionStatus {
    /// Created, waiting for its mandatory guards
    Requested,
    /// Guards satisfied, waiting for an engine to claim it
    Approved,
    /// Claimed by exactly one engine
    Waiting,
    /// Engine is running the action
    InProgress,
    /// Completed successfully
    Actioned,
    /// Request was not valid for the engine
    Invalid,
    /// Engine chose not to act
    Ignored,
    /// Engine failed
    Failed,
}

impl Default for GovernanceActionStatus {
    fn default() -> Self {
        GovernanceActionStatus::Requested
    }
}

impl GovernanceActionStatus {
    pub const ALL: [GovernanceActionStatus; 8] = [
        GovernanceActionStatus::Requested,
        GovernanceActionStatus::Approved,
        GovernanceActionStatus::Waiting,
        GovernanceActionStatus::InProgress,
        GovernanceActionStatus::Actioned,
        GovernanceActionStatus::Invalid,
        GovernanceActionStatus::Ignored,
        GovernanceActionStatus::Failed,
    ];

    /// Ordinal used by repositories that store the status numerically
    pub fn ordinal(&self) -> u32 {
        match self {
            GovernanceActionStatus::Requested => 0,
            GovernanceActionStatus::Approved => 1,
            GovernanceActionStatus::Waiting => 2,
            GovernanceActionStatus::InProgress => 3,
            GovernanceActionStatus::Actioned => 10,
            GovernanceActionStatus::Invalid => 11,
            GovernanceActionStatus::Ignored => 12,
            GovernanceActionStatus::Failed => 13,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GovernanceActionStatus::Actioned
                | GovernanceActionStatus::Invalid
                | GovernanceActionStatus::Ignored
                | GovernanceActionStatus::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: GovernanceActionStatus) -> bool {
        use GovernanceActionStatus::*;
        match (*self, next) {
            (Requested, Approved) => true,
            (Approved, Waiting) => true,
            (Waiting, InProgress) | (InProgress, InProgress) => true,
            (Waiting | InProgress, terminal) => terminal.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceActionStatus::Requested => "REQUESTED",
            GovernanceActionStatus::Approved => "APPROVED",
            GovernanceActionStatus::Waiting => "WAITING",
            GovernanceActionStatus::InProgress => "IN_PROGRESS",
            GovernanceActionStatus::Actioned => "ACTIONED",
            GovernanceActionStatus::Invalid => "INVALID",
            GovernanceActionStatus::Ignored => "IGNORED",
            GovernanceActionStatus::Failed => "FAILED",
        }
    }
}

impl TryFrom<u32> for GovernanceActionStatus {
    type Error = SequencerError;

    fn try_from(ordinal: u32) -> Result<Self, Self::Error> {
        GovernanceActionStatus::ALL
            .iter()
            .copied()
            .find(|s| s.ordinal() == ordinal)
            .ok_or_else(|| invalid_parameter(format!("Unknown governance action status ordinal {}", ordinal)))
    }
}

impl FromStr for GovernanceActionStatus {
    type Err = SequencerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GovernanceActionStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| invalid_parameter(format!("Unknown governance action status '{}'", s)))
    }
}

impl fmt::Display for GovernanceActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GovernanceActionStatus::*;

    #[test]
    fn test_ordinals_map_back_to_the_same_status() {
        for status in GovernanceActionStatus::ALL {
            assert_eq!(GovernanceActionStatus::try_from(status.ordinal()).unwrap(), status);
        }
    }

    #[test]
    fn test_legacy_other_ordinal_is_rejected() {
        assert!(GovernanceActionStatus::try_from(99).is_err());
        assert!(GovernanceActionStatus::try_from(4).is_err());
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(Requested.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Actioned));
        assert!(Waiting.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        for terminal in [Actioned, Invalid, Ignored, Failed] {
            assert!(terminal.is_terminal());
            for next in GovernanceActionStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_skipping_states_is_illegal() {
        assert!(!Requested.can_transition_to(Waiting));
        assert!(!Approved.can_transition_to(Actioned));
        assert!(!InProgress.can_transition_to(Approved));
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("in_progress".parse::<GovernanceActionStatus>().unwrap(), InProgress);
        assert_eq!(InProgress.to_string(), "IN_PROGRESS");
        assert!("other".parse::<GovernanceActionStatus>().is_err());
    }
}
