/// Operation state definitions for tracking fetch progress
use serde::Serialize;
use std::fmt;

/// Represents the current state of an operation
///
/// Operations only move forward: `Queued -> Processing -> Completed | Failed`.
/// A stale `Queued` operation may also be failed directly during recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Operation is persisted and waiting for a worker
    Queued,

    /// A worker has picked the operation up and is fetching
    Processing,

    /// Fetch succeeded; result links are stored on the operation
    Completed,

    /// Fetch failed; the reason is stored on the operation
    Failed,
}

impl OperationState {
    /// Returns true if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the operation still occupies the queue or a worker
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if moving from this state to `next` is a legal transition
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Queued, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible operation states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Processing,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Who asked for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationOrigin {
    OnDemand,
    Monitor,
}

impl OperationOrigin {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::OnDemand => "on_demand",
            Self::Monitor => "monitor",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "on_demand" => Some(Self::OnDemand),
            "monitor" => Some(Self::Monitor),
            _ => None,
        }
    }
}

impl fmt::Display for OperationOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
