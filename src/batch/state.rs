//! Batch lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one batch
///
/// `Pending → Building → FanningOut → AwaitingResults → Aggregating →
/// Published`, with `Failed` reachable from every non-terminal state
/// after `Pending`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchState {
    #[default]
    Pending,
    Building,
    FanningOut,
    AwaitingResults,
    Aggregating,
    Published,
    Failed,
}

impl BatchState {
    pub fn name(&self) -> &'static str {
        match self {
            BatchState::Pending => "pending",
            BatchState::Building => "building",
            BatchState::FanningOut => "fanning-out",
            BatchState::AwaitingResults => "awaiting-results",
            BatchState::Aggregating => "aggregating",
            BatchState::Published => "published",
            BatchState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Published | BatchState::Failed)
    }

    pub fn can_transition_to(&self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Pending, Building)
                | (Building, FanningOut)
                | (FanningOut, AwaitingResults)
                | (AwaitingResults, Aggregating)
                | (Aggregating, Published)
                | (Building | FanningOut | AwaitingResults | Aggregating, Failed)
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
