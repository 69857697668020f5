/// Page-task state definitions
///
/// This module defines the states a page task moves through once its page is fetched.
use std::fmt;

/// Represents the current state of a page task
///
/// The happy path is `Fetched → ExecutingUserCode → AwaitingDeferred (optional) →
/// ExpandingLinks (optional) → EmittingResult (optional) → Done`. `Failed` is reachable
/// from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    // ===== Active States =====
    /// The page has been fetched and is waiting for the page function
    Fetched,

    /// The page function is running
    ExecutingUserCode,

    /// The page function returned but asked to finish later
    AwaitingDeferred,

    /// Links on the page are being matched and enqueued
    ExpandingLinks,

    /// Output records are being assembled and pushed to the dataset
    EmittingResult,

    // ===== Terminal States =====
    /// The task completed
    Done,

    /// The task failed and was handed to the failed-request path
    Failed,
}

impl TaskState {
    /// Returns true if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the page function may still be running or pending
    pub fn is_user_code_active(&self) -> bool {
        matches!(self, Self::ExecutingUserCode | Self::AwaitingDeferred)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// Optional stages may be skipped, but the order never goes backwards.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        match self {
            Self::Fetched => matches!(next, Self::ExecutingUserCode | Self::Done),
            Self::ExecutingUserCode => matches!(
                next,
                Self::AwaitingDeferred | Self::ExpandingLinks | Self::EmittingResult | Self::Done
            ),
            Self::AwaitingDeferred => {
                matches!(next, Self::ExpandingLinks | Self::EmittingResult | Self::Done)
            }
            Self::ExpandingLinks => matches!(next, Self::EmittingResult | Self::Done),
            Self::EmittingResult => next == Self::Done,
            Self::Done | Self::Failed => false,
        }
    }

    /// Stable lowercase name used in logs and statistics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetched => "fetched",
            Self::ExecutingUserCode => "executing_user_code",
            Self::AwaitingDeferred => "awaiting_deferred",
            Self::ExpandingLinks => "expanding_links",
            Self::EmittingResult => "emitting_result",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Returns all task states in lifecycle order
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Fetched,
            Self::ExecutingUserCode,
            Self::AwaitingDeferred,
            Self::ExpandingLinks,
            Self::EmittingResult,
            Self::Done,
            Self::Failed,
        ]
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
