//! Task lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Status of a task in the queue.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Retrying -> Pending (until retries are exhausted)
/// - Pending -> Processing -> Failed
/// - Pending -> Cancelled (explicit only)
///
/// Completed, Failed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed by the dispatch loop.
    Pending,

    /// Claimed and currently executing.
    Processing,

    /// Finished successfully.
    Completed,

    /// Failed an attempt; waiting for its backoff to elapse.
    Retrying,

    /// Failed permanently.
    Failed,

    /// Cancelled before it was dispatched.
    Cancelled,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Retrying)
                | (Processing, Failed)
                | (Retrying, Pending)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::TaskStatus::*;
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Pending, Processing, true)]
    #[case(Pending, Cancelled, true)]
    #[case(Processing, Completed, true)]
    #[case(Processing, Retrying, true)]
    #[case(Processing, Failed, true)]
    #[case(Retrying, Pending, true)]
    #[case(Processing, Cancelled, false)]
    #[case(Retrying, Cancelled, false)]
    #[case(Completed, Pending, false)]
    #[case(Failed, Pending, false)]
    #[case(Cancelled, Pending, false)]
    #[case(Pending, Completed, false)]
    fn transitions_follow_the_state_machine(
        #[case] from: TaskStatus,
        #[case] to: TaskStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn terminal_states_have_no_exit() {
        let all = [Pending, Processing, Completed, Retrying, Failed, Cancelled];
        for from in all.into_iter().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|to| !from.can_transition_to(*to)));
        }
    }
}
