//! Task Lifecycle State Machine
//!
//! Defines the only legal status transitions of a queued task:
//! `created -> executing -> {finished, error}`. Terminal states never move.

use crate::TaskStatus;
use thiserror::Error;

/// Events that can move a task forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// The dispatcher claimed the task before running its handler
    Claimed,
    /// The handler produced a usable result
    Completed,
    /// The handler failed, or never ran (unknown kind, bad args, dev mode)
    Failed,
}

/// Rejected transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid task transition: {event:?} from {from}")]
    Invalid { from: TaskStatus, event: TaskEvent },
}

/// Get the next status for a given event, if the transition is valid
pub fn next_status(from: TaskStatus, event: TaskEvent) -> Result<TaskStatus, TransitionError> {
    use TaskEvent::*;
    use TaskStatus::*;

    match (from, event) {
        (Created, Claimed) => Ok(Executing),
        (Executing, Completed) => Ok(Finished),
        (Executing, Failed) => Ok(Error),
        _ => Err(TransitionError::Invalid { from, event }),
    }
}

/// Check if a transition from one status to another is valid
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    matches!(
        (from, to),
        (Created, Executing) | (Executing, Finished) | (Executing, Error)
    )
}
