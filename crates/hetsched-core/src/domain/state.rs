//! Job lifecycle states.

use std::time::Instant;

use super::ids::{QueueId, WorkerId};

/// Where a job is in its life.
///
/// State transitions:
/// - Created -> Deferred -> Queued -> Popped -> Running -> Terminated
/// - Created -> Queued (pushed directly, no submission gate)
/// - Created | Deferred -> Terminated (control job, never queued)
///
/// Any other transition is a bug in a policy or driver and panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Built, not yet submitted.
    Created,

    /// Submitted, waiting for predecessors.
    Deferred,

    /// Held by exactly one queue.
    Queued { queue: QueueId, since: Instant },

    /// Removed from its queue, not yet bound to a worker.
    Popped,

    /// Executing on a worker.
    Running { worker: WorkerId },

    /// Termination handling ran.
    Terminated,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Terminated)
    }

    /// Can this job still be placed into a queue?
    pub fn is_pushable(self) -> bool {
        matches!(self, JobState::Created | JobState::Deferred)
    }

    pub fn queue(self) -> Option<QueueId> {
        match self {
            JobState::Queued { queue, .. } => Some(queue),
            _ => None,
        }
    }
}
