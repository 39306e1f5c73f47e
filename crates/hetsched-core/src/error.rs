use thiserror::Error;

use crate::domain::{JobId, WorkerId};

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("no scheduling policy named {0:?}")]
    UnknownPolicy(String),

    #[error("duplicate scheduling policy name={0}")]
    DuplicatePolicy(String),

    #[error("no device can execute job={job}{}", on_target(.target))]
    NoCapableDevice {
        job: JobId,
        target: Option<WorkerId>,
    },

    #[error("no such worker {0}")]
    InvalidWorker(WorkerId),

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("dependency cycle: {0:?}")]
    DependencyCycle(Vec<JobId>),

    #[error("job not found job={0}")]
    UnknownJob(JobId),

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn on_target(target: &Option<WorkerId>) -> String {
    target.map(|w| format!(" on {w}")).unwrap_or_default()
}

impl SchedError {
    /// Whether the submitter may reasonably recover (pick another device,
    /// retry later) rather than treat the error as fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SchedError::NoCapableDevice { .. })
    }
}
