//! Central priority policy: `prio`.

use std::sync::Arc;

use super::{Caller, PolicyEnv, SchedPolicy, shared_queue};
use crate::config::{MachineConfig, WorkerDesc};
use crate::domain::Job;
use crate::error::SchedError;
use crate::queue::JobQueue;

/// One shared queue kept in descending priority order, FIFO among equals.
#[derive(Default)]
pub struct PrioPolicy {
    queue: Option<Arc<JobQueue>>,
}

impl PrioPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedPolicy for PrioPolicy {
    fn name(&self) -> &'static str {
        "prio"
    }

    fn description(&self) -> &'static str {
        "prio eager"
    }

    fn init(&mut self, machine: &MachineConfig, _env: &PolicyEnv) -> Result<(), SchedError> {
        self.queue = Some(shared_queue(machine));
        Ok(())
    }

    fn local_queue(&self, _caller: Caller) -> Option<Arc<JobQueue>> {
        self.queue.clone()
    }

    fn push_task(&self, queue: &Arc<JobQueue>, job: Arc<Job>) -> Result<(), SchedError> {
        queue.push_sorted(job);
        Ok(())
    }

    fn pop_task(&self, queue: &JobQueue, worker: &WorkerDesc) -> Option<Arc<Job>> {
        queue.pop_front(worker.mask())
    }

    fn queues(&self) -> Vec<Arc<JobQueue>> {
        self.queue.iter().cloned().collect()
    }
}
