//! `random`: place each job on a uniformly chosen capable worker.

use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use super::{Caller, PolicyEnv, SchedPolicy, per_worker_queues, worker_queue};
use crate::config::{MachineConfig, WorkerDesc};
use crate::domain::Job;
use crate::error::SchedError;
use crate::queue::JobQueue;
use crate::sync::lock;

pub struct RandomPolicy {
    rng: Mutex<StdRng>,
    workers: Vec<WorkerDesc>,
    queues: Vec<Arc<JobQueue>>,
}

impl RandomPolicy {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            workers: Vec::new(),
            queues: Vec::new(),
        }
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn description(&self) -> &'static str {
        "random"
    }

    fn init(&mut self, machine: &MachineConfig, env: &PolicyEnv) -> Result<(), SchedError> {
        if let Some(seed) = env.conf.seed {
            self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        }
        self.workers = machine.workers().to_vec();
        self.queues = per_worker_queues(machine, None);
        Ok(())
    }

    fn local_queue(&self, caller: Caller) -> Option<Arc<JobQueue>> {
        // Pushes ignore the caller's queue, so any queue will do.
        worker_queue(&self.queues, caller, || 0)
    }

    fn push_task(&self, _queue: &Arc<JobQueue>, job: Arc<Job>) -> Result<(), SchedError> {
        let capable: Vec<&WorkerDesc> = self.workers.iter().filter(|w| w.can_run(&job)).collect();
        let chosen = {
            let mut rng = lock(&self.rng);
            capable.choose(&mut *rng).copied()
        };
        let Some(worker) = chosen else {
            return Err(SchedError::NoCapableDevice {
                job: job.id(),
                target: None,
            });
        };
        debug!(job = %job.id(), worker = %worker.id, "random placement");
        self.queues[worker.id.index()].push_back(job);
        Ok(())
    }

    fn pop_task(&self, queue: &JobQueue, worker: &WorkerDesc) -> Option<Arc<Job>> {
        queue.pop_front(worker.mask())
    }

    fn queues(&self) -> Vec<Arc<JobQueue>> {
        self.queues.clone()
    }
}
