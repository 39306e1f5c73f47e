//! `ws`: per-worker deques with stealing.
//!
//! A worker pops from the front of its own queue. When that has nothing it can
//! run, it steals from the back of the queue holding the most jobs it can run,
//! preferring the nearest following neighbour on ties. Every queue shares one
//! activity so a push anywhere wakes idle thieves.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use super::{Caller, PolicyEnv, SchedPolicy, per_worker_queues, worker_queue};
use crate::config::{MachineConfig, WorkerDesc};
use crate::domain::Job;
use crate::error::SchedError;
use crate::queue::{Activity, JobQueue};

#[derive(Default)]
pub struct WorkStealingPolicy {
    workers: Vec<WorkerDesc>,
    queues: Vec<Arc<JobQueue>>,
    next_external: AtomicUsize,
}

impl WorkStealingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn victim_for(&self, thief: &WorkerDesc) -> Option<&Arc<JobQueue>> {
        let n = self.queues.len();
        let mask = thief.mask();
        let mut best: Option<(&Arc<JobQueue>, usize)> = None;
        for step in 1..n {
            let queue = &self.queues[(thief.id.index() + step) % n];
            let load = queue.runnable_len(mask);
            if load > 0 && best.is_none_or(|(_, most)| load > most) {
                best = Some((queue, load));
            }
        }
        best.map(|(queue, _)| queue)
    }

    /// Least loaded worker able to run `job`.
    fn fallback_queue(&self, job: &Job) -> Option<&Arc<JobQueue>> {
        self.workers
            .iter()
            .filter(|w| w.can_run(job))
            .map(|w| &self.queues[w.id.index()])
            .min_by_key(|q| q.len())
    }
}

impl SchedPolicy for WorkStealingPolicy {
    fn name(&self) -> &'static str {
        "ws"
    }

    fn description(&self) -> &'static str {
        "work stealing"
    }

    fn init(&mut self, machine: &MachineConfig, _env: &PolicyEnv) -> Result<(), SchedError> {
        self.workers = machine.workers().to_vec();
        self.queues = per_worker_queues(machine, Some(Activity::new()));
        Ok(())
    }

    fn local_queue(&self, caller: Caller) -> Option<Arc<JobQueue>> {
        worker_queue(&self.queues, caller, || {
            self.next_external.fetch_add(1, Ordering::Relaxed)
        })
    }

    fn push_task(&self, queue: &Arc<JobQueue>, job: Arc<Job>) -> Result<(), SchedError> {
        let owner = &self.workers[queue.id().index()];
        if owner.can_run(&job) {
            queue.push_back(job);
            return Ok(());
        }
        let Some(target) = self.fallback_queue(&job) else {
            return Err(SchedError::NoCapableDevice {
                job: job.id(),
                target: None,
            });
        };
        debug!(job = %job.id(), from = %queue.id(), to = %target.id(), "redirected to a capable worker");
        target.push_back(job);
        Ok(())
    }

    fn pop_task(&self, queue: &JobQueue, worker: &WorkerDesc) -> Option<Arc<Job>> {
        if let Some(job) = queue.pop_front(worker.mask()) {
            return Some(job);
        }
        let victim = self.victim_for(worker)?;
        let job = victim.pop_back(worker.mask())?;
        debug!(job = %job.id(), thief = %worker.id, victim = %victim.id(), "stole job");
        Some(job)
    }

    fn has_work(&self, _queue: &JobQueue, worker: &WorkerDesc) -> bool {
        self.queues.iter().any(|q| q.has_runnable(worker.mask()))
    }

    fn queues(&self) -> Vec<Arc<JobQueue>> {
        self.queues.clone()
    }
}
