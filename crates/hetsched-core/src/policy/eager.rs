//! Central FIFO policies: `eager` and `no-prio`.

use std::sync::Arc;

use super::{Caller, PolicyEnv, SchedPolicy, shared_queue};
use crate::config::{MachineConfig, WorkerDesc};
use crate::domain::{Job, MAX_PRIO};
use crate::error::SchedError;
use crate::queue::JobQueue;

/// Greedy scheduling over one queue shared by every worker.
///
/// `eager` lets jobs at `MAX_PRIO` jump to the front of the queue; `no-prio`
/// ignores priorities altogether and is strictly FIFO.
pub struct EagerPolicy {
    name: &'static str,
    description: &'static str,
    honor_max_prio: bool,
    queue: Option<Arc<JobQueue>>,
}

impl EagerPolicy {
    pub fn eager() -> Self {
        Self {
            name: "eager",
            description: "greedy",
            honor_max_prio: true,
            queue: None,
        }
    }

    pub fn no_prio() -> Self {
        Self {
            name: "no-prio",
            description: "eager (without prio)",
            honor_max_prio: false,
            queue: None,
        }
    }
}

impl SchedPolicy for EagerPolicy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn init(&mut self, machine: &MachineConfig, _env: &PolicyEnv) -> Result<(), SchedError> {
        self.queue = Some(shared_queue(machine));
        Ok(())
    }

    fn local_queue(&self, _caller: Caller) -> Option<Arc<JobQueue>> {
        self.queue.clone()
    }

    fn push_task(&self, queue: &Arc<JobQueue>, job: Arc<Job>) -> Result<(), SchedError> {
        if self.honor_max_prio && job.priority() == MAX_PRIO {
            queue.push_front(job);
        } else {
            queue.push_back(job);
        }
        Ok(())
    }

    fn pop_task(&self, queue: &JobQueue, worker: &WorkerDesc) -> Option<Arc<Job>> {
        queue.pop_front(worker.mask())
    }

    fn queues(&self) -> Vec<Arc<JobQueue>> {
        self.queue.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArchKind, WorkerId};
    use crate::policy::testing::{env, job, job_with_prio};

    fn init(mut policy: EagerPolicy, machine: &MachineConfig) -> EagerPolicy {
        policy.init(machine, &env()).unwrap();
        policy
    }

    #[test]
    fn every_caller_shares_one_queue() {
        let machine = MachineConfig::new().with_cpus(3);
        let policy = init(EagerPolicy::eager(), &machine);
        let q0 = policy.local_queue(Caller::Worker(WorkerId::new(0))).unwrap();
        let q2 = policy.local_queue(Caller::Worker(WorkerId::new(2))).unwrap();
        let ext = policy.local_queue(Caller::External).unwrap();
        assert!(Arc::ptr_eq(&q0, &q2));
        assert!(Arc::ptr_eq(&q0, &ext));
        assert_eq!(policy.queues().len(), 1);
    }

    #[test]
    fn uninitialized_policy_has_no_queue() {
        let policy = EagerPolicy::eager();
        assert!(policy.local_queue(Caller::External).is_none());
        assert!(policy.queues().is_empty());
        policy.deinit(&MachineConfig::new());
    }

    #[test]
    fn eager_is_fifo_among_ordinary_jobs() {
        let machine = MachineConfig::new().with_cpus(1);
        let policy = init(EagerPolicy::eager(), &machine);
        let queue = policy.local_queue(Caller::External).unwrap();
        let worker = machine.workers()[0];

        let a = job_with_prio(0);
        let b = job_with_prio(3);
        policy.push_task(&queue, a.clone()).unwrap();
        policy.push_task(&queue, b.clone()).unwrap();

        assert_eq!(policy.pop_task(&queue, &worker).unwrap().id(), a.id());
        assert_eq!(policy.pop_task(&queue, &worker).unwrap().id(), b.id());
    }

    #[test]
    fn eager_fast_tracks_max_prio() {
        let machine = MachineConfig::new().with_cpus(1);
        let policy = init(EagerPolicy::eager(), &machine);
        let queue = policy.local_queue(Caller::External).unwrap();
        let worker = machine.workers()[0];

        let ordinary = job_with_prio(0);
        let urgent = job_with_prio(MAX_PRIO);
        policy.push_task(&queue, ordinary).unwrap();
        policy.push_task(&queue, urgent.clone()).unwrap();

        assert_eq!(policy.pop_task(&queue, &worker).unwrap().id(), urgent.id());
    }

    #[test]
    fn no_prio_ignores_priority() {
        let machine = MachineConfig::new().with_cpus(1);
        let policy = init(EagerPolicy::no_prio(), &machine);
        let queue = policy.local_queue(Caller::External).unwrap();
        let worker = machine.workers()[0];

        let ordinary = job_with_prio(0);
        let urgent = job_with_prio(MAX_PRIO);
        policy.push_task(&queue, ordinary.clone()).unwrap();
        policy.push_task(&queue, urgent).unwrap();

        assert_eq!(policy.pop_task(&queue, &worker).unwrap().id(), ordinary.id());
    }

    #[test]
    fn workers_only_pop_what_they_can_run() {
        let machine = MachineConfig::new().with_cpus(1).with_cuda(1);
        let policy = init(EagerPolicy::eager(), &machine);
        let queue = policy.local_queue(Caller::External).unwrap();
        let (cpu, gpu) = (machine.workers()[0], machine.workers()[1]);

        let gpu_job = job(&[ArchKind::Cuda]);
        policy.push_task(&queue, gpu_job.clone()).unwrap();

        assert!(!policy.has_work(&queue, &cpu));
        assert!(policy.pop_task(&queue, &cpu).is_none());
        assert!(policy.has_work(&queue, &gpu));
        assert_eq!(policy.pop_task(&queue, &gpu).unwrap().id(), gpu_job.id());
    }
}
