//! Scheduling policies: the pluggable strategy deciding where a job is queued
//! and which job an idle worker takes next.

mod dm;
mod eager;
mod prio;
mod random;
mod registry;
mod ws;

pub use dm::DequeModelPolicy;
pub use eager::EagerPolicy;
pub use prio::PrioPolicy;
pub use random::RandomPolicy;
pub use registry::{DEFAULT_POLICY, PolicyFactory, PolicyRegistry};
pub use ws::WorkStealingPolicy;

use std::fmt;
use std::sync::Arc;

use crate::config::{MachineConfig, SchedConf, WorkerDesc};
use crate::domain::{Job, MemoryNode, QueueId, Where, WorkerId};
use crate::error::SchedError;
use crate::ports::{BusModel, PerfModel};
use crate::queue::{Activity, JobQueue, Wakeup};

/// Who is calling into the scheduler.
///
/// Replaces a thread-local worker binding: the worker loop passes its own id,
/// application threads pass `External`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caller {
    Worker(WorkerId),
    External,
}

impl Caller {
    pub fn worker(self) -> Option<WorkerId> {
        match self {
            Caller::Worker(id) => Some(id),
            Caller::External => None,
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Worker(id) => write!(f, "{id}"),
            Caller::External => f.write_str("external"),
        }
    }
}

/// Collaborators a policy may consult while placing jobs.
#[derive(Clone)]
pub struct PolicyEnv {
    pub conf: SchedConf,
    pub perf_model: Arc<dyn PerfModel>,
    pub bus_model: Arc<dyn BusModel>,
}

/// A scheduling strategy.
///
/// Lifecycle: `init` once before any other call, `deinit` once at shutdown.
/// Between the two the policy is shared by every worker and submitter, so
/// all placement state lives behind the policy's own locks.
pub trait SchedPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Allocate queues and build the worker -> queue lookup.
    fn init(&mut self, machine: &MachineConfig, env: &PolicyEnv) -> Result<(), SchedError>;

    /// Wake every parked worker. Must tolerate a partial `init`.
    fn deinit(&self, _machine: &MachineConfig) {
        for queue in self.queues() {
            queue.activity().signal(Wakeup::All);
        }
    }

    /// The queue `caller` acts on. `None` only before `init`.
    fn local_queue(&self, caller: Caller) -> Option<Arc<JobQueue>>;

    /// Place `job`. `queue` is the caller's local queue; a policy may pick
    /// another one.
    fn push_task(&self, queue: &Arc<JobQueue>, job: Arc<Job>) -> Result<(), SchedError>;

    /// Next job for `worker` from its local `queue`, or `None`. Never waits.
    fn pop_task(&self, queue: &JobQueue, worker: &WorkerDesc) -> Option<Arc<Job>>;

    fn pop_every_task(&self, queue: &JobQueue, mask: Where) -> Vec<Arc<Job>> {
        queue.pop_every(mask)
    }

    /// Would `pop_task` find something? Checked under the activity lock
    /// before a worker parks.
    fn has_work(&self, queue: &JobQueue, worker: &WorkerDesc) -> bool {
        queue.has_runnable(worker.mask())
    }

    /// Every queue the policy owns.
    fn queues(&self) -> Vec<Arc<JobQueue>>;
}

/// One queue shared by every worker.
pub(crate) fn shared_queue(machine: &MachineConfig) -> Arc<JobQueue> {
    Arc::new(JobQueue::new(
        QueueId::new(0),
        MemoryNode::new(0),
        Activity::new(),
        Wakeup::for_shared_queue(machine),
    ))
}

/// One queue per worker, each with its own activity unless `shared` is given.
pub(crate) fn per_worker_queues(
    machine: &MachineConfig,
    shared: Option<Arc<Activity>>,
) -> Vec<Arc<JobQueue>> {
    let wakeup = if shared.is_some() {
        Wakeup::All
    } else {
        Wakeup::One
    };
    machine
        .workers()
        .iter()
        .map(|w| {
            let activity = shared.clone().unwrap_or_else(Activity::new);
            Arc::new(JobQueue::new(
                QueueId::new(w.id.0),
                w.memory_node,
                activity,
                wakeup,
            ))
        })
        .collect()
}

/// Resolve a per-worker queue; external callers get `fallback`.
pub(crate) fn worker_queue(
    queues: &[Arc<JobQueue>],
    caller: Caller,
    fallback: impl FnOnce() -> usize,
) -> Option<Arc<JobQueue>> {
    if queues.is_empty() {
        return None;
    }
    let index = match caller {
        Caller::Worker(id) => id.index(),
        Caller::External => fallback() % queues.len(),
    };
    queues.get(index).cloned()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::domain::{ArchKind, Codelet};
    use crate::impls::{HistoryModel, UniformBus};

    pub fn env() -> PolicyEnv {
        env_with(SchedConf::default())
    }

    pub fn env_with(conf: SchedConf) -> PolicyEnv {
        PolicyEnv {
            conf,
            perf_model: Arc::new(HistoryModel::new()),
            bus_model: Arc::new(UniformBus::default()),
        }
    }

    pub fn codelet(archs: &[ArchKind]) -> Arc<Codelet> {
        Arc::new(
            archs
                .iter()
                .fold(Codelet::new("test"), |cl, arch| cl.with_kernel(*arch, |_| {})),
        )
    }

    pub fn job(archs: &[ArchKind]) -> Arc<Job> {
        Job::builder(codelet(archs)).build()
    }

    pub fn job_with_prio(priority: i32) -> Arc<Job> {
        Job::builder(codelet(&[ArchKind::Cpu])).priority(priority).build()
    }

    /// Fixed per-architecture predictions.
    pub struct FixedModel(pub HashMap<ArchKind, Duration>);

    impl PerfModel for FixedModel {
        fn predict(&self, _job: &Job, arch: ArchKind) -> Option<Duration> {
            self.0.get(&arch).copied()
        }

        fn record(&self, _job: &Job, _arch: ArchKind, _elapsed: Duration) {}
    }
}
