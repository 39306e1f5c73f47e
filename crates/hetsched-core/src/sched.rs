//! Scheduler façade: the single entry point for submitters and workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::{MachineConfig, SCHED_ENV, SchedConf, WorkerDesc};
use crate::domain::{Job, QueueId, Where, WorkerId};
use crate::error::SchedError;
use crate::impls::{HistoryModel, ReleaseSuccessors, UniformBus};
use crate::observability::{PinnedBacklog, SchedStats};
use crate::policy::{Caller, PolicyEnv, PolicyRegistry, SchedPolicy};
use crate::ports::{BusModel, DataRequestDrain, NoPendingRequests, PerfModel, TerminationHandler};
use crate::queue::{JobQueue, Wakeup};
use crate::sync::lock;

/// What `submit` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Placed on a queue.
    Queued,
    /// Waiting for predecessors; it is pushed when the last one terminates.
    Deferred,
    /// Already terminated when `submit` returned (control or synchronous job).
    Terminated,
}

#[derive(Debug, Default)]
struct Progress {
    submitted: u64,
    terminated: u64,
}

/// A scheduler instance: one active policy over one machine.
///
/// Design:
/// - The policy is chosen and initialized in `SchedulerBuilder::build` and
///   stays fixed until `shutdown`.
/// - Every worker also owns a private queue for jobs pinned to it. That queue
///   shares the activity of the worker's policy queue, so a pinned push wakes
///   the worker wherever it is parked.
/// - Callers identify themselves explicitly (`Caller`, `WorkerId`); there is
///   no thread-local binding.
pub struct Scheduler {
    machine: MachineConfig,
    conf: SchedConf,
    policy: Box<dyn SchedPolicy>,
    pinned: Vec<Arc<JobQueue>>,
    termination: Arc<dyn TerminationHandler>,
    data_requests: Arc<dyn DataRequestDrain>,
    perf_model: Arc<dyn PerfModel>,
    running: AtomicBool,
    progress: Mutex<Progress>,
    progress_changed: Condvar,
}

impl Scheduler {
    pub fn builder(machine: MachineConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(machine)
    }

    pub fn machine(&self) -> &MachineConfig {
        &self.machine
    }

    pub fn conf(&self) -> &SchedConf {
        &self.conf
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn perf_model(&self) -> &Arc<dyn PerfModel> {
        &self.perf_model
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn worker(&self, id: WorkerId) -> &WorkerDesc {
        match self.machine.worker(id) {
            Some(worker) => worker,
            None => panic!("{id} is not part of this machine"),
        }
    }

    fn local_queue(&self, caller: Caller) -> Arc<JobQueue> {
        match self.policy.local_queue(caller) {
            Some(queue) => queue,
            None => panic!("policy {} has no queue for {caller}", self.policy.name()),
        }
    }

    /// Reject jobs no worker could ever run.
    pub(crate) fn check_capability(&self, job: &Job) -> Result<(), SchedError> {
        if job.is_control() {
            return Ok(());
        }
        match job.execute_on() {
            Some(target) => {
                let worker = self
                    .machine
                    .worker(target)
                    .ok_or(SchedError::InvalidWorker(target))?;
                if !worker.can_run(job) {
                    return Err(SchedError::NoCapableDevice {
                        job: job.id(),
                        target: Some(target),
                    });
                }
            }
            None => {
                if !self.machine.can_execute(job.where_mask()) {
                    return Err(SchedError::NoCapableDevice {
                        job: job.id(),
                        target: None,
                    });
                }
            }
        }
        Ok(())
    }

    /// Hand a job to the runtime.
    ///
    /// The job is pushed as soon as every predecessor declared with
    /// [`Job::declare_deps`] has terminated. A synchronous job blocks the
    /// caller until it terminated, so it must not be submitted from the only
    /// worker able to run it.
    pub fn submit(&self, caller: Caller, job: Arc<Job>) -> Result<Submission, SchedError> {
        if !self.is_running() {
            return Err(SchedError::ShuttingDown);
        }
        self.check_capability(&job)?;
        lock(&self.progress).submitted += 1;

        let mut outcome = Submission::Deferred;
        if job.open_submission_gate() {
            if let Err(err) = self.push_task(caller, job.clone()) {
                lock(&self.progress).submitted -= 1;
                self.progress_changed.notify_all();
                return Err(err);
            }
            outcome = Submission::Queued;
        }

        if job.is_synchronous() {
            job.wait();
        }
        if job.is_terminated() {
            outcome = Submission::Terminated;
        }
        debug!(job = %job.id(), %caller, ?outcome, "submitted");
        Ok(outcome)
    }

    /// Route a ready job.
    ///
    /// Control jobs terminate inline and never touch a queue. Pinned jobs go to
    /// their worker's private queue, bypassing the policy. Everything else is
    /// placed by the policy, starting from the caller's local queue.
    pub fn push_task(&self, caller: Caller, job: Arc<Job>) -> Result<(), SchedError> {
        if job.is_control() {
            self.handle_job_termination(caller, &job);
            return Ok(());
        }

        if let Some(target) = job.execute_on() {
            let worker = self
                .machine
                .worker(target)
                .ok_or(SchedError::InvalidWorker(target))?;
            if !worker.can_run(&job) {
                return Err(SchedError::NoCapableDevice {
                    job: job.id(),
                    target: Some(target),
                });
            }
            debug!(job = %job.id(), worker = %target, "pinned push");
            self.pinned[target.index()].push_back(job);
            return Ok(());
        }

        let queue = self.local_queue(caller);
        self.policy.push_task(&queue, job)
    }

    /// Next job for `worker`: its pinned jobs first, then the policy's choice.
    /// Never waits; see [`Scheduler::wait_for_event`].
    pub fn pop(&self, worker: WorkerId) -> Option<Arc<Job>> {
        let desc = self.worker(worker);
        let job = match self.pinned[worker.index()].pop_front(desc.mask()) {
            Some(job) => job,
            None => {
                let queue = self.local_queue(Caller::Worker(worker));
                self.policy.pop_task(&queue, desc)?
            }
        };
        job.start_on(worker);
        debug!(job = %job.id(), %worker, "popped");
        Some(job)
    }

    /// Drain every job runnable on `mask` from `worker`'s pinned and local
    /// queues. Returned jobs are popped but not yet running.
    pub fn pop_every(&self, worker: WorkerId, mask: Where) -> Vec<Arc<Job>> {
        let mut jobs = self.pinned[worker.index()].pop_every(mask);
        let queue = self.local_queue(Caller::Worker(worker));
        jobs.extend(self.policy.pop_every_task(&queue, mask));
        if !jobs.is_empty() {
            debug!(%worker, count = jobs.len(), "popped batch");
        }
        jobs
    }

    fn has_work(&self, desc: &WorkerDesc, queue: &JobQueue) -> bool {
        self.pinned[desc.id.index()].has_runnable(desc.mask()) || self.policy.has_work(queue, desc)
    }

    /// Park `worker` until its queues may hold work or the runtime stops.
    ///
    /// Pending data requests for the worker's memory node are serviced first.
    /// In busy-polling mode this spins once instead of parking. Returns
    /// whether the worker actually parked.
    pub fn wait_for_event(&self, worker: WorkerId) -> bool {
        let desc = self.worker(worker);
        let queue = self.local_queue(Caller::Worker(worker));
        let activity = queue.activity().clone();

        let guard = activity.lock();
        self.data_requests.handle_pending_requests(desc.memory_node);

        if !self.is_running() || self.has_work(desc, &queue) {
            return false;
        }
        if !self.conf.blocking {
            drop(guard);
            std::hint::spin_loop();
            return false;
        }

        debug!(%worker, "parking");
        drop(activity.wait(guard));
        true
    }

    /// Run termination handling for a job that finished (or a control job),
    /// then count it.
    pub fn handle_job_termination(&self, caller: Caller, job: &Arc<Job>) {
        self.termination.handle_job_termination(self, caller, job);
        self.record_termination();
    }

    /// Count one more terminated job and wake `wait_all`.
    ///
    /// A [`TerminationHandler`] calls this for every job it terminates itself
    /// instead of handing it back to [`Scheduler::push_task`].
    pub fn record_termination(&self) {
        lock(&self.progress).terminated += 1;
        self.progress_changed.notify_all();
    }

    fn all_done(&self, progress: &Progress) -> bool {
        progress.terminated >= progress.submitted || !self.is_running()
    }

    /// Block until every submitted job terminated, or the scheduler shut down.
    pub fn wait_all(&self) {
        let mut progress = lock(&self.progress);
        while !self.all_done(&progress) {
            progress = self
                .progress_changed
                .wait(progress)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`Scheduler::wait_all`] with a deadline. Returns whether every
    /// submitted job terminated.
    pub fn wait_all_timeout(&self, timeout: Duration) -> bool {
        let progress = lock(&self.progress);
        let (progress, _) = self
            .progress_changed
            .wait_timeout_while(progress, timeout, |p| !self.all_done(p))
            .unwrap_or_else(PoisonError::into_inner);
        progress.terminated >= progress.submitted
    }

    /// Stop the scheduler: refuse new submissions and release every parked
    /// worker. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.policy.deinit(&self.machine);
        for queue in &self.pinned {
            queue.activity().signal(Wakeup::All);
        }
        {
            let _progress = lock(&self.progress);
            self.progress_changed.notify_all();
        }

        let stats = self.stats();
        if stats.in_flight() > 0 {
            warn!(
                policy = self.policy.name(),
                in_flight = stats.in_flight(),
                "scheduler stopped with unfinished jobs"
            );
        } else {
            info!(policy = self.policy.name(), "scheduler stopped");
        }
    }

    pub fn stats(&self) -> SchedStats {
        let (submitted, terminated) = {
            let progress = lock(&self.progress);
            (progress.submitted, progress.terminated)
        };
        SchedStats {
            policy: self.policy.name().to_string(),
            taken_at: Utc::now(),
            running: self.is_running(),
            submitted,
            terminated,
            queues: self.policy.queues().iter().map(|q| q.counts()).collect(),
            pinned: self
                .pinned
                .iter()
                .zip(self.machine.workers())
                .map(|(queue, worker)| PinnedBacklog {
                    worker: worker.id,
                    pending: queue.len(),
                })
                .collect(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("policy", &self.policy.name())
            .field("workers", &self.machine.len())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    machine: MachineConfig,
    conf: SchedConf,
    policy: Option<Box<dyn SchedPolicy>>,
    registry: Option<PolicyRegistry>,
    termination: Option<Arc<dyn TerminationHandler>>,
    data_requests: Option<Arc<dyn DataRequestDrain>>,
    perf_model: Option<Arc<dyn PerfModel>>,
    bus_model: Option<Arc<dyn BusModel>>,
    env_policy: Option<Option<String>>,
}

impl SchedulerBuilder {
    fn new(machine: MachineConfig) -> Self {
        Self {
            machine,
            conf: SchedConf::default(),
            policy: None,
            registry: None,
            termination: None,
            data_requests: None,
            perf_model: None,
            bus_model: None,
            env_policy: None,
        }
    }

    pub fn conf(mut self, conf: SchedConf) -> Self {
        self.conf = conf;
        self
    }

    /// Use this policy object, whatever the configuration names.
    pub fn policy(mut self, policy: Box<dyn SchedPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn policy_name(mut self, name: impl Into<String>) -> Self {
        self.conf.policy_name = Some(name.into());
        self
    }

    /// Look names up here instead of in the built-in registry.
    pub fn registry(mut self, registry: PolicyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn termination(mut self, handler: Arc<dyn TerminationHandler>) -> Self {
        self.termination = Some(handler);
        self
    }

    pub fn data_requests(mut self, drain: Arc<dyn DataRequestDrain>) -> Self {
        self.data_requests = Some(drain);
        self
    }

    pub fn perf_model(mut self, model: Arc<dyn PerfModel>) -> Self {
        self.perf_model = Some(model);
        self
    }

    pub fn bus_model(mut self, model: Arc<dyn BusModel>) -> Self {
        self.bus_model = Some(model);
        self
    }

    /// Use `value` instead of reading the `SCHED` environment variable.
    pub fn env_policy(mut self, value: Option<&str>) -> Self {
        self.env_policy = Some(value.map(str::to_string));
        self
    }

    pub fn build(self) -> Result<Scheduler, SchedError> {
        self.machine.validate()?;

        let env_policy = match self.env_policy {
            Some(value) => value,
            None => std::env::var(SCHED_ENV).ok(),
        };
        let registry = self.registry.unwrap_or_else(PolicyRegistry::builtin);
        let mut policy = registry.select(self.policy, &self.conf, env_policy.as_deref())?;

        let perf_model = self
            .perf_model
            .unwrap_or_else(|| Arc::new(HistoryModel::new()));
        let env = PolicyEnv {
            conf: self.conf.clone(),
            perf_model: perf_model.clone(),
            bus_model: self.bus_model.unwrap_or_else(|| Arc::new(UniformBus::default())),
        };
        if let Err(err) = policy.init(&self.machine, &env) {
            policy.deinit(&self.machine);
            return Err(err);
        }

        let first_private = policy.queues().len() as u32;
        let mut pinned = Vec::with_capacity(self.machine.len());
        for worker in self.machine.workers() {
            let Some(local) = policy.local_queue(Caller::Worker(worker.id)) else {
                policy.deinit(&self.machine);
                return Err(SchedError::Config(format!(
                    "policy {} has no queue for {}",
                    policy.name(),
                    worker.id
                )));
            };
            pinned.push(Arc::new(JobQueue::new(
                QueueId::new(first_private + worker.id.0),
                worker.memory_node,
                local.activity().clone(),
                Wakeup::All,
            )));
        }

        Ok(Scheduler {
            machine: self.machine,
            conf: self.conf,
            policy,
            pinned,
            termination: self
                .termination
                .unwrap_or_else(|| Arc::new(ReleaseSuccessors)),
            data_requests: self
                .data_requests
                .unwrap_or_else(|| Arc::new(NoPendingRequests)),
            perf_model,
            running: AtomicBool::new(true),
            progress: Mutex::new(Progress::default()),
            progress_changed: Condvar::new(),
        })
    }
}
