//! `dm` and `dmda`: per-worker queues with placement by predicted finish time.
//!
//! Each worker tracks when its queue is expected to drain:
//! `end = max(now, start) + len`, where `len` is the summed prediction of the
//! jobs it holds. A job goes to the worker where it would finish first
//! (`dm`), optionally penalised by the cost of moving its data there
//! (`dmda`). Workers without a prediction for the job are picked first so the
//! model gets calibrated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{Caller, PolicyEnv, SchedPolicy, per_worker_queues, worker_queue};
use crate::config::{MachineConfig, WorkerDesc};
use crate::domain::{Job, JobId, MAX_PRIO, Where};
use crate::error::SchedError;
use crate::ports::{BusModel, PerfModel};
use crate::queue::JobQueue;
use crate::sync::lock;

/// Times are microseconds since the policy's origin.
#[derive(Debug, Default)]
struct Expectation {
    start: f64,
    len: f64,
    end: f64,
    predicted: HashMap<JobId, f64>,
}

struct Candidate<'a> {
    worker: &'a WorkerDesc,
    end: f64,
    predicted: f64,
    penalty: f64,
}

pub struct DequeModelPolicy {
    data_aware: bool,
    origin: Instant,
    alpha: f64,
    beta: f64,
    calibrate_first: bool,
    perf_model: Option<Arc<dyn PerfModel>>,
    bus_model: Option<Arc<dyn BusModel>>,
    workers: Vec<WorkerDesc>,
    queues: Vec<Arc<JobQueue>>,
    expected: Vec<Mutex<Expectation>>,
}

impl DequeModelPolicy {
    pub fn dm() -> Self {
        Self::new(false)
    }

    pub fn dmda() -> Self {
        Self::new(true)
    }

    fn new(data_aware: bool) -> Self {
        Self {
            data_aware,
            origin: Instant::now(),
            alpha: 1.0,
            beta: 1.0,
            calibrate_first: true,
            perf_model: None,
            bus_model: None,
            workers: Vec::new(),
            queues: Vec::new(),
            expected: Vec::new(),
        }
    }

    fn now(&self) -> f64 {
        micros(self.origin.elapsed())
    }

    /// Time to bring every buffer of `job` the worker does not hold.
    fn transfer_penalty(&self, job: &Job, worker: &WorkerDesc) -> f64 {
        let Some(bus) = self.bus_model.as_ref() else {
            return 0.0;
        };
        job.buffers()
            .iter()
            .filter(|b| !b.handle.is_valid_on(worker.memory_node))
            .map(|b| {
                let from = b.handle.any_valid_node().unwrap_or(worker.memory_node);
                micros(bus.transfer_time(b.handle.size(), from, worker.memory_node))
            })
            .sum()
    }

    /// `jobs` left `queue` to run back to back: their predictions move out of
    /// the backlog and into the worker's next start time.
    fn started(&self, queue: &JobQueue, jobs: &[Arc<Job>]) {
        let Some(slot) = self.expected.get(queue.id().index()) else {
            return;
        };
        let now = self.now();
        let mut exp = lock(slot);
        let predicted: f64 = jobs
            .iter()
            .map(|job| exp.predicted.remove(&job.id()).unwrap_or(0.0))
            .sum();
        exp.start = now + predicted;
        exp.len = (exp.len - predicted).max(0.0);
        exp.end = exp.start + exp.len;
    }

    fn choose(&self, job: &Job) -> Option<Candidate<'_>> {
        let now = self.now();
        let mut candidates = Vec::new();
        let mut uncalibrated: Option<&WorkerDesc> = None;

        for worker in self.workers.iter().filter(|w| w.can_run(job)) {
            let prediction = self
                .perf_model
                .as_ref()
                .and_then(|model| model.predict(job, worker.arch));
            if prediction.is_none() && self.calibrate_first {
                let shorter = uncalibrated.is_none_or(|best| {
                    self.queues[worker.id.index()].len() < self.queues[best.id.index()].len()
                });
                if shorter {
                    uncalibrated = Some(worker);
                }
                continue;
            }
            let predicted = prediction.map(micros).unwrap_or(0.0);
            let exp = lock(&self.expected[worker.id.index()]);
            let end = exp.start.max(now) + exp.len + predicted;
            candidates.push(Candidate {
                worker,
                end,
                predicted,
                penalty: if self.data_aware {
                    self.transfer_penalty(job, worker)
                } else {
                    0.0
                },
            });
        }

        if let Some(worker) = uncalibrated {
            return Some(Candidate {
                worker,
                end: now,
                predicted: 0.0,
                penalty: 0.0,
            });
        }

        let best_end = candidates
            .iter()
            .map(|c| c.end)
            .fold(f64::INFINITY, f64::min);
        let fitness = |c: &Candidate<'_>| {
            if self.data_aware {
                self.alpha * (c.end - best_end) + self.beta * c.penalty
            } else {
                c.end
            }
        };
        candidates
            .into_iter()
            .reduce(|best, c| if fitness(&c) < fitness(&best) { c } else { best })
    }
}

fn micros(d: Duration) -> f64 {
    d.as_secs_f64() * 1e6
}

impl SchedPolicy for DequeModelPolicy {
    fn name(&self) -> &'static str {
        if self.data_aware { "dmda" } else { "dm" }
    }

    fn description(&self) -> &'static str {
        if self.data_aware {
            "data-aware performance model"
        } else {
            "performance model"
        }
    }

    fn init(&mut self, machine: &MachineConfig, env: &PolicyEnv) -> Result<(), SchedError> {
        if !(env.conf.alpha.is_finite() && env.conf.beta.is_finite()) {
            return Err(SchedError::Config(format!(
                "{}: alpha and beta must be finite",
                self.name()
            )));
        }
        self.origin = Instant::now();
        self.alpha = env.conf.alpha;
        self.beta = env.conf.beta;
        self.calibrate_first = env.conf.calibrate_first;
        self.perf_model = Some(env.perf_model.clone());
        self.bus_model = Some(env.bus_model.clone());
        self.workers = machine.workers().to_vec();
        self.queues = per_worker_queues(machine, None);
        self.expected = machine
            .workers()
            .iter()
            .map(|_| Mutex::new(Expectation::default()))
            .collect();
        Ok(())
    }

    fn local_queue(&self, caller: Caller) -> Option<Arc<JobQueue>> {
        worker_queue(&self.queues, caller, || 0)
    }

    fn push_task(&self, _queue: &Arc<JobQueue>, job: Arc<Job>) -> Result<(), SchedError> {
        let Some(best) = self.choose(&job) else {
            return Err(SchedError::NoCapableDevice {
                job: job.id(),
                target: None,
            });
        };
        let index = best.worker.id.index();
        {
            let now = self.now();
            let mut exp = lock(&self.expected[index]);
            exp.start = exp.start.max(now);
            exp.len += best.predicted;
            exp.end = exp.start + exp.len;
            exp.predicted.insert(job.id(), best.predicted);
        }
        debug!(
            job = %job.id(),
            worker = %best.worker.id,
            expected_end_us = best.end,
            penalty_us = best.penalty,
            "{} placement",
            self.name()
        );

        let queue = &self.queues[index];
        if job.priority() == MAX_PRIO {
            queue.push_front(job);
        } else {
            queue.push_back(job);
        }
        Ok(())
    }

    fn pop_task(&self, queue: &JobQueue, worker: &WorkerDesc) -> Option<Arc<Job>> {
        let job = queue.pop_front(worker.mask())?;
        self.started(queue, std::slice::from_ref(&job));
        Some(job)
    }

    fn pop_every_task(&self, queue: &JobQueue, mask: Where) -> Vec<Arc<Job>> {
        let jobs = queue.pop_every(mask);
        if !jobs.is_empty() {
            self.started(queue, &jobs);
        }
        jobs
    }

    fn queues(&self) -> Vec<Arc<JobQueue>> {
        self.queues.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::SchedConf;
    use crate::domain::{AccessMode, ArchKind, DataHandle, MemoryNode, WorkerId};
    use crate::impls::{HistoryModel, UniformBus};
    use crate::policy::testing::{FixedModel, codelet, job};

    fn env_with_model(model: Arc<dyn PerfModel>, conf: SchedConf) -> PolicyEnv {
        PolicyEnv {
            conf,
            perf_model: model,
            bus_model: Arc::new(UniformBus::new(Duration::from_millis(1), 1.0e6)),
        }
    }

    fn fixed(pairs: &[(ArchKind, u64)]) -> Arc<dyn PerfModel> {
        Arc::new(FixedModel(
            pairs
                .iter()
                .map(|(arch, ms)| (*arch, Duration::from_millis(*ms)))
                .collect::<HashMap<_, _>>(),
        ))
    }

    fn init(mut policy: DequeModelPolicy, machine: &MachineConfig, env: PolicyEnv) -> DequeModelPolicy {
        policy.init(machine, &env).unwrap();
        policy
    }

    fn lens(policy: &DequeModelPolicy) -> Vec<usize> {
        policy.queues().iter().map(|q| q.len()).collect()
    }

    #[test]
    fn goes_to_the_fastest_worker() {
        let machine = MachineConfig::new().with_cpus(1).with_cuda(1);
        let model = fixed(&[(ArchKind::Cpu, 10), (ArchKind::Cuda, 1)]);
        let policy = init(DequeModelPolicy::dm(), &machine, env_with_model(model, SchedConf::default()));
        let queue = policy.local_queue(Caller::External).unwrap();

        policy
            .push_task(&queue, job(&[ArchKind::Cpu, ArchKind::Cuda]))
            .unwrap();
        assert_eq!(lens(&policy), vec![0, 1]);
    }

    #[test]
    fn balances_once_the_fast_worker_backs_up() {
        let machine = MachineConfig::new().with_cpus(1).with_cuda(1);
        let model = fixed(&[(ArchKind::Cpu, 10), (ArchKind::Cuda, 4)]);
        let policy = init(DequeModelPolicy::dm(), &machine, env_with_model(model, SchedConf::default()));
        let queue = policy.local_queue(Caller::External).unwrap();

        // cuda ends at 4, 8, 12; cpu at 10 beats the third cuda slot
        for _ in 0..3 {
            policy
                .push_task(&queue, job(&[ArchKind::Cpu, ArchKind::Cuda]))
                .unwrap();
        }
        assert_eq!(lens(&policy), vec![1, 2]);
    }

    #[test]
    fn pop_consumes_the_expectation() {
        let machine = MachineConfig::new().with_cpus(1);
        let model = fixed(&[(ArchKind::Cpu, 5)]);
        let policy = init(DequeModelPolicy::dm(), &machine, env_with_model(model, SchedConf::default()));
        let queue = policy.local_queue(Caller::Worker(WorkerId::new(0))).unwrap();

        policy.push_task(&queue, job(&[ArchKind::Cpu])).unwrap();
        assert!(lock(&policy.expected[0]).len > 4_000.0);
        policy.pop_task(&queue, &machine.workers()[0]).unwrap();

        let exp = lock(&policy.expected[0]);
        assert_eq!(exp.len, 0.0);
        assert!(exp.predicted.is_empty());
    }

    #[test]
    fn batch_pop_consumes_the_expectation() {
        let machine = MachineConfig::new().with_spus(2);
        let model = fixed(&[(ArchKind::Spu, 10)]);
        let policy = init(DequeModelPolicy::dm(), &machine, env_with_model(model, SchedConf::default()));
        let queue = policy.local_queue(Caller::External).unwrap();

        for _ in 0..4 {
            policy.push_task(&queue, job(&[ArchKind::Spu])).unwrap();
        }
        assert_eq!(lens(&policy), vec![2, 2]);

        for q in policy.queues() {
            assert_eq!(policy.pop_every_task(&q, Where::SPU).len(), 2);
        }
        for slot in &policy.expected {
            let exp = lock(slot);
            assert_eq!(exp.len, 0.0);
            assert!(exp.predicted.is_empty());
            assert_eq!(exp.end, exp.start);
        }
    }

    #[test]
    fn empty_batch_pop_leaves_the_expectation_alone() {
        let machine = MachineConfig::new().with_spus(1);
        let model = fixed(&[(ArchKind::Spu, 10)]);
        let policy = init(DequeModelPolicy::dm(), &machine, env_with_model(model, SchedConf::default()));
        let queue = policy.local_queue(Caller::Worker(WorkerId::new(0))).unwrap();

        policy.push_task(&queue, job(&[ArchKind::Spu])).unwrap();
        assert!(policy.pop_every_task(&queue, Where::CPU).is_empty());
        let exp = lock(&policy.expected[0]);
        assert_eq!(exp.predicted.len(), 1);
        assert!(exp.len > 9_000.0);
    }

    #[test]
    fn uncalibrated_workers_are_tried_first() {
        let machine = MachineConfig::new().with_cpus(1).with_cuda(1);
        let model = fixed(&[(ArchKind::Cpu, 1)]);
        let policy = init(DequeModelPolicy::dm(), &machine, env_with_model(model, SchedConf::default()));
        let queue = policy.local_queue(Caller::External).unwrap();

        policy
            .push_task(&queue, job(&[ArchKind::Cpu, ArchKind::Cuda]))
            .unwrap();
        assert_eq!(lens(&policy), vec![0, 1]);
    }

    #[test]
    fn calibration_can_be_disabled() {
        let machine = MachineConfig::new().with_cpus(1).with_cuda(1);
        let model = fixed(&[(ArchKind::Cpu, 1)]);
        let conf = SchedConf {
            calibrate_first: false,
            ..SchedConf::default()
        };
        let policy = init(DequeModelPolicy::dm(), &machine, env_with_model(model, conf));
        let queue = policy.local_queue(Caller::External).unwrap();

        // unknown cuda time counts as zero
        policy
            .push_task(&queue, job(&[ArchKind::Cpu, ArchKind::Cuda]))
            .unwrap();
        assert_eq!(lens(&policy), vec![0, 1]);
    }

    #[test]
    fn empty_history_spreads_over_shortest_queues() {
        let machine = MachineConfig::new().with_cpus(3);
        let policy = init(
            DequeModelPolicy::dm(),
            &machine,
            env_with_model(Arc::new(HistoryModel::new()), SchedConf::default()),
        );
        let queue = policy.local_queue(Caller::External).unwrap();
        for _ in 0..6 {
            policy.push_task(&queue, job(&[ArchKind::Cpu])).unwrap();
        }
        assert_eq!(lens(&policy), vec![2, 2, 2]);
    }

    #[test]
    fn dmda_follows_the_data() {
        let machine = MachineConfig::new().with_cuda(2);
        let model = fixed(&[(ArchKind::Cuda, 1)]);
        let policy = init(DequeModelPolicy::dmda(), &machine, env_with_model(model, SchedConf::default()));
        let queue = policy.local_queue(Caller::External).unwrap();

        // resident on the second gpu's node
        let node = machine.workers()[1].memory_node;
        let handle = DataHandle::new(1 << 20, node);
        let j = Job::builder(codelet(&[ArchKind::Cuda]))
            .buffer(handle, AccessMode::Read)
            .build();
        policy.push_task(&queue, j).unwrap();
        assert_eq!(lens(&policy), vec![0, 1]);
    }

    #[test]
    fn dm_ignores_the_data() {
        let machine = MachineConfig::new().with_cuda(2);
        let model = fixed(&[(ArchKind::Cuda, 1)]);
        let policy = init(DequeModelPolicy::dm(), &machine, env_with_model(model, SchedConf::default()));
        let queue = policy.local_queue(Caller::External).unwrap();

        let handle = DataHandle::new(1 << 20, MemoryNode::new(2));
        let j = Job::builder(codelet(&[ArchKind::Cuda]))
            .buffer(handle, AccessMode::Read)
            .build();
        policy.push_task(&queue, j).unwrap();
        assert_eq!(lens(&policy), vec![1, 0]);
    }

    #[test]
    fn max_prio_jumps_ahead() {
        let machine = MachineConfig::new().with_cpus(1);
        let model = fixed(&[(ArchKind::Cpu, 1)]);
        let policy = init(DequeModelPolicy::dm(), &machine, env_with_model(model, SchedConf::default()));
        let queue = policy.local_queue(Caller::Worker(WorkerId::new(0))).unwrap();

        policy.push_task(&queue, job(&[ArchKind::Cpu])).unwrap();
        let urgent = Job::builder(codelet(&[ArchKind::Cpu])).priority(MAX_PRIO).build();
        policy.push_task(&queue, urgent.clone()).unwrap();
        assert_eq!(
            policy.pop_task(&queue, &machine.workers()[0]).unwrap().id(),
            urgent.id()
        );
    }

    #[test]
    fn non_finite_weights_are_rejected() {
        let machine = MachineConfig::new().with_cpus(1);
        let conf = SchedConf {
            alpha: f64::NAN,
            ..SchedConf::default()
        };
        let mut policy = DequeModelPolicy::dmda();
        let err = policy
            .init(&machine, &env_with_model(fixed(&[]), conf))
            .unwrap_err();
        assert!(matches!(err, SchedError::Config(_)));
    }

    #[test]
    fn nothing_capable_is_reported() {
        let machine = MachineConfig::new().with_cpus(1);
        let policy = init(DequeModelPolicy::dm(), &machine, env_with_model(fixed(&[]), SchedConf::default()));
        let queue = policy.local_queue(Caller::External).unwrap();
        assert!(policy.push_task(&queue, job(&[ArchKind::Cuda])).is_err());
    }
}
