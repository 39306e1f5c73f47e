//! Job record: one submitted task instance and its scheduling metadata.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::arch::{ArchKind, Where};
use super::codelet::Codelet;
use super::data::{AccessMode, BufferDesc, DataHandle};
use super::ids::{JobId, QueueId, WorkerId};
use super::state::JobState;
use crate::sync::lock;

pub const MIN_PRIO: i32 = -4;
pub const MAX_PRIO: i32 = 5;
pub const DEFAULT_PRIO: i32 = 0;

/// Runs once, when the job terminates.
pub type Callback = Box<dyn FnOnce(&Job) + Send>;

struct Successors {
    jobs: Vec<Arc<Job>>,
    terminated: bool,
}

/// The runtime's scheduling record for one task instance.
///
/// Design:
/// - Shared as `Arc<Job>`: queues, workers and predecessors all hold it.
/// - `gate` counts unresolved predecessors plus one hold released by
///   submission. Whoever brings it to zero pushes the job, so a job is pushed
///   exactly once no matter which thread finishes last.
/// - All state transitions go through methods that panic on misuse.
pub struct Job {
    id: JobId,
    codelet: Option<Arc<Codelet>>,
    buffers: Vec<BufferDesc>,
    cl_arg: serde_json::Value,
    priority: i32,
    execute_on: Option<WorkerId>,
    synchronous: bool,
    created_at: DateTime<Utc>,

    callback: Mutex<Option<Callback>>,
    gate: AtomicUsize,
    unresolved: AtomicUsize,
    successors: Mutex<Successors>,

    state: Mutex<JobState>,
    done: Condvar,
}

impl Job {
    /// Start building a job running `codelet`.
    pub fn builder(codelet: Arc<Codelet>) -> JobBuilder {
        JobBuilder::new(Some(codelet))
    }

    /// Start building a control job: no codelet, only dependency structure.
    pub fn control() -> JobBuilder {
        JobBuilder::new(None)
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn codelet(&self) -> Option<&Arc<Codelet>> {
        self.codelet.as_ref()
    }

    pub fn is_control(&self) -> bool {
        self.codelet.is_none()
    }

    pub fn buffers(&self) -> &[BufferDesc] {
        &self.buffers
    }

    pub fn cl_arg(&self) -> &serde_json::Value {
        &self.cl_arg
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn execute_on(&self) -> Option<WorkerId> {
        self.execute_on
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Device kinds this job can execute on (empty for control jobs).
    pub fn where_mask(&self) -> Where {
        self.codelet
            .as_ref()
            .map(|cl| cl.where_mask())
            .unwrap_or_else(Where::empty)
    }

    pub fn can_run_on(&self, arch: ArchKind) -> bool {
        self.codelet
            .as_ref()
            .is_some_and(|cl| cl.can_run_on(arch))
    }

    /// Total bytes of the buffers this job touches.
    pub fn footprint(&self) -> usize {
        self.buffers.iter().map(|b| b.handle.size()).sum()
    }

    pub fn state(&self) -> JobState {
        *lock(&self.state)
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// Queue currently holding this job, if any.
    pub fn queued_on(&self) -> Option<QueueId> {
        self.state().queue()
    }

    pub fn enqueued_at(&self) -> Option<Instant> {
        match self.state() {
            JobState::Queued { since, .. } => Some(since),
            _ => None,
        }
    }

    pub fn unresolved_dependencies(&self) -> usize {
        self.unresolved.load(Ordering::Acquire)
    }

    pub fn successor_count(&self) -> usize {
        lock(&self.successors).jobs.len()
    }

    /// Make `self` wait for every job in `preds`.
    ///
    /// Must be called before `self` is submitted. A predecessor that already
    /// terminated does not count.
    pub fn declare_deps(self: &Arc<Self>, preds: &[Arc<Job>]) {
        assert!(
            matches!(self.state(), JobState::Created),
            "{}: dependencies must be declared before submission",
            self.id
        );
        for pred in preds {
            assert!(
                !Arc::ptr_eq(pred, self),
                "{}: a job cannot depend on itself",
                self.id
            );
            let mut succ = lock(&pred.successors);
            if succ.terminated {
                continue;
            }
            self.unresolved.fetch_add(1, Ordering::AcqRel);
            self.gate.fetch_add(1, Ordering::AcqRel);
            succ.jobs.push(Arc::clone(self));
        }
    }

    /// Release the submission hold. Returns `true` when the job is now ready
    /// to be pushed.
    pub(crate) fn open_submission_gate(&self) -> bool {
        {
            let mut state = lock(&self.state);
            assert!(
                matches!(*state, JobState::Created),
                "{}: submitted twice (state {:?})",
                self.id,
                *state
            );
            *state = JobState::Deferred;
        }
        self.gate.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// One predecessor terminated. Returns `true` when the job is now ready.
    pub(crate) fn release_dependency(&self) -> bool {
        let before = self.unresolved.fetch_sub(1, Ordering::AcqRel);
        assert!(before > 0, "{}: dependency released below zero", self.id);
        self.gate.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn enter_queue(&self, queue: QueueId) {
        let mut state = lock(&self.state);
        assert!(
            state.is_pushable(),
            "{}: pushed onto {queue} while {:?}",
            self.id,
            *state
        );
        *state = JobState::Queued {
            queue,
            since: Instant::now(),
        };
    }

    pub(crate) fn leave_queue(&self, queue: QueueId) {
        let mut state = lock(&self.state);
        assert!(
            state.queue() == Some(queue),
            "{}: removed from {queue} while {:?}",
            self.id,
            *state
        );
        *state = JobState::Popped;
    }

    pub(crate) fn start_on(&self, worker: WorkerId) {
        let mut state = lock(&self.state);
        assert!(
            matches!(*state, JobState::Popped),
            "{}: started on {worker} while {:?}",
            self.id,
            *state
        );
        *state = JobState::Running { worker };
    }

    /// Mark the job terminated and hand back its successors.
    ///
    /// Fires the callback. Panics when called twice.
    pub(crate) fn terminate(&self) -> Vec<Arc<Job>> {
        let successors = {
            let mut succ = lock(&self.successors);
            assert!(!succ.terminated, "{}: terminated twice", self.id);
            succ.terminated = true;
            std::mem::take(&mut succ.jobs)
        };

        let callback = lock(&self.callback).take();
        if let Some(callback) = callback {
            callback(self);
        }

        *lock(&self.state) = JobState::Terminated;
        self.done.notify_all();
        successors
    }

    /// Block until the job terminated.
    pub fn wait(&self) {
        let mut state = lock(&self.state);
        while !state.is_terminal() {
            state = self
                .done
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Block until the job terminated or `timeout` elapsed. Returns whether it
    /// terminated.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = lock(&self.state);
        let (state, _) = self
            .done
            .wait_timeout_while(state, timeout, |s| !s.is_terminal())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.is_terminal()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("codelet", &self.codelet.as_ref().map(|cl| cl.name()))
            .field("priority", &self.priority)
            .field("execute_on", &self.execute_on)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`Job`].
pub struct JobBuilder {
    codelet: Option<Arc<Codelet>>,
    buffers: Vec<BufferDesc>,
    cl_arg: serde_json::Value,
    priority: i32,
    execute_on: Option<WorkerId>,
    synchronous: bool,
    callback: Option<Callback>,
}

impl JobBuilder {
    fn new(codelet: Option<Arc<Codelet>>) -> Self {
        Self {
            codelet,
            buffers: Vec::new(),
            cl_arg: serde_json::Value::Null,
            priority: DEFAULT_PRIO,
            execute_on: None,
            synchronous: false,
            callback: None,
        }
    }

    pub fn buffer(mut self, handle: Arc<DataHandle>, mode: AccessMode) -> Self {
        self.buffers.push(BufferDesc::new(handle, mode));
        self
    }

    pub fn cl_arg(mut self, arg: serde_json::Value) -> Self {
        self.cl_arg = arg;
        self
    }

    /// Clamped to `[MIN_PRIO, MAX_PRIO]`.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority.clamp(MIN_PRIO, MAX_PRIO);
        self
    }

    /// Pin the job: only `worker` may run it.
    pub fn execute_on(mut self, worker: WorkerId) -> Self {
        self.execute_on = Some(worker);
        self
    }

    /// Submission blocks until the job terminated.
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Job) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Arc<Job> {
        Arc::new(Job {
            id: JobId::generate(),
            codelet: self.codelet,
            buffers: self.buffers,
            cl_arg: self.cl_arg,
            priority: self.priority,
            execute_on: self.execute_on,
            synchronous: self.synchronous,
            created_at: Utc::now(),
            callback: Mutex::new(self.callback),
            gate: AtomicUsize::new(1),
            unresolved: AtomicUsize::new(0),
            successors: Mutex::new(Successors {
                jobs: Vec::new(),
                terminated: false,
            }),
            state: Mutex::new(JobState::Created),
            done: Condvar::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::domain::ids::MemoryNode;

    fn cpu_codelet() -> Arc<Codelet> {
        Arc::new(Codelet::new("noop").with_kernel(ArchKind::Cpu, |_| {}))
    }

    #[test]
    fn builder_defaults() {
        let job = Job::builder(cpu_codelet()).build();
        assert_eq!(job.priority(), DEFAULT_PRIO);
        assert_eq!(job.execute_on(), None);
        assert!(!job.is_synchronous());
        assert!(!job.is_control());
        assert_eq!(job.state(), JobState::Created);
        assert_eq!(job.where_mask(), Where::CPU);
    }

    #[test]
    fn priority_is_clamped() {
        let high = Job::builder(cpu_codelet()).priority(100).build();
        let low = Job::builder(cpu_codelet()).priority(-100).build();
        assert_eq!(high.priority(), MAX_PRIO);
        assert_eq!(low.priority(), MIN_PRIO);
    }

    #[test]
    fn control_job_runs_nowhere() {
        let job = Job::control().build();
        assert!(job.is_control());
        assert!(job.where_mask().is_empty());
        assert!(!job.can_run_on(ArchKind::Cpu));
    }

    #[test]
    fn footprint_sums_buffers() {
        let a = DataHandle::new(100, MemoryNode::new(0));
        let b = DataHandle::new(28, MemoryNode::new(0));
        let job = Job::builder(cpu_codelet())
            .buffer(a, AccessMode::Read)
            .buffer(b, AccessMode::Write)
            .build();
        assert_eq!(job.footprint(), 128);
    }

    #[test]
    fn gate_opens_after_submission_and_all_predecessors() {
        let a = Job::control().build();
        let b = Job::control().build();
        let c = Job::control().build();
        c.declare_deps(&[a.clone(), b.clone()]);
        assert_eq!(c.unresolved_dependencies(), 2);
        assert_eq!(a.successor_count(), 1);

        assert!(!c.open_submission_gate());
        assert_eq!(c.state(), JobState::Deferred);
        assert!(!c.release_dependency());
        assert!(c.release_dependency());
        assert_eq!(c.unresolved_dependencies(), 0);
    }

    #[test]
    fn gate_opens_on_submission_when_predecessors_already_done() {
        let a = Job::control().build();
        let b = Job::control().build();
        b.declare_deps(&[a.clone()]);
        assert!(!b.release_dependency());
        assert!(b.open_submission_gate());
    }

    #[test]
    fn terminated_predecessor_is_not_counted() {
        let a = Job::control().build();
        assert!(a.terminate().is_empty());
        let b = Job::control().build();
        b.declare_deps(&[a]);
        assert_eq!(b.unresolved_dependencies(), 0);
        assert!(b.open_submission_gate());
    }

    #[test]
    fn terminate_fires_callback_and_returns_successors() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let a = Job::control()
            .callback(move |_| flag.store(true, Ordering::SeqCst))
            .build();
        let b = Job::control().build();
        b.declare_deps(&[a.clone()]);

        let successors = a.terminate();
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(successors.len(), 1);
        assert_eq!(successors[0].id(), b.id());
        assert!(a.is_terminated());
        assert!(a.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    #[should_panic(expected = "terminated twice")]
    fn double_termination_panics() {
        let a = Job::control().build();
        a.terminate();
        a.terminate();
    }

    #[test]
    #[should_panic(expected = "submitted twice")]
    fn double_submission_panics() {
        let a = Job::control().build();
        a.open_submission_gate();
        a.open_submission_gate();
    }

    #[test]
    fn queue_transitions_are_tracked() {
        let job = Job::builder(cpu_codelet()).build();
        job.enter_queue(QueueId::new(1));
        assert_eq!(job.queued_on(), Some(QueueId::new(1)));
        assert!(job.enqueued_at().is_some());
        job.leave_queue(QueueId::new(1));
        assert_eq!(job.state(), JobState::Popped);
        job.start_on(WorkerId::new(2));
        assert_eq!(
            job.state(),
            JobState::Running {
                worker: WorkerId::new(2)
            }
        );
    }

    #[test]
    #[should_panic(expected = "removed from queue-2")]
    fn leaving_the_wrong_queue_panics() {
        let job = Job::builder(cpu_codelet()).build();
        job.enter_queue(QueueId::new(1));
        job.leave_queue(QueueId::new(2));
    }

    #[test]
    fn wait_returns_once_another_thread_terminates() {
        let job = Job::control().build();
        let handle = {
            let job = job.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                job.terminate();
            })
        };
        job.wait();
        assert!(job.is_terminated());
        handle.join().unwrap();
    }
}
