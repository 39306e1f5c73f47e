//! Job queue: mutex-guarded storage plus a wake-up channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::activity::{Activity, Wakeup};
use crate::domain::{Job, MemoryNode, QueueId, Where};
use crate::observability::QueueCounts;
use crate::sync::lock;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Arc<Job>>,
    pushed: u64,
    popped: u64,
}

/// A container of ready jobs.
///
/// Design:
/// - The queue offers placement primitives (back, front, priority-sorted);
///   which one a push uses is the policy's decision.
/// - Pops take the first (or last) job runnable on a capability mask and
///   never wait. Parking is the scheduler's job.
/// - Every push signals the queue's `Activity` after the storage lock is
///   released.
pub struct JobQueue {
    id: QueueId,
    node: MemoryNode,
    state: Mutex<QueueState>,
    activity: Arc<Activity>,
    wakeup: Wakeup,
}

impl JobQueue {
    pub fn new(id: QueueId, node: MemoryNode, activity: Arc<Activity>, wakeup: Wakeup) -> Self {
        Self {
            id,
            node,
            state: Mutex::new(QueueState::default()),
            activity,
            wakeup,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Memory node of the worker(s) served by this queue.
    pub fn memory_node(&self) -> MemoryNode {
        self.node
    }

    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    pub fn push_back(&self, job: Arc<Job>) {
        self.insert(job, |jobs, job| jobs.push_back(job));
    }

    pub fn push_front(&self, job: Arc<Job>) {
        self.insert(job, |jobs, job| jobs.push_front(job));
    }

    /// Insert behind every job of equal or higher priority.
    pub fn push_sorted(&self, job: Arc<Job>) {
        self.insert(job, |jobs, job| {
            let priority = job.priority();
            let at = jobs.partition_point(|queued| queued.priority() >= priority);
            jobs.insert(at, job);
        });
    }

    fn insert(&self, job: Arc<Job>, place: impl FnOnce(&mut VecDeque<Arc<Job>>, Arc<Job>)) {
        {
            let mut state = lock(&self.state);
            job.enter_queue(self.id);
            place(&mut state.jobs, job);
            state.pushed += 1;
        }
        self.activity.signal(self.wakeup);
    }

    /// Remove the first job runnable on `mask`.
    pub fn pop_front(&self, mask: Where) -> Option<Arc<Job>> {
        let mut state = lock(&self.state);
        let at = state
            .jobs
            .iter()
            .position(|job| job.where_mask().intersects(mask))?;
        self.take(&mut state, at)
    }

    /// Remove the last job runnable on `mask`.
    pub fn pop_back(&self, mask: Where) -> Option<Arc<Job>> {
        let mut state = lock(&self.state);
        let at = state
            .jobs
            .iter()
            .rposition(|job| job.where_mask().intersects(mask))?;
        self.take(&mut state, at)
    }

    /// Remove every job runnable on `mask`, in queue order.
    pub fn pop_every(&self, mask: Where) -> Vec<Arc<Job>> {
        let mut state = lock(&self.state);
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.jobs)
            .into_iter()
            .partition(|job| job.where_mask().intersects(mask));
        state.jobs = kept.into();
        for job in &taken {
            job.leave_queue(self.id);
        }
        state.popped += taken.len() as u64;
        taken
    }

    fn take(&self, state: &mut QueueState, at: usize) -> Option<Arc<Job>> {
        let job = state.jobs.remove(at)?;
        job.leave_queue(self.id);
        state.popped += 1;
        Some(job)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).jobs.is_empty()
    }

    /// Is any queued job runnable on `mask`?
    pub fn has_runnable(&self, mask: Where) -> bool {
        lock(&self.state)
            .jobs
            .iter()
            .any(|job| job.where_mask().intersects(mask))
    }

    /// Number of queued jobs runnable on `mask`.
    pub fn runnable_len(&self, mask: Where) -> usize {
        lock(&self.state)
            .jobs
            .iter()
            .filter(|job| job.where_mask().intersects(mask))
            .count()
    }

    pub fn counts(&self) -> QueueCounts {
        let state = lock(&self.state);
        QueueCounts {
            queue: self.id,
            memory_node: self.node,
            pending: state.jobs.len(),
            pushed: state.pushed,
            popped: state.popped,
        }
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArchKind, Codelet, JobState};

    fn queue() -> JobQueue {
        JobQueue::new(
            QueueId::new(0),
            MemoryNode::new(0),
            Activity::new(),
            Wakeup::One,
        )
    }

    fn job_on(archs: &[ArchKind], priority: i32) -> Arc<Job> {
        let codelet = archs
            .iter()
            .fold(Codelet::new("test"), |cl, arch| cl.with_kernel(*arch, |_| {}));
        Job::builder(Arc::new(codelet)).priority(priority).build()
    }

    fn cpu_job(priority: i32) -> Arc<Job> {
        job_on(&[ArchKind::Cpu], priority)
    }

    #[test]
    fn push_back_pops_fifo() {
        let q = queue();
        let a = cpu_job(0);
        let b = cpu_job(0);
        q.push_back(a.clone());
        q.push_back(b.clone());

        assert_eq!(q.pop_front(Where::CPU).unwrap().id(), a.id());
        assert_eq!(q.pop_front(Where::CPU).unwrap().id(), b.id());
        assert!(q.pop_front(Where::CPU).is_none());
    }

    #[test]
    fn push_front_jumps_the_line() {
        let q = queue();
        let a = cpu_job(0);
        let urgent = cpu_job(0);
        q.push_back(a);
        q.push_front(urgent.clone());
        assert_eq!(q.pop_front(Where::CPU).unwrap().id(), urgent.id());
    }

    #[test]
    fn push_sorted_is_stable_among_equal_priorities() {
        let q = queue();
        let first = cpu_job(1);
        let high = cpu_job(5);
        let second = cpu_job(1);
        let low = cpu_job(-2);
        q.push_sorted(first.clone());
        q.push_sorted(low.clone());
        q.push_sorted(high.clone());
        q.push_sorted(second.clone());

        let order: Vec<_> = std::iter::from_fn(|| q.pop_front(Where::ANY))
            .map(|j| j.id())
            .collect();
        assert_eq!(order, vec![high.id(), first.id(), second.id(), low.id()]);
    }

    #[test]
    fn pops_skip_jobs_the_mask_cannot_run() {
        let q = queue();
        let cuda_only = job_on(&[ArchKind::Cuda], 0);
        let cpu = cpu_job(0);
        q.push_back(cuda_only.clone());
        q.push_back(cpu.clone());

        assert_eq!(q.pop_front(Where::CPU).unwrap().id(), cpu.id());
        assert!(q.pop_front(Where::CPU).is_none());
        assert!(q.has_runnable(Where::CUDA));
        assert_eq!(q.pop_back(Where::CUDA).unwrap().id(), cuda_only.id());
    }

    #[test]
    fn pop_back_takes_the_newest() {
        let q = queue();
        let old = cpu_job(0);
        let new = cpu_job(0);
        q.push_back(old.clone());
        q.push_back(new.clone());
        assert_eq!(q.pop_back(Where::CPU).unwrap().id(), new.id());
        assert_eq!(q.pop_back(Where::CPU).unwrap().id(), old.id());
    }

    #[test]
    fn pop_every_drains_matching_jobs_in_order() {
        let q = queue();
        let spu1 = job_on(&[ArchKind::Spu], 0);
        let cpu = cpu_job(0);
        let spu2 = job_on(&[ArchKind::Spu, ArchKind::Cpu], 0);
        q.push_back(spu1.clone());
        q.push_back(cpu.clone());
        q.push_back(spu2.clone());

        let drained: Vec<_> = q.pop_every(Where::SPU).iter().map(|j| j.id()).collect();
        assert_eq!(drained, vec![spu1.id(), spu2.id()]);
        assert_eq!(q.len(), 1);
        assert_eq!(spu1.state(), JobState::Popped);
        assert_eq!(q.pop_front(Where::CPU).unwrap().id(), cpu.id());
    }

    #[test]
    fn queued_job_records_its_queue() {
        let q = queue();
        let job = cpu_job(0);
        q.push_back(job.clone());
        assert_eq!(job.queued_on(), Some(q.id()));
        q.pop_front(Where::CPU).unwrap();
        assert_eq!(job.queued_on(), None);
    }

    #[test]
    #[should_panic(expected = "pushed onto")]
    fn pushing_a_queued_job_twice_panics() {
        let q = queue();
        let job = cpu_job(0);
        q.push_back(job.clone());
        q.push_back(job);
    }

    #[test]
    fn counts_track_traffic() {
        let q = queue();
        q.push_back(cpu_job(0));
        q.push_back(cpu_job(0));
        q.pop_front(Where::CPU);

        let counts = q.counts();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.pushed, 2);
        assert_eq!(counts.popped, 1);
        assert_eq!(q.runnable_len(Where::CPU), 1);
        assert_eq!(q.runnable_len(Where::CUDA), 0);
    }
}
