//! Batch submission of a job DAG, validated before anything is submitted.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::{Job, JobId};
use crate::error::SchedError;
use crate::policy::Caller;
use crate::queue::DependencyGraph;
use crate::sched::{Scheduler, Submission};

/// A set of jobs plus the dependencies between them.
///
/// Dependencies are only wired into the jobs on [`JobGraph::submit`], after
/// the graph was checked for cycles and every job was checked against the
/// machine. A rejected graph leaves all of its jobs untouched.
#[derive(Debug, Default)]
pub struct JobGraph {
    jobs: Vec<Arc<Job>>,
    index: HashMap<JobId, usize>,
    deps: DependencyGraph,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job. Adding the same job twice is a no-op.
    pub fn add(&mut self, job: Arc<Job>) -> JobId {
        let id = job.id();
        if !self.index.contains_key(&id) {
            self.index.insert(id, self.jobs.len());
            self.jobs.push(job);
        }
        id
    }

    /// `job` runs only after `depends_on` terminated.
    pub fn add_dependency(&mut self, job: JobId, depends_on: JobId) -> Result<(), SchedError> {
        for id in [job, depends_on] {
            if !self.index.contains_key(&id) {
                return Err(SchedError::UnknownJob(id));
            }
        }
        self.deps.add_dependency(job, depends_on);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> &[Arc<Job>] {
        &self.jobs
    }

    pub fn validate(&self) -> Result<(), SchedError> {
        match self.deps.detect_cycle() {
            Some(cycle) => Err(SchedError::DependencyCycle(cycle)),
            None => Ok(()),
        }
    }

    /// Validate, wire dependencies, then submit every job in insertion order.
    pub fn submit(self, sched: &Scheduler, caller: Caller) -> Result<Vec<Submission>, SchedError> {
        self.validate()?;
        for job in &self.jobs {
            sched.check_capability(job)?;
        }

        for job in &self.jobs {
            let mut preds: Vec<usize> = self
                .deps
                .dependencies(job.id())
                .iter()
                .filter_map(|id| self.index.get(id).copied())
                .collect();
            if preds.is_empty() {
                continue;
            }
            preds.sort_unstable();
            let preds: Vec<_> = preds.into_iter().map(|i| self.jobs[i].clone()).collect();
            job.declare_deps(&preds);
        }

        debug!(jobs = self.jobs.len(), %caller, "submitting job graph");
        self.jobs
            .into_iter()
            .map(|job| sched.submit(caller, job))
            .collect()
    }
}
