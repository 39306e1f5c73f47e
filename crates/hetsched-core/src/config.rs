//! Scheduler and machine configuration.

use serde::{Deserialize, Serialize};

use crate::domain::data::MAX_MEMORY_NODES;
use crate::domain::{ArchKind, Job, MemoryNode, Where, WorkerId};
use crate::error::SchedError;

/// Environment variable naming the policy when configuration leaves it open.
pub const SCHED_ENV: &str = "SCHED";

/// Scheduler configuration, typically parsed from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedConf {
    /// Policy to load. `None` defers to `SCHED`, then to `eager`.
    #[serde(default)]
    pub policy_name: Option<String>,
    /// Park idle workers on a condition variable. `false` = busy polling.
    #[serde(default = "default_blocking")]
    pub blocking: bool,
    /// dmda weight of the predicted end time.
    #[serde(default = "default_weight")]
    pub alpha: f64,
    /// dmda weight of the data-transfer penalty.
    #[serde(default = "default_weight")]
    pub beta: f64,
    /// Seed for the random policy. `None` = seeded from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// dm/dmda send jobs to workers without a prediction first.
    #[serde(default = "default_calibrate_first")]
    pub calibrate_first: bool,
}

fn default_blocking() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

fn default_calibrate_first() -> bool {
    true
}

impl Default for SchedConf {
    fn default() -> Self {
        Self {
            policy_name: None,
            blocking: default_blocking(),
            alpha: default_weight(),
            beta: default_weight(),
            seed: None,
            calibrate_first: default_calibrate_first(),
        }
    }
}

impl SchedConf {
    pub fn from_json(raw: &str) -> Result<Self, SchedError> {
        serde_json::from_str(raw).map_err(|e| SchedError::Config(e.to_string()))
    }

    pub fn with_policy(mut self, name: impl Into<String>) -> Self {
        self.policy_name = Some(name.into());
        self
    }
}

/// One execution unit of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDesc {
    pub id: WorkerId,
    pub arch: ArchKind,
    pub memory_node: MemoryNode,
}

impl WorkerDesc {
    pub fn mask(&self) -> Where {
        self.arch.mask()
    }

    /// Can this worker execute `job`'s codelet?
    pub fn can_run(&self, job: &Job) -> bool {
        job.can_run_on(self.arch)
    }
}

/// The set of workers a scheduler drives.
///
/// CPU cores share memory node 0; every accelerator gets a node of its own.
/// Worker ids are dense and equal to the worker's index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    workers: Vec<WorkerDesc>,
}

impl MachineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cpus(mut self, n: usize) -> Self {
        for _ in 0..n {
            self.add(ArchKind::Cpu, MemoryNode::new(0));
        }
        self
    }

    pub fn with_cuda(mut self, n: usize) -> Self {
        for _ in 0..n {
            let node = self.next_node();
            self.add(ArchKind::Cuda, node);
        }
        self
    }

    pub fn with_spus(mut self, n: usize) -> Self {
        for _ in 0..n {
            let node = self.next_node();
            self.add(ArchKind::Spu, node);
        }
        self
    }

    fn next_node(&self) -> MemoryNode {
        let last = self
            .workers
            .iter()
            .map(|w| w.memory_node.0)
            .max()
            .unwrap_or(0);
        MemoryNode::new(last + 1)
    }

    fn add(&mut self, arch: ArchKind, memory_node: MemoryNode) {
        let id = WorkerId::new(self.workers.len() as u32);
        self.workers.push(WorkerDesc {
            id,
            arch,
            memory_node,
        });
    }

    pub fn workers(&self) -> &[WorkerDesc] {
        &self.workers
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerDesc> {
        self.workers.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn count(&self, arch: ArchKind) -> usize {
        self.workers.iter().filter(|w| w.arch == arch).count()
    }

    /// Union of every worker's capability mask.
    pub fn where_mask(&self) -> Where {
        self.workers
            .iter()
            .fold(Where::empty(), |acc, w| acc | w.mask())
    }

    /// Can any worker execute a codelet with capability `mask`?
    pub fn can_execute(&self, mask: Where) -> bool {
        self.where_mask().intersects(mask)
    }

    /// More than one architecture present.
    pub fn is_heterogeneous(&self) -> bool {
        ArchKind::ALL
            .iter()
            .filter(|arch| self.count(**arch) > 0)
            .count()
            > 1
    }

    pub fn memory_nodes(&self) -> usize {
        self.workers
            .iter()
            .map(|w| w.memory_node.index() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Reject machines the scheduler cannot drive.
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.workers.is_empty() {
            return Err(SchedError::Config("machine has no workers".into()));
        }
        for (index, worker) in self.workers.iter().enumerate() {
            if worker.id.index() != index {
                return Err(SchedError::Config(format!(
                    "worker at position {index} has id {}",
                    worker.id
                )));
            }
        }
        if self.memory_nodes() > MAX_MEMORY_NODES as usize {
            return Err(SchedError::Config(format!(
                "{} memory nodes exceed the supported {MAX_MEMORY_NODES}",
                self.memory_nodes()
            )));
        }
        Ok(())
    }
}
