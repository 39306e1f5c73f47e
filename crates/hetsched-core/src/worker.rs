//! Worker drivers: one OS thread per worker, popping and executing jobs.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::config::WorkerDesc;
use crate::domain::{ArchKind, ExecContext, Job, Where};
use crate::observability::WorkerReport;
use crate::policy::Caller;
use crate::sched::Scheduler;

/// Worker pool handle.
/// - `request_shutdown` で全ワーカーが現在のジョブを終えて止まる
/// - `shutdown_and_join()` で全ワーカーの終了を待ち、レポートを回収
pub struct WorkerPool {
    sched: Arc<Scheduler>,
    joins: Vec<JoinHandle<WorkerReport>>,
}

impl WorkerPool {
    /// Spawn one driver thread per worker of the scheduler's machine.
    pub fn spawn(sched: Arc<Scheduler>) -> io::Result<Self> {
        let mut joins = Vec::with_capacity(sched.machine().len());
        for desc in sched.machine().workers().iter().copied() {
            let s = Arc::clone(&sched);
            let spawned = thread::Builder::new()
                .name(format!("hetsched-{}", desc.id))
                .spawn(move || drive(&s, desc));
            match spawned {
                Ok(join) => joins.push(join),
                Err(err) => {
                    // 途中まで起動したワーカーを止めてから返す
                    sched.shutdown();
                    for join in joins {
                        let _ = join.join();
                    }
                    return Err(err);
                }
            }
        }
        Ok(Self { sched, joins })
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    /// Stop the scheduler. Workers finish the job in hand and exit.
    pub fn request_shutdown(&self) {
        self.sched.shutdown();
    }

    /// Shutdown and wait for all workers.
    pub fn shutdown_and_join(self) -> Vec<WorkerReport> {
        self.request_shutdown();
        self.joins
            .into_iter()
            .filter_map(|join| match join.join() {
                Ok(report) => Some(report),
                Err(_) => {
                    error!("worker thread panicked");
                    None
                }
            })
            .collect()
    }
}

fn drive(sched: &Scheduler, desc: WorkerDesc) -> WorkerReport {
    let mut report = WorkerReport::new(desc.id, desc.arch);
    debug!(worker = %desc.id, arch = %desc.arch, "worker started");

    while sched.is_running() {
        // SPU はまとめて取り出す
        let batch: Vec<Arc<Job>> = if desc.arch == ArchKind::Spu {
            let batch = sched.pop_every(desc.id, Where::SPU);
            for job in &batch {
                job.start_on(desc.id);
            }
            batch
        } else {
            sched.pop(desc.id).into_iter().collect()
        };

        if batch.is_empty() {
            if sched.wait_for_event(desc.id) {
                report.parked += 1;
            }
            continue;
        }

        for job in batch {
            execute(sched, &desc, &job, &mut report);
            sched.handle_job_termination(Caller::Worker(desc.id), &job);
        }
    }

    debug!(worker = %desc.id, executed = report.executed, "worker stopped");
    report
}

fn execute(sched: &Scheduler, desc: &WorkerDesc, job: &Job, report: &mut WorkerReport) {
    let Some(kernel) = job.codelet().and_then(|cl| cl.kernel(desc.arch)) else {
        warn!(job = %job.id(), worker = %desc.id, "no kernel for this worker, skipping");
        report.skipped += 1;
        return;
    };

    // 読み込むデータはこのノードに複製される
    for buf in job.buffers().iter().filter(|b| b.mode.reads()) {
        buf.handle.mark_valid_on(desc.memory_node);
    }

    let ctx = ExecContext {
        worker: desc.id,
        arch: desc.arch,
        buffers: job.buffers(),
        cl_arg: job.cl_arg(),
    };
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| kernel(&ctx)));
    let elapsed = started.elapsed();

    if outcome.is_err() {
        error!(job = %job.id(), worker = %desc.id, "kernel panicked");
        report.skipped += 1;
        return;
    }

    for buf in job.buffers().iter().filter(|b| b.mode.writes()) {
        buf.handle.invalidate_except(desc.memory_node);
    }
    sched.perf_model().record(job, desc.arch, elapsed);

    report.executed += 1;
    let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
    report.busy_nanos = report.busy_nanos.saturating_add(nanos);
}
