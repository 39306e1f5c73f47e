//! ReleaseSuccessors - 既定の終了処理
//!
//! # 実装
//! - `Job::terminate` で終了状態にしてコールバックを実行
//! - 後続ジョブの依存を一つずつ解放し、準備完了になったものを同じ caller で push
//! - 準備完了になった制御ジョブは push せずにこのループ内で終了させる（制御ジョブの鎖が長くてもスタックは伸びない）
//! - push に失敗したジョブは実行せずに終了扱いにし、後続と進捗カウンタを進める

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, error};

use crate::domain::Job;
use crate::policy::Caller;
use crate::ports::TerminationHandler;
use crate::sched::Scheduler;

/// Marks the job terminated and pushes every successor it made ready.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReleaseSuccessors;

/// Terminate `job` and queue the successors whose last dependency it was.
fn release(job: &Job, ready: &mut VecDeque<Arc<Job>>) {
    let successors = job.terminate();
    debug!(job = %job.id(), successors = successors.len(), "terminated");
    ready.extend(successors.into_iter().filter(|s| s.release_dependency()));
}

impl TerminationHandler for ReleaseSuccessors {
    fn handle_job_termination(&self, sched: &Scheduler, caller: Caller, job: &Arc<Job>) {
        let mut ready = VecDeque::new();
        release(job, &mut ready);

        while let Some(successor) = ready.pop_front() {
            if successor.is_control() {
                release(&successor, &mut ready);
                sched.record_termination();
                continue;
            }
            // 投入時に検証済みなので、ここでの失敗は停止中か設定の不整合
            if let Err(err) = sched.push_task(caller, successor.clone()) {
                error!(job = %successor.id(), released_by = %job.id(), %err, "failed to push released job, skipping it");
                release(&successor, &mut ready);
                sched.record_termination();
            }
        }
    }
}
