//! TerminationHandler port - ジョブ終了時の後続解放

use std::sync::Arc;

use crate::domain::Job;
use crate::policy::Caller;
use crate::sched::Scheduler;

/// TerminationHandler はジョブの終了を処理
///
/// # 契約
/// - `Scheduler::handle_job_termination` から呼ばれ、`job` はその後で一件として数えられる
/// - 後続ジョブの依存カウンタを減らし、0 になったものを `Scheduler::push_task` で再投入
/// - ハンドラ自身が終了させた後続（制御ジョブなど）は `Scheduler::record_termination` で数える
pub trait TerminationHandler: Send + Sync {
    fn handle_job_termination(&self, sched: &Scheduler, caller: Caller, job: &Arc<Job>);
}
