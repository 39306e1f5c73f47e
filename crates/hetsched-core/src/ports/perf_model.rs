//! PerfModel port - 実行時間の予測と記録

use std::time::Duration;

use crate::domain::{ArchKind, Job};

/// PerfModel はジョブの実行時間をアーキテクチャごとに予測
///
/// # 契約
/// - `predict` が `None` を返す = 未校正（dm/dmda は校正のため優先的に割り当てる）
/// - `record` はワーカーが実行後に計測値を渡す
pub trait PerfModel: Send + Sync {
    fn predict(&self, job: &Job, arch: ArchKind) -> Option<Duration>;

    fn record(&self, job: &Job, arch: ArchKind, elapsed: Duration);
}
