//! DataRequestDrain port - 待機前の保留データ要求処理

use crate::domain::MemoryNode;

/// DataRequestDrain はメモリノード宛ての保留中データ転送要求を処理
///
/// # 呼び出しタイミング
/// - `wait_for_event` の中、activity ロックを保持した状態で、待機の直前
/// - ブロックしてはいけない
pub trait DataRequestDrain: Send + Sync {
    fn handle_pending_requests(&self, node: MemoryNode);
}

/// データ転送層を持たない構成用（何もしない）
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPendingRequests;

impl DataRequestDrain for NoPendingRequests {
    fn handle_pending_requests(&self, _node: MemoryNode) {}
}
