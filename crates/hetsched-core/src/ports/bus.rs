//! BusModel port - メモリノード間の転送時間

use std::time::Duration;

use crate::domain::MemoryNode;

/// BusModel は `bytes` を `from` から `to` へ運ぶ時間を見積もる
pub trait BusModel: Send + Sync {
    fn transfer_time(&self, bytes: usize, from: MemoryNode, to: MemoryNode) -> Duration;
}
