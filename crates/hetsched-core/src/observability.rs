use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ArchKind, MemoryNode, QueueId, WorkerId};

/// Traffic through one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queue: QueueId,
    pub memory_node: MemoryNode,
    pub pending: usize,
    pub pushed: u64,
    pub popped: u64,
}

/// Jobs waiting in a worker's private (pinned) queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedBacklog {
    pub worker: WorkerId,
    pub pending: usize,
}

/// Point-in-time view of a scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedStats {
    pub policy: String,
    pub taken_at: DateTime<Utc>,
    pub running: bool,
    pub submitted: u64,
    pub terminated: u64,
    pub queues: Vec<QueueCounts>,
    pub pinned: Vec<PinnedBacklog>,
}

impl SchedStats {
    /// Jobs submitted but not yet terminated.
    pub fn in_flight(&self) -> u64 {
        self.submitted.saturating_sub(self.terminated)
    }

    /// Jobs sitting in any queue right now.
    pub fn pending(&self) -> usize {
        self.queues.iter().map(|q| q.pending).sum::<usize>()
            + self.pinned.iter().map(|p| p.pending).sum::<usize>()
    }
}

/// What one worker driver did before it stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker: WorkerId,
    pub arch: ArchKind,
    pub executed: u64,
    pub parked: u64,
    /// Jobs popped whose codelet had no kernel for this worker.
    pub skipped: u64,
    pub busy_nanos: u64,
}

impl WorkerReport {
    pub fn new(worker: WorkerId, arch: ArchKind) -> Self {
        Self {
            worker,
            arch,
            executed: 0,
            parked: 0,
            skipped: 0,
            busy_nanos: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_totals() {
        let stats = SchedStats {
            policy: "eager".into(),
            taken_at: Utc::now(),
            running: true,
            submitted: 10,
            terminated: 7,
            queues: vec![QueueCounts {
                queue: QueueId::new(0),
                memory_node: MemoryNode::new(0),
                pending: 2,
                pushed: 9,
                popped: 7,
            }],
            pinned: vec![PinnedBacklog {
                worker: WorkerId::new(1),
                pending: 1,
            }],
        };
        assert_eq!(stats.in_flight(), 3);
        assert_eq!(stats.pending(), 3);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["queues"][0]["queue"], 0);
        assert_eq!(json["pinned"][0]["worker"], 1);
    }
}
