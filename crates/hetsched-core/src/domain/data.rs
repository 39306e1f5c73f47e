//! Data handles and the access modes jobs declare on them.
//!
//! The scheduler core never moves data. It only needs to know how big a
//! handle is and on which memory nodes a valid copy lives, so data-aware
//! policies can price the transfers a placement would cause.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::ids::{HandleId, MemoryNode};

/// Highest memory node index a handle can track.
pub const MAX_MEMORY_NODES: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn reads(self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// A piece of registered data.
#[derive(Debug)]
pub struct DataHandle {
    id: HandleId,
    size: usize,
    /// Bit `n` set when memory node `n` holds a valid copy.
    valid_on: AtomicU64,
}

impl DataHandle {
    /// Register `size` bytes whose initial copy lives on `home`.
    pub fn new(size: usize, home: MemoryNode) -> Arc<Self> {
        Arc::new(Self {
            id: HandleId::generate(),
            size,
            valid_on: AtomicU64::new(node_bit(home)),
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_valid_on(&self, node: MemoryNode) -> bool {
        self.valid_on.load(Ordering::Acquire) & node_bit(node) != 0
    }

    /// Some node holding a valid copy, preferring the lowest index.
    pub fn any_valid_node(&self) -> Option<MemoryNode> {
        let mask = self.valid_on.load(Ordering::Acquire);
        (mask != 0).then(|| MemoryNode::new(mask.trailing_zeros()))
    }

    /// Record that `node` now holds a replica (after a read transfer).
    pub fn mark_valid_on(&self, node: MemoryNode) {
        self.valid_on.fetch_or(node_bit(node), Ordering::AcqRel);
    }

    /// Record a write on `node`: every other replica is stale.
    pub fn invalidate_except(&self, node: MemoryNode) {
        self.valid_on.store(node_bit(node), Ordering::Release);
    }
}

fn node_bit(node: MemoryNode) -> u64 {
    assert!(
        node.0 < MAX_MEMORY_NODES,
        "memory node {node} exceeds the {MAX_MEMORY_NODES} tracked nodes"
    );
    1u64 << node.0
}

/// A handle as accessed by one job.
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub handle: Arc<DataHandle>,
    pub mode: AccessMode,
}

impl BufferDesc {
    pub fn new(handle: Arc<DataHandle>, mode: AccessMode) -> Self {
        Self { handle, mode }
    }
}
