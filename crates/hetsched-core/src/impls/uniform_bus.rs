//! UniformBus - すべてのノード間で同じ特性を持つバス

use std::time::Duration;

use crate::domain::MemoryNode;
use crate::ports::BusModel;

/// Every pair of distinct memory nodes is linked by the same bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformBus {
    pub latency: Duration,
    /// Bytes per second.
    pub bandwidth: f64,
}

impl UniformBus {
    pub fn new(latency: Duration, bandwidth: f64) -> Self {
        Self { latency, bandwidth }
    }
}

impl Default for UniformBus {
    fn default() -> Self {
        // PCIe-class link
        Self::new(Duration::from_micros(10), 8.0e9)
    }
}

impl BusModel for UniformBus {
    fn transfer_time(&self, bytes: usize, from: MemoryNode, to: MemoryNode) -> Duration {
        if from == to || bytes == 0 {
            return Duration::ZERO;
        }
        if self.bandwidth <= 0.0 {
            return Duration::MAX;
        }
        self.latency + Duration::from_secs_f64(bytes as f64 / self.bandwidth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_node_is_free() {
        let bus = UniformBus::default();
        let node = MemoryNode::new(1);
        assert_eq!(bus.transfer_time(1 << 20, node, node), Duration::ZERO);
    }

    #[test]
    fn cost_is_latency_plus_size_over_bandwidth() {
        let bus = UniformBus::new(Duration::from_millis(1), 1000.0);
        let t = bus.transfer_time(500, MemoryNode::new(0), MemoryNode::new(1));
        assert_eq!(t, Duration::from_millis(501));
    }

    #[test]
    fn larger_transfers_cost_more() {
        let bus = UniformBus::default();
        let (a, b) = (MemoryNode::new(0), MemoryNode::new(2));
        assert!(bus.transfer_time(1 << 24, a, b) > bus.transfer_time(1 << 10, a, b));
    }
}
