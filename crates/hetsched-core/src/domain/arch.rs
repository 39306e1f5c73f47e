//! Device kinds and capability masks.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Set of device kinds a codelet can execute on, or a worker can serve.
    pub struct Where: u32 {
        const CPU = 1 << 0;
        const CUDA = 1 << 1;
        /// Cell-style synergistic units driven in batches.
        const SPU = 1 << 2;
        const ANY = Self::CPU.bits | Self::CUDA.bits | Self::SPU.bits;
    }
}

/// Architecture of a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchKind {
    Cpu,
    Cuda,
    Spu,
}

impl ArchKind {
    pub const ALL: [ArchKind; 3] = [ArchKind::Cpu, ArchKind::Cuda, ArchKind::Spu];

    /// Capability mask of a worker of this kind.
    pub fn mask(self) -> Where {
        match self {
            ArchKind::Cpu => Where::CPU,
            ArchKind::Cuda => Where::CUDA,
            ArchKind::Spu => Where::SPU,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchKind::Cpu => "cpu",
            ArchKind::Cuda => "cuda",
            ArchKind::Spu => "spu",
        }
    }
}

impl fmt::Display for ArchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
