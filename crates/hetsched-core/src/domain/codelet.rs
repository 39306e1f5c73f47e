//! Codelets: the executable bodies a job runs, one kernel per device kind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::arch::{ArchKind, Where};
use super::data::BufferDesc;
use super::ids::WorkerId;

/// What a kernel sees while it runs.
pub struct ExecContext<'a> {
    pub worker: WorkerId,
    pub arch: ArchKind,
    pub buffers: &'a [BufferDesc],
    pub cl_arg: &'a serde_json::Value,
}

pub type Kernel = Arc<dyn Fn(&ExecContext<'_>) + Send + Sync>;

/// The implementation(s) of one computation.
///
/// The set of architectures a codelet can run on is exactly the set of
/// kernels it carries.
#[derive(Clone)]
pub struct Codelet {
    name: String,
    kernels: BTreeMap<ArchKind, Kernel>,
}

impl Codelet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kernels: BTreeMap::new(),
        }
    }

    /// Add (or replace) the kernel for `arch`.
    pub fn with_kernel<F>(mut self, arch: ArchKind, kernel: F) -> Self
    where
        F: Fn(&ExecContext<'_>) + Send + Sync + 'static,
    {
        self.kernels.insert(arch, Arc::new(kernel));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn where_mask(&self) -> Where {
        self.kernels
            .keys()
            .fold(Where::empty(), |mask, arch| mask | arch.mask())
    }

    pub fn can_run_on(&self, arch: ArchKind) -> bool {
        self.kernels.contains_key(&arch)
    }

    pub fn kernel(&self, arch: ArchKind) -> Option<&Kernel> {
        self.kernels.get(&arch)
    }
}

impl fmt::Debug for Codelet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codelet")
            .field("name", &self.name)
            .field("where", &self.where_mask())
            .finish()
    }
}
