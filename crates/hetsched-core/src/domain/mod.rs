//! Domain model: ids, device kinds, codelets, data handles, jobs.

pub mod arch;
pub mod codelet;
pub mod data;
pub mod ids;
pub mod job;
pub mod state;

pub use arch::{ArchKind, Where};
pub use codelet::{Codelet, ExecContext, Kernel};
pub use data::{AccessMode, BufferDesc, DataHandle};
pub use ids::{HandleId, JobId, MemoryNode, QueueId, WorkerId};
pub use job::{Callback, DEFAULT_PRIO, Job, JobBuilder, MAX_PRIO, MIN_PRIO};
pub use state::JobState;
