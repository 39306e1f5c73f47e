//! Job queues, the wake-up channel workers park on, and batch dependency
//! validation.

mod activity;
mod dependency;
mod jobq;

pub use activity::{Activity, Wakeup};
pub use dependency::DependencyGraph;
pub use jobq::JobQueue;
