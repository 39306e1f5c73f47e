//! hetsched-core
//!
//! Task scheduling core for a heterogeneous (CPU + accelerator) runtime.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, arch, codelet, data, job, state）
//! - **queue**: ジョブキュー、ワーカーが待機する Activity、依存グラフの検証
//! - **policy**: スケジューリングポリシー（eager, no-prio, prio, random, ws, dm, dmda）と registry
//! - **sched**: Scheduler ファサード（submit / push / pop / wait_for_event / shutdown）
//! - **ports**: 抽象化レイヤー（TerminationHandler, DataRequestDrain, PerfModel, BusModel）
//! - **impls**: ports の既定実装（ReleaseSuccessors, HistoryModel, UniformBus）
//! - **graph**: ジョブ DAG の一括投入
//! - **worker**: ワーカースレッド（WorkerPool）
//! - **config / error / observability**: 設定、エラー型、統計スナップショット

pub mod config;
pub mod domain;
pub mod error;
pub mod graph;
pub mod impls;
pub mod observability;
pub mod policy;
pub mod ports;
pub mod queue;
pub mod sched;
pub mod worker;

mod sync;

pub use config::{MachineConfig, SCHED_ENV, SchedConf, WorkerDesc};
pub use error::SchedError;
pub use graph::JobGraph;
pub use policy::{Caller, PolicyRegistry, SchedPolicy};
pub use sched::{Scheduler, SchedulerBuilder, Submission};
pub use worker::WorkerPool;
