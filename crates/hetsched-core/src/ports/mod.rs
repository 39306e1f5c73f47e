//! Ports - スケジューラ中核と外部コラボレータの境界
//!
//! 中核はここで定義した trait だけを呼び出します。
//! デフォルト実装は `impls` にあり、`SchedulerBuilder` で差し替え可能です。
//!
//! # 境界
//! - 終了処理（後続ジョブの解放）
//! - メモリノード間のデータ要求の処理
//! - 性能モデル（実行時間予測）
//! - バスモデル（転送時間予測）

pub mod bus;
pub mod data_requests;
pub mod perf_model;
pub mod termination;

pub use self::bus::BusModel;
pub use self::data_requests::{DataRequestDrain, NoPendingRequests};
pub use self::perf_model::PerfModel;
pub use self::termination::TerminationHandler;
