//! Impls - ports のデフォルト実装
//!
//! # 含まれる実装
//! - **ReleaseSuccessors**: 後続ジョブを解放するデフォルトの終了処理
//! - **HistoryModel**: 履歴（平均実行時間）ベースの性能モデル
//! - **UniformBus**: レイテンシ + 帯域の一様なバスモデル

pub mod history_model;
pub mod release;
pub mod uniform_bus;

pub use self::history_model::HistoryModel;
pub use self::release::ReleaseSuccessors;
pub use self::uniform_bus::UniformBus;
