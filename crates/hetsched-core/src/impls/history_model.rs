//! HistoryModel - 計測履歴の平均による性能モデル
//!
//! # 実装
//! - キー: (codelet 名, アーキテクチャ, フットプリント)
//! - 値: 平均実行時間とサンプル数（逐次平均で更新）
//! - サンプル数が `min_samples` 未満のキーは未校正として `None` を返す

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::{ArchKind, Job};
use crate::ports::PerfModel;
use crate::sync::lock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HistoryKey {
    codelet: String,
    arch: ArchKind,
    footprint: usize,
}

impl HistoryKey {
    fn of(job: &Job, arch: ArchKind) -> Option<Self> {
        job.codelet().map(|cl| Self {
            codelet: cl.name().to_string(),
            arch,
            footprint: job.footprint(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct History {
    mean: Duration,
    samples: u64,
}

pub struct HistoryModel {
    entries: Mutex<HashMap<HistoryKey, History>>,
    min_samples: u64,
}

impl HistoryModel {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            min_samples: 1,
        }
    }

    /// Samples needed before a key yields predictions.
    pub fn with_min_samples(mut self, min_samples: u64) -> Self {
        self.min_samples = min_samples.max(1);
        self
    }

    pub fn samples(&self, job: &Job, arch: ArchKind) -> u64 {
        HistoryKey::of(job, arch)
            .and_then(|key| lock(&self.entries).get(&key).map(|h| h.samples))
            .unwrap_or(0)
    }
}

impl Default for HistoryModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfModel for HistoryModel {
    fn predict(&self, job: &Job, arch: ArchKind) -> Option<Duration> {
        let key = HistoryKey::of(job, arch)?;
        let entries = lock(&self.entries);
        let history = entries.get(&key)?;
        (history.samples >= self.min_samples).then_some(history.mean)
    }

    fn record(&self, job: &Job, arch: ArchKind, elapsed: Duration) {
        let Some(key) = HistoryKey::of(job, arch) else {
            return;
        };
        let mut entries = lock(&self.entries);
        let history = entries.entry(key).or_insert(History {
            mean: Duration::ZERO,
            samples: 0,
        });
        history.samples += 1;

        // Incremental mean: new = prev + (sample - prev) / n
        history.mean = if history.samples == 1 {
            elapsed
        } else {
            let prev = history.mean.as_nanos() as f64;
            let cur = elapsed.as_nanos() as f64;
            let mean = prev + (cur - prev) / history.samples as f64;
            Duration::from_nanos(mean.max(0.0) as u64)
        };
    }
}
