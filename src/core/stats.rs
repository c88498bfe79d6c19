//! 使用统计：进程生命周期内所有调用共享的计数器
//!
//! 每个计数器是独立的原子整数，执行时间以微秒累加；并发调用下不会丢失更新。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 共享的调用统计（Arc 包装后跨调用共享）
#[derive(Debug, Default)]
pub struct UsageStatistics {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    total_execution_micros: AtomicU64,
    last_query_time: Mutex<Option<DateTime<Utc>>>,
}

/// 某一时刻的统计快照（可序列化给 status 接口）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub success_rate_percent: f64,
    pub total_execution_time: f64,
    pub average_execution_time: f64,
    pub last_query_time: Option<DateTime<Utc>>,
}

impl UsageStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次调用开始
    pub fn record_start(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_query_time.lock() {
            *last = Some(Utc::now());
        }
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.successful.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_execution_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total_secs = self.total_execution_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let success_rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let average = if successful > 0 {
            total_secs / successful as f64
        } else {
            0.0
        };
        let last_query_time = self.last_query_time.lock().ok().and_then(|g| *g);

        UsageSnapshot {
            total_queries: total,
            successful_queries: successful,
            failed_queries: failed,
            success_rate_percent: round2(success_rate),
            total_execution_time: round2(total_secs),
            average_execution_time: round2(average),
            last_query_time,
        }
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
