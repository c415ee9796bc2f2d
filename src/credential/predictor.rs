//! 配额耗尽预测（可选）
//!
//! 按分钟分桶记录上游调用结果，根据近期错误率和延迟推测配额水位。
//! 预测只会触发一次普通的配额报告，仍受管理器的全部守卫约束。

use crate::config::PredictorConfig;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// 置信度达到 1.0 所需的分桶数
const FULL_CONFIDENCE_BUCKETS: f64 = 10.0;

/// 配额水位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaLevel {
    High,
    Medium,
    Low,
    Critical,
    Exhausted,
}

/// 预测结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaPrediction {
    pub level: QuotaLevel,
    pub confidence: f64,
}

impl QuotaPrediction {
    /// 是否应提前切换凭证
    pub fn should_rotate(&self, min_confidence: f64) -> bool {
        self.confidence > min_confidence
            && matches!(self.level, QuotaLevel::Exhausted | QuotaLevel::Critical)
    }
}

/// 单次调用结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub quota_error: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default)]
struct Bucket {
    minute: i64,
    calls: u32,
    errors: u32,
    quota_errors: u32,
    latency_total_ms: u64,
}

/// 配额预测器
#[derive(Debug, Clone)]
pub struct QuotaPredictor {
    config: PredictorConfig,
    buckets: VecDeque<Bucket>,
}

impl QuotaPredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            buckets: VecDeque::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.config.window_secs.max(60) as i64)
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let oldest = (now - self.window()).timestamp() / 60;
        while self.buckets.front().is_some_and(|b| b.minute <= oldest) {
            self.buckets.pop_front();
        }
    }

    /// 记录一次调用
    pub fn record(&mut self, outcome: CallOutcome, now: DateTime<Utc>) {
        self.prune(now);
        let minute = now.timestamp() / 60;
        if self.buckets.back().map(|b| b.minute) != Some(minute) {
            self.buckets.push_back(Bucket {
                minute,
                ..Bucket::default()
            });
        }
        if let Some(bucket) = self.buckets.back_mut() {
            bucket.calls += 1;
            if !outcome.success {
                bucket.errors += 1;
            }
            if outcome.quota_error {
                bucket.quota_errors += 1;
            }
            bucket.latency_total_ms = bucket.latency_total_ms.saturating_add(outcome.latency_ms);
        }
    }

    /// 根据窗口内数据预测水位
    pub fn predict(&mut self, now: DateTime<Utc>) -> QuotaPrediction {
        self.prune(now);

        let calls: u32 = self.buckets.iter().map(|b| b.calls).sum();
        let confidence = (self.buckets.len() as f64 / FULL_CONFIDENCE_BUCKETS).min(1.0);
        if calls == 0 {
            return QuotaPrediction {
                level: QuotaLevel::High,
                confidence,
            };
        }

        let errors: u32 = self.buckets.iter().map(|b| b.errors).sum();
        let quota_errors: u32 = self.buckets.iter().map(|b| b.quota_errors).sum();
        let latency: u64 = self.buckets.iter().map(|b| b.latency_total_ms).sum();

        let error_rate = f64::from(errors) / f64::from(calls);
        let quota_rate = f64::from(quota_errors) / f64::from(calls);
        let avg_latency_ms = latency as f64 / f64::from(calls);

        let level = if quota_rate > 0.5 {
            QuotaLevel::Exhausted
        } else if quota_rate > 0.2 {
            QuotaLevel::Critical
        } else if error_rate > 0.7 {
            QuotaLevel::Low
        } else if error_rate > 0.3 || avg_latency_ms > 5000.0 {
            QuotaLevel::Medium
        } else {
            QuotaLevel::High
        };

        QuotaPrediction { level, confidence }
    }
}
