//! 凭证签发限流
//!
//! 小时/天两个滑动窗口、最小请求间隔，以及由连续失败次数驱动的指数冷却。
//! 只由 `TokenManager` 在锁内访问。

use crate::config::RateLimitConfig;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::VecDeque;

/// 冷却随机抖动上限（冷却时长的比例）
const JITTER_FRACTION: f64 = 0.1;

/// 限流判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Denied { reason: String, retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}

/// 签发请求限流器
#[derive(Debug, Clone)]
pub struct AcquisitionRateLimiter {
    config: RateLimitConfig,
    /// 最近 24 小时内的签发时间（升序）
    attempts: VecDeque<DateTime<Utc>>,
    consecutive_failures: u32,
    cooldown_until: Option<DateTime<Utc>>,
}

impl AcquisitionRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            attempts: VecDeque::new(),
            consecutive_failures: 0,
            cooldown_until: None,
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let day_ago = now - Duration::days(1);
        while self.attempts.front().is_some_and(|t| *t <= day_ago) {
            self.attempts.pop_front();
        }
        if self.cooldown_until.is_some_and(|until| until <= now) {
            self.cooldown_until = None;
        }
    }

    /// 窗口内的签发次数
    pub fn attempts_within(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let since = now - window;
        self.attempts.iter().filter(|t| **t > since).count()
    }

    /// 判断当前是否允许签发
    pub fn check(&mut self, now: DateTime<Utc>) -> RateLimitDecision {
        self.prune(now);

        if let Some(until) = self.cooldown_until {
            return RateLimitDecision::Denied {
                reason: format!(
                    "连续失败 {} 次，冷却中",
                    self.consecutive_failures
                ),
                retry_after: until - now,
            };
        }

        let hour = Duration::hours(1);
        let hourly: Vec<&DateTime<Utc>> = self
            .attempts
            .iter()
            .filter(|t| **t > now - hour)
            .collect();
        if hourly.len() >= self.config.max_per_hour as usize {
            let oldest = hourly.first().map(|t| **t).unwrap_or(now);
            return RateLimitDecision::Denied {
                reason: format!("超过每小时签发上限 {}", self.config.max_per_hour),
                retry_after: oldest + hour - now,
            };
        }

        if self.attempts.len() >= self.config.max_per_day as usize {
            let oldest = self.attempts.front().copied().unwrap_or(now);
            return RateLimitDecision::Denied {
                reason: format!("超过每日签发上限 {}", self.config.max_per_day),
                retry_after: oldest + Duration::days(1) - now,
            };
        }

        if let Some(last) = self.attempts.back() {
            let min_interval = Duration::seconds(self.config.min_interval_secs as i64);
            let elapsed = now - *last;
            if elapsed < min_interval {
                return RateLimitDecision::Denied {
                    reason: format!(
                        "距上次签发不足 {} 秒",
                        self.config.min_interval_secs
                    ),
                    retry_after: min_interval - elapsed,
                };
            }
        }

        RateLimitDecision::Allowed
    }

    /// 记录一次签发请求
    pub fn record_attempt(&mut self, now: DateTime<Utc>) {
        self.prune(now);
        self.attempts.push_back(now);
    }

    /// 记录成功，清零连续失败计数
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.cooldown_until = None;
    }

    /// 记录失败，超过阈值时进入冷却，返回冷却结束时间
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures < self.config.failure_threshold {
            return None;
        }

        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        let cooldown = cooldown_duration(&self.config, self.consecutive_failures, jitter);
        let until = now + cooldown;
        self.cooldown_until = Some(until);
        tracing::warn!(
            "[RATE_LIMIT] 连续失败 {} 次，进入冷却 {} 秒",
            self.consecutive_failures,
            cooldown.num_seconds()
        );
        Some(until)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// 当前冷却结束时间
    pub fn cooldown_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cooldown_until.filter(|until| *until > now)
    }
}

/// 冷却时长：`base × 2^min(failures - threshold, cap)`，加抖动后不超过上限
pub fn cooldown_duration(config: &RateLimitConfig, failures: u32, jitter_fraction: f64) -> Duration {
    let exponent = failures
        .saturating_sub(config.failure_threshold)
        .min(config.max_backoff_exponent)
        .min(31);
    let base_ms = config.base_cooldown_secs.saturating_mul(1000) as f64;
    let raw_ms = base_ms * f64::from(1u32 << exponent);
    let jittered_ms = raw_ms * (1.0 + jitter_fraction.clamp(0.0, 1.0));
    let capped_ms = jittered_ms.min(config.max_cooldown_secs.saturating_mul(1000) as f64);
    Duration::milliseconds(capped_ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            max_per_hour: 3,
            max_per_day: 5,
            min_interval_secs: 0,
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn test_hourly_window_slides() {
        let mut limiter = AcquisitionRateLimiter::new(config());
        let start = Utc::now();
        for i in 0..3 {
            let t = start + Duration::minutes(i);
            assert!(limiter.check(t).is_allowed());
            limiter.record_attempt(t);
        }
        assert!(!limiter.check(start + Duration::minutes(10)).is_allowed());
        // 第一次签发滑出窗口后恢复
        assert!(limiter.check(start + Duration::minutes(61)).is_allowed());
    }

    #[test]
    fn test_daily_limit() {
        let mut limiter = AcquisitionRateLimiter::new(config());
        let start = Utc::now();
        for i in 0..5 {
            limiter.record_attempt(start + Duration::hours(2 * i));
        }
        let later = start + Duration::hours(10);
        match limiter.check(later) {
            RateLimitDecision::Denied { reason, .. } => assert!(reason.contains("每日")),
            other => panic!("unexpected decision: {:?}", other),
        }
        assert!(limiter.check(start + Duration::hours(25)).is_allowed());
    }

    #[test]
    fn test_min_interval() {
        let mut limiter = AcquisitionRateLimiter::new(RateLimitConfig {
            min_interval_secs: 60,
            ..config()
        });
        let start = Utc::now();
        limiter.record_attempt(start);
        match limiter.check(start + Duration::seconds(20)) {
            RateLimitDecision::Denied { retry_after, .. } => {
                assert_eq!(retry_after.num_seconds(), 40)
            }
            other => panic!("unexpected decision: {:?}", other),
        }
        assert!(limiter.check(start + Duration::seconds(61)).is_allowed());
    }

    #[test]
    fn test_failures_trigger_cooldown() {
        let mut limiter = AcquisitionRateLimiter::new(config());
        let now = Utc::now();
        for _ in 0..4 {
            assert!(limiter.record_failure(now).is_none());
        }
        let until = limiter.record_failure(now).unwrap();
        assert!(until - now >= Duration::seconds(300));
        assert!(!limiter.check(now).is_allowed());
        assert_eq!(limiter.cooldown_until(now), Some(until));

        limiter.record_success();
        assert_eq!(limiter.consecutive_failures(), 0);
        assert!(limiter.check(now).is_allowed());
    }

    #[test]
    fn test_cooldown_growth() {
        let config = RateLimitConfig::default();
        assert_eq!(cooldown_duration(&config, 5, 0.0), Duration::seconds(300));
        assert_eq!(cooldown_duration(&config, 6, 0.0), Duration::seconds(600));
        assert_eq!(cooldown_duration(&config, 7, 0.0), Duration::seconds(1200));
        assert_eq!(cooldown_duration(&config, 8, 0.0), Duration::seconds(2400));
        assert_eq!(cooldown_duration(&config, 9, 0.0), Duration::seconds(3600));
        assert_eq!(cooldown_duration(&config, 50, 0.1), Duration::seconds(3600));
    }

    proptest! {
        #[test]
        fn prop_cooldown_never_exceeds_cap(failures in 0u32..1000, jitter in 0.0f64..1.0) {
            let config = RateLimitConfig::default();
            let cooldown = cooldown_duration(&config, failures, jitter);
            prop_assert!(cooldown <= Duration::seconds(config.max_cooldown_secs as i64));
            prop_assert!(cooldown >= Duration::zero());
        }
    }
}
