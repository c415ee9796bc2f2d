//! 配额重试实现
//!
//! 上游报告配额耗尽后，调用方先通知凭证管理器，再按线性递增的间隔重试：
//! `base_delay + n * increment`（默认 3s, 5s, 7s, 9s）。
//! 流式请求已经占用一个打开的连接，重试次数更少。

use crate::config::QuotaRetryConfig;
use crate::error::BridgeError;
use std::future::Future;
use std::time::Duration;

/// 响应模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// 完整缓冲后返回
    Buffered,
    /// 流式返回
    Streaming,
}

/// 单次尝试的失败分类
#[derive(Debug, Clone)]
pub enum AttemptError {
    /// 配额耗尽，已经通知过凭证管理器
    Quota(String),
    /// 网络错误、超时等暂时性错误
    Transient(BridgeError),
    /// 不可重试的错误，立即返回
    Fatal(BridgeError),
}

/// 配额重试策略
#[derive(Debug, Clone)]
pub struct QuotaRetryPolicy {
    config: QuotaRetryConfig,
}

impl QuotaRetryPolicy {
    /// 创建新的重试策略
    pub fn new(config: QuotaRetryConfig) -> Self {
        Self { config }
    }

    /// 获取配置
    pub fn config(&self) -> &QuotaRetryConfig {
        &self.config
    }

    /// 指定模式下的最大尝试次数（包括首次请求）
    pub fn max_attempts(&self, mode: ResponseMode) -> u32 {
        match mode {
            ResponseMode::Buffered => self.config.buffered_max_attempts,
            ResponseMode::Streaming => self.config.streaming_max_attempts,
        }
        .max(1)
    }

    /// 第 `retry_index` 次重试前的等待时间（从 0 开始）
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let millis = self
            .config
            .base_delay_ms
            .saturating_add(self.config.increment_ms.saturating_mul(retry_index as u64));
        Duration::from_millis(millis)
    }

    /// 指定模式下所有重试间隔
    pub fn delay_sequence(&self, mode: ResponseMode) -> Vec<Duration> {
        (0..self.max_attempts(mode).saturating_sub(1))
            .map(|i| self.delay_for(i))
            .collect()
    }

    /// 带重试执行异步操作
    ///
    /// `operation` 接收从 1 开始的尝试序号。配额类失败耗尽预算后返回
    /// `QuotaExhausted`；暂时性失败耗尽预算后返回最后一次错误。
    pub async fn execute<F, Fut, T>(&self, mode: ResponseMode, mut operation: F) -> Result<T, BridgeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let max_attempts = self.max_attempts(mode);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let failure = match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(failure) => failure,
            };

            if attempt >= max_attempts {
                tracing::warn!(
                    "[RETRY] 重试耗尽: mode={:?}, attempts={}",
                    mode,
                    attempt
                );
                return Err(match failure {
                    AttemptError::Quota(message) => BridgeError::QuotaExhausted {
                        attempts: attempt,
                        message,
                    },
                    AttemptError::Transient(e) | AttemptError::Fatal(e) => e,
                });
            }

            let delay = self.delay_for(attempt - 1);
            tracing::info!(
                "[RETRY] 第 {} 次尝试失败 ({:?})，{}ms 后重试",
                attempt,
                failure,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}
