//! 超时控制实现
//!
//! 提供请求超时和流式响应空闲超时功能

use crate::config::{TokenConfig, UpstreamConfig};
use crate::error::BridgeError;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::time::{Duration, Instant};

/// 超时配置（毫秒，0 表示无超时）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// 单次上游请求超时
    pub request_timeout_ms: u64,
    /// 流式响应中两个 chunk 之间的最长间隔
    pub stream_idle_timeout_ms: u64,
    /// 凭证获取超时
    pub acquisition_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::from_config(&UpstreamConfig::default(), &TokenConfig::default())
    }
}

impl TimeoutConfig {
    /// 从配置构造
    pub fn from_config(upstream: &UpstreamConfig, token: &TokenConfig) -> Self {
        Self {
            request_timeout_ms: upstream.request_timeout_secs.saturating_mul(1000),
            stream_idle_timeout_ms: upstream.stream_idle_timeout_secs.saturating_mul(1000),
            acquisition_timeout_ms: token.acquisition_timeout_secs.saturating_mul(1000),
        }
    }

    /// 创建无超时的配置
    pub fn no_timeout() -> Self {
        Self {
            request_timeout_ms: 0,
            stream_idle_timeout_ms: 0,
            acquisition_timeout_ms: 0,
        }
    }

    fn to_duration(ms: u64) -> Option<Duration> {
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    /// 获取请求超时 Duration
    pub fn request_timeout(&self) -> Option<Duration> {
        Self::to_duration(self.request_timeout_ms)
    }

    /// 获取流式空闲超时 Duration
    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        Self::to_duration(self.stream_idle_timeout_ms)
    }

    /// 获取凭证获取超时 Duration
    pub fn acquisition_timeout(&self) -> Option<Duration> {
        Self::to_duration(self.acquisition_timeout_ms)
    }
}

/// 超时错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    /// 操作超时
    #[error("{operation} 超时: 配置 {timeout_ms}ms, 已耗时 {elapsed_ms}ms")]
    Elapsed {
        operation: &'static str,
        timeout_ms: u64,
        elapsed_ms: u64,
    },
    /// 流式响应空闲超时
    #[error("流式响应空闲超时: 配置 {timeout_ms}ms")]
    StreamIdle { timeout_ms: u64 },
}

impl From<TimeoutError> for BridgeError {
    fn from(err: TimeoutError) -> Self {
        BridgeError::transient(err.to_string())
    }
}

/// 带超时执行异步操作，`timeout` 为 `None` 时不限时
pub async fn with_timeout<F, T>(
    operation: &'static str,
    timeout: Option<Duration>,
    fut: F,
) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    let Some(limit) = timeout else {
        return Ok(fut.await);
    };

    let start = Instant::now();
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimeoutError::Elapsed {
            operation,
            timeout_ms: limit.as_millis() as u64,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
}

/// 读取流的下一个元素，超过空闲时间返回错误
pub async fn next_with_idle_timeout<S>(
    stream: &mut S,
    idle: Option<Duration>,
) -> Result<Option<S::Item>, TimeoutError>
where
    S: Stream + Unpin,
{
    match idle {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| TimeoutError::StreamIdle {
                timeout_ms: limit.as_millis() as u64,
            }),
        None => Ok(stream.next().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = TimeoutConfig::default();
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(180)));
        assert_eq!(config.stream_idle_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.acquisition_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(TimeoutConfig::no_timeout().request_timeout(), None);
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed() {
        let result = with_timeout(
            "upstream",
            Some(Duration::from_millis(10)),
            tokio::time::sleep(Duration::from_millis(200)),
        )
        .await;
        match result {
            Err(TimeoutError::Elapsed { operation, timeout_ms, .. }) => {
                assert_eq!(operation, "upstream");
                assert_eq!(timeout_ms, 10);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passthrough() {
        assert_eq!(with_timeout("noop", None, async { 7 }).await, Ok(7));
        assert_eq!(
            with_timeout("fast", Some(Duration::from_secs(1)), async { 8 }).await,
            Ok(8)
        );
    }

    #[tokio::test]
    async fn test_idle_timeout_on_stalled_stream() {
        let mut stalled = futures::stream::pending::<u8>();
        let result = next_with_idle_timeout(&mut stalled, Some(Duration::from_millis(10))).await;
        assert!(matches!(result, Err(TimeoutError::StreamIdle { timeout_ms: 10 })));

        let mut ready = futures::stream::iter(vec![1u8]);
        assert_eq!(next_with_idle_timeout(&mut ready, None).await, Ok(Some(1)));
        assert_eq!(next_with_idle_timeout(&mut ready, None).await, Ok(None));
    }

    #[test]
    fn test_timeout_is_transient() {
        let err: BridgeError = TimeoutError::StreamIdle { timeout_ms: 5 }.into();
        assert!(err.is_retryable());
    }
}
