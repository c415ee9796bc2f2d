//! 后端调用层 Trait 定义
//!
//! 定义后端 HTTP 调用的核心接口。
//! 后端层只负责 HTTP 请求/响应，不包含任何协议转换逻辑。

use crate::credential::ActiveToken;
use crate::error::BridgeError;
use crate::resilience::FailureType;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// 字节流类型
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send>>;

/// 后端调用结果
pub type BackendResult<T> = Result<T, BackendError>;

/// 后端错误类型
#[derive(Debug, Clone, PartialEq)]
pub struct BackendError {
    /// 错误类型
    pub kind: BackendErrorKind,
    /// 错误消息
    pub message: String,
    /// HTTP 状态码（如果有）
    pub status_code: Option<u16>,
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(code) = self.status_code {
            write!(f, "{} ({}): {}", self.kind, code, self.message)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for BackendError {}

/// 后端错误类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// 认证错误
    AuthenticationError,
    /// 配额耗尽（带配额措辞）
    QuotaExhausted,
    /// 网络错误
    NetworkError,
    /// 请求超时
    Timeout,
    /// 服务端错误
    ServerError,
    /// 请求格式错误
    BadRequest,
    /// 不带配额措辞的速率限制
    RateLimited,
    /// 其他错误
    Other,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthenticationError => write!(f, "AuthenticationError"),
            Self::QuotaExhausted => write!(f, "QuotaExhausted"),
            Self::NetworkError => write!(f, "NetworkError"),
            Self::Timeout => write!(f, "Timeout"),
            Self::ServerError => write!(f, "ServerError"),
            Self::BadRequest => write!(f, "BadRequest"),
            Self::RateLimited => write!(f, "RateLimited"),
            Self::Other => write!(f, "Other"),
        }
    }
}

impl BackendError {
    /// 创建新的后端错误
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    /// 带 HTTP 状态码创建错误
    pub fn with_status(kind: BackendErrorKind, message: impl Into<String>, status: u16) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: Some(status),
        }
    }

    /// 从 HTTP 状态码和响应体推断错误类型
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = match FailureType::detect(Some(status), &message) {
            FailureType::QuotaExhausted => BackendErrorKind::QuotaExhausted,
            FailureType::RateLimited => BackendErrorKind::RateLimited,
            FailureType::AuthenticationFailed => BackendErrorKind::AuthenticationError,
            FailureType::ServiceUnavailable => BackendErrorKind::ServerError,
            FailureType::Other if status == 400 => BackendErrorKind::BadRequest,
            FailureType::Other => BackendErrorKind::Other,
        };
        Self::with_status(kind, message, status)
    }

    /// 是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            BackendErrorKind::NetworkError
                | BackendErrorKind::Timeout
                | BackendErrorKind::ServerError
                | BackendErrorKind::RateLimited
        )
    }

    /// 是否应触发凭证更换
    pub fn is_quota_signal(&self) -> bool {
        self.kind == BackendErrorKind::QuotaExhausted
    }
}

impl From<BackendError> for BridgeError {
    fn from(err: BackendError) -> Self {
        if err.is_retryable() {
            BridgeError::UpstreamTransient {
                message: err.to_string(),
                status: err.status_code,
            }
        } else if err.is_quota_signal() {
            BridgeError::QuotaExhausted {
                attempts: 1,
                message: err.message,
            }
        } else {
            BridgeError::Upstream {
                status: err.status_code.unwrap_or(502),
                message: err.message,
            }
        }
    }
}

/// 后端 Trait
///
/// 上游总是以 SSE 字节流返回；缓冲响应由调用方聚合。
#[async_trait]
pub trait Backend: Send + Sync {
    /// 后端请求类型
    type Request: Send + Sync;

    /// 流式调用
    ///
    /// 返回的流被丢弃时，底层连接随之关闭。
    async fn call_stream(
        &self,
        request: &Self::Request,
        token: &ActiveToken,
    ) -> BackendResult<ByteStream>;

    /// 获取后端名称
    fn name(&self) -> &str;
}
