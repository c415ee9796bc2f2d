//! 协议转换器 Trait 定义
//!
//! 定义请求和响应转换器的核心接口，用于在公开方言与规范化表示之间转换。
//!
//! # 设计原则
//!
//! - `RequestTranslator`: 方言请求 ⇄ `CanonicalRequest`
//! - `ResponseTranslator`: `CanonicalResponse` → 方言响应
//! - `SseResponseTranslator`: `CanonicalEvent` → 方言 SSE
//!
//! 转换器不做 I/O，也不在调用之间保存可变状态（SSE 转换器除外，
//! 其状态只属于单个流）。

use crate::error::BridgeError;
use crate::models::canonical::{CanonicalRequest, CanonicalResponse};
use crate::stream::CanonicalEvent;

/// 请求转换器 Trait
pub trait RequestTranslator {
    /// 方言请求类型
    type Request;

    /// 方言请求 → 规范化请求（包含不变量校验）
    fn translate_request(&self, request: Self::Request) -> Result<CanonicalRequest, TranslateError>;

    /// 规范化请求 → 方言请求
    fn render_request(&self, request: &CanonicalRequest) -> Result<Self::Request, TranslateError>;
}

/// 响应转换器 Trait
pub trait ResponseTranslator {
    /// 方言响应类型
    type Response;

    /// 规范化响应 → 方言响应
    fn render_response(&self, response: &CanonicalResponse) -> Self::Response;
}

/// SSE 响应转换器 Trait
///
/// 将 `CanonicalEvent` 转换为 SSE 字符串格式。
pub trait SseResponseTranslator {
    /// 将流事件转换为 SSE 字符串
    ///
    /// # 返回
    ///
    /// SSE 格式的字符串列表，每个字符串都是完整的 SSE 事件
    fn translate_to_sse(&mut self, event: &CanonicalEvent) -> Vec<String>;

    /// 生成结束 SSE 事件
    fn finalize_sse(&mut self) -> Vec<String> {
        Vec::new()
    }

    /// 重置状态
    fn reset(&mut self);
}

/// 转换错误类型
#[derive(Debug, Clone, PartialEq)]
pub struct TranslateError {
    /// 错误类型
    pub kind: TranslateErrorKind,
    /// 错误消息
    pub message: String,
    /// 原始数据（用于调试）
    pub source_data: Option<String>,
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TranslateError {}

/// 转换错误类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateErrorKind {
    /// 无效的请求格式
    InvalidRequest,
    /// 不支持的功能
    UnsupportedFeature,
    /// 缺少必要字段
    MissingField,
    /// 数据验证失败（如悬空的 tool_result 引用）
    ValidationFailed,
    /// 工具调用参数直到结束也不完整
    IncompleteToolCall,
}

impl std::fmt::Display for TranslateErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "InvalidRequest"),
            Self::UnsupportedFeature => write!(f, "UnsupportedFeature"),
            Self::MissingField => write!(f, "MissingField"),
            Self::ValidationFailed => write!(f, "ValidationFailed"),
            Self::IncompleteToolCall => write!(f, "IncompleteToolCall"),
        }
    }
}

impl TranslateError {
    /// 创建新的转换错误
    pub fn new(kind: TranslateErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source_data: None,
        }
    }

    /// 带原始数据创建错误
    pub fn with_source(
        kind: TranslateErrorKind,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source_data: Some(source.into()),
        }
    }

    /// 创建无效请求错误
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(TranslateErrorKind::InvalidRequest, message)
    }

    /// 创建不支持功能错误
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(TranslateErrorKind::UnsupportedFeature, message)
    }

    /// 创建缺少字段错误
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            TranslateErrorKind::MissingField,
            format!("Missing required field: {}", field),
        )
    }

    /// 创建校验失败错误
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(TranslateErrorKind::ValidationFailed, message)
    }

    /// 创建工具调用不完整错误
    pub fn incomplete_tool_call(message: impl Into<String>) -> Self {
        Self::new(TranslateErrorKind::IncompleteToolCall, message)
    }
}

impl From<TranslateError> for BridgeError {
    fn from(err: TranslateError) -> Self {
        match err.kind {
            TranslateErrorKind::InvalidRequest
            | TranslateErrorKind::MissingField
            | TranslateErrorKind::ValidationFailed => BridgeError::Validation(err.message),
            TranslateErrorKind::UnsupportedFeature | TranslateErrorKind::IncompleteToolCall => {
                BridgeError::Translation(err.message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_error_display() {
        let err = TranslateError::new(TranslateErrorKind::InvalidRequest, "test error");
        assert_eq!(format!("{}", err), "InvalidRequest: test error");
    }

    #[test]
    fn test_translate_error_with_source() {
        let err = TranslateError::with_source(
            TranslateErrorKind::InvalidRequest,
            "failed to parse",
            "{invalid json}",
        );
        assert!(err.source_data.is_some());
        assert_eq!(err.source_data.unwrap(), "{invalid json}");
    }

    #[test]
    fn test_missing_field_error() {
        let err = TranslateError::missing_field("model");
        assert_eq!(err.kind, TranslateErrorKind::MissingField);
        assert!(err.message.contains("model"));
    }

    #[test]
    fn test_into_bridge_error() {
        let err: BridgeError = TranslateError::validation("dangling tool_result").into();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert_eq!(err.status_code(), 400);

        let err: BridgeError = TranslateError::incomplete_tool_call("never closed").into();
        assert!(matches!(err, BridgeError::Translation(_)));
        assert_eq!(err.status_code(), 422);
    }
}
